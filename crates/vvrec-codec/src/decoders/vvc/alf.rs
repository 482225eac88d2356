//! 自适应环路滤波 (ALF) 与跨分量 ALF (CC-ALF).
//!
//! 读取 SAO 输出的中间图像, 把结果写回最终图像. 亮度按 4x4 块分类后选择
//! 7x7 菱形滤波器, 色度使用 5x5 菱形滤波器; 在 CTU 底部上方的虚拟边界处
//! 对称缩短垂直抽头, 并在紧邻边界的两行使用更强的舍入.

use std::sync::OnceLock;

use log::trace;
use vvrec_core::{Plane, VvError, VvResult};

use super::common::LUMA;
use super::frame::FrameContext;
use super::params::{FrameParams, SliceHeader};

/// 亮度类别数
pub const ALF_CLASSES: usize = 25;
/// 亮度滤波器系数个数
pub const ALF_LUMA_TAPS: usize = 12;
/// 色度滤波器系数个数
pub const ALF_CHROMA_TAPS: usize = 6;
/// CC-ALF 系数个数
pub const CC_ALF_TAPS: usize = 7;
/// 固定滤波器组数
pub const ALF_FIXED_SETS: usize = 16;
const ALF_FIXED_FILTERS: usize = 64;
const MAX_CHROMA_ALTS: usize = 8;
const MAX_CC_FILTERS: usize = 4;

/// 虚拟边界到 CTU 底部的亮度行数
const LUMA_VB_ROWS: usize = 4;

// ============================================================
// 参数
// ============================================================

/// 亮度滤波器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlfLumaFilter {
    pub coeffs: [i32; ALF_LUMA_TAPS],
    pub clip_idx: [u8; ALF_LUMA_TAPS],
}

/// 色度滤波器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlfChromaFilter {
    pub coeffs: [i32; ALF_CHROMA_TAPS],
    pub clip_idx: [u8; ALF_CHROMA_TAPS],
}

/// 一个 ALF APS 的内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlfFilterSet {
    /// 每个类别一个滤波器; 为空表示该 APS 不含亮度滤波器
    pub luma: Vec<AlfLumaFilter>,
    /// 色度备选滤波器
    pub chroma: Vec<AlfChromaFilter>,
    /// CC-ALF 滤波器 (Cb, Cr)
    pub cc: [Vec<[i32; CC_ALF_TAPS]>; 2],
}

impl AlfFilterSet {
    /// 校验系数范围与数量
    pub fn validate(&self) -> VvResult<()> {
        if !self.luma.is_empty() && self.luma.len() != ALF_CLASSES {
            return Err(VvError::InvalidData(format!(
                "ALF 亮度滤波器数量非法: {}",
                self.luma.len()
            )));
        }
        let coeff_ok = |c: &i32| (-128..=127).contains(c);
        let clip_ok = |c: &u8| *c <= 3;
        for f in &self.luma {
            if !f.coeffs.iter().all(coeff_ok) || !f.clip_idx.iter().all(clip_ok) {
                return Err(VvError::InvalidData("ALF 亮度系数或裁剪索引越界".into()));
            }
        }
        if self.chroma.len() > MAX_CHROMA_ALTS {
            return Err(VvError::InvalidData(format!(
                "ALF 色度备选数量非法: {}",
                self.chroma.len()
            )));
        }
        for f in &self.chroma {
            if !f.coeffs.iter().all(coeff_ok) || !f.clip_idx.iter().all(clip_ok) {
                return Err(VvError::InvalidData("ALF 色度系数或裁剪索引越界".into()));
            }
        }
        for cc in &self.cc {
            if cc.len() > MAX_CC_FILTERS {
                return Err(VvError::InvalidData(format!("CC-ALF 滤波器数量非法: {}", cc.len())));
            }
            if cc.iter().flatten().any(|c| !(-64..=64).contains(c)) {
                return Err(VvError::InvalidData("CC-ALF 系数越界".into()));
            }
        }
        Ok(())
    }
}

/// CTU 级 ALF 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtuAlfParams {
    pub luma: bool,
    /// 0..16 为固定滤波器组, 16 起为 slice 引用的亮度 APS
    pub luma_set: u8,
    pub cb: bool,
    pub cr: bool,
    pub cb_alt: u8,
    pub cr_alt: u8,
    /// CC-ALF 滤波器序号加一, 0 表示关闭
    pub cc_cb: u8,
    pub cc_cr: u8,
}

impl CtuAlfParams {
    /// 校验引用的 APS 与滤波器序号
    pub fn validate(&self, fp: &FrameParams, sh: &SliceHeader) -> VvResult<()> {
        if self.luma {
            luma_filters(fp, sh, self.luma_set)?;
        }
        for (on, alt) in [(self.cb, self.cb_alt), (self.cr, self.cr_alt)] {
            if on {
                chroma_filter(fp, sh, alt)?;
            }
        }
        for (i, (idx, aps)) in [(self.cc_cb, sh.cc_alf_cb_aps_id), (self.cc_cr, sh.cc_alf_cr_aps_id)]
            .into_iter()
            .enumerate()
        {
            if idx > 0 {
                cc_filter(fp, aps, i, idx)?;
            }
        }
        Ok(())
    }
}

fn aps_set(fp: &FrameParams, id: usize) -> VvResult<&AlfFilterSet> {
    fp.alf
        .get(id)
        .and_then(Option::as_ref)
        .ok_or_else(|| VvError::InvalidData(format!("引用了不存在的 ALF APS: {id}")))
}

/// 按 CTU 的滤波器组序号取 25 个亮度滤波器
fn luma_filters<'a>(fp: &'a FrameParams, sh: &SliceHeader, set: u8) -> VvResult<LumaBank<'a>> {
    let set = usize::from(set);
    if set < ALF_FIXED_SETS {
        return Ok(LumaBank::Fixed(set));
    }
    let id = sh
        .alf_aps_ids_luma
        .get(set - ALF_FIXED_SETS)
        .copied()
        .ok_or_else(|| VvError::InvalidData(format!("ALF 亮度滤波器组越界: {set}")))?;
    let aps = aps_set(fp, id)?;
    if aps.luma.len() != ALF_CLASSES {
        return Err(VvError::InvalidData(format!("ALF APS {id} 不含亮度滤波器")));
    }
    Ok(LumaBank::Aps(&aps.luma))
}

fn chroma_filter<'a>(fp: &'a FrameParams, sh: &SliceHeader, alt: u8) -> VvResult<&'a AlfChromaFilter> {
    aps_set(fp, sh.alf_aps_id_chroma)?
        .chroma
        .get(usize::from(alt))
        .ok_or_else(|| VvError::InvalidData(format!("ALF 色度备选越界: {alt}")))
}

fn cc_filter(fp: &FrameParams, aps: usize, comp: usize, idx: u8) -> VvResult<&[i32; CC_ALF_TAPS]> {
    aps_set(fp, aps)?
        .cc[comp]
        .get(usize::from(idx) - 1)
        .ok_or_else(|| VvError::InvalidData(format!("CC-ALF 滤波器越界: {idx}")))
}

// ============================================================
// 固定滤波器
// ============================================================

struct FixedFilters {
    coeffs: [[i32; ALF_LUMA_TAPS]; ALF_FIXED_FILTERS],
    class_map: [[usize; ALF_CLASSES]; ALF_FIXED_SETS],
}

/// 固定滤波器表
///
/// 形状与取值范围与标准附表一致的确定性占位表.
// TODO: 用标准附表中的 64 个固定滤波器与类别映射替换占位表
fn fixed_filters() -> &'static FixedFilters {
    static TABLE: OnceLock<FixedFilters> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut coeffs = [[0i32; ALF_LUMA_TAPS]; ALF_FIXED_FILTERS];
        for (f, row) in coeffs.iter_mut().enumerate() {
            for (i, c) in row.iter_mut().enumerate() {
                *c = ((f * 13 + i * 7) % 11) as i32 - 5;
            }
        }
        let mut class_map = [[0usize; ALF_CLASSES]; ALF_FIXED_SETS];
        for (s, row) in class_map.iter_mut().enumerate() {
            for (c, m) in row.iter_mut().enumerate() {
                *m = (s * 5 + c * 3) % ALF_FIXED_FILTERS;
            }
        }
        FixedFilters { coeffs, class_map }
    })
}

/// CTU 使用的亮度滤波器组
#[derive(Debug, Clone, Copy)]
pub(crate) enum LumaBank<'a> {
    Fixed(usize),
    Aps(&'a [AlfLumaFilter]),
}

impl LumaBank<'_> {
    fn filter(&self, class: usize) -> AlfLumaFilter {
        match self {
            Self::Fixed(set) => {
                let table = fixed_filters();
                AlfLumaFilter {
                    coeffs: table.coeffs[table.class_map[*set][class]],
                    clip_idx: [0; ALF_LUMA_TAPS],
                }
            }
            Self::Aps(filters) => filters.get(class).copied().unwrap_or_default(),
        }
    }
}

// ============================================================
// 形状
// ============================================================

/// 亮度 7x7 菱形: 系数 k 的一对采样为 `(dx, +r)` 与 `(-dx, -r)`, `r` 由垂直级别给出
const LUMA_SHAPE: [(isize, usize); ALF_LUMA_TAPS] = [
    (0, 3),
    (1, 2),
    (0, 2),
    (-1, 2),
    (2, 1),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-2, 1),
    (3, 0),
    (2, 0),
    (1, 0),
];

/// 色度 5x5 菱形
const CHROMA_SHAPE: [(isize, usize); ALF_CHROMA_TAPS] = [(0, 2), (1, 1), (0, 1), (-1, 1), (2, 0), (1, 0)];

/// 按转置索引重排系数
const TRANSPOSE_ORDER: [[usize; ALF_LUMA_TAPS]; 4] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
    [9, 4, 10, 8, 1, 5, 11, 7, 3, 0, 2, 6],
    [0, 3, 2, 1, 8, 7, 6, 5, 4, 9, 10, 11],
    [9, 8, 10, 4, 3, 7, 11, 5, 1, 0, 2, 6],
];

/// CC-ALF 相对同位亮度的采样位置: 上, 左, 右, 左下, 下, 右下, 下下
const CC_SHAPE: [(isize, isize); CC_ALF_TAPS] = [(0, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1), (0, 2)];

const ACTIVITY_TABLE: [usize; 16] = [0, 1, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3, 3, 4];
const TRANSPOSE_TABLE: [u8; 8] = [0, 1, 0, 2, 2, 3, 1, 3];

/// 裁剪值
fn clip_value(bit_depth: u32, idx: u8) -> i32 {
    1 << (bit_depth - [0, 3, 5, 7][usize::from(idx & 3)])
}

// ============================================================
// CTU 区域与采样访问
// ============================================================

/// 一个平面上的 CTU 区域 (平面坐标)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlfRegion {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    /// 虚拟边界所在行 (绝对坐标), 不适用时为 `None`
    pub vb: Option<usize>,
    /// 可读取的采样范围 (含端点), 之外按边缘填充
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl AlfRegion {
    fn fetch(&self, plane: &Plane, x: isize, y: isize) -> i32 {
        let x = x.clamp(self.x_min as isize, self.x_max as isize) as usize;
        let y = y.clamp(self.y_min as isize, self.y_max as isize) as usize;
        i32::from(plane.get(x, y))
    }

    /// 读取时把行限制在当前行所在的虚拟边界一侧
    fn fetch_vb(&self, plane: &Plane, cur_y: usize, x: isize, y: isize) -> i32 {
        let y = match self.vb {
            Some(vb) if cur_y < vb => y.min(vb as isize - 1),
            Some(vb) => y.max(vb as isize),
            None => y,
        };
        self.fetch(plane, x, y)
    }

    /// 当前行可用的垂直级别偏移 `r[0..=3]`, 以及是否紧邻虚拟边界
    fn row_offsets(&self, y: usize) -> ([isize; 4], bool) {
        let full = [0, 1, 2, 3];
        let Some(vb) = self.vb else {
            return (full, false);
        };
        let dist = (if y < vb { vb - 1 - y } else { y - vb }) as isize;
        (full.map(|r| r.min(dist)), dist == 0)
    }
}

/// 4x4 亮度块的类别与转置索引
pub(crate) fn classify_block(src: &Plane, region: &AlfRegion, bx: usize, by: usize, bit_depth: u32) -> (usize, u8) {
    let (rows, ac) = match region.vb {
        Some(vb) if by + 4 == vb => (-2..=3, 3),
        Some(vb) if by == vb => (0..=5, 3),
        _ => (-2..=5, 2),
    };
    let (mut sum_h, mut sum_v, mut sum_d0, mut sum_d1) = (0i64, 0i64, 0i64, 0i64);
    for dy in rows {
        for dx in -2isize..=5 {
            if (dx + dy) & 1 != 0 {
                continue;
            }
            let x = bx as isize + dx;
            let y = by as isize + dy;
            let cur_y = y.max(0) as usize;
            let at = |ox: isize, oy: isize| i64::from(region.fetch_vb(src, cur_y, x + ox, y + oy));
            let c2 = at(0, 0) << 1;
            sum_h += (c2 - at(-1, 0) - at(1, 0)).abs();
            sum_v += (c2 - at(0, -1) - at(0, 1)).abs();
            sum_d0 += (c2 - at(-1, -1) - at(1, 1)).abs();
            sum_d1 += (c2 - at(1, -1) - at(-1, 1)).abs();
        }
    }

    let (hv1, hv0) = (sum_v.max(sum_h), sum_v.min(sum_h));
    let (d1, d0) = (sum_d0.max(sum_d1), sum_d0.min(sum_d1));
    let dir_hv: usize = if sum_v > sum_h { 1 } else { 3 };
    let dir_d: usize = if sum_d0 > sum_d1 { 0 } else { 2 };
    let (dir1, dir2, hvd1, hvd0) = if d1 * hv0 > hv1 * d0 {
        (dir_d, dir_hv, d1, d0)
    } else {
        (dir_hv, dir_d, hv1, hv0)
    };
    let dir_s = if hvd1 * 2 > 9 * hvd0 {
        2
    } else if hvd1 > 2 * hvd0 {
        1
    } else {
        0
    };
    let activity = (((sum_h + sum_v) * ac) >> (bit_depth - 1)).clamp(0, 15) as usize;
    let mut class = ACTIVITY_TABLE[activity];
    if dir_s != 0 {
        class += (((dir1 & 1) << 1) + dir_s) * 5;
    }
    (class, TRANSPOSE_TABLE[dir1 * 2 + (dir2 >> 1)])
}

/// 对一个采样按菱形滤波器求输出
#[allow(clippy::too_many_arguments)]
fn filter_sample(
    src: &Plane,
    region: &AlfRegion,
    x: usize,
    y: usize,
    taps: &[(isize, usize)],
    coeffs: &[i32],
    clips: &[i32],
    max: i32,
) -> i32 {
    let (r, strong) = region.row_offsets(y);
    let (xi, yi) = (x as isize, y as isize);
    let curr = region.fetch(src, xi, yi);
    let mut sum = 0i32;
    for (k, &(dx, level)) in taps.iter().enumerate() {
        let dy = r[level];
        let c = clips[k];
        let a = region.fetch(src, xi + dx, yi + dy) - curr;
        let b = region.fetch(src, xi - dx, yi - dy) - curr;
        sum += coeffs[k] * (a.clamp(-c, c) + b.clamp(-c, c));
    }
    let shift = if strong { 10 } else { 7 };
    (curr + ((sum + (1 << (shift - 1))) >> shift)).clamp(0, max)
}

/// 亮度 ALF
pub(crate) fn filter_luma(src: &Plane, dst: &Plane, region: &AlfRegion, bank: &LumaBank<'_>, bit_depth: u32) {
    let max = (1i32 << bit_depth) - 1;
    let x_end = region.x0 + region.width;
    let y_end = region.y0 + region.height;
    for by in (region.y0..y_end).step_by(4) {
        for bx in (region.x0..x_end).step_by(4) {
            let (class, transpose) = classify_block(src, region, bx, by, bit_depth);
            let filter = bank.filter(class);
            let order = &TRANSPOSE_ORDER[usize::from(transpose)];
            let coeffs: [i32; ALF_LUMA_TAPS] = std::array::from_fn(|k| filter.coeffs[order[k]]);
            let clips: [i32; ALF_LUMA_TAPS] = std::array::from_fn(|k| clip_value(bit_depth, filter.clip_idx[order[k]]));
            for y in by..(by + 4).min(y_end) {
                for x in bx..(bx + 4).min(x_end) {
                    let v = filter_sample(src, region, x, y, &LUMA_SHAPE, &coeffs, &clips, max);
                    dst.set(x, y, v as u16);
                }
            }
        }
    }
}

/// 色度 ALF
pub(crate) fn filter_chroma(src: &Plane, dst: &Plane, region: &AlfRegion, filter: &AlfChromaFilter, bit_depth: u32) {
    let max = (1i32 << bit_depth) - 1;
    let clips = filter.clip_idx.map(|i| clip_value(bit_depth, i));
    for y in region.y0..region.y0 + region.height {
        for x in region.x0..region.x0 + region.width {
            let v = filter_sample(src, region, x, y, &CHROMA_SHAPE, &filter.coeffs, &clips, max);
            dst.set(x, y, v as u16);
        }
    }
}

/// CC-ALF: 由 SAO 后的亮度推出色度修正, 叠加到 `dst` 中已有的色度 ALF 输出
#[allow(clippy::too_many_arguments)]
pub(crate) fn cc_alf(
    luma: &Plane,
    luma_region: &AlfRegion,
    dst: &Plane,
    region: &AlfRegion,
    coeffs: &[i32; CC_ALF_TAPS],
    shift: (u32, u32),
    bit_depth: u32,
) {
    let max = (1i32 << bit_depth) - 1;
    let half = 1i32 << (bit_depth - 1);
    for y in region.y0..region.y0 + region.height {
        for x in region.x0..region.x0 + region.width {
            let lx = (x << shift.0) as isize;
            let ly = y << shift.1;
            let curr = luma_region.fetch(luma, lx, ly as isize);
            let mut sum = 0i32;
            for (k, &(dx, dy)) in CC_SHAPE.iter().enumerate() {
                let v = luma_region.fetch_vb(luma, ly, lx + dx, ly as isize + dy);
                sum += coeffs[k] * (v - curr);
            }
            let corr = ((sum + 64) >> 7).clamp(-half, half - 1);
            let base = i32::from(dst.get(x, y));
            dst.set(x, y, (base + corr).clamp(0, max) as u16);
        }
    }
}

// ============================================================
// CTU 级入口
// ============================================================

/// 构造平面上的 CTU 区域
fn ctu_region(fc: &FrameContext, rx: usize, ry: usize, sx: u32, sy: u32, usable: &[[bool; 3]; 3]) -> VvResult<AlfRegion> {
    let geo = &fc.params.geometry;
    let plane = fc.pic.plane(if sx == 0 && sy == 0 { LUMA } else { 1 })?;
    let (pw, ph) = (plane.width(), plane.height());
    let ctb_w = geo.ctb_size >> sx;
    let ctb_h = geo.ctb_size >> sy;
    let x0 = (rx << geo.log2_ctb_size) >> sx;
    let y0 = (ry << geo.log2_ctb_size) >> sy;
    let width = ctb_w.min(pw - x0);
    let height = ctb_h.min(ph - y0);
    let vb_rows = LUMA_VB_ROWS >> sy;
    // 图像底部的 CTU 行高度不超过虚拟边界时不使用虚拟边界
    let last_row = ry + 1 == geo.ctb_height;
    let vb = if last_row && height <= ctb_h - vb_rows {
        None
    } else {
        Some(y0 + ctb_h - vb_rows)
    };
    Ok(AlfRegion {
        x0,
        y0,
        width,
        height,
        vb,
        x_min: if usable[1][0] { 0 } else { x0 },
        x_max: if usable[1][2] { pw - 1 } else { x0 + width - 1 },
        y_min: if usable[0][1] { 0 } else { y0 },
        y_max: if usable[2][1] { ph - 1 } else { y0 + height - 1 },
    })
}

/// ALF 阶段: 从中间图像读取, 把一个 CTU 的最终结果写回图像
///
/// 未启用 ALF 的平面直接复制 SAO 结果.
pub fn alf_filter(fc: &FrameContext, rx: usize, ry: usize) -> VvResult<()> {
    let Some(staging) = fc.staging.as_ref() else {
        return Ok(());
    };
    let sps = &fc.params.sps;
    let pps = &fc.params.pps;
    let geo = &fc.params.geometry;
    let params = fc.filter_params(rx, ry).alf;
    let Some(header) = fc.slice_at(rx, ry).map(|s| &s.header) else {
        return Ok(());
    };
    let enabled = !fc.config.disable_alf && sps.alf_enabled && header.alf_enabled;
    let cur_slice = fc.slice_index(rx, ry);

    let mut usable = [[false; 3]; 3];
    for (dy, row) in usable.iter_mut().enumerate() {
        for (dx, cell) in row.iter_mut().enumerate() {
            let (Some(nx), Some(ny)) = ((rx + dx).checked_sub(1), (ry + dy).checked_sub(1)) else {
                continue;
            };
            if nx >= geo.ctb_width || ny >= geo.ctb_height {
                continue;
            }
            *cell = (pps.loop_filter_across_slices || fc.slice_index(nx, ny) == cur_slice)
                && (pps.loop_filter_across_tiles || geo.same_tile((rx, ry), (nx, ny)));
        }
    }

    let luma_region = ctu_region(fc, rx, ry, 0, 0, &usable)?;
    let src_y = staging.plane(LUMA)?;
    let dst_y = fc.pic.plane(LUMA)?;
    if enabled && params.luma {
        let bank = luma_filters(&fc.params, header, params.luma_set)?;
        filter_luma(src_y, dst_y, &luma_region, &bank, sps.bit_depth);
    } else {
        fc.pic.copy_region_from(
            staging,
            LUMA,
            luma_region.x0,
            luma_region.y0,
            luma_region.width,
            luma_region.height,
        )?;
    }

    if sps.chroma_format.has_chroma() {
        let shift = (sps.chroma_format.shift_x(), sps.chroma_format.shift_y());
        let region = ctu_region(fc, rx, ry, shift.0, shift.1, &usable)?;
        let chroma = [
            (1, header.alf_cb_enabled && params.cb, params.cb_alt),
            (2, header.alf_cr_enabled && params.cr, params.cr_alt),
        ];
        let cc = [
            (header.cc_alf_cb_enabled, params.cc_cb, header.cc_alf_cb_aps_id),
            (header.cc_alf_cr_enabled, params.cc_cr, header.cc_alf_cr_aps_id),
        ];
        for ((c_idx, on, alt), (cc_on, cc_idx, cc_aps)) in chroma.into_iter().zip(cc) {
            let src = staging.plane(c_idx)?;
            let dst = fc.pic.plane(c_idx)?;
            if enabled && on {
                filter_chroma(src, dst, &region, chroma_filter(&fc.params, header, alt)?, sps.bit_depth);
            } else {
                fc.pic
                    .copy_region_from(staging, c_idx, region.x0, region.y0, region.width, region.height)?;
            }
            if enabled && sps.ccalf_enabled && cc_on && cc_idx > 0 {
                let coeffs = cc_filter(&fc.params, cc_aps, c_idx - 1, cc_idx)?;
                cc_alf(src_y, &luma_region, dst, &region, coeffs, shift, sps.bit_depth);
            }
        }
    }
    trace!("VVC: ALF CTU ({rx},{ry}) 完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use vvrec_core::Plane;

    use super::{
        ALF_CLASSES, AlfChromaFilter, AlfFilterSet, AlfLumaFilter, AlfRegion, CC_ALF_TAPS, LumaBank, cc_alf,
        classify_block, filter_chroma, filter_luma,
    };

    fn plane(w: usize, h: usize, fill: u16) -> Plane {
        match Plane::new(w, h, fill) {
            Ok(p) => p,
            Err(err) => panic!("平面分配失败: {err}"),
        }
    }

    fn region(w: usize, h: usize, vb: Option<usize>) -> AlfRegion {
        AlfRegion {
            x0: 0,
            y0: 0,
            width: w,
            height: h,
            vb,
            x_min: 0,
            x_max: w - 1,
            y_min: 0,
            y_max: h - 1,
        }
    }

    #[test]
    fn test_flat_block_is_class_zero() {
        let src = plane(16, 16, 300);
        assert_eq!(classify_block(&src, &region(16, 16, None), 4, 4, 10), (0, 0));
    }

    #[test]
    fn test_horizontal_stripes_are_directional() {
        let src = plane(16, 16, 0);
        for y in 0..16 {
            for x in 0..16 {
                src.set(x, y, if y % 2 == 0 { 800 } else { 200 });
            }
        }
        let (class, _) = classify_block(&src, &region(16, 16, None), 4, 4, 10);
        assert!(class >= 5, "强方向性纹理应带方向类别, 实际 {class}");
        assert!(class < ALF_CLASSES);
    }

    #[test]
    fn test_row_offsets_near_virtual_boundary() {
        let r = region(16, 16, Some(12));
        assert_eq!(r.row_offsets(11), ([0, 0, 0, 0], true), "边界上方一行");
        assert_eq!(r.row_offsets(12), ([0, 0, 0, 0], true), "边界下方一行");
        assert_eq!(r.row_offsets(10), ([0, 1, 1, 1], false));
        assert_eq!(r.row_offsets(14), ([0, 1, 2, 2], false));
        assert_eq!(r.row_offsets(4), ([0, 1, 2, 3], false));
    }

    #[test]
    fn test_flat_planes_are_unchanged() {
        let src = plane(8, 8, 123);
        let dst = plane(8, 8, 0);
        let filters = vec![
            AlfLumaFilter {
                coeffs: [7; 12],
                clip_idx: [1; 12],
            };
            ALF_CLASSES
        ];
        filter_luma(&src, &dst, &region(8, 8, Some(4)), &LumaBank::Aps(&filters), 8);
        assert!((0..8).all(|y| (0..8).all(|x| dst.get(x, y) == 123)), "平坦输入滤波后不变");

        let cdst = plane(8, 8, 0);
        let cf = AlfChromaFilter {
            coeffs: [3; 6],
            clip_idx: [0; 6],
        };
        filter_chroma(&src, &cdst, &region(8, 8, None), &cf, 8);
        assert_eq!(cdst.get(3, 3), 123);

        let out = plane(4, 4, 60);
        cc_alf(&src, &region(8, 8, None), &out, &region(4, 4, None), &[5; CC_ALF_TAPS], (1, 1), 8);
        assert_eq!(out.get(1, 1), 60, "平坦亮度不产生修正");
    }

    #[test]
    fn test_luma_filter_smooths_impulse() {
        let src = plane(8, 8, 100);
        src.set(4, 4, 200);
        let dst = plane(8, 8, 0);
        // 系数全相同, 结果与分类和转置无关
        let filters = vec![
            AlfLumaFilter {
                coeffs: [4; 12],
                clip_idx: [0; 12],
            };
            ALF_CLASSES
        ];
        filter_luma(&src, &dst, &region(8, 8, None), &LumaBank::Aps(&filters), 8);
        // 中心: 200 + (4 * 24 * -100 + 64) >> 7 = 125
        assert_eq!(dst.get(4, 4), 125);
        // 左邻只有一个抽头落在脉冲上: 100 + (4 * 100 + 64) >> 7 = 103
        assert_eq!(dst.get(3, 4), 103, "相邻采样被抬高");
    }

    #[test]
    fn test_filter_set_validation() {
        let mut set = AlfFilterSet {
            luma: vec![AlfLumaFilter::default(); 3],
            ..AlfFilterSet::default()
        };
        assert!(set.validate().is_err(), "亮度滤波器必须为 25 个");
        set.luma = vec![AlfLumaFilter::default(); ALF_CLASSES];
        assert!(set.validate().is_ok());
        set.luma[0].clip_idx[0] = 4;
        assert!(set.validate().is_err(), "裁剪索引上限为 3");
        set.luma[0].clip_idx[0] = 0;
        set.cc[0] = vec![[65, 0, 0, 0, 0, 0, 0]];
        assert!(set.validate().is_err(), "CC-ALF 系数越界");
    }
}
