//! 样本自适应偏移 (SAO).
//!
//! 读取去块后的图像, 把结果写入中间图像 (staging), 因此相邻 CTU 的边界采样
//! 始终是去块后的值, 与 CTU 完成顺序无关.

use log::trace;
use vvrec_core::{Plane, VvError, VvResult};

use super::common::LUMA;
use super::frame::FrameContext;

/// SAO 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaoType {
    #[default]
    Off,
    Band,
    Edge,
}

/// 单个颜色分量的 SAO 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaoComponent {
    pub kind: SaoType,
    /// 带符号偏移 (未按位深放大); 边缘模式下前两类为正, 后两类为负
    pub offsets: [i32; 4],
    /// 带偏移的起始带 (0..32)
    pub band_position: u8,
    /// 边缘方向: 0 水平, 1 垂直, 2 135 度, 3 45 度
    pub eo_class: u8,
}

/// CTU 的 SAO 参数 (merge 已由读取器展开)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaoParams {
    pub components: [SaoComponent; 3],
}

impl SaoParams {
    /// 校验偏移范围与类别
    pub fn validate(&self, bit_depth: u32) -> VvResult<()> {
        let max_abs = (1 << (bit_depth.min(10) - 5)) - 1;
        for (c, comp) in self.components.iter().enumerate() {
            if comp.kind == SaoType::Off {
                continue;
            }
            if comp.offsets.iter().any(|o| o.abs() > max_abs) {
                return Err(VvError::InvalidData(format!(
                    "SAO 偏移越界: c={c} offsets={:?}",
                    comp.offsets
                )));
            }
            if comp.band_position > 31 || comp.eo_class > 3 {
                return Err(VvError::InvalidData(format!(
                    "SAO 参数越界: c={c} band={} eo={}",
                    comp.band_position, comp.eo_class
                )));
            }
            if comp.kind == SaoType::Edge
                && (comp.offsets[0] < 0 || comp.offsets[1] < 0 || comp.offsets[2] > 0 || comp.offsets[3] > 0)
            {
                return Err(VvError::InvalidData(format!(
                    "SAO 边缘偏移符号非法: c={c} offsets={:?}",
                    comp.offsets
                )));
            }
        }
        Ok(())
    }
}

/// 边缘方向的两个邻点偏移 `[(dx_a, dy_a), (dx_b, dy_b)]`
const EO_NEIGHBOURS: [[(isize, isize); 2]; 4] = [
    [(-1, 0), (1, 0)],
    [(0, -1), (0, 1)],
    [(-1, -1), (1, 1)],
    [(1, -1), (-1, 1)],
];

/// 平面内的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlaneRect {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

/// 边缘类别: 0 表示不修改, 1/2 为局部极小一侧, 3/4 为局部极大一侧
fn edge_category(s: i32, a: i32, b: i32) -> usize {
    let idx = 2 + (s - a).signum() + (s - b).signum();
    match idx {
        0 => 1,
        1 => 2,
        2 => 0,
        v => v as usize,
    }
}

/// 对一个平面矩形应用 SAO
///
/// `usable(nx, ny)` 判断邻点是否可用 (图像内, 且允许跨越对应的 slice / tile 边界);
/// 边缘模式下任一邻点不可用的采样保持原值.
pub(crate) fn sao_plane(
    src: &Plane,
    dst: &Plane,
    comp: &SaoComponent,
    rect: PlaneRect,
    bit_depth: u32,
    usable: impl Fn(isize, isize) -> bool,
) {
    let max = (1i32 << bit_depth) - 1;
    let shift = bit_depth.min(10) - 5;
    let offsets = comp.offsets.map(|o| o * (1 << shift));
    let x_end = (rect.x0 + rect.width).min(src.width());
    let y_end = (rect.y0 + rect.height).min(src.height());
    match comp.kind {
        SaoType::Off => {
            for y in rect.y0..y_end {
                for x in rect.x0..x_end {
                    dst.set(x, y, src.get(x, y));
                }
            }
        }
        SaoType::Band => {
            let band_shift = bit_depth - 5;
            let mut table = [0usize; 32];
            for k in 0..4 {
                table[(k + usize::from(comp.band_position)) & 31] = k + 1;
            }
            for y in rect.y0..y_end {
                for x in rect.x0..x_end {
                    let s = i32::from(src.get(x, y));
                    let band = table[(s >> band_shift) as usize & 31];
                    let v = if band == 0 { s } else { (s + offsets[band - 1]).clamp(0, max) };
                    dst.set(x, y, v as u16);
                }
            }
        }
        SaoType::Edge => {
            let [(ax, ay), (bx, by)] = EO_NEIGHBOURS[usize::from(comp.eo_class & 3)];
            for y in rect.y0..y_end {
                for x in rect.x0..x_end {
                    let s = i32::from(src.get(x, y));
                    let (xi, yi) = (x as isize, y as isize);
                    let na = (xi + ax, yi + ay);
                    let nb = (xi + bx, yi + by);
                    let v = match (
                        src.get_checked(na.0, na.1).filter(|_| usable(na.0, na.1)),
                        src.get_checked(nb.0, nb.1).filter(|_| usable(nb.0, nb.1)),
                    ) {
                        (Some(a), Some(b)) => match edge_category(s, i32::from(a), i32::from(b)) {
                            0 => s,
                            cat => (s + offsets[cat - 1]).clamp(0, max),
                        },
                        _ => s,
                    };
                    dst.set(x, y, v as u16);
                }
            }
        }
    }
}

/// SAO 阶段: 处理一个 CTU 的全部平面, 结果写入中间图像
///
/// 未启用 SAO 的平面直接复制去块结果, 供 ALF 读取.
pub fn sao_filter(fc: &FrameContext, rx: usize, ry: usize) -> VvResult<()> {
    let Some(staging) = fc.staging.as_ref() else {
        return Ok(());
    };
    let sps = &fc.params.sps;
    let pps = &fc.params.pps;
    let geo = &fc.params.geometry;
    let params = fc.filter_params(rx, ry).sao;
    let header = fc.slice_at(rx, ry).map(|s| &s.header);
    let cur_slice = fc.slice_index(rx, ry);

    // 3x3 邻居 CTU 的可用性
    let mut ctu_usable = [[false; 3]; 3];
    for (dy, row) in ctu_usable.iter_mut().enumerate() {
        for (dx, cell) in row.iter_mut().enumerate() {
            let (nx, ny) = ((rx + dx).checked_sub(1), (ry + dy).checked_sub(1));
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            if nx >= geo.ctb_width || ny >= geo.ctb_height {
                continue;
            }
            let slice_ok = pps.loop_filter_across_slices || fc.slice_index(nx, ny) == cur_slice;
            let tile_ok = pps.loop_filter_across_tiles || geo.same_tile((rx, ry), (nx, ny));
            *cell = slice_ok && tile_ok;
        }
    }

    for c_idx in 0..fc.pic.plane_count() {
        let (sx, sy) = if c_idx == LUMA {
            (0, 0)
        } else {
            (sps.chroma_format.shift_x(), sps.chroma_format.shift_y())
        };
        let rect = PlaneRect {
            x0: (rx << geo.log2_ctb_size) >> sx,
            y0: (ry << geo.log2_ctb_size) >> sy,
            width: geo.ctb_size >> sx,
            height: geo.ctb_size >> sy,
        };
        let enabled = !fc.config.disable_sao
            && sps.sao_enabled
            && header.is_some_and(|h| if c_idx == LUMA { h.sao_luma } else { h.sao_chroma });
        let comp = if enabled {
            params.components[c_idx]
        } else {
            SaoComponent::default()
        };
        let (log2_x, log2_y) = (geo.log2_ctb_size - sx, geo.log2_ctb_size - sy);
        let usable = |nx: isize, ny: isize| {
            let cx = (nx >> log2_x) - rx as isize + 1;
            let cy = (ny >> log2_y) - ry as isize + 1;
            (0..3).contains(&cx) && (0..3).contains(&cy) && ctu_usable[cy as usize][cx as usize]
        };
        sao_plane(fc.pic.plane(c_idx)?, staging.plane(c_idx)?, &comp, rect, sps.bit_depth, usable);
    }
    trace!("VVC: SAO CTU ({rx},{ry}) 完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use vvrec_core::Plane;

    use super::{PlaneRect, SaoComponent, SaoParams, SaoType, edge_category, sao_plane};

    fn plane(w: usize, h: usize, fill: u16) -> Plane {
        match Plane::new(w, h, fill) {
            Ok(p) => p,
            Err(err) => panic!("平面分配失败: {err}"),
        }
    }

    fn full(w: usize, h: usize) -> PlaneRect {
        PlaneRect {
            x0: 0,
            y0: 0,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_edge_category_mapping() {
        assert_eq!(edge_category(10, 20, 20), 1, "局部极小");
        assert_eq!(edge_category(10, 10, 20), 2);
        assert_eq!(edge_category(10, 10, 10), 0, "平坦不修改");
        assert_eq!(edge_category(20, 10, 20), 3);
        assert_eq!(edge_category(30, 10, 20), 4, "局部极大");
    }

    #[test]
    fn test_band_offset_hits_selected_bands() {
        let src = plane(4, 1, 0);
        for (x, v) in [64u16, 72, 100, 200].into_iter().enumerate() {
            src.set(x, 0, v);
        }
        let dst = plane(4, 1, 0);
        // 8 位: 带宽 8, 起始带 8 覆盖 [64, 96)
        let comp = SaoComponent {
            kind: SaoType::Band,
            offsets: [3, -2, 1, 1],
            band_position: 8,
            eo_class: 0,
        };
        sao_plane(&src, &dst, &comp, full(4, 1), 8, |_, _| true);
        assert_eq!(dst.get(0, 0), 67, "第 1 带加 3");
        assert_eq!(dst.get(1, 0), 70, "第 2 带减 2");
        assert_eq!(dst.get(2, 0), 100, "带外不变");
        assert_eq!(dst.get(3, 0), 200);
    }

    #[test]
    fn test_edge_offset_respects_unusable_neighbours() {
        let src = plane(3, 1, 50);
        src.set(1, 0, 40);
        let dst = plane(3, 1, 0);
        let comp = SaoComponent {
            kind: SaoType::Edge,
            offsets: [2, 1, -1, -2],
            band_position: 0,
            eo_class: 0,
        };
        sao_plane(&src, &dst, &comp, full(3, 1), 8, |_, _| true);
        assert_eq!(dst.get(1, 0), 42, "局部极小加正偏移");
        assert_eq!(dst.get(0, 0), 50, "图像边缘保持原值");

        let dst2 = plane(3, 1, 0);
        sao_plane(&src, &dst2, &comp, full(3, 1), 8, |x, _| x != 2);
        assert_eq!(dst2.get(1, 0), 40, "邻点不可跨越时保持原值");
    }

    #[test]
    fn test_offsets_scale_with_bit_depth() {
        let src = plane(1, 1, 512);
        let dst = plane(1, 1, 0);
        let comp = SaoComponent {
            kind: SaoType::Band,
            offsets: [1, 0, 0, 0],
            band_position: 16,
            eo_class: 0,
        };
        sao_plane(&src, &dst, &comp, full(1, 1), 10, |_, _| true);
        assert_eq!(dst.get(0, 0), 516, "10 位偏移左移 2 位");
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let mut params = SaoParams::default();
        params.components[0] = SaoComponent {
            kind: SaoType::Band,
            offsets: [8, 0, 0, 0],
            band_position: 0,
            eo_class: 0,
        };
        assert!(params.validate(8).is_err(), "8 位下偏移上限为 7");
        assert!(params.validate(10).is_ok());
        params.components[0] = SaoComponent {
            kind: SaoType::Edge,
            offsets: [-1, 0, 0, 0],
            band_position: 0,
            eo_class: 1,
        };
        assert!(params.validate(10).is_err(), "边缘前两类必须非负");
    }
}
