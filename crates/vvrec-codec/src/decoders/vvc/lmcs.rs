//! 亮度映射与色度缩放 (LMCS).
//!
//! 由 APS 中的分段线性模型派生正向 / 反向查找表与色度缩放系数.
//! RECON 阶段在映射域中重建亮度, LMCS 阶段把 CTU 的亮度采样反向映射回
//! 原始域, 之后才进入去块滤波.

use log::trace;
use vvrec_core::{VvError, VvResult};

use super::common::{LUMA, ilog2};
use super::frame::FrameContext;

/// 分段数
pub const LMCS_BINS: usize = 16;

/// 色度缩放系数的定点精度
const CSCALE_FP_PREC: u32 = 11;

/// LMCS APS 语法
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmcsSyntax {
    pub min_bin_idx: usize,
    /// `lmcs_delta_max_bin_idx`: 最大有效分段为 `15 - delta_max_bin_idx`
    pub delta_max_bin_idx: usize,
    /// 带符号的 `lmcs_delta_abs_cw` (下标为分段号)
    pub delta_cw: [i32; LMCS_BINS],
    /// 带符号的 `lmcs_delta_abs_crs`
    pub delta_crs: i32,
}

impl Default for LmcsSyntax {
    fn default() -> Self {
        Self {
            min_bin_idx: 0,
            delta_max_bin_idx: 0,
            delta_cw: [0; LMCS_BINS],
            delta_crs: 0,
        }
    }
}

/// 派生后的 LMCS 查找表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmcsTables {
    pub bit_depth: u32,
    pub min_bin: usize,
    pub max_bin: usize,
    /// 映射域分段起点, 共 17 项
    pub pivot: [i32; LMCS_BINS + 1],
    pub scale: [i32; LMCS_BINS],
    pub inv_scale: [i32; LMCS_BINS],
    pub chroma_scale: [i32; LMCS_BINS],
    /// 原始域 -> 映射域
    pub fwd_lut: Vec<u16>,
    /// 映射域 -> 原始域
    pub inv_lut: Vec<u16>,
}

impl LmcsTables {
    /// 从 APS 语法派生查找表并校验码字约束
    pub fn derive(syntax: &LmcsSyntax, bit_depth: u32) -> VvResult<Self> {
        let max_bin = LMCS_BINS
            .checked_sub(1 + syntax.delta_max_bin_idx)
            .ok_or_else(|| VvError::InvalidData("lmcs_delta_max_bin_idx 越界".into()))?;
        if syntax.min_bin_idx > max_bin {
            return Err(VvError::InvalidData(format!(
                "LMCS 分段区间非法: {}..={}",
                syntax.min_bin_idx, max_bin
            )));
        }
        let org_cw = (1i32 << bit_depth) / LMCS_BINS as i32;
        let log2_org = ilog2(org_cw as usize);

        let mut cw = [0i32; LMCS_BINS];
        for (i, slot) in cw.iter_mut().enumerate() {
            if (syntax.min_bin_idx..=max_bin).contains(&i) {
                let v = org_cw + syntax.delta_cw[i];
                if v < org_cw >> 3 || v > (org_cw << 3) - 1 {
                    return Err(VvError::InvalidData(format!("LMCS 分段 {i} 码字越界: {v}")));
                }
                *slot = v;
            }
        }
        if cw.iter().sum::<i32>() > 1 << bit_depth {
            return Err(VvError::InvalidData("LMCS 码字总和越界".into()));
        }

        let mut pivot = [0i32; LMCS_BINS + 1];
        let mut scale = [0i32; LMCS_BINS];
        let mut inv_scale = [0i32; LMCS_BINS];
        let mut chroma_scale = [1 << CSCALE_FP_PREC; LMCS_BINS];
        for i in 0..LMCS_BINS {
            pivot[i + 1] = pivot[i] + cw[i];
            scale[i] = (cw[i] * (1 << 11) + (1 << (log2_org - 1))) >> log2_org;
            if cw[i] != 0 {
                inv_scale[i] = org_cw * (1 << 11) / cw[i];
                let crs = cw[i] + syntax.delta_crs;
                if crs < org_cw >> 3 || crs > (org_cw << 3) - 1 {
                    return Err(VvError::InvalidData(format!("LMCS 色度缩放分段 {i} 越界: {crs}")));
                }
                chroma_scale[i] = org_cw * (1 << CSCALE_FP_PREC) / crs;
            }
        }

        let mut tables = Self {
            bit_depth,
            min_bin: syntax.min_bin_idx,
            max_bin,
            pivot,
            scale,
            inv_scale,
            chroma_scale,
            fwd_lut: Vec::new(),
            inv_lut: Vec::new(),
        };
        let n = 1usize << bit_depth;
        let mut fwd = Vec::new();
        fwd.try_reserve_exact(n)?;
        let mut inv = Vec::new();
        inv.try_reserve_exact(n)?;
        let max = (1i32 << bit_depth) - 1;
        for v in 0..n as i32 {
            fwd.push(tables.forward_sample(v, log2_org).clamp(0, max) as u16);
            inv.push(tables.inverse_sample(v, org_cw).clamp(0, max) as u16);
        }
        tables.fwd_lut = fwd;
        tables.inv_lut = inv;
        Ok(tables)
    }

    fn forward_sample(&self, v: i32, log2_org: u32) -> i32 {
        let idx = (v >> log2_org) as usize;
        let idx = idx.min(LMCS_BINS - 1);
        let input_pivot = (idx as i32) << log2_org;
        self.pivot[idx] + ((self.scale[idx] * (v - input_pivot) + (1 << 10)) >> 11)
    }

    fn inverse_sample(&self, v: i32, org_cw: i32) -> i32 {
        let idx = self.inverse_bin(v);
        let input_pivot = idx as i32 * org_cw;
        input_pivot + ((self.inv_scale[idx] * (v - self.pivot[idx]) + (1 << 10)) >> 11)
    }

    /// 映射域采样值所在的分段
    pub fn inverse_bin(&self, v: i32) -> usize {
        if v < self.pivot[self.min_bin + 1] {
            return self.min_bin;
        }
        (self.min_bin..=self.max_bin)
            .rev()
            .find(|&i| v >= self.pivot[i])
            .unwrap_or(self.min_bin)
    }

    /// 正向映射
    #[inline]
    pub fn forward(&self, v: i32) -> i32 {
        let idx = (v.max(0) as usize).min(self.fwd_lut.len().saturating_sub(1));
        self.fwd_lut.get(idx).map_or(v, |&m| i32::from(m))
    }

    /// 反向映射
    #[inline]
    pub fn inverse(&self, v: i32) -> i32 {
        let idx = (v.max(0) as usize).min(self.inv_lut.len().saturating_sub(1));
        self.inv_lut.get(idx).map_or(v, |&m| i32::from(m))
    }

    /// 映射域平均亮度对应的色度残差缩放系数
    pub fn chroma_scale_for(&self, avg_y: i32) -> i32 {
        self.chroma_scale[self.inverse_bin(avg_y)]
    }
}

/// 对图像中亮度块做正向映射 (帧间预测采样进入映射域)
pub(crate) fn forward_map_block(
    fc: &FrameContext,
    lmcs: &LmcsTables,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
) -> VvResult<()> {
    let plane = fc.pic.plane(LUMA)?;
    let x_end = (x0 + w).min(plane.width());
    let y_end = (y0 + h).min(plane.height());
    for y in y0..y_end {
        for x in x0..x_end {
            let v = lmcs.forward(i32::from(plane.get(x, y)));
            plane.set(x, y, v as u16);
        }
    }
    Ok(())
}

/// 色度块的残差缩放系数
///
/// 取当前 64x64 VPDU 左侧一列与上方一行的已重建 (映射域) 亮度均值;
/// 邻点不可用 (图像外, 其他 slice 或 tile) 时使用中间值.
pub(crate) fn chroma_residual_scale(
    fc: &FrameContext,
    lmcs: &LmcsTables,
    x_luma: usize,
    y_luma: usize,
) -> VvResult<i32> {
    let ctb = fc.params.geometry.ctb_size;
    let size = ctb.min(64);
    let vx = x_luma / size * size;
    let vy = y_luma / size * size;
    let plane = fc.pic.plane(LUMA)?;
    let (pic_w, pic_h) = (plane.width(), plane.height());
    let log2_ctb = fc.params.geometry.log2_ctb_size;
    let cur_slice = fc.slice_index_at_sample(vx, vy);
    let cur_ctb = (vx >> log2_ctb, vy >> log2_ctb);
    let available = |x: usize, y: usize| {
        fc.slice_index_at_sample(x, y) == cur_slice
            && fc.params.geometry.same_tile(cur_ctb, (x >> log2_ctb, y >> log2_ctb))
    };

    let mut sum = 0i64;
    let mut count = 0i64;
    if vx > 0 && available(vx - 1, vy) {
        for y in vy..(vy + size).min(pic_h) {
            sum += i64::from(plane.get(vx - 1, y));
            count += 1;
        }
    }
    if vy > 0 && available(vx, vy - 1) {
        for x in vx..(vx + size).min(pic_w) {
            sum += i64::from(plane.get(x, vy - 1));
            count += 1;
        }
    }
    let avg = if count == 0 {
        1 << (lmcs.bit_depth - 1)
    } else {
        ((sum + count / 2) / count) as i32
    };
    Ok(lmcs.chroma_scale_for(avg))
}

/// LMCS 阶段: 把 CTU 的亮度采样反向映射回原始域
///
/// slice 未启用 LMCS 时不做任何事.
pub fn lmcs_filter(fc: &FrameContext, rx: usize, ry: usize) -> VvResult<()> {
    let Some(lmcs) = fc.params.lmcs.as_ref() else {
        return Ok(());
    };
    if !fc.slice_at(rx, ry).is_some_and(|s| s.header.lmcs_enabled) {
        return Ok(());
    }
    let geo = &fc.params.geometry;
    let plane = fc.pic.plane(LUMA)?;
    let x0 = rx << geo.log2_ctb_size;
    let y0 = ry << geo.log2_ctb_size;
    let x_end = (x0 + geo.ctb_size).min(plane.width());
    let y_end = (y0 + geo.ctb_size).min(plane.height());
    for y in y0..y_end {
        for x in x0..x_end {
            let v = lmcs.inverse(i32::from(plane.get(x, y)));
            plane.set(x, y, v as u16);
        }
    }
    trace!("VVC: LMCS CTU ({rx},{ry}) 反向映射完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LMCS_BINS, LmcsSyntax, LmcsTables};

    fn derive(syntax: &LmcsSyntax) -> LmcsTables {
        match LmcsTables::derive(syntax, 10) {
            Ok(t) => t,
            Err(err) => panic!("LMCS 表派生失败: {err}"),
        }
    }

    #[test]
    fn test_identity_model() {
        let t = derive(&LmcsSyntax::default());
        for v in [0, 1, 63, 64, 511, 1023] {
            assert_eq!(t.forward(v), v, "零增量时正向映射应为恒等");
            assert_eq!(t.inverse(v), v, "零增量时反向映射应为恒等");
        }
        assert!(t.chroma_scale.iter().all(|&s| s == 1 << 11));
    }

    #[test]
    fn test_inverse_undoes_forward() {
        let mut syntax = LmcsSyntax::default();
        for (i, d) in syntax.delta_cw.iter_mut().enumerate() {
            *d = if i < LMCS_BINS / 2 { 16 } else { -16 };
        }
        let t = derive(&syntax);
        assert_eq!(t.pivot[LMCS_BINS], 1024);
        for v in (0..1024).step_by(7) {
            let back = t.inverse(t.forward(v));
            assert!((back - v).abs() <= 1, "映射往返误差过大: {v} -> {back}");
        }
        // 扩张的分段色度缩放小于 1.0
        assert!(t.chroma_scale[0] < 1 << 11);
        assert!(t.chroma_scale[LMCS_BINS - 1] > 1 << 11);
    }

    #[test]
    fn test_rejects_bad_codewords() {
        let mut syntax = LmcsSyntax::default();
        syntax.delta_cw[3] = -60;
        assert!(LmcsTables::derive(&syntax, 10).is_err(), "码字低于 OrgCW/8 应报错");
        let over = LmcsSyntax {
            delta_cw: [8; LMCS_BINS],
            ..LmcsSyntax::default()
        };
        assert!(LmcsTables::derive(&over, 10).is_err(), "码字总和超过动态范围应报错");
    }
}
