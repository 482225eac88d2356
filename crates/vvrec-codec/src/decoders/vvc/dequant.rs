//! 反量化与二维反变换.
//!
//! 对单个变换块依次执行: QP 推导, 缩放矩阵查表, 反量化, LFNST 反变换,
//! 变换核选择与可分离二维反变换 (或变换跳过 / BDPCM 累加).
//! 完成后系数数组中存放的是空域残差.

use vvrec_core::{Picture, VvError, VvResult};

use super::common::{
    IspType, PredMode, TreeType, TxType, INTRA_LT_CCLM, INTRA_PLANAR, INTRA_T_CCLM, clip_i16, diag_scan,
    round_shift,
};
use super::cu::{CodingUnit, CuFlags, TransformBlock, TransformUnit};
use super::itx::inverse_transform;
use super::lfnst::{self, LFNST_MAX_INPUT, LfnstGroup};
use super::params::{FrameParams, ScalingList, SliceHeader, Sps};

/// 反量化缩放表 `[rect][qp % 6]`
const LEVEL_SCALE: [[i32; 6]; 2] = [[40, 45, 51, 57, 64, 72], [57, 64, 72, 80, 90, 102]];

/// 缩放矩阵编号 `[inter][c_idx][max(log2_w, log2_h) - 1]`
const SCALING_MATRIX_ID: [[[usize; 6]; 3]; 2] = [
    [[0, 2, 8, 14, 20, 26], [0, 3, 9, 15, 21, 21], [0, 4, 10, 16, 22, 22]],
    [[0, 5, 11, 17, 23, 27], [0, 6, 12, 18, 24, 24], [1, 7, 13, 19, 25, 25]],
];

/// 平坦缩放矩阵值
const FLAT_SCALE: i32 = 16;

/// LFNST 之后有效的扫描窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub max_scan_x: usize,
    pub max_scan_y: usize,
}

// ============================================================
// QP 与变换核推导
// ============================================================

/// 变换块使用的 QP (含位深偏移)
pub fn derive_qp(c_idx: usize, tu: &TransformUnit, cu: &CodingUnit, sps: &Sps, ts: bool) -> i32 {
    let qp = if c_idx == 0 {
        cu.qp[0] + sps.qp_bd_offset()
    } else if tu.joint_cbcr_mode() != 0 {
        cu.qp[3]
    } else {
        cu.qp[c_idx]
    };
    if ts {
        qp.max(4 + 6 * sps.min_qp_prime_ts)
    } else {
        qp
    }
}

/// 广角模式映射 (仅作用于角度模式 2..=66)
pub fn wide_angle_mode(mode: i32, log2_w: u32, log2_h: u32) -> i32 {
    if log2_w == log2_h || !(2..=66).contains(&mode) {
        return mode;
    }
    let ratio = (log2_w as i32 - log2_h as i32).abs();
    if log2_w > log2_h && mode < if ratio > 1 { 8 + 2 * ratio } else { 8 } {
        mode + 65
    } else if log2_h > log2_w && mode > if ratio > 1 { 60 - 2 * ratio } else { 60 } {
        mode - 67
    } else {
        mode
    }
}

/// 块是否对本平面应用 LFNST
fn lfnst_applies(tb: &TransformBlock, cu: &CodingUnit) -> bool {
    if cu.lfnst_idx == 0 || tb.ts || tb.log2_w < 2 || tb.log2_h < 2 {
        return false;
    }
    match cu.tree {
        TreeType::Single | TreeType::DualLuma => tb.c_idx == 0,
        TreeType::DualChroma => tb.c_idx > 0,
    }
}

/// LFNST 使用的帧内模式 (已做广角映射)
fn lfnst_pred_mode(tb: &TransformBlock, cu: &CodingUnit) -> i32 {
    let mode = if tb.c_idx == 0 {
        if cu.flags.contains(CuFlags::MIP) {
            INTRA_PLANAR
        } else {
            cu.intra.luma_mode
        }
    } else if (INTRA_LT_CCLM..=INTRA_T_CCLM).contains(&cu.intra.chroma_mode) {
        cu.intra.luma_mode
    } else {
        cu.intra.chroma_mode
    };
    wide_angle_mode(i32::from(mode), tb.log2_w, tb.log2_h)
}

/// 变换核选择, 返回 `(水平, 垂直)`
pub fn derive_transform_type(tb: &TransformBlock, cu: &CodingUnit, sps: &Sps) -> (TxType, TxType) {
    let (w, h) = (tb.width(), tb.height());
    if tb.c_idx > 0 || (cu.intra.isp != IspType::None && cu.lfnst_idx > 0) {
        return (TxType::Dct2, TxType::Dct2);
    }
    if cu.mts_idx > 0 {
        return match cu.mts_idx {
            1 => (TxType::Dst7, TxType::Dst7),
            2 => (TxType::Dct8, TxType::Dst7),
            3 => (TxType::Dst7, TxType::Dct8),
            _ => (TxType::Dct8, TxType::Dct8),
        };
    }
    let implicit = sps.mts_enabled
        && (cu.intra.isp != IspType::None
            || (cu.sbt.is_some() && w.max(h) <= 32)
            || (!sps.explicit_mts_intra_enabled
                && cu.pred_mode == PredMode::Intra
                && cu.lfnst_idx == 0
                && !cu.flags.contains(CuFlags::MIP)));
    if !implicit {
        return (TxType::Dct2, TxType::Dct2);
    }
    if let Some(sbt) = cu.sbt {
        return match (sbt.horizontal, sbt.pos) {
            (false, false) => (TxType::Dct8, TxType::Dst7),
            (false, true) => (TxType::Dst7, TxType::Dst7),
            (true, false) => (TxType::Dst7, TxType::Dct8),
            (true, true) => (TxType::Dst7, TxType::Dst7),
        };
    }
    let pick = |n: usize| {
        if (4..=16).contains(&n) {
            TxType::Dst7
        } else {
            TxType::Dct2
        }
    };
    (pick(w), pick(h))
}

// ============================================================
// 反量化
// ============================================================

/// 缩放矩阵编号
pub fn scaling_matrix_id(cu: &CodingUnit, c_idx: usize, log2_w: u32, log2_h: u32) -> usize {
    let inter = usize::from(cu.pred_mode != PredMode::Intra);
    let size_idx = (log2_w.max(log2_h) as usize).clamp(1, 6) - 1;
    SCALING_MATRIX_ID[inter][c_idx.min(2)][size_idx]
}

/// 位置 `(x, y)` 的缩放矩阵值
pub fn scaling_factor(list: &ScalingList, id: usize, log2_w: u32, log2_h: u32, x: usize, y: usize) -> i32 {
    if id >= ScalingList::START_16X16 && x == 0 && y == 0 {
        return i32::from(list.dc[id - ScalingList::START_16X16]);
    }
    let lms = ScalingList::log2_matrix_size(id);
    let off = ((y << lms) >> log2_h) << lms;
    let col = (x << lms) >> log2_w;
    list.matrices
        .get(id)
        .and_then(|m| m.get(off + col))
        .map_or(FLAT_SCALE, |&v| i32::from(v))
}

/// 反量化扫描窗口内的系数
pub fn dequantize(
    coeffs: &mut [i32],
    tb: &TransformBlock,
    cu: &CodingUnit,
    qp: i32,
    sps: &Sps,
    sh: &SliceHeader,
    scaling: Option<&ScalingList>,
) {
    let (log2_w, log2_h) = (tb.log2_w, tb.log2_h);
    let w = tb.width();
    let dep_quant = i32::from(sh.dep_quant && !tb.ts);
    let rect = if tb.ts { 0 } else { ((log2_w + log2_h) & 1) as usize };
    let bd_shift = if tb.ts {
        10
    } else {
        sps.bit_depth as i32 + rect as i32 + ((log2_w + log2_h) / 2) as i32 + 10 - 15 + dep_quant
    };
    let qp = (qp + dep_quant).max(0);
    let scale = i64::from(LEVEL_SCALE[rect][(qp % 6) as usize]) << (qp / 6);
    let bd_offset = (1i64 << bd_shift) >> 1;

    let use_list = scaling.filter(|_| {
        sps.scaling_list_enabled
            && sh.explicit_scaling_list
            && !tb.ts
            && !(sps.scaling_matrix_for_lfnst_disabled && cu.lfnst_idx > 0)
    });
    let id = scaling_matrix_id(cu, tb.c_idx, log2_w, log2_h);

    for y in tb.min_scan_y..=tb.max_scan_y.min(tb.height() - 1) {
        for x in tb.min_scan_x..=tb.max_scan_x.min(w - 1) {
            let c = &mut coeffs[y * w + x];
            if *c == 0 {
                continue;
            }
            let m = match use_list {
                Some(list) => scaling_factor(list, id, log2_w, log2_h, x, y),
                None => FLAT_SCALE,
            };
            *c = clip_i16((i64::from(*c) * scale * i64::from(m) + bd_offset) >> bd_shift);
        }
    }
}

// ============================================================
// LFNST / 二维反变换 / BDPCM
// ============================================================

/// LFNST 反变换, 返回新的扫描窗口
pub fn apply_lfnst(coeffs: &mut [i32], tb: &TransformBlock, cu: &CodingUnit, log2_range: u32) -> ScanWindow {
    let w = tb.width();
    let group = LfnstGroup::for_block(tb.log2_w, tb.log2_h);
    let nz = lfnst::nonzero_size(tb.log2_w, tb.log2_h);
    let mode = lfnst_pred_mode(tb, cu);
    let set = lfnst::set_index(mode);
    let transposed = lfnst::is_transposed(mode);

    let mut input = [0i32; LFNST_MAX_INPUT];
    for (i, (x, y)) in diag_scan(4, 4).into_iter().take(nz).enumerate() {
        input[i] = coeffs[y * w + x];
    }
    let mut out = [0i32; lfnst::LFNST_OUT_8X8];
    let out_size = group.out_size();
    lfnst::inverse_lfnst_1d(&mut out, &input, nz, out_size, set, usize::from(cu.lfnst_idx), log2_range);
    lfnst::scatter(coeffs, w, &out[..out_size], group, transposed);
    ScanWindow {
        max_scan_x: group.max_scan(),
        max_scan_y: group.max_scan(),
    }
}

/// 可分离二维反变换, `coeffs` 原地变为残差
pub fn inverse_transform_2d(
    coeffs: &mut [i32],
    log2_w: u32,
    log2_h: u32,
    window: ScanWindow,
    (trh, trv): (TxType, TxType),
    bit_depth: u32,
) {
    let w = 1usize << log2_w;
    let h = 1usize << log2_h;
    if w == 1 || h == 1 {
        let shift = 21 - bit_depth;
        let mut tmp = [0i32; 64];
        if h == 1 {
            inverse_transform(trh, w, &mut tmp, 1, coeffs, 1);
            for (c, t) in coeffs.iter_mut().zip(tmp.iter()).take(w) {
                *c = round_shift(*t, shift);
            }
        } else {
            inverse_transform(trv, h, &mut tmp, 1, coeffs, 1);
            for (c, t) in coeffs.iter_mut().zip(tmp.iter()).take(h) {
                *c = round_shift(*t, shift);
            }
        }
        return;
    }

    let mut tmp = vec![0i32; w * h];
    let cols = (window.max_scan_x + 1).min(w);
    for x in 0..cols {
        inverse_transform(trv, h, &mut tmp[x..], w, &coeffs[x..], w);
        for y in 0..h {
            let v = &mut tmp[y * w + x];
            *v = clip_i16(i64::from((*v + 64) >> 7));
        }
    }
    let shift = 20 - bit_depth;
    for y in 0..h {
        let row = &mut coeffs[y * w..(y + 1) * w];
        inverse_transform(trh, w, row, 1, &tmp[y * w..], 1);
        for v in row.iter_mut() {
            *v = round_shift(*v, shift);
        }
    }
}

/// BDPCM: 沿垂直或水平方向累加残差
pub fn bdpcm_accumulate(coeffs: &mut [i32], w: usize, h: usize, vertical: bool) {
    if vertical {
        for y in 1..h {
            for x in 0..w {
                coeffs[y * w + x] = clip_i16(i64::from(coeffs[y * w + x]) + i64::from(coeffs[(y - 1) * w + x]));
            }
        }
    } else {
        for y in 0..h {
            for x in 1..w {
                coeffs[y * w + x] = clip_i16(i64::from(coeffs[y * w + x]) + i64::from(coeffs[y * w + x - 1]));
            }
        }
    }
}

/// 单个变换块的反量化与反变换
///
/// `coeffs` 为该块的系数 (行优先, 步长为块宽), 完成后存放空域残差.
/// 返回实际使用的扫描窗口 (LFNST 会将其扩展到 3 或 7).
pub fn reconstruct_residual(
    tb: &TransformBlock,
    tu: &TransformUnit,
    cu: &CodingUnit,
    fp: &FrameParams,
    sh: &SliceHeader,
    coeffs: &mut [i32],
) -> VvResult<ScanWindow> {
    let sps = &fp.sps;
    if coeffs.len() < tb.area() {
        return Err(VvError::Internal(format!(
            "变换块系数长度不足: {} < {}",
            coeffs.len(),
            tb.area()
        )));
    }
    let coeffs = &mut coeffs[..tb.area()];
    let mut window = ScanWindow {
        max_scan_x: tb.max_scan_x,
        max_scan_y: tb.max_scan_y,
    };
    if !tb.has_coeffs {
        coeffs.fill(0);
        return Ok(window);
    }

    let qp = derive_qp(tb.c_idx, tu, cu, sps, tb.ts);
    dequantize(coeffs, tb, cu, qp, sps, sh, fp.scaling_list.as_ref());

    if let Some(vertical) = cu.bdpcm(tb.c_idx).filter(|_| tb.ts) {
        bdpcm_accumulate(coeffs, tb.width(), tb.height(), vertical);
        return Ok(window);
    }
    if tb.ts {
        return Ok(window);
    }
    if lfnst_applies(tb, cu) {
        window = apply_lfnst(coeffs, tb, cu, sps.log2_transform_range());
    }
    let types = derive_transform_type(tb, cu, sps);
    inverse_transform_2d(coeffs, tb.log2_w, tb.log2_h, window, types, sps.bit_depth);
    Ok(window)
}

// ============================================================
// 残差叠加
// ============================================================

/// 联合 CbCr: 由已解码平面的残差推出另一平面的残差
pub fn joint_cbcr_residual(res: &[i32], mode: u8, negative: bool, out: &mut [i32]) {
    let shift = if mode == 2 { 0 } else { 1 };
    for (o, &r) in out.iter_mut().zip(res.iter()) {
        let v = if negative { -r } else { r };
        *o = v >> shift;
    }
}

/// LMCS 色度残差缩放
pub fn scale_chroma_residual(res: &mut [i32], scale: i32) {
    for r in res.iter_mut() {
        let mag = (r.abs() * scale + (1 << 10)) >> 11;
        *r = r.signum() * mag;
    }
}

/// 残差叠加到预测值并裁剪到合法采样范围
#[allow(clippy::too_many_arguments)]
pub fn add_residual(
    pic: &Picture,
    c_idx: usize,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    res: &[i32],
    scratch: &mut Vec<i32>,
) -> VvResult<()> {
    scratch.clear();
    scratch.try_reserve(w * h)?;
    scratch.resize(w * h, 0);
    pic.read_block(c_idx, x0, y0, w, h, scratch)?;
    for (p, &r) in scratch.iter_mut().zip(res.iter()) {
        *p += r;
    }
    pic.write_block(c_idx, x0, y0, w, h, scratch)
}
