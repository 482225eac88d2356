//! 变换树 / 变换单元构建.
//!
//! 把 CU 的残差区域按最大变换尺寸, SBT, ISP 规则递归划分为 TU,
//! 在叶子处解出各平面的 coded flag, QP 增量, 变换跳过, 联合 CbCr 标志与系数,
//! 并把每个变换块的位置和尺寸写入帧信息表.

use log::trace;
use vvrec_core::{VvError, VvResult};

use super::common::{ChannelType, IspType, LUMA};
use super::ctu::ParseContext;
use super::cu::{CodingUnit, TransformBlock, TransformUnit, TuFlags};
use super::dequant::derive_qp;
use super::frame::FrameTables;

/// 变换树递归中跨 TU 携带的状态
#[derive(Debug, Clone, Copy)]
struct TreeState {
    /// ISP 中之前的子划分是否都没有亮度残差
    infer_tu_cbf_luma: bool,
}

/// 色度是否在本 CU 的处理范围内
fn chroma_in_scope(ctx: &ParseContext<'_>, cu: &CodingUnit) -> bool {
    ctx.sps().tree_has_chroma(cu.tree)
}

/// 解码 CU 的变换树
pub(crate) fn transform_tree(
    ctx: &mut ParseContext<'_>,
    cu: &mut CodingUnit,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
) -> VvResult<()> {
    let mut state = TreeState {
        infer_tu_cbf_luma: true,
    };
    transform_tree_rec(ctx, cu, x0, y0, w, h, &mut state)
}

fn transform_tree_rec(
    ctx: &mut ParseContext<'_>,
    cu: &mut CodingUnit,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    state: &mut TreeState,
) -> VvResult<()> {
    let max_tb = 1usize << ctx.sps().log2_max_tb_size;
    let isp = cu.intra.isp;
    if isp == IspType::None && cu.sbt.is_none() {
        if w > max_tb || h > max_tb {
            let ver_split_first = w > max_tb && w > h;
            let (tw, th) = if ver_split_first { (w / 2, h) } else { (w, h / 2) };
            transform_tree_rec(ctx, cu, x0, y0, tw, th, state)?;
            if ver_split_first {
                transform_tree_rec(ctx, cu, x0 + tw, y0, tw, th, state)
            } else {
                transform_tree_rec(ctx, cu, x0, y0 + th, tw, th, state)
            }
        } else {
            transform_unit(ctx, cu, x0, y0, w, h, 0, state)
        }
    } else if let Some(sbt) = cu.sbt {
        let fourths = match (sbt.quad, sbt.pos) {
            (true, false) => 1,
            (true, true) => 3,
            (false, _) => 2,
        };
        if sbt.horizontal {
            let th = h * fourths / 4;
            transform_unit(ctx, cu, x0, y0, w, th, 0, state)?;
            transform_unit(ctx, cu, x0, y0 + th, w, h - th, 1, state)
        } else {
            let tw = w * fourths / 4;
            transform_unit(ctx, cu, x0, y0, tw, h, 0, state)?;
            transform_unit(ctx, cu, x0 + tw, y0, w - tw, h, 1, state)
        }
    } else {
        let n = cu.intra.num_isp.max(1);
        for part in 0..n {
            if isp == IspType::Hor {
                let th = h / n;
                transform_unit(ctx, cu, x0, y0 + th * part, w, th, part, state)?;
            } else {
                let tw = w / n;
                transform_unit(ctx, cu, x0 + tw * part, y0, tw, h, part, state)?;
            }
        }
        Ok(())
    }
}

/// 未编码 CU 的变换树: 几何划分相同, 只生成零残差 TU
pub(crate) fn skipped_transform_tree(
    ctx: &mut ParseContext<'_>,
    cu: &mut CodingUnit,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
) -> VvResult<()> {
    let max_tb = 1usize << ctx.sps().log2_max_tb_size;
    if w > max_tb || h > max_tb {
        let ver_split_first = w > max_tb && w > h;
        let (tw, th) = if ver_split_first { (w / 2, h) } else { (w, h / 2) };
        skipped_transform_tree(ctx, cu, x0, y0, tw, th)?;
        return if ver_split_first {
            skipped_transform_tree(ctx, cu, x0 + tw, y0, tw, th)
        } else {
            skipped_transform_tree(ctx, cu, x0, y0 + th, tw, th)
        };
    }
    let mut tu = new_tu(x0, y0, w, h);
    if cu.tree.has_luma() {
        let tb = empty_tb(LUMA, x0, y0, w, h);
        record_tb(ctx, &tu, &tb);
        tu.tbs.push(tb);
    }
    if chroma_in_scope(ctx, cu) {
        let (sx, sy) = chroma_shift(ctx);
        for c_idx in 1..=2 {
            let tb = empty_tb(c_idx, x0 >> sx, y0 >> sy, w >> sx, h >> sy);
            record_tb(ctx, &tu, &tb);
            tu.tbs.push(tb);
        }
    }
    cu.tus.try_reserve(1)?;
    cu.tus.push(tu);
    Ok(())
}

fn new_tu(x0: usize, y0: usize, w: usize, h: usize) -> TransformUnit {
    TransformUnit {
        x0,
        y0,
        width: w,
        height: h,
        ..TransformUnit::default()
    }
}

fn chroma_shift(ctx: &ParseContext<'_>) -> (u32, u32) {
    let fmt = ctx.sps().chroma_format;
    (fmt.shift_x(), fmt.shift_y())
}

fn empty_tb(c_idx: usize, x0: usize, y0: usize, w: usize, h: usize) -> TransformBlock {
    TransformBlock {
        c_idx,
        x0,
        y0,
        log2_w: w.max(1).trailing_zeros(),
        log2_h: h.max(1).trailing_zeros(),
        ..TransformBlock::default()
    }
}

/// 把变换块写入帧信息表 (亮度坐标)
fn record_tb(ctx: &ParseContext<'_>, tu: &TransformUnit, tb: &TransformBlock) {
    let tables = &ctx.fc.tables;
    let (sx, sy) = if tb.c_idx == LUMA { (0, 0) } else { chroma_shift(ctx) };
    let (x, y) = (tb.x0 << sx, tb.y0 << sy);
    let (w, h) = (tb.width() << sx, tb.height() << sy);
    let ch = if tb.c_idx == LUMA {
        ChannelType::Luma
    } else {
        ChannelType::Chroma
    };
    tables.set_tb(ch, x, y, w, h);
    let (x4, y4, w4, h4) = FrameTables::rect4(x, y, w, h);
    tables.coded[tb.c_idx].fill_rect(x4, y4, w4, h4, u8::from(tb.has_coeffs));
    if tb.c_idx != LUMA {
        let joint = u8::from(tu.flags.contains(TuFlags::JOINT_CBCR));
        tables.joint_cbcr.fill_rect(x4, y4, w4, h4, joint);
    }
}

/// SBT 中不携带系数的子 TU
fn is_sbt_zero_tu(cu: &CodingUnit, sub_tu: usize) -> bool {
    cu.sbt
        .is_some_and(|sbt| (sub_tu == 0 && sbt.pos) || (sub_tu == 1 && !sbt.pos))
}

#[allow(clippy::too_many_arguments)]
fn transform_unit(
    ctx: &mut ParseContext<'_>,
    cu: &mut CodingUnit,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    sub_tu: usize,
    state: &mut TreeState,
) -> VvResult<()> {
    let sps = ctx.sps();
    let isp = cu.intra.isp;
    let num_isp = cu.intra.num_isp.max(1);
    let isp_last = isp != IspType::None && sub_tu + 1 == num_isp;
    let sbt_zero = is_sbt_zero_tu(cu, sub_tu);
    let chroma = chroma_in_scope(ctx, cu);
    let (sx, sy) = chroma_shift(ctx);
    let mut tu = new_tu(x0, y0, w, h);
    if isp_last {
        tu.flags |= TuFlags::ISP_LAST;
    }

    // 色度 TB 覆盖范围: ISP 时是整个 CU, 挂在最后一个子划分上
    let chroma_area = if isp == IspType::None {
        Some((x0, y0, w, h))
    } else if isp_last {
        Some((cu.x0, cu.y0, cu.width, cu.height))
    } else {
        None
    };

    let mut cb = false;
    let mut cr = false;
    if chroma && chroma_area.is_some() && !sbt_zero {
        cb = ctx.reader.tu_cb_coded_flag(cu)?;
        cr = ctx.reader.tu_cr_coded_flag(cu, cb)?;
    }

    let mut y_coded = false;
    if cu.tree.has_luma() {
        let max_tb = 1usize << sps.log2_max_tb_size;
        let present = if isp == IspType::None {
            !sbt_zero
                && (cu.is_intra()
                    || (chroma && (cb || cr))
                    || cu.width > max_tb
                    || cu.height > max_tb)
        } else {
            !isp_last || !state.infer_tu_cbf_luma
        };
        y_coded = if present {
            ctx.reader.tu_y_coded_flag(cu)?
        } else {
            !sbt_zero
        };
        if isp != IspType::None {
            state.infer_tu_cbf_luma = state.infer_tu_cbf_luma && !y_coded;
        }
    }
    tu.flags.set(TuFlags::CODED_Y, y_coded);
    tu.flags.set(TuFlags::CODED_CB, cb);
    tu.flags.set(TuFlags::CODED_CR, cr);

    let chroma_coded = chroma && (cb || cr);
    if y_coded || chroma_coded {
        if ctx.fc.params.pps.cu_qp_delta_enabled && !ctx.qp.is_cu_qp_delta_coded {
            let delta = ctx.reader.cu_qp_delta()?;
            let off = sps.qp_bd_offset();
            if delta < -(32 + off / 2) || delta > 31 + off / 2 {
                return Err(VvError::InvalidData(format!(
                    "CuQpDeltaVal 越界: {delta} @({x0},{y0})"
                )));
            }
            ctx.qp.is_cu_qp_delta_coded = true;
            ctx.apply_qp_delta(cu, delta);
        }
        if chroma_coded
            && ctx.slice.header.cu_chroma_qp_offset_enabled
            && !ctx.qp.is_chroma_qp_offset_coded
        {
            let idx = ctx.reader.cu_chroma_qp_offset()?;
            ctx.qp.is_chroma_qp_offset_coded = true;
            ctx.apply_chroma_qp_offset(cu, idx)?;
            tu.chroma_qp_offset_idx = idx;
        }
    }

    // 亮度
    if cu.tree.has_luma() {
        let max_ts = 1usize << sps.log2_max_ts_size;
        let ts = if !y_coded {
            false
        } else if cu.bdpcm(LUMA).is_some() {
            true
        } else if sps.transform_skip_enabled
            && w <= max_ts
            && h <= max_ts
            && cu.sbt.is_none()
            && isp == IspType::None
        {
            ctx.reader.transform_skip_flag(cu, LUMA)?
        } else {
            false
        };
        let tb = build_tb(ctx, cu, &tu, LUMA, x0, y0, w, h, ts, y_coded)?;
        record_tb(ctx, &tu, &tb);
        tu.tbs.push(tb);
    }

    // 色度
    if let (true, Some((cx, cy, cw, ch))) = (chroma, chroma_area) {
        if sps.joint_cbcr_enabled && (cb || cr) && (cu.is_intra() || (cb && cr)) {
            let joint = ctx.reader.tu_joint_cbcr_residual_flag(cu)?;
            tu.flags.set(TuFlags::JOINT_CBCR, joint);
        }
        let joint = tu.flags.contains(TuFlags::JOINT_CBCR);
        let (px, py, pw, ph) = (cx >> sx, cy >> sy, cw >> sx, ch >> sy);
        let max_ts = 1usize << sps.log2_max_ts_size;
        for c_idx in 1..=2 {
            // 联合 CbCr 且两者都编码时只传 Cb 的系数
            let coded = match c_idx {
                1 => cb,
                _ => cr && !(cb && joint),
            };
            let ts = if !coded {
                false
            } else if cu.bdpcm(c_idx).is_some() {
                true
            } else if sps.transform_skip_enabled && pw <= max_ts && ph <= max_ts && cu.sbt.is_none() {
                ctx.reader.transform_skip_flag(cu, c_idx)?
            } else {
                false
            };
            let tb = build_tb(ctx, cu, &tu, c_idx, px, py, pw, ph, ts, coded)?;
            record_tb(ctx, &tu, &tb);
            tu.tbs.push(tb);
        }
    }

    trace!(
        "VVC: TU ({},{}) {}x{} flags={:?}",
        x0,
        y0,
        w,
        h,
        tu.flags
    );
    cu.tus.try_reserve(1)?;
    cu.tus.push(tu);
    Ok(())
}

/// 构建变换块; 有系数时从读取器取出系数放入 CTU arena
#[allow(clippy::too_many_arguments)]
fn build_tb(
    ctx: &mut ParseContext<'_>,
    cu: &CodingUnit,
    tu: &TransformUnit,
    c_idx: usize,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    ts: bool,
    coded: bool,
) -> VvResult<TransformBlock> {
    let mut tb = empty_tb(c_idx, x0, y0, w, h);
    tb.ts = ts;
    tb.qp = derive_qp(c_idx, tu, cu, ctx.sps(), ts);
    if !coded {
        return Ok(tb);
    }
    let area = w * h;
    let coeffs = &mut ctx.data.coeffs;
    let offset = coeffs.len();
    coeffs.try_reserve(area)?;
    coeffs.resize(offset + area, 0);
    tb.coeff_offset = offset;
    tb.has_coeffs = true;
    let info = ctx
        .reader
        .residual_coding(cu, &tb, &mut ctx.data.coeffs[offset..offset + area])?;
    if info.max_scan_x >= w || info.max_scan_y >= h {
        return Err(VvError::InvalidData(format!(
            "扫描窗口越界: ({}, {}) 超出 {}x{}",
            info.max_scan_x, info.max_scan_y, w, h
        )));
    }
    tb.max_scan_x = info.max_scan_x;
    tb.max_scan_y = info.max_scan_y;
    tb.last_scan_pos = info.last_scan_pos;
    tb.last_sub_block = info.last_sub_block;
    Ok(tb)
}
