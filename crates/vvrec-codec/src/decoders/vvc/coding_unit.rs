//! 编码单元构建.
//!
//! 按语法顺序解出预测模式, 帧内 / 帧间信息, 变换树, LFNST / MTS 索引,
//! 然后把 CU 写入帧信息表并挂到 CTU 的 CU 链表上.

use log::trace;
use vvrec_core::{VvError, VvResult};

use super::common::{
    ChannelType, IspType, ModeType, PredMode, TreeType, INTRA_DC, INTRA_HOR, INTRA_PLANAR,
    INTRA_T_CCLM, INTRA_VERT, LUMA,
};
use super::ctu::ParseContext;
use super::cu::{CodingUnit, CuFlags, PredFlags, SbtInfo};
use super::frame::FrameTables;
use super::syntax::mode_allows_intra;
use super::transform_tree::{skipped_transform_tree, transform_tree};

/// 插值滤波在参考帧中向下多读的行数
const INTERP_MARGIN: i64 = 4;

/// 解码一个 CU
#[allow(clippy::too_many_arguments)]
pub(crate) fn coding_unit(
    ctx: &mut ParseContext<'_>,
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
    tree: TreeType,
    mode_type: ModeType,
) -> VvResult<()> {
    let mut cu = ctx.fc.pool.alloc_cu();
    cu.x0 = x0;
    cu.y0 = y0;
    cu.width = width;
    cu.height = height;
    cu.tree = tree;
    cu.mode_type = mode_type;
    ctx.init_cu_qp(&mut cu);

    if let Err(err) = build_cu(ctx, &mut cu) {
        ctx.fc.pool.release_one(cu);
        return Err(err);
    }
    commit_cu(ctx, &cu);
    ctx.qp.last_qp_y = cu.qp[0];
    trace!(
        "VVC: CU ({},{}) {}x{} {:?} {:?} qp={}",
        cu.x0,
        cu.y0,
        cu.width,
        cu.height,
        cu.tree,
        cu.pred_mode,
        cu.qp[0]
    );
    ctx.data.cus.push(cu)?;
    Ok(())
}

fn build_cu(ctx: &mut ParseContext<'_>, cu: &mut CodingUnit) -> VvResult<()> {
    let sps = ctx.sps();
    let sh = ctx.sh();
    let (w, h) = (cu.width, cu.height);
    let is_4x4 = w == 4 && h == 4;

    // ---------- 预测模式 ----------
    let mut skip = false;
    if (!sh.is_intra() || sps.ibc_enabled)
        && !is_4x4
        && cu.mode_type != ModeType::Intra
        && cu.tree != TreeType::DualChroma
        && (!sh.is_intra() || (w <= 64 && h <= 64))
    {
        skip = ctx.reader.cu_skip_flag(cu)?;
    }
    cu.flags.set(CuFlags::SKIP, skip);

    cu.pred_mode = if skip {
        PredMode::Skip
    } else if sh.is_intra() || is_4x4 || cu.mode_type == ModeType::Intra {
        PredMode::Intra
    } else if !mode_allows_intra(cu.mode_type) {
        PredMode::Inter
    } else if ctx.reader.pred_mode_flag(cu)? {
        PredMode::Intra
    } else {
        PredMode::Inter
    };

    let ibc_allowed = sps.ibc_enabled
        && w <= 64
        && h <= 64
        && cu.mode_type != ModeType::Inter
        && cu.tree != TreeType::DualChroma;
    let ibc = if skip && sh.is_intra() {
        true
    } else if ibc_allowed {
        let candidate = if sh.is_intra() {
            !skip
        } else {
            skip || cu.pred_mode != PredMode::Intra
        };
        candidate && ctx.reader.pred_mode_ibc_flag(cu)?
    } else {
        false
    };
    if ibc {
        cu.pred_mode = PredMode::Ibc;
        cu.flags.insert(CuFlags::IBC);
    }

    if cu.pred_mode == PredMode::Intra
        && sps.palette_enabled
        && w <= 64
        && h <= 64
        && cu.mode_type != ModeType::Inter
        && ctx.reader.pred_mode_plt_flag(cu)?
    {
        return Err(VvError::NotImplemented(format!(
            "调色板模式 CU ({},{})",
            cu.x0, cu.y0
        )));
    }
    if sps.act_enabled && cu.tree == TreeType::Single && ctx.reader.cu_act_enabled_flag(cu)? {
        return Err(VvError::NotImplemented(format!(
            "自适应颜色变换 CU ({},{})",
            cu.x0, cu.y0
        )));
    }

    // ---------- 帧内 / 帧间信息 ----------
    if cu.pred_mode == PredMode::Intra {
        intra_info(ctx, cu)?;
    } else {
        inter_info(ctx, cu)?;
    }

    // ---------- 残差 ----------
    let coded = if skip {
        false
    } else if cu.pred_mode == PredMode::Intra {
        true
    } else {
        ctx.reader.cu_coded_flag(cu)?
    };
    cu.flags.set(CuFlags::CODED, coded);
    let (x0, y0) = (cu.x0, cu.y0);
    if coded {
        cu.sbt = sbt_info(ctx, cu)?;
        transform_tree(ctx, cu, x0, y0, w, h)?;
        lfnst_mts(ctx, cu)?;
    } else {
        skipped_transform_tree(ctx, cu, x0, y0, w, h)?;
    }
    Ok(())
}

/// 帧内亮度与色度信息
fn intra_info(ctx: &mut ParseContext<'_>, cu: &mut CodingUnit) -> VvResult<()> {
    let sps = ctx.sps();
    let (w, h) = (cu.width, cu.height);
    let max_ts = 1usize << sps.log2_max_ts_size;
    let max_tb = 1usize << sps.log2_max_tb_size;

    if cu.tree.has_luma() {
        let bdpcm = if sps.bdpcm_enabled && w <= max_ts && h <= max_ts {
            ctx.reader.intra_bdpcm_luma(cu)?
        } else {
            None
        };
        if let Some(vertical) = bdpcm {
            cu.flags.insert(CuFlags::BDPCM_LUMA);
            cu.flags.set(CuFlags::BDPCM_LUMA_VER, vertical);
            cu.intra.luma_mode = if vertical { INTRA_VERT } else { INTRA_HOR };
        } else {
            let (info, mip, transposed) = ctx.reader.intra_luma_info(cu)?;
            if mip && !sps.mip_enabled {
                return Err(VvError::InvalidData("MIP 未启用".into()));
            }
            if info.luma_mode > 66 && !mip {
                return Err(VvError::InvalidData(format!(
                    "亮度帧内模式越界: {}",
                    info.luma_mode
                )));
            }
            cu.flags.set(CuFlags::MIP, mip);
            cu.flags.set(CuFlags::MIP_TRANSPOSED, mip && transposed);
            cu.intra.luma_mode = info.luma_mode;
            cu.intra.mrl_idx = info.mrl_idx;
            cu.intra.isp = info.isp;
            if info.isp != IspType::None {
                if !sps.isp_enabled || w * h <= 16 || w > max_tb || h > max_tb || info.mrl_idx != 0 {
                    return Err(VvError::InvalidData(format!(
                        "{w}x{h} CU 不允许 ISP"
                    )));
                }
                cu.intra.num_isp = if w * h == 32 { 2 } else { 4 };
            }
        }
    }

    if ctx.sps().tree_has_chroma(cu.tree) {
        let sps = ctx.sps();
        let (cw, ch) = (
            w >> sps.chroma_format.shift_x(),
            h >> sps.chroma_format.shift_y(),
        );
        let bdpcm = if sps.bdpcm_enabled && cw <= max_ts && ch <= max_ts {
            ctx.reader.intra_bdpcm_chroma(cu)?
        } else {
            None
        };
        let luma_mode = if cu.tree == TreeType::DualChroma {
            collocated_luma_mode(ctx, cu)
        } else if cu.flags.contains(CuFlags::MIP) {
            INTRA_PLANAR
        } else {
            cu.intra.luma_mode
        };
        if cu.tree == TreeType::DualChroma {
            cu.intra.luma_mode = luma_mode;
        }
        if let Some(vertical) = bdpcm {
            cu.flags.insert(CuFlags::BDPCM_CHROMA);
            cu.flags.set(CuFlags::BDPCM_CHROMA_VER, vertical);
            cu.intra.chroma_mode = if vertical { INTRA_VERT } else { INTRA_HOR };
        } else {
            let mode = ctx.reader.intra_chroma_pred_mode(cu, luma_mode)?;
            if mode > INTRA_T_CCLM {
                return Err(VvError::InvalidData(format!("色度帧内模式越界: {mode}")));
            }
            cu.intra.chroma_mode = mode;
        }
    }
    Ok(())
}

/// 色度树 CU 中心位置的同位亮度模式
fn collocated_luma_mode(ctx: &ParseContext<'_>, cu: &CodingUnit) -> u8 {
    let tables = &ctx.fc.tables;
    let (x4, y4) = FrameTables::at(cu.x0 + cu.width / 2, cu.y0 + cu.height / 2);
    let l = ChannelType::Luma as usize;
    if tables.pred_mode[l].get(x4, y4) != PredMode::Intra as u8 {
        return INTRA_DC;
    }
    tables.intra_mode.get(x4, y4)
}

/// 帧间运动信息
fn inter_info(ctx: &mut ParseContext<'_>, cu: &mut CodingUnit) -> VvResult<()> {
    let motion = ctx.reader.inter_data(cu)?;
    if cu.pred_mode == PredMode::Ibc {
        cu.motion = motion;
        return Ok(());
    }
    if motion.pred_flags.is_empty() {
        return Err(VvError::InvalidData(format!(
            "帧间 CU ({},{}) 没有预测方向",
            cu.x0, cu.y0
        )));
    }
    for list in 0..2 {
        let flag = if list == 0 { PredFlags::L0 } else { PredFlags::L1 };
        if motion.pred_flags.contains(flag) && motion.ref_idx[list] >= ctx.slice.refs[list].len() {
            return Err(VvError::InvalidData(format!(
                "参考索引越界: L{list}[{}]",
                motion.ref_idx[list]
            )));
        }
    }
    if motion.ciip && (!ctx.sps().ciip_enabled || cu.flags.contains(CuFlags::SKIP)) {
        return Err(VvError::InvalidData("CIIP 不可用".into()));
    }
    cu.flags.set(CuFlags::CIIP, motion.ciip);
    cu.flags.set(CuFlags::SUB_BLOCK_MOTION, motion.sub_block);
    cu.motion = motion;
    Ok(())
}

/// 子块变换
fn sbt_info(ctx: &mut ParseContext<'_>, cu: &CodingUnit) -> VvResult<Option<SbtInfo>> {
    let sps = ctx.sps();
    let max_tb = 1usize << sps.log2_max_tb_size;
    let (w, h) = (cu.width, cu.height);
    if cu.pred_mode != PredMode::Inter
        || !sps.sbt_enabled
        || cu.is_ciip()
        || w > max_tb
        || h > max_tb
    {
        return Ok(None);
    }
    let half_hor = h >= 8;
    let half_ver = w >= 8;
    let quad_hor = h >= 16;
    let quad_ver = w >= 16;
    if !(half_hor || half_ver) {
        return Ok(None);
    }
    let sbt = ctx
        .reader
        .cu_sbt(cu, half_hor, half_ver, quad_hor || quad_ver)?;
    if let Some(info) = sbt {
        let ok = match (info.horizontal, info.quad) {
            (true, false) => half_hor,
            (true, true) => quad_hor,
            (false, false) => half_ver,
            (false, true) => quad_ver,
        };
        if !ok {
            return Err(VvError::InvalidData(format!(
                "{w}x{h} CU 不允许该 SBT 划分: {info:?}"
            )));
        }
    }
    Ok(sbt)
}

/// LFNST 与显式 MTS 索引
fn lfnst_mts(ctx: &mut ParseContext<'_>, cu: &mut CodingUnit) -> VvResult<()> {
    let sps = ctx.sps();
    let max_tb = 1usize << sps.log2_max_tb_size;
    let (sx, sy) = (sps.chroma_format.shift_x(), sps.chroma_format.shift_y());

    // 系数分布统计
    let mut lfnst_dc_only = true;
    let mut lfnst_zero_out = true;
    let mut mts_dc_only = true;
    let mut mts_zero_out = true;
    let mut ts_in_scope = false;
    for tu in &cu.tus {
        for tb in tu.tbs.iter().filter(|tb| tb.has_coeffs) {
            let in_scope = match cu.tree {
                TreeType::DualChroma => tb.c_idx > 0,
                TreeType::DualLuma => tb.c_idx == LUMA,
                TreeType::Single => true,
            };
            if !in_scope {
                continue;
            }
            if tb.ts && (tb.c_idx == LUMA || cu.tree == TreeType::DualChroma) {
                ts_in_scope = true;
            }
            if tb.last_scan_pos > 0 {
                lfnst_dc_only = false;
            }
            if (tb.last_sub_block > 0 && tb.log2_w >= 2 && tb.log2_h >= 2)
                || (tb.last_scan_pos > 7 && (tb.log2_w == 2 || tb.log2_w == 3) && tb.log2_w == tb.log2_h)
            {
                lfnst_zero_out = false;
            }
            if tb.c_idx == LUMA {
                if tb.last_scan_pos > 0 {
                    mts_dc_only = false;
                }
                if tb.max_scan_x > 15 || tb.max_scan_y > 15 {
                    mts_zero_out = false;
                }
            }
        }
    }

    let (lw, lh) = if cu.tree == TreeType::DualChroma {
        (cu.width >> sx, cu.height >> sy)
    } else {
        let n = cu.intra.num_isp.max(1);
        match cu.intra.isp {
            IspType::Ver => (cu.width / n, cu.height),
            IspType::Hor => (cu.width, cu.height / n),
            IspType::None => (cu.width, cu.height),
        }
    };
    let mip = cu.flags.contains(CuFlags::MIP);
    let lfnst_allowed = sps.lfnst_enabled
        && cu.pred_mode == PredMode::Intra
        && !ts_in_scope
        && cu.width.max(cu.height) <= max_tb
        && (!mip || lw.min(lh) >= 16)
        && lw.min(lh) >= 4
        && (cu.intra.isp != IspType::None || !lfnst_dc_only)
        && lfnst_zero_out;
    if lfnst_allowed {
        let idx = ctx.reader.lfnst_idx(cu)?;
        if idx > 2 {
            return Err(VvError::InvalidData(format!("lfnst_idx 越界: {idx}")));
        }
        cu.lfnst_idx = idx;
    }

    let luma_ts = cu
        .tus
        .iter()
        .filter_map(|tu| tu.tb(LUMA))
        .any(|tb| tb.ts);
    let explicit = if cu.pred_mode == PredMode::Intra {
        sps.explicit_mts_intra_enabled
    } else {
        sps.explicit_mts_inter_enabled
    };
    let mts_allowed = sps.mts_enabled
        && explicit
        && cu.tree != TreeType::DualChroma
        && cu.lfnst_idx == 0
        && !luma_ts
        && cu.width.max(cu.height) <= 32
        && cu.intra.isp == IspType::None
        && cu.sbt.is_none()
        && !mts_dc_only
        && mts_zero_out;
    if mts_allowed {
        let idx = ctx.reader.mts_idx(cu)?;
        if idx > 4 {
            return Err(VvError::InvalidData(format!("mts_idx 越界: {idx}")));
        }
        cu.mts_idx = idx;
    }
    Ok(())
}

/// 把 CU 写入帧信息表并更新参考帧行需求
fn commit_cu(ctx: &mut ParseContext<'_>, cu: &CodingUnit) {
    let tables = &ctx.fc.tables;
    let ch = cu.channel();
    let c = ch as usize;
    let (x4, y4, w4, h4) = FrameTables::rect4(cu.x0, cu.y0, cu.width, cu.height);
    tables.set_cb(ch, cu.x0, cu.y0, cu.width, cu.height);
    tables.pred_mode[c].fill_rect(x4, y4, w4, h4, cu.pred_mode as u8);
    tables.qp[c].fill_rect(x4, y4, w4, h4, cu.qp[0] as i16);
    if cu.tree == TreeType::Single {
        // 单树时色度通道与亮度共用同一份 CU 信息
        let cc = ChannelType::Chroma;
        tables.set_cb(cc, cu.x0, cu.y0, cu.width, cu.height);
        tables.pred_mode[cc as usize].fill_rect(x4, y4, w4, h4, cu.pred_mode as u8);
        tables.qp[cc as usize].fill_rect(x4, y4, w4, h4, cu.qp[0] as i16);
    }
    if cu.tree.has_luma() {
        tables.skip.fill_rect(x4, y4, w4, h4, u8::from(cu.flags.contains(CuFlags::SKIP)));
        tables.ciip.fill_rect(x4, y4, w4, h4, u8::from(cu.is_ciip()));
        let mode = if cu.flags.contains(CuFlags::MIP) {
            INTRA_PLANAR
        } else {
            cu.intra.luma_mode
        };
        tables.intra_mode.fill_rect(x4, y4, w4, h4, mode);
        tables.bdpcm[0].fill_rect(x4, y4, w4, h4, u8::from(cu.bdpcm(LUMA).is_some()));
        tables
            .sub_block
            .fill_rect(x4, y4, w4, h4, u8::from(cu.flags.contains(CuFlags::SUB_BLOCK_MOTION)));
        let motion = &cu.motion;
        let flags = if cu.pred_mode.is_intra() {
            PredFlags::empty()
        } else {
            motion.pred_flags
        };
        tables.pred_flags.fill_rect(x4, y4, w4, h4, flags.bits());
        for list in 0..2 {
            tables.mv_x[list].fill_rect(x4, y4, w4, h4, motion.mv[list].x);
            tables.mv_y[list].fill_rect(x4, y4, w4, h4, motion.mv[list].y);
            let poc = ctx
                .slice
                .refs[list]
                .get(motion.ref_idx[list])
                .map_or(0, |r| r.poc);
            tables.ref_poc[list].fill_rect(x4, y4, w4, h4, poc);
        }
    }
    if cu.tree.has_chroma() {
        tables.bdpcm[1].fill_rect(x4, y4, w4, h4, u8::from(cu.bdpcm(1).is_some()));
    }

    // 帧间 CU 对参考帧的最大行需求
    if matches!(cu.pred_mode, PredMode::Inter | PredMode::Skip) {
        for list in 0..2 {
            let flag = if list == 0 { PredFlags::L0 } else { PredFlags::L1 };
            if !cu.motion.pred_flags.contains(flag) {
                continue;
            }
            let bottom = (cu.y0 + cu.height) as i64 + i64::from(cu.motion.mv[list].y >> 4) + INTERP_MARGIN;
            let bottom = bottom.max(0) as usize;
            if let Some(slot) = ctx.data.max_y[list].get_mut(cu.motion.ref_idx[list]) {
                *slot = (*slot).max(bottom);
            }
        }
    }
}
