//! CTU 级解析: 编码树递归, 划分可行性推导, 量化组与 QP 预测.
//!
//! 每个 PARSE 任务持有一个 [`ParseContext`], 在入口点读取器上按语法顺序
//! 解出一个 CTU 的全部 CU, 结果保存在 [`CtuData`] 中交给 RECON.

use log::{debug, trace};
use vvrec_core::{ChromaFormat, VvError, VvResult};

use super::coding_unit::coding_unit;
use super::common::{ChannelType, ModeType, SplitMode, TreeType};
use super::cu::CodingUnit;
use super::frame::{CtuData, CtuFilterParams, FrameContext, FrameTables, Slice};
use super::params::{SliceHeader, Sps};
use super::syntax::{SplitAllowed, SplitContext, SyntaxReader};

/// VPDU 尺寸
const VPDU_SIZE: usize = 64;

// ============================================================
// QP 状态
// ============================================================

/// 入口点内跨 CTU 携带的 QP 状态
///
/// 每个入口点 (slice / tile / WPP 行) 开始时以 slice QP 重新初始化.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QpState {
    /// 尚未遇到第一个量化组
    pub first_qg: bool,
    /// 解码顺序上前一个 CU 的 QpY
    pub last_qp_y: i32,
    pub qg_x: usize,
    pub qg_y: usize,
    /// 当前量化组的预测 QpY
    pub qg_pred: i32,
    /// 当前量化组已生效的 QpY
    pub cur_qp_y: i32,
    pub is_cu_qp_delta_coded: bool,
    pub is_chroma_qp_offset_coded: bool,
    /// `CuQpOffsetCb / Cr / CbCr`
    pub chroma_offset: [i32; 3],
}

impl QpState {
    pub fn new(slice_qp: i32) -> Self {
        Self {
            first_qg: true,
            last_qp_y: slice_qp,
            qg_x: 0,
            qg_y: 0,
            qg_pred: slice_qp,
            cur_qp_y: slice_qp,
            is_cu_qp_delta_coded: false,
            is_chroma_qp_offset_coded: false,
            chroma_offset: [0; 3],
        }
    }
}

// ============================================================
// 解析上下文
// ============================================================

/// 一个 CTU 的解析上下文
pub struct ParseContext<'a> {
    pub fc: &'a FrameContext,
    pub slice: &'a Slice,
    pub reader: &'a mut (dyn SyntaxReader + Send),
    pub qp: &'a mut QpState,
    pub rx: usize,
    pub ry: usize,
    pub data: CtuData,
}

impl<'a> ParseContext<'a> {
    pub fn new(
        fc: &'a FrameContext,
        slice: &'a Slice,
        reader: &'a mut (dyn SyntaxReader + Send),
        qp: &'a mut QpState,
        rx: usize,
        ry: usize,
    ) -> Self {
        let refs = [slice.refs[0].len(), slice.refs[1].len()];
        let data = CtuData {
            coeffs: fc.pool.alloc_coeffs(),
            max_y: [vec![0; refs[0]], vec![0; refs[1]]],
            ..CtuData::default()
        };
        Self {
            fc,
            slice,
            reader,
            qp,
            rx,
            ry,
            data,
        }
    }

    pub fn sps(&self) -> &'a Sps {
        &self.fc.params.sps
    }

    pub fn sh(&self) -> &'a SliceHeader {
        &self.slice.header
    }

    /// 结束解析, 交出 CTU 数据
    pub fn finish(self) -> CtuData {
        self.data
    }

    fn ctb_mask(&self) -> usize {
        self.fc.params.geometry.ctb_size - 1
    }

    /// 开始一个新的亮度量化组并计算预测 QpY
    pub(crate) fn start_qg(&mut self, ch: ChannelType, x0: usize, y0: usize) {
        let prev = if self.qp.first_qg {
            self.sh().slice_qp_y
        } else {
            self.qp.last_qp_y
        };
        self.qp.first_qg = false;
        let mask = self.ctb_mask();
        let table = &self.fc.tables.qp[ch as usize];
        // 左 / 上量化组只在同一 CTB 内可用
        let qp_a = if x0 & mask != 0 {
            let (x4, y4) = FrameTables::at(x0 - 1, y0);
            i32::from(table.get(x4, y4))
        } else {
            prev
        };
        let qp_b = if y0 & mask != 0 {
            let (x4, y4) = FrameTables::at(x0, y0 - 1);
            i32::from(table.get(x4, y4))
        } else {
            prev
        };
        let pred = (qp_a + qp_b + 1) >> 1;
        self.qp.qg_x = x0;
        self.qp.qg_y = y0;
        self.qp.qg_pred = pred;
        self.qp.cur_qp_y = pred;
        self.qp.is_cu_qp_delta_coded = false;
    }

    /// 开始一个新的色度 QP 偏移组
    pub(crate) fn start_chroma_qg(&mut self) {
        self.qp.is_chroma_qp_offset_coded = false;
        self.qp.chroma_offset = [0; 3];
    }

    /// 用当前量化组的 QpY 初始化 CU 的 QP
    pub(crate) fn init_cu_qp(&self, cu: &mut CodingUnit) {
        cu.qp[0] = self.qp.cur_qp_y;
        self.set_qp_c(cu);
    }

    /// 应用 `CuQpDeltaVal`
    pub(crate) fn apply_qp_delta(&mut self, cu: &mut CodingUnit, delta: i32) {
        let off = self.sps().qp_bd_offset();
        let qp_y = ((self.qp.qg_pred + delta + 64 + 2 * off) % (64 + off)) - off;
        trace!("VVC: QG({},{}) 预测 {} 增量 {} -> {}", self.qp.qg_x, self.qp.qg_y, self.qp.qg_pred, delta, qp_y);
        self.qp.cur_qp_y = qp_y;
        cu.qp[0] = qp_y;
        self.set_qp_c(cu);
    }

    /// 应用 CU 级色度 QP 偏移; `None` 表示偏移为 0
    pub(crate) fn apply_chroma_qp_offset(&mut self, cu: &mut CodingUnit, idx: Option<usize>) -> VvResult<()> {
        self.qp.chroma_offset = match idx {
            Some(i) => *self.fc.params.pps.chroma_qp_offset_list.get(i).ok_or_else(|| {
                VvError::InvalidData(format!("cu_chroma_qp_offset_idx 越界: {i}"))
            })?,
            None => [0; 3],
        };
        self.set_qp_c(cu);
        Ok(())
    }

    /// 由 QpY 推导 `Qp'Cb`, `Qp'Cr`, `Qp'CbCr` (含位深偏移)
    pub(crate) fn set_qp_c(&self, cu: &mut CodingUnit) {
        let fp = &self.fc.params;
        let pps = &fp.pps;
        let sh = self.sh();
        let off = self.sps().qp_bd_offset();
        let qpi = cu.qp[0].clamp(-off, 63);
        let offsets = [
            pps.cb_qp_offset + sh.cb_qp_offset,
            pps.cr_qp_offset + sh.cr_qp_offset,
            pps.joint_cbcr_qp_offset + sh.joint_cbcr_qp_offset,
        ];
        for (i, base) in offsets.into_iter().enumerate() {
            let qpc = fp.map_chroma_qp(i, qpi) + base + self.qp.chroma_offset[i];
            cu.qp[i + 1] = qpc.clamp(-off, 63) + off;
        }
    }
}

// ============================================================
// 划分可行性
// ============================================================

/// 编码树递归中的节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CodingTreeState {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    pub cb_subdiv: u32,
    pub cqt_depth: u32,
    pub mtt_depth: u32,
    /// 边界隐式二叉划分累加的深度补偿
    pub depth_offset: u32,
    /// 作为三叉划分中间子块时, 与父划分同向的二叉划分
    pub parallel_tt: Option<SplitMode>,
    pub qg_on_y: bool,
    pub qg_on_c: bool,
    pub tree: TreeType,
    pub mode_type: ModeType,
}

impl CodingTreeState {
    /// CTU 根节点
    pub(crate) fn root(x0: usize, y0: usize, size: usize, cqt_depth: u32, tree: TreeType) -> Self {
        Self {
            x0,
            y0,
            width: size,
            height: size,
            cb_subdiv: 2 * cqt_depth,
            cqt_depth,
            mtt_depth: 0,
            depth_offset: 0,
            parallel_tt: None,
            qg_on_y: true,
            qg_on_c: true,
            tree,
            mode_type: ModeType::All,
        }
    }

    fn split_context(&self, allowed: SplitAllowed) -> SplitContext {
        SplitContext {
            x0: self.x0,
            y0: self.y0,
            width: self.width,
            height: self.height,
            cqt_depth: self.cqt_depth,
            mtt_depth: self.mtt_depth,
            tree: self.tree,
            allowed,
        }
    }
}

/// 推导当前块允许的划分方式
///
/// 依次考虑最小 / 最大尺寸, 多类型树深度, 色度树下限, 限定帧间的小块,
/// 图像边界, 三叉中间块与 64x64 VPDU 约束. VPDU 约束与最大变换尺寸无关.
pub(crate) fn can_split(sps: &Sps, sh: &SliceHeader, st: &CodingTreeState) -> SplitAllowed {
    let cons = sh.partition(st.tree);
    let (w, h) = (st.width, st.height);
    let (pic_w, pic_h) = (sps.width, sps.height);
    let min_cb = 1usize << sps.log2_min_cb_size;
    let min_qt = 1usize << cons.log2_min_qt_size;
    let max_bt = 1usize << cons.log2_max_bt_size;
    let max_tt = 1usize << cons.log2_max_tt_size;
    let max_mtt_depth = cons.max_mtt_depth + st.depth_offset;
    let chroma_tree = st.tree == TreeType::DualChroma;
    let (cw, ch) = (
        w >> sps.chroma_format.shift_x(),
        h >> sps.chroma_format.shift_y(),
    );
    let chroma_intra_leaf = chroma_tree && st.mode_type == ModeType::Intra;
    let inter_only = st.mode_type == ModeType::Inter;
    let crosses_right = st.x0 + w > pic_w;
    let crosses_bottom = st.y0 + h > pic_h;

    let mut allowed = SplitAllowed::empty();

    // 四叉树
    let qt = !(w <= min_qt
        || st.mtt_depth != 0
        || (chroma_tree && cw <= 4)
        || chroma_intra_leaf);
    allowed.set(SplitAllowed::QT, qt);

    // 二叉树
    for split in [SplitMode::BtVer, SplitMode::BtHor] {
        let vertical = split.is_vertical();
        let size = if vertical { w } else { h };
        let ok = if size <= min_cb
            || w > max_bt
            || h > max_bt
            || st.mtt_depth >= max_mtt_depth
            || (chroma_tree && cw * ch <= 16)
            || (chroma_tree && vertical && cw <= 4)
            || chroma_intra_leaf
            || (inter_only && w * h == 32)
        {
            false
        } else if (vertical && crosses_bottom)
            || (vertical && h > VPDU_SIZE && crosses_right)
            || (!vertical && w > VPDU_SIZE && crosses_bottom)
            || (crosses_right && crosses_bottom && w > min_qt)
            || (!vertical && crosses_right && !crosses_bottom)
        {
            false
        } else if st.mtt_depth > 0 && st.parallel_tt == Some(split) {
            false
        } else if vertical {
            !(w <= VPDU_SIZE && h > VPDU_SIZE)
        } else {
            !(w > VPDU_SIZE && h <= VPDU_SIZE)
        };
        allowed.set(
            if vertical {
                SplitAllowed::BT_VER
            } else {
                SplitAllowed::BT_HOR
            },
            ok,
        );
    }

    // 三叉树
    for split in [SplitMode::TtVer, SplitMode::TtHor] {
        let vertical = split.is_vertical();
        let size = if vertical { w } else { h };
        let limit = VPDU_SIZE.min(max_tt);
        let ok = !(size <= 2 * min_cb
            || w > limit
            || h > limit
            || crosses_right
            || crosses_bottom
            || st.mtt_depth >= max_mtt_depth
            || (chroma_tree && cw * ch <= 32)
            || (chroma_tree && vertical && cw == 8)
            || chroma_intra_leaf
            || (inter_only && w * h == 64));
        allowed.set(
            if vertical {
                SplitAllowed::TT_VER
            } else {
                SplitAllowed::TT_HOR
            },
            ok,
        );
    }
    allowed
}

/// 模式类型条件: 0 继承, 1 限定帧内, 2 由 `non_inter_flag` 决定
fn mode_type_condition(sps: &Sps, sh: &SliceHeader, st: &CodingTreeState, split: SplitMode) -> u8 {
    let fmt = sps.chroma_format;
    if (sh.is_intra() && sps.qtbtt_dual_tree_intra)
        || st.mode_type != ModeType::All
        || matches!(fmt, ChromaFormat::Monochrome | ChromaFormat::Yuv444)
    {
        return 0;
    }
    let area = st.width * st.height;
    let tt = matches!(split, SplitMode::TtHor | SplitMode::TtVer);
    let bt = matches!(split, SplitMode::BtHor | SplitMode::BtVer);
    if (area == 64 && (split == SplitMode::Qt || tt)) || (area == 32 && bt) {
        return 1;
    }
    let yuv420 = fmt == ChromaFormat::Yuv420;
    if (area == 64 && bt && yuv420)
        || (area == 128 && tt && yuv420)
        || (st.width == 8 && split == SplitMode::BtVer)
        || (st.width == 16 && split == SplitMode::TtVer)
    {
        return if sh.is_intra() { 1 } else { 2 };
    }
    0
}

// ============================================================
// 编码树递归
// ============================================================

/// 根据已允许的划分读出 (或推断) 划分方式
fn read_split(
    ctx: &mut ParseContext<'_>,
    sctx: &SplitContext,
    allowed: SplitAllowed,
) -> VvResult<SplitMode> {
    let qt = if allowed.contains(SplitAllowed::QT) && allowed.any_mtt() {
        ctx.reader.split_qt_flag(sctx)?
    } else {
        allowed.contains(SplitAllowed::QT)
    };
    if qt {
        return Ok(SplitMode::Qt);
    }
    let hor = allowed.intersects(SplitAllowed::BT_HOR | SplitAllowed::TT_HOR);
    let ver = allowed.intersects(SplitAllowed::BT_VER | SplitAllowed::TT_VER);
    let vertical = if hor && ver {
        ctx.reader.mtt_split_cu_vertical_flag(sctx)?
    } else {
        !hor
    };
    let (bt, tt) = if vertical {
        (SplitMode::BtVer, SplitMode::TtVer)
    } else {
        (SplitMode::BtHor, SplitMode::TtHor)
    };
    let binary = if allowed.allows(bt) && allowed.allows(tt) {
        ctx.reader.mtt_split_cu_binary_flag(sctx)?
    } else {
        allowed.allows(bt)
    };
    Ok(if binary { bt } else { tt })
}

/// 解码一个编码树节点
pub(crate) fn coding_tree(ctx: &mut ParseContext<'_>, st: CodingTreeState) -> VvResult<()> {
    let sps = ctx.sps();
    let sh = ctx.sh();
    let allowed = can_split(sps, sh, &st);
    let sctx = st.split_context(allowed);
    let inside = st.x0 + st.width <= sps.width && st.y0 + st.height <= sps.height;

    let split_cu = if allowed.is_empty() {
        false
    } else if inside {
        ctx.reader.split_cu_flag(&sctx)?
    } else {
        true
    };
    if !inside && !split_cu {
        return Err(VvError::InvalidData(format!(
            "越过图像边界的块无法划分: ({},{}) {}x{}",
            st.x0, st.y0, st.width, st.height
        )));
    }

    if st.qg_on_y && st.cb_subdiv <= sh.cu_qp_delta_subdiv {
        ctx.start_qg(st.tree.channel(), st.x0, st.y0);
    }
    if sh.cu_chroma_qp_offset_enabled && st.qg_on_c && st.cb_subdiv <= sh.cu_chroma_qp_offset_subdiv {
        ctx.start_chroma_qg();
    }

    if !split_cu {
        return coding_unit(ctx, st.x0, st.y0, st.width, st.height, st.tree, st.mode_type);
    }

    let split = read_split(ctx, &sctx, allowed)?;
    let mode_type = match mode_type_condition(sps, sh, &st, split) {
        1 => ModeType::Intra,
        2 => {
            if ctx.reader.non_inter_flag(&sctx)? {
                ModeType::Intra
            } else {
                ModeType::Inter
            }
        }
        _ => st.mode_type,
    };
    let tree = if mode_type == ModeType::Intra && st.tree == TreeType::Single {
        TreeType::DualLuma
    } else {
        st.tree
    };
    trace!(
        "VVC: 划分 ({},{}) {}x{} {:?} mode_type={:?}",
        st.x0, st.y0, st.width, st.height, split, mode_type
    );

    let child = CodingTreeState {
        mtt_depth: st.mtt_depth + u32::from(split.is_mtt()),
        parallel_tt: None,
        tree,
        mode_type,
        ..st
    };
    let (pic_w, pic_h) = (sps.width, sps.height);
    match split {
        SplitMode::Qt => {
            let (hw, hh) = (st.width / 2, st.height / 2);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (x, y) = (st.x0 + dx * hw, st.y0 + dy * hh);
                if x < pic_w && y < pic_h {
                    coding_tree(
                        ctx,
                        CodingTreeState {
                            x0: x,
                            y0: y,
                            width: hw,
                            height: hh,
                            cb_subdiv: st.cb_subdiv + 2,
                            cqt_depth: st.cqt_depth + 1,
                            ..child
                        },
                    )?;
                }
            }
        }
        SplitMode::BtVer | SplitMode::BtHor => {
            let vertical = split.is_vertical();
            let crosses = if vertical {
                st.x0 + st.width > pic_w
            } else {
                st.y0 + st.height > pic_h
            };
            let (w, h) = if vertical {
                (st.width / 2, st.height)
            } else {
                (st.width, st.height / 2)
            };
            for part in 0..2 {
                let (x, y) = if vertical {
                    (st.x0 + part * w, st.y0)
                } else {
                    (st.x0, st.y0 + part * h)
                };
                if x < pic_w && y < pic_h {
                    coding_tree(
                        ctx,
                        CodingTreeState {
                            x0: x,
                            y0: y,
                            width: w,
                            height: h,
                            cb_subdiv: st.cb_subdiv + 1,
                            depth_offset: st.depth_offset + u32::from(crosses),
                            ..child
                        },
                    )?;
                }
            }
        }
        SplitMode::TtVer | SplitMode::TtHor => {
            let vertical = split.is_vertical();
            let qg_on_y = st.qg_on_y && st.cb_subdiv + 2 <= sh.cu_qp_delta_subdiv;
            let qg_on_c = st.qg_on_c && st.cb_subdiv + 2 <= sh.cu_chroma_qp_offset_subdiv;
            let len = if vertical { st.width } else { st.height };
            let parts = [(0, len / 4), (len / 4, len / 2), (3 * len / 4, len / 4)];
            let parallel = if vertical {
                SplitMode::BtVer
            } else {
                SplitMode::BtHor
            };
            for (part, &(off, size)) in parts.iter().enumerate() {
                let middle = part == 1;
                let (x, y, w, h) = if vertical {
                    (st.x0 + off, st.y0, size, st.height)
                } else {
                    (st.x0, st.y0 + off, st.width, size)
                };
                coding_tree(
                    ctx,
                    CodingTreeState {
                        x0: x,
                        y0: y,
                        width: w,
                        height: h,
                        cb_subdiv: st.cb_subdiv + if middle { 1 } else { 2 },
                        parallel_tt: middle.then_some(parallel),
                        qg_on_y,
                        qg_on_c,
                        ..child
                    },
                )?;
            }
        }
    }

    // 局部双树: 亮度子树之后, 整个区域作为一个色度 CU
    if st.mode_type == ModeType::All && mode_type == ModeType::Intra && sps.tree_has_chroma(TreeType::DualChroma)
    {
        coding_unit(ctx, st.x0, st.y0, st.width, st.height, TreeType::DualChroma, mode_type)?;
    }
    Ok(())
}

/// 帧内双树 slice 中 CTU 的隐式四叉划分, 直到 64x64 后分别解码亮度树和色度树
pub(crate) fn dual_tree_implicit_qt_split(
    ctx: &mut ParseContext<'_>,
    x0: usize,
    y0: usize,
    size: usize,
    cqt_depth: u32,
) -> VvResult<()> {
    let sps = ctx.sps();
    let sh = ctx.sh();
    if size > VPDU_SIZE {
        let subdiv = 2 * cqt_depth;
        if subdiv <= sh.cu_qp_delta_subdiv {
            ctx.start_qg(ChannelType::Luma, x0, y0);
        }
        if sh.cu_chroma_qp_offset_enabled && subdiv <= sh.cu_chroma_qp_offset_subdiv {
            ctx.start_chroma_qg();
        }
        let half = size / 2;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let (x, y) = (x0 + dx * half, y0 + dy * half);
            if x < sps.width && y < sps.height {
                dual_tree_implicit_qt_split(ctx, x, y, half, cqt_depth + 1)?;
            }
        }
        return Ok(());
    }
    coding_tree(ctx, CodingTreeState::root(x0, y0, size, cqt_depth, TreeType::DualLuma))?;
    if sps.tree_has_chroma(TreeType::DualChroma) {
        coding_tree(ctx, CodingTreeState::root(x0, y0, size, cqt_depth, TreeType::DualChroma))?;
    }
    Ok(())
}

/// 解码一个 CTU
///
/// 依次读取 SAO / ALF 参数, 编码树, 以及 `end_of_slice_segment_flag`;
/// 该标志必须且只能在 slice 的最后一个 CTU 处为真.
pub fn coding_tree_unit(ctx: &mut ParseContext<'_>) -> VvResult<()> {
    let fc = ctx.fc;
    let sps = ctx.sps();
    let sh = ctx.sh();
    let (rx, ry) = (ctx.rx, ctx.ry);
    let geo = &fc.params.geometry;
    let (x0, y0) = (rx << geo.log2_ctb_size, ry << geo.log2_ctb_size);

    let mut filters = CtuFilterParams::default();
    if sps.sao_enabled && (sh.sao_luma || sh.sao_chroma) {
        filters.sao = ctx.reader.sao_params(rx, ry)?;
        filters.sao.validate(sps.bit_depth)?;
    }
    if sps.alf_enabled && sh.alf_enabled {
        filters.alf = ctx.reader.alf_params(rx, ry)?;
        filters.alf.validate(&fc.params, sh)?;
    }
    fc.set_filter_params(rx, ry, filters)?;

    if sh.is_intra() && sps.qtbtt_dual_tree_intra {
        dual_tree_implicit_qt_split(ctx, x0, y0, geo.ctb_size, 0)?;
    } else {
        coding_tree(ctx, CodingTreeState::root(x0, y0, geo.ctb_size, 0, TreeType::Single))?;
    }

    let addr = fc.ctb_addr(rx, ry);
    let is_last = sh.ctb_addrs.last() == Some(&addr);
    let end = ctx.reader.end_of_slice_flag()?;
    if end != is_last {
        return Err(VvError::InvalidData(format!(
            "CTU ({rx},{ry}) 的 end_of_slice_segment_flag={end} 与 slice 结构不符"
        )));
    }
    debug!(
        "VVC: CTU ({},{}) 解析完成, {} 个 CU, {} 个系数",
        rx,
        ry,
        ctx.data.cus.len(),
        ctx.data.coeffs.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CodingTreeState, can_split, mode_type_condition};
    use crate::decoders::vvc::common::{ModeType, SplitMode, TreeType};
    use crate::decoders::vvc::params::{SliceHeader, SliceType, Sps};
    use crate::decoders::vvc::syntax::SplitAllowed;

    fn sps(width: usize, height: usize) -> Sps {
        Sps {
            width,
            height,
            ..Sps::default()
        }
    }

    fn inter_sh() -> SliceHeader {
        SliceHeader {
            slice_type: SliceType::B,
            ..SliceHeader::default()
        }
    }

    fn node(x0: usize, y0: usize, w: usize, h: usize, mtt_depth: u32) -> CodingTreeState {
        CodingTreeState {
            width: w,
            height: h,
            mtt_depth,
            ..CodingTreeState::root(x0, y0, w, 0, TreeType::Single)
        }
    }

    #[test]
    fn test_boundary_forbids_tt_and_crossing_bt() {
        let sps = sps(1920, 1080);
        let sh = inter_sh();
        // 底部越界的 128x128 CTU
        let st = node(0, 1024, 128, 128, 0);
        let allowed = can_split(&sps, &sh, &st);
        assert!(allowed.contains(SplitAllowed::QT));
        assert!(!allowed.contains(SplitAllowed::TT_HOR), "越界块不允许三叉划分");
        assert!(!allowed.contains(SplitAllowed::BT_VER), "底部越界时不允许垂直二叉划分");
    }

    #[test]
    fn test_vpdu_rules() {
        let sps = sps(256, 256);
        let mut sh = inter_sh();
        sh.partition_inter.log2_max_bt_size = 7;
        // 128x64 只能垂直二叉划分
        let allowed = can_split(&sps, &sh, &node(0, 0, 128, 64, 1));
        assert!(allowed.contains(SplitAllowed::BT_VER));
        assert!(!allowed.contains(SplitAllowed::BT_HOR), "128x64 水平划分会跨越 VPDU");
        assert!(!allowed.contains(SplitAllowed::TT_VER), "三叉划分不能超过 64");
    }

    #[test]
    fn test_vpdu_limit_ignores_max_tb_size() {
        let sps = Sps {
            log2_max_tb_size: 5,
            ..sps(256, 256)
        };
        let sh = inter_sh();
        let allowed = can_split(&sps, &sh, &node(0, 0, 32, 64, 1));
        assert!(allowed.contains(SplitAllowed::BT_VER), "32x64 垂直二叉划分不跨越 64x64 VPDU");
        assert!(allowed.contains(SplitAllowed::BT_HOR));
        let wide = can_split(&sps, &sh, &node(0, 0, 64, 32, 1));
        assert!(wide.contains(SplitAllowed::BT_HOR), "64x32 水平二叉划分不跨越 64x64 VPDU");
    }

    #[test]
    fn test_inter_mode_type_blocks_small_splits() {
        let sps = sps(256, 256);
        let sh = inter_sh();
        let inter = |st: CodingTreeState| CodingTreeState {
            mode_type: ModeType::Inter,
            ..st
        };
        // 面积 32 的块在 MODE_TYPE_ALL 下仍可水平二叉划分
        assert!(can_split(&sps, &sh, &node(0, 0, 4, 8, 1)).contains(SplitAllowed::BT_HOR));
        assert!(
            can_split(&sps, &sh, &inter(node(0, 0, 4, 8, 1))).is_empty(),
            "限定帧间时面积 32 的块不能二叉划分"
        );
        assert!(can_split(&sps, &sh, &node(0, 0, 4, 16, 1)).contains(SplitAllowed::TT_HOR));
        let tall = can_split(&sps, &sh, &inter(node(0, 0, 4, 16, 1)));
        assert!(!tall.contains(SplitAllowed::TT_HOR), "限定帧间时面积 64 的块不能三叉划分");
        assert!(tall.contains(SplitAllowed::BT_HOR), "面积 64 的块仍可二叉划分");
    }

    #[test]
    fn test_boundary_bt_rules_for_large_blocks() {
        let mut sh = inter_sh();
        sh.partition_inter.log2_max_bt_size = 7;
        sh.partition_inter.log2_max_tt_size = 7;

        // 越过右边界且高度大于 64: 不允许垂直二叉划分
        let right = can_split(&sps(200, 256), &sh, &node(128, 0, 128, 128, 0));
        assert_eq!(right, SplitAllowed::QT, "右边界 128x128 块只能四叉划分");

        // 越过底边界且宽度大于 64: 不允许水平二叉划分
        let bottom = can_split(&sps(256, 200), &sh, &node(0, 128, 128, 128, 0));
        assert_eq!(bottom, SplitAllowed::QT, "底边界 128x128 块只能四叉划分");

        // 同时越过两条边界且宽度大于 MinQtSize
        let corner = can_split(&sps(200, 200), &sh, &node(128, 128, 128, 128, 0));
        assert_eq!(corner, SplitAllowed::QT, "角部 128x128 块只能四叉划分");
    }

    #[test]
    fn test_boundary_corner_at_min_qt_size_allows_bt() {
        let sh = inter_sh();
        // 8x8 已到 MinQtSize, 角部块只能水平二叉划分
        let corner = can_split(&sps(196, 196), &sh, &node(192, 192, 8, 8, 0));
        assert_eq!(corner, SplitAllowed::BT_HOR);
        // 仅越过底边界的 64 宽块仍可水平二叉划分
        let bottom = can_split(&sps(256, 200), &sh, &node(0, 192, 64, 64, 0));
        assert!(bottom.contains(SplitAllowed::BT_HOR));
        assert!(!bottom.contains(SplitAllowed::BT_VER));
    }

    #[test]
    fn test_tt_middle_forbids_parallel_bt() {
        let sps = sps(256, 256);
        let sh = inter_sh();
        let st = CodingTreeState {
            parallel_tt: Some(SplitMode::BtVer),
            ..node(0, 0, 16, 32, 1)
        };
        let allowed = can_split(&sps, &sh, &st);
        assert!(!allowed.contains(SplitAllowed::BT_VER), "三叉中间块禁止同向二叉划分");
        assert!(allowed.contains(SplitAllowed::BT_HOR));
    }

    #[test]
    fn test_min_sizes_and_depth() {
        let sps = sps(256, 256);
        let sh = inter_sh();
        let allowed = can_split(&sps, &sh, &node(0, 0, 4, 8, 2));
        assert!(!allowed.contains(SplitAllowed::BT_VER), "宽 4 不能再垂直划分");
        assert!(!allowed.contains(SplitAllowed::QT), "多类型树之下不允许四叉划分");
        let deep = can_split(&sps, &sh, &node(0, 0, 32, 32, 3));
        assert!(!deep.any_mtt(), "达到最大多类型树深度");
    }

    #[test]
    fn test_chroma_tree_floors() {
        let sps = sps(256, 256);
        let sh = SliceHeader::default();
        let st = CodingTreeState {
            tree: TreeType::DualChroma,
            ..node(0, 0, 8, 8, 1)
        };
        let allowed = can_split(&sps, &sh, &st);
        assert!(allowed.is_empty(), "4x4 色度块不能继续划分");
    }

    #[test]
    fn test_mode_type_condition() {
        let sps = sps(256, 256);
        let inter = inter_sh();
        let intra = SliceHeader::default();
        assert_eq!(mode_type_condition(&sps, &inter, &node(0, 0, 8, 8, 0), SplitMode::Qt), 1);
        assert_eq!(mode_type_condition(&sps, &inter, &node(0, 0, 8, 8, 0), SplitMode::BtHor), 2);
        assert_eq!(mode_type_condition(&sps, &intra, &node(0, 0, 8, 8, 0), SplitMode::BtHor), 1);
        assert_eq!(mode_type_condition(&sps, &inter, &node(0, 0, 32, 32, 0), SplitMode::BtHor), 0);
        let restricted = CodingTreeState {
            mode_type: ModeType::Intra,
            ..node(0, 0, 8, 8, 0)
        };
        assert_eq!(mode_type_condition(&sps, &inter, &restricted, SplitMode::Qt), 0);
    }
}
