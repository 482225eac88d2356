//! 帧级参数集合.
//!
//! SPS/PPS/PH/SH/APS 的语法解析不在本 crate 范围内, 这里只定义解析结果的
//! 结构体, 以及 [`decode_frame_ps`]: 校验这些语法值并派生重建流水线需要的
//! 辅助量 (CTU 网格, tile 边界映射, 色度 QP 映射表, LMCS 查找表, 缩放矩阵).

use std::sync::Arc;

use log::debug;
use vvrec_core::{ChromaFormat, VvError, VvResult};

use super::alf::AlfFilterSet;
use super::common::{ChannelType, TreeType};
use super::lmcs::{LmcsSyntax, LmcsTables};

// ============================================================
// SPS
// ============================================================

/// 色度 QP 映射表的分段点语法
#[derive(Debug, Clone, Default)]
pub struct ChromaQpTableSyntax {
    /// `sps_qp_table_start_minus26`
    pub start_minus26: i32,
    /// `sps_delta_qp_in_val_minus1[j]`
    pub delta_qp_in_val_minus1: Vec<u32>,
    /// `sps_delta_qp_diff_val[j]`
    pub delta_qp_diff_val: Vec<u32>,
}

/// 划分约束 (帧内亮度, 帧内色度, 帧间各一组)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConstraints {
    pub log2_min_qt_size: u32,
    pub max_mtt_depth: u32,
    pub log2_max_bt_size: u32,
    pub log2_max_tt_size: u32,
}

impl Default for PartitionConstraints {
    fn default() -> Self {
        Self {
            log2_min_qt_size: 3,
            max_mtt_depth: 3,
            log2_max_bt_size: 6,
            log2_max_tt_size: 6,
        }
    }
}

/// SPS 字段
#[derive(Debug, Clone)]
pub struct Sps {
    pub width: usize,
    pub height: usize,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u32,
    pub log2_ctb_size: u32,
    pub log2_min_cb_size: u32,
    /// 5 或 6
    pub log2_max_tb_size: u32,
    pub log2_max_ts_size: u32,
    pub qtbtt_dual_tree_intra: bool,
    pub entropy_coding_sync: bool,
    pub transform_skip_enabled: bool,
    pub bdpcm_enabled: bool,
    pub mts_enabled: bool,
    pub explicit_mts_intra_enabled: bool,
    pub explicit_mts_inter_enabled: bool,
    pub lfnst_enabled: bool,
    pub sbt_enabled: bool,
    pub isp_enabled: bool,
    pub mip_enabled: bool,
    pub joint_cbcr_enabled: bool,
    pub palette_enabled: bool,
    pub ibc_enabled: bool,
    pub act_enabled: bool,
    pub ciip_enabled: bool,
    pub lmcs_enabled: bool,
    pub sao_enabled: bool,
    pub alf_enabled: bool,
    pub ccalf_enabled: bool,
    pub scaling_list_enabled: bool,
    pub scaling_matrix_for_lfnst_disabled: bool,
    pub min_qp_prime_ts: i32,
    pub same_qp_table_for_chroma: bool,
    /// 1 个 (共用) 或 3 个 (Cb, Cr, CbCr) 分段表; 为空时使用恒等映射
    pub chroma_qp_tables: Vec<ChromaQpTableSyntax>,
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 8,
            log2_ctb_size: 6,
            log2_min_cb_size: 2,
            log2_max_tb_size: 6,
            log2_max_ts_size: 3,
            qtbtt_dual_tree_intra: false,
            entropy_coding_sync: false,
            transform_skip_enabled: false,
            bdpcm_enabled: false,
            mts_enabled: false,
            explicit_mts_intra_enabled: false,
            explicit_mts_inter_enabled: false,
            lfnst_enabled: false,
            sbt_enabled: false,
            isp_enabled: false,
            mip_enabled: false,
            joint_cbcr_enabled: false,
            palette_enabled: false,
            ibc_enabled: false,
            act_enabled: false,
            ciip_enabled: false,
            lmcs_enabled: false,
            sao_enabled: false,
            alf_enabled: false,
            ccalf_enabled: false,
            scaling_list_enabled: false,
            scaling_matrix_for_lfnst_disabled: false,
            min_qp_prime_ts: 0,
            same_qp_table_for_chroma: true,
            chroma_qp_tables: Vec::new(),
        }
    }
}

impl Sps {
    /// QpBdOffset
    pub fn qp_bd_offset(&self) -> i32 {
        6 * (self.bit_depth as i32 - 8)
    }

    pub fn ctb_size(&self) -> usize {
        1 << self.log2_ctb_size
    }

    /// 变换动态范围 (log2)
    pub fn log2_transform_range(&self) -> u32 {
        15
    }

    /// 色度平面是否存在于指定树
    pub fn tree_has_chroma(&self, tree: TreeType) -> bool {
        self.chroma_format.has_chroma() && tree.has_chroma()
    }
}

// ============================================================
// PPS
// ============================================================

/// PPS 字段
#[derive(Debug, Clone, Default)]
pub struct Pps {
    /// 每个 tile 列的宽度 (CTU), 为空时整帧一个 tile 列
    pub tile_column_widths: Vec<usize>,
    /// 每个 tile 行的高度 (CTU)
    pub tile_row_heights: Vec<usize>,
    pub loop_filter_across_tiles: bool,
    pub loop_filter_across_slices: bool,
    pub init_qp: i32,
    pub cu_qp_delta_enabled: bool,
    pub cu_chroma_qp_offset_enabled: bool,
    pub cb_qp_offset: i32,
    pub cr_qp_offset: i32,
    pub joint_cbcr_qp_offset: i32,
    /// `pps_cb/cr/joint_cbcr_qp_offset_list`
    pub chroma_qp_offset_list: Vec<[i32; 3]>,
}

// ============================================================
// Slice header
// ============================================================

/// slice 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceType {
    B,
    P,
    #[default]
    I,
}

/// 按颜色分量划分的去块偏移
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeblockOffsets {
    pub beta_offset_div2: i32,
    pub tc_offset_div2: i32,
}

/// 时域 MVP 的同位参考
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollocatedRef {
    pub list: usize,
    pub ref_idx: usize,
}

/// Slice header 中与重建相关的字段 (含 PH 继承值)
#[derive(Debug, Clone)]
pub struct SliceHeader {
    pub slice_type: SliceType,
    pub slice_qp_y: i32,
    /// slice 覆盖的 CTU 光栅地址, 按解码顺序
    pub ctb_addrs: Vec<usize>,
    /// 入口点: `ctb_addrs` 的下标区间起点 (第一个入口点从 0 开始)
    pub entry_points: Vec<usize>,
    pub partition_intra_luma: PartitionConstraints,
    pub partition_intra_chroma: PartitionConstraints,
    pub partition_inter: PartitionConstraints,
    pub cu_qp_delta_subdiv: u32,
    pub cu_chroma_qp_offset_subdiv: u32,
    pub cb_qp_offset: i32,
    pub cr_qp_offset: i32,
    pub joint_cbcr_qp_offset: i32,
    pub cu_chroma_qp_offset_enabled: bool,
    pub joint_cbcr_sign: bool,
    pub dep_quant: bool,
    pub deblocking_disabled: bool,
    /// Y, Cb, Cr
    pub deblock: [DeblockOffsets; 3],
    pub sao_luma: bool,
    pub sao_chroma: bool,
    pub alf_enabled: bool,
    pub alf_cb_enabled: bool,
    pub alf_cr_enabled: bool,
    pub alf_aps_ids_luma: Vec<usize>,
    pub alf_aps_id_chroma: usize,
    pub cc_alf_cb_enabled: bool,
    pub cc_alf_cr_enabled: bool,
    pub cc_alf_cb_aps_id: usize,
    pub cc_alf_cr_aps_id: usize,
    pub lmcs_enabled: bool,
    pub chroma_residual_scale: bool,
    pub explicit_scaling_list: bool,
    pub temporal_mvp: Option<CollocatedRef>,
    pub num_ref_idx: [usize; 2],
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            slice_type: SliceType::I,
            slice_qp_y: 32,
            ctb_addrs: Vec::new(),
            entry_points: vec![0],
            partition_intra_luma: PartitionConstraints::default(),
            partition_intra_chroma: PartitionConstraints::default(),
            partition_inter: PartitionConstraints::default(),
            cu_qp_delta_subdiv: 0,
            cu_chroma_qp_offset_subdiv: 0,
            cb_qp_offset: 0,
            cr_qp_offset: 0,
            joint_cbcr_qp_offset: 0,
            cu_chroma_qp_offset_enabled: false,
            joint_cbcr_sign: false,
            dep_quant: false,
            deblocking_disabled: true,
            deblock: [DeblockOffsets::default(); 3],
            sao_luma: false,
            sao_chroma: false,
            alf_enabled: false,
            alf_cb_enabled: false,
            alf_cr_enabled: false,
            alf_aps_ids_luma: Vec::new(),
            alf_aps_id_chroma: 0,
            cc_alf_cb_enabled: false,
            cc_alf_cr_enabled: false,
            cc_alf_cb_aps_id: 0,
            cc_alf_cr_aps_id: 0,
            lmcs_enabled: false,
            chroma_residual_scale: false,
            explicit_scaling_list: false,
            temporal_mvp: None,
            num_ref_idx: [0, 0],
        }
    }
}

impl SliceHeader {
    pub fn is_intra(&self) -> bool {
        self.slice_type == SliceType::I
    }

    /// 按树类型选择划分约束
    pub fn partition(&self, tree: TreeType) -> &PartitionConstraints {
        if !self.is_intra() {
            &self.partition_inter
        } else if tree.channel() == ChannelType::Chroma {
            &self.partition_intra_chroma
        } else {
            &self.partition_intra_luma
        }
    }

    /// 入口点 `ep` 覆盖的 `ctb_addrs` 下标区间
    pub fn entry_point_range(&self, ep: usize) -> std::ops::Range<usize> {
        let start = self.entry_points.get(ep).copied().unwrap_or(self.ctb_addrs.len());
        let end = self
            .entry_points
            .get(ep + 1)
            .copied()
            .unwrap_or(self.ctb_addrs.len());
        start..end
    }
}

// ============================================================
// APS
// ============================================================

/// 已重建的缩放矩阵 (28 个矩阵, 2x2/4x4/8x8, 以及 16x16 以上的 DC 值)
#[derive(Debug, Clone)]
pub struct ScalingList {
    pub matrices: Vec<Vec<u8>>,
    /// 矩阵 14..27 的 DC 值
    pub dc: [u8; 14],
}

impl ScalingList {
    pub const MATRIX_COUNT: usize = 28;
    /// 16x16 起始矩阵 id
    pub const START_16X16: usize = 14;

    /// 矩阵边长的 log2: id 0~1 为 2x2, 2~7 为 4x4, 其余 8x8
    pub fn log2_matrix_size(id: usize) -> u32 {
        if id < 2 {
            1
        } else if id < 8 {
            2
        } else {
            3
        }
    }

    /// 平坦缩放矩阵 (所有值为 16)
    pub fn flat() -> Self {
        let matrices = (0..Self::MATRIX_COUNT)
            .map(|id| vec![16u8; 1 << (2 * Self::log2_matrix_size(id))])
            .collect();
        Self {
            matrices,
            dc: [16; 14],
        }
    }
}

/// 帧级 APS 集合
#[derive(Debug, Clone, Default)]
pub struct ApsBundle {
    pub scaling_list: Option<ScalingList>,
    pub lmcs: Option<LmcsSyntax>,
    /// 按 APS id 索引的 ALF 参数
    pub alf: Vec<Option<AlfFilterSet>>,
}

// ============================================================
// 帧级参数
// ============================================================

/// CTU 网格与 tile 边界
#[derive(Debug, Clone)]
pub struct CtuGeometry {
    pub ctb_size: usize,
    pub log2_ctb_size: u32,
    pub ctb_width: usize,
    pub ctb_height: usize,
    /// tile 列边界 (CTU), 含首尾
    pub col_bd: Vec<usize>,
    /// tile 行边界 (CTU), 含首尾
    pub row_bd: Vec<usize>,
    /// 每个 CTU 列所在 tile 的左边界
    pub ctb_to_col_bd: Vec<usize>,
    /// 每个 CTU 行所在 tile 的上边界
    pub ctb_to_row_bd: Vec<usize>,
}

impl CtuGeometry {
    pub fn ctb_count(&self) -> usize {
        self.ctb_width * self.ctb_height
    }

    /// CTU 光栅地址到 `(rx, ry)`
    pub fn ctb_pos(&self, addr: usize) -> (usize, usize) {
        (addr % self.ctb_width, addr / self.ctb_width)
    }

    /// `rx` 所在 tile 的最右 CTU 列
    pub fn tile_right(&self, rx: usize) -> usize {
        let left = self.ctb_to_col_bd[rx];
        self.col_bd
            .iter()
            .copied()
            .find(|&bd| bd > left)
            .unwrap_or(self.ctb_width)
            - 1
    }

    /// 两个 CTU 是否属于同一 tile
    pub fn same_tile(&self, a: (usize, usize), b: (usize, usize)) -> bool {
        self.ctb_to_col_bd[a.0] == self.ctb_to_col_bd[b.0]
            && self.ctb_to_row_bd[a.1] == self.ctb_to_row_bd[b.1]
    }
}

/// 解码一帧所需的只读参数集合
#[derive(Debug, Clone)]
pub struct FrameParams {
    pub sps: Arc<Sps>,
    pub pps: Arc<Pps>,
    pub geometry: CtuGeometry,
    /// `[Cb, Cr, CbCr][qp + qp_bd_offset]`
    pub chroma_qp_table: [Vec<i32>; 3],
    pub lmcs: Option<LmcsTables>,
    pub scaling_list: Option<ScalingList>,
    pub alf: Vec<Option<AlfFilterSet>>,
}

impl FrameParams {
    /// 亮度 QP (不含位深偏移) 映射到色度 QP (不含位深偏移)
    pub fn map_chroma_qp(&self, table: usize, qp_y: i32) -> i32 {
        let off = self.sps.qp_bd_offset();
        let idx = (qp_y.clamp(-off, 63) + off) as usize;
        self.chroma_qp_table[table.min(2)]
            .get(idx)
            .copied()
            .unwrap_or(qp_y)
    }
}

/// 派生 tile 边界
fn derive_tile_bd(sizes: &[usize], total: usize, what: &str) -> VvResult<Vec<usize>> {
    let mut bd = vec![0];
    let mut acc = 0usize;
    for &s in sizes {
        if s == 0 {
            return Err(VvError::InvalidData(format!("tile {what}尺寸为 0")));
        }
        acc += s;
        if acc >= total {
            break;
        }
        bd.push(acc);
    }
    if acc > total && sizes.len() > bd.len() {
        return Err(VvError::InvalidData(format!("tile {what}超出帧边界")));
    }
    bd.push(total);
    Ok(bd)
}

/// 派生单张色度 QP 映射表
fn derive_chroma_qp_table(syntax: &ChromaQpTableSyntax, qp_bd_offset: i32) -> VvResult<Vec<i32>> {
    let n = syntax.delta_qp_in_val_minus1.len();
    if n != syntax.delta_qp_diff_val.len() {
        return Err(VvError::InvalidData("色度 QP 表分段点数量不一致".into()));
    }
    let len = (64 + qp_bd_offset) as usize;
    let idx = |qp: i32| (qp + qp_bd_offset) as usize;
    let mut qp_in = vec![syntax.start_minus26 + 26];
    let mut qp_out = vec![syntax.start_minus26 + 26];
    for j in 0..n {
        qp_in.push(qp_in[j] + syntax.delta_qp_in_val_minus1[j] as i32 + 1);
        qp_out.push(qp_out[j] + (syntax.delta_qp_in_val_minus1[j] ^ syntax.delta_qp_diff_val[j]) as i32);
    }
    if qp_in[0] < -qp_bd_offset || qp_in[n] > 63 {
        return Err(VvError::InvalidData(format!(
            "色度 QP 表区间越界: [{}, {}]",
            qp_in[0], qp_in[n]
        )));
    }
    let mut table = vec![0i32; len];
    table[idx(qp_in[0])] = qp_out[0];
    let mut k = qp_in[0] - 1;
    while k >= -qp_bd_offset {
        table[idx(k)] = (table[idx(k + 1)] - 1).clamp(-qp_bd_offset, 63);
        k -= 1;
    }
    for j in 0..n {
        let step = syntax.delta_qp_in_val_minus1[j] as i32 + 1;
        let sh = step >> 1;
        for m in 1..=step {
            let k = qp_in[j] + m;
            table[idx(k)] = table[idx(qp_in[j])] + ((qp_out[j + 1] - qp_out[j]) * m + sh) / step;
        }
    }
    for k in (qp_in[n] + 1)..=63 {
        table[idx(k)] = (table[idx(k - 1)] + 1).clamp(-qp_bd_offset, 63);
    }
    Ok(table)
}

/// 构建帧级参数集合
///
/// 校验 SPS/PPS/APS 语法值并派生 CTU 网格, tile 边界, 色度 QP 映射, LMCS 查找表.
pub fn decode_frame_ps(sps: Arc<Sps>, pps: Arc<Pps>, aps: &ApsBundle) -> VvResult<FrameParams> {
    if !(5..=7).contains(&sps.log2_ctb_size) {
        return Err(VvError::InvalidData(format!(
            "CTU 尺寸非法: log2={}",
            sps.log2_ctb_size
        )));
    }
    if sps.log2_min_cb_size < 2 || sps.log2_min_cb_size > sps.log2_ctb_size {
        return Err(VvError::InvalidData(format!(
            "最小 CB 尺寸非法: log2={}",
            sps.log2_min_cb_size
        )));
    }
    if !(5..=6).contains(&sps.log2_max_tb_size) || sps.log2_max_tb_size > sps.log2_ctb_size {
        return Err(VvError::InvalidData(format!(
            "最大变换尺寸非法: log2={}",
            sps.log2_max_tb_size
        )));
    }
    if sps.width == 0 || sps.height == 0 {
        return Err(VvError::InvalidData("图像尺寸为 0".into()));
    }
    if sps.palette_enabled || sps.act_enabled {
        debug!("VVC: SPS 启用了调色板/ACT, 遇到对应 CU 时将报未实现");
    }

    let ctb_size = sps.ctb_size();
    let ctb_width = sps.width.div_ceil(ctb_size);
    let ctb_height = sps.height.div_ceil(ctb_size);
    let col_bd = derive_tile_bd(&pps.tile_column_widths, ctb_width, "列")?;
    let row_bd = derive_tile_bd(&pps.tile_row_heights, ctb_height, "行")?;
    let map_bd = |bd: &[usize], total: usize| -> Vec<usize> {
        (0..total)
            .map(|i| bd.iter().copied().filter(|&b| b <= i).max().unwrap_or(0))
            .collect()
    };
    let geometry = CtuGeometry {
        ctb_size,
        log2_ctb_size: sps.log2_ctb_size,
        ctb_width,
        ctb_height,
        ctb_to_col_bd: map_bd(&col_bd, ctb_width),
        ctb_to_row_bd: map_bd(&row_bd, ctb_height),
        col_bd,
        row_bd,
    };

    let off = sps.qp_bd_offset();
    let identity: Vec<i32> = (-off..=63).collect();
    let chroma_qp_table = match sps.chroma_qp_tables.as_slice() {
        [] => [identity.clone(), identity.clone(), identity],
        [shared] => {
            let t = derive_chroma_qp_table(shared, off)?;
            [t.clone(), t.clone(), t]
        }
        [cb, cr, cbcr, ..] if !sps.same_qp_table_for_chroma => [
            derive_chroma_qp_table(cb, off)?,
            derive_chroma_qp_table(cr, off)?,
            derive_chroma_qp_table(cbcr, off)?,
        ],
        _ => {
            return Err(VvError::InvalidData("色度 QP 表数量与共用标志不一致".into()));
        }
    };

    let lmcs = match (&aps.lmcs, sps.lmcs_enabled) {
        (Some(syntax), true) => Some(LmcsTables::derive(syntax, sps.bit_depth)?),
        _ => None,
    };

    if let Some(sl) = &aps.scaling_list {
        if sl.matrices.len() != ScalingList::MATRIX_COUNT {
            return Err(VvError::InvalidData(format!(
                "缩放矩阵数量非法: {}",
                sl.matrices.len()
            )));
        }
        for (id, m) in sl.matrices.iter().enumerate() {
            if m.len() != 1 << (2 * ScalingList::log2_matrix_size(id)) {
                return Err(VvError::InvalidData(format!("缩放矩阵 {id} 尺寸非法")));
            }
        }
    }

    for set in aps.alf.iter().flatten() {
        set.validate()?;
    }

    debug!(
        "VVC: 帧参数, {}x{}, ctb={}, 网格 {}x{}, tile {}x{}",
        sps.width,
        sps.height,
        ctb_size,
        ctb_width,
        ctb_height,
        geometry.col_bd.len() - 1,
        geometry.row_bd.len() - 1
    );

    Ok(FrameParams {
        sps: Arc::clone(&sps),
        pps,
        geometry,
        chroma_qp_table,
        lmcs,
        scaling_list: aps.scaling_list.clone().filter(|_| sps.scaling_list_enabled),
        alf: aps.alf.clone(),
    })
}
