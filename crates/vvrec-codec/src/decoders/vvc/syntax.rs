//! 语法元素读取接口.
//!
//! CABAC 熵解码不在本 crate 内实现. 重建核心通过 [`SyntaxReader`] 按名字读取
//! 语法元素, 每个方法返回已做范围校验的值, 或在码流非法时返回
//! [`VvError::InvalidData`](vvrec_core::VvError::InvalidData).
//! 每个入口点 (slice / tile / WPP 行) 对应一个独立的读取器实例, 由
//! [`SliceSource`] 创建.

use bitflags::bitflags;
use vvrec_core::VvResult;

use super::alf::CtuAlfParams;
use super::common::{ModeType, SplitMode, TreeType};
use super::cu::{CodingUnit, IntraInfo, MotionInfo, SbtInfo, TransformBlock};
use super::sao::SaoParams;

bitflags! {
    /// 当前块允许的划分方式
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SplitAllowed: u8 {
        const QT     = 1 << 0;
        const BT_HOR = 1 << 1;
        const BT_VER = 1 << 2;
        const TT_HOR = 1 << 3;
        const TT_VER = 1 << 4;
    }
}

impl SplitAllowed {
    /// 是否允许某种划分
    pub fn allows(self, split: SplitMode) -> bool {
        self.contains(match split {
            SplitMode::Qt => Self::QT,
            SplitMode::BtHor => Self::BT_HOR,
            SplitMode::BtVer => Self::BT_VER,
            SplitMode::TtHor => Self::TT_HOR,
            SplitMode::TtVer => Self::TT_VER,
        })
    }

    /// 是否允许任一多类型树划分
    pub fn any_mtt(self) -> bool {
        self.intersects(Self::BT_HOR | Self::BT_VER | Self::TT_HOR | Self::TT_VER)
    }
}

/// 划分语法元素的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitContext {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    pub cqt_depth: u32,
    pub mtt_depth: u32,
    pub tree: TreeType,
    pub allowed: SplitAllowed,
}

/// `residual_coding` 的解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResidualInfo {
    pub max_scan_x: usize,
    pub max_scan_y: usize,
    /// 扫描顺序中最后一个非零系数的位置 (块内)
    pub last_scan_pos: usize,
    /// 最后一个非零系数所在的 4x4 子块下标
    pub last_sub_block: usize,
}

/// 熵解码语法读取器
///
/// 方法按语法出现顺序排列. `cu` 参数是正在构建的 CU, 其中已填好先前解出的字段.
pub trait SyntaxReader {
    // ---------- CTU ----------

    /// CTU 的 SAO 参数 (merge 由读取器自行解析)
    fn sao_params(&mut self, rx: usize, ry: usize) -> VvResult<SaoParams>;

    /// CTU 的 ALF / CC-ALF 参数
    fn alf_params(&mut self, rx: usize, ry: usize) -> VvResult<CtuAlfParams>;

    // ---------- 编码树 ----------

    fn split_cu_flag(&mut self, ctx: &SplitContext) -> VvResult<bool>;

    fn split_qt_flag(&mut self, ctx: &SplitContext) -> VvResult<bool>;

    fn mtt_split_cu_vertical_flag(&mut self, ctx: &SplitContext) -> VvResult<bool>;

    fn mtt_split_cu_binary_flag(&mut self, ctx: &SplitContext) -> VvResult<bool>;

    /// `non_inter_flag`: true 时子树限定为帧内
    fn non_inter_flag(&mut self, ctx: &SplitContext) -> VvResult<bool>;

    // ---------- 编码单元 ----------

    fn cu_skip_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    /// `pred_mode_flag`: true 为帧内
    fn pred_mode_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    fn pred_mode_ibc_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    fn pred_mode_plt_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    fn cu_act_enabled_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    /// `intra_bdpcm_luma_flag` 与方向, 未使用时返回 `None`
    fn intra_bdpcm_luma(&mut self, cu: &CodingUnit) -> VvResult<Option<bool>>;

    /// `intra_bdpcm_chroma_flag` 与方向
    fn intra_bdpcm_chroma(&mut self, cu: &CodingUnit) -> VvResult<Option<bool>>;

    /// 亮度帧内信息 (MIP / MRL / ISP / 模式), 返回 `(info, mip, mip_transposed)`
    fn intra_luma_info(&mut self, cu: &CodingUnit) -> VvResult<(IntraInfo, bool, bool)>;

    /// 推导后的色度帧内模式, `luma_mode` 是同位亮度模式
    fn intra_chroma_pred_mode(&mut self, cu: &CodingUnit, luma_mode: u8) -> VvResult<u8>;

    /// 帧间数据 (合并 / AMVP / 仿射等由外部推导)
    fn inter_data(&mut self, cu: &CodingUnit) -> VvResult<MotionInfo>;

    fn cu_coded_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    /// SBT 参数; `allow_half` / `allow_quad` 是按尺寸门限推导出的可选项
    fn cu_sbt(
        &mut self,
        cu: &CodingUnit,
        allow_hor: bool,
        allow_ver: bool,
        allow_quad: bool,
    ) -> VvResult<Option<SbtInfo>>;

    // ---------- 变换单元 ----------

    fn tu_cb_coded_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    fn tu_cr_coded_flag(&mut self, cu: &CodingUnit, cb_coded: bool) -> VvResult<bool>;

    fn tu_y_coded_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    /// `CuQpDeltaVal`
    fn cu_qp_delta(&mut self) -> VvResult<i32>;

    /// `cu_chroma_qp_offset_flag` / `_idx`
    fn cu_chroma_qp_offset(&mut self) -> VvResult<Option<usize>>;

    fn transform_skip_flag(&mut self, cu: &CodingUnit, c_idx: usize) -> VvResult<bool>;

    fn tu_joint_cbcr_residual_flag(&mut self, cu: &CodingUnit) -> VvResult<bool>;

    /// 读取一个变换块的系数到 `coeffs` (行优先, 步长为块宽)
    fn residual_coding(
        &mut self,
        cu: &CodingUnit,
        tb: &TransformBlock,
        coeffs: &mut [i32],
    ) -> VvResult<ResidualInfo>;

    // ---------- CU 尾部 ----------

    fn lfnst_idx(&mut self, cu: &CodingUnit) -> VvResult<u8>;

    fn mts_idx(&mut self, cu: &CodingUnit) -> VvResult<u8>;

    /// `end_of_slice_segment_flag`
    fn end_of_slice_flag(&mut self) -> VvResult<bool>;
}

/// slice 数据的入口点工厂
pub trait SliceSource: Send + Sync {
    /// 为第 `ep` 个入口点创建读取器
    fn entry_reader(&self, ep: usize) -> VvResult<Box<dyn SyntaxReader + Send>>;
}

/// 模式类型约束下 CU 的可选预测模式
pub(crate) fn mode_allows_intra(mode_type: ModeType) -> bool {
    mode_type != ModeType::Inter
}

#[cfg(test)]
mod tests {
    use super::SplitAllowed;
    use crate::decoders::vvc::common::SplitMode;

    #[test]
    fn test_split_allowed_queries() {
        let allowed = SplitAllowed::QT | SplitAllowed::TT_VER;
        assert!(allowed.allows(SplitMode::Qt));
        assert!(allowed.allows(SplitMode::TtVer));
        assert!(!allowed.allows(SplitMode::BtHor));
        assert!(allowed.any_mtt());
        assert!(!SplitAllowed::QT.any_mtt(), "仅四叉树时没有多类型树划分");
    }
}
