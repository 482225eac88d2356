//! 外部预测器接口.
//!
//! 运动矢量推导与帧内/帧间预测采样生成由外部实现, 重建驱动只负责调用顺序.
//! 预测器把预测值直接写入当前帧的 [`Picture`].

use vvrec_core::{Picture, VvResult};

use super::common::ChannelType;
use super::cu::CodingUnit;
use super::frame::RefPicLists;

/// CTU 内已重建区域 (亮度坐标), 供帧内预测判断邻点可用性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconArea {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    pub channel: ChannelType,
}

impl ReconArea {
    /// 亮度坐标点是否位于区域内
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x0 && x < self.x0 + self.width && y >= self.y0 && y < self.y0 + self.height
    }
}

/// 一次帧内预测请求
#[derive(Debug, Clone, Copy)]
pub struct IntraRequest<'a> {
    pub cu: &'a CodingUnit,
    pub c_idx: usize,
    /// 平面坐标
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    /// 帧内模式 (色度为推导后的模式)
    pub mode: u8,
    /// 当前 CTU 中已重建的区域
    pub recon: &'a [ReconArea],
}

/// 预测采样生成器
pub trait Predictor: Send + Sync {
    /// 帧内预测, 结果写入 `pic` 的请求区域
    fn intra_pred(&self, pic: &Picture, req: &IntraRequest<'_>) -> VvResult<()>;

    /// 帧间预测, 结果写入 `pic` 中 CU 的全部平面
    fn predict_inter(&self, pic: &Picture, refs: &RefPicLists, cu: &CodingUnit) -> VvResult<()>;

    /// 组合帧间帧内预测
    ///
    /// 调用时 `pic` 中已是 (LMCS 正向映射后的) 帧间预测, 实现把帧内预测与其加权混合.
    fn predict_ciip(
        &self,
        pic: &Picture,
        refs: &RefPicLists,
        cu: &CodingUnit,
        recon: &[ReconArea],
    ) -> VvResult<()>;
}
