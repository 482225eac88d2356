//! # vvrec
//!
//! 纯 Rust 实现的 VVC/H.266 CTU 重建与环路滤波流水线.
//!
//! - **重建**: 编码树 / 变换树构建, 反量化, DCT-II / DST-VII / DCT-VIII, LFNST
//! - **环路滤波**: LMCS, 去块, SAO, ALF / CC-ALF, 每个 CTU 一个阶段
//! - **调度**: 按空间, 时间和 WPP 依赖在多个工作线程上推进各阶段
//!
//! 熵解码与预测采样生成不在本仓库内, 由调用方实现
//! [`codec::vvc::SyntaxReader`] 和 [`codec::vvc::Predictor`] 注入.
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `vvrec-core` | 错误类型, 色度格式, 共享网格与图像缓冲 |
//! | `vvrec-codec` | VVC 重建流水线与任务调度 |

/// 核心类型与工具
pub use vvrec_core as core;

/// 重建流水线与任务调度
pub use vvrec_codec as codec;

pub mod config;
pub mod logging;

pub use config::AppConfig;

/// 获取 vvrec 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 按配置创建帧解码器
pub fn frame_decoder(config: &codec::DecoderConfig) -> core::VvResult<codec::FrameDecoder> {
    codec::FrameDecoder::new(config)
}
