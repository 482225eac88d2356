//! # vvrec-codec
//!
//! VVC/H.266 CTU 重建流水线与帧级任务调度.
//!
//! 熵解码和预测采样生成通过 trait 由调用方注入, 本 crate 负责把语法元素
//! 组织成编码树, 完成反量化, 反变换, LMCS 与三级环路滤波, 并在多个工作
//! 线程上按 CTU 依赖关系调度这些阶段.
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vvrec_codec::vvc::{DecoderConfig, FrameContext, FrameDecoder};
//!
//! let config = DecoderConfig::default();
//! let decoder = FrameDecoder::new(&config)?;
//! let fc = FrameContext::new(params, slices, poc, decode_order, pool, predictor, config)?;
//! let ft = decoder.submit(Arc::clone(&fc))?;
//! decoder.wait(ft)?;
//! ```

pub mod decoders;

// 重导出常用模块与类型
pub use decoders::vvc;
pub use decoders::vvc::{DecoderConfig, FrameContext, FrameDecoder};
