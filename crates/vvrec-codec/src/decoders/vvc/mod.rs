//! VVC/H.266 CTU 重建流水线.
//!
//! 熵解码与预测采样生成由外部提供 ([`SyntaxReader`], [`Predictor`]),
//! 这里实现其余部分: 编码树与变换树构建, 反量化与反变换 (含 LFNST / MTS),
//! LMCS, 去块, SAO, ALF / CC-ALF, 以及按 CTU 依赖驱动的多线程任务调度.
//!
//! 一帧的解码流程:
//! 1. [`decode_frame_ps`] 校验参数集并派生帧级辅助量
//! 2. [`FrameContext::new`] 分配重建图像与逐块信息表
//! 3. [`FrameDecoder::submit`] 为每个入口点入队 PARSE 任务
//! 4. [`FrameDecoder::wait`] 等待全部任务结束, 返回首个错误

pub mod alf;
pub mod coding_unit;
pub mod common;
pub mod config;
pub mod ctu;
pub mod cu;
pub mod deblock;
pub mod dequant;
pub mod executor;
pub mod frame;
pub mod itx;
pub mod lfnst;
pub mod lmcs;
pub mod params;
pub mod pred;
pub mod recon;
pub mod sao;
pub mod syntax;
pub mod thread;
pub mod transform_tree;

pub use config::DecoderConfig;
pub use cu::CuPool;
pub use frame::{FrameContext, ProgressKind, RefPic, RefPicLists, Slice};
pub use params::{ApsBundle, FrameParams, Pps, SliceHeader, Sps, decode_frame_ps};
pub use pred::Predictor;
pub use syntax::{SliceSource, SyntaxReader};
pub use thread::{FrameDecoder, FrameThread, TaskMask, TaskType};
