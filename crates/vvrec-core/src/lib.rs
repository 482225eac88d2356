//! # vvrec-core
//!
//! vvrec 核心库, 提供错误类型、色度格式以及跨任务共享的网格和图像缓冲.

pub mod chroma;
pub mod error;
pub mod grid;
pub mod picture;

// 重导出常用类型
pub use chroma::ChromaFormat;
pub use error::{VvError, VvResult};
pub use grid::{GridI8, GridI16, GridI32, GridU8, GridU16, GridU32, SharedGrid};
pub use picture::{Picture, Plane};
