//! 统一错误类型定义.
//!
//! 重建流水线各阶段共用的错误类型. 任务调度器需要把首个错误记录到帧上下文,
//! 并在 `frame_wait` 时返回给调用方, 因此错误类型可克隆.

use thiserror::Error;

/// vvrec 统一错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VvError {
    /// 无效参数 (调用方传入的几何或配置不合法)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (码流语法值违反结构约束, 或 slice 未覆盖全部 CTU)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 内存分配失败 (池或表分配失败)
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 标准功能未实现 (调色板, 自适应颜色变换)
    #[error("功能未实现: {0}")]
    NotImplemented(String),

    /// 不支持的配置
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl VvError {
    /// 错误类别名, 用于日志
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid-argument",
            Self::InvalidData(_) => "invalid-data",
            Self::OutOfMemory(_) => "out-of-memory",
            Self::NotImplemented(_) => "not-implemented",
            Self::Unsupported(_) => "unsupported",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::collections::TryReserveError> for VvError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory(err.to_string())
    }
}

/// vvrec 统一 Result 类型
pub type VvResult<T> = Result<T, VvError>;

#[cfg(test)]
mod tests {
    use super::VvError;

    #[test]
    fn test_try_reserve_maps_to_out_of_memory() {
        let mut buf: Vec<u64> = Vec::new();
        let err = match buf.try_reserve(usize::MAX) {
            Ok(()) => panic!("超大预留不应成功"),
            Err(err) => VvError::from(err),
        };
        assert_eq!(err.kind_name(), "out-of-memory", "预留失败应映射为内存错误");
    }

    #[test]
    fn test_error_display_carries_message() {
        let err = VvError::InvalidData("cu_qp_delta 越界".into());
        assert_eq!(err.to_string(), "无效数据: cu_qp_delta 越界");
    }
}
