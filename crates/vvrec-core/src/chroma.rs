//! 色度格式定义.
//!
//! 对应 SPS 中的 `sps_chroma_format_idc`, 决定色度平面的子采样比例.

use std::fmt;

use crate::error::{VvError, VvResult};

/// 色度格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChromaFormat {
    /// 4:0:0 单色, 只有亮度平面
    Monochrome,
    /// 4:2:0, 色度宽高均减半
    #[default]
    Yuv420,
    /// 4:2:2, 色度宽度减半
    Yuv422,
    /// 4:4:4, 无子采样
    Yuv444,
}

impl ChromaFormat {
    /// 从 `sps_chroma_format_idc` 构造
    pub fn from_idc(idc: u32) -> VvResult<Self> {
        match idc {
            0 => Ok(Self::Monochrome),
            1 => Ok(Self::Yuv420),
            2 => Ok(Self::Yuv422),
            3 => Ok(Self::Yuv444),
            _ => Err(VvError::InvalidData(format!(
                "chroma_format_idc 越界: {idc}"
            ))),
        }
    }

    /// `sps_chroma_format_idc`
    pub fn idc(self) -> u32 {
        match self {
            Self::Monochrome => 0,
            Self::Yuv420 => 1,
            Self::Yuv422 => 2,
            Self::Yuv444 => 3,
        }
    }

    /// 水平方向子采样移位 (SubWidthC 的 log2)
    pub fn shift_x(self) -> u32 {
        match self {
            Self::Yuv420 | Self::Yuv422 => 1,
            Self::Monochrome | Self::Yuv444 => 0,
        }
    }

    /// 垂直方向子采样移位 (SubHeightC 的 log2)
    pub fn shift_y(self) -> u32 {
        match self {
            Self::Yuv420 => 1,
            Self::Monochrome | Self::Yuv422 | Self::Yuv444 => 0,
        }
    }

    /// 平面数量
    pub fn plane_count(self) -> usize {
        if self == Self::Monochrome { 1 } else { 3 }
    }

    /// 是否存在色度平面
    pub fn has_chroma(self) -> bool {
        self != Self::Monochrome
    }
}

impl fmt::Display for ChromaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Monochrome => "4:0:0",
            Self::Yuv420 => "4:2:0",
            Self::Yuv422 => "4:2:2",
            Self::Yuv444 => "4:4:4",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ChromaFormat;

    #[test]
    fn test_subsampling_shifts() {
        assert_eq!(ChromaFormat::Yuv420.shift_x(), 1);
        assert_eq!(ChromaFormat::Yuv420.shift_y(), 1);
        assert_eq!(ChromaFormat::Yuv422.shift_y(), 0, "4:2:2 垂直方向不子采样");
        assert_eq!(ChromaFormat::Monochrome.plane_count(), 1);
    }

    #[test]
    fn test_from_idc_rejects_out_of_range() {
        assert!(ChromaFormat::from_idc(4).is_err(), "idc=4 应报无效数据");
        for idc in 0..4 {
            match ChromaFormat::from_idc(idc) {
                Ok(fmt) => assert_eq!(fmt.idc(), idc),
                Err(err) => panic!("idc={idc} 应合法: {err}"),
            }
        }
    }
}
