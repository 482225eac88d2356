//! 共享采样图像.
//!
//! 解码帧的 Y/Cb/Cr 平面, 采样以 `u16` 存储, 支持 8~16 位位深.
//! 平面建立在 [`SharedGrid`] 上, 可被多个 CTU 任务同时访问.

use std::sync::atomic::AtomicU16;

use crate::chroma::ChromaFormat;
use crate::error::{VvError, VvResult};
use crate::grid::SharedGrid;

/// 单个采样平面
pub type Plane = SharedGrid<AtomicU16>;

/// 解码图像
#[derive(Debug)]
pub struct Picture {
    pub chroma_format: ChromaFormat,
    pub bit_depth: u32,
    planes: Vec<Plane>,
}

impl Picture {
    /// 按亮度尺寸和色度格式分配图像, 所有采样初始化为中间灰
    pub fn new(
        width: usize,
        height: usize,
        chroma_format: ChromaFormat,
        bit_depth: u32,
    ) -> VvResult<Self> {
        if width == 0 || height == 0 {
            return Err(VvError::InvalidArgument(format!(
                "图像尺寸非法: {width}x{height}"
            )));
        }
        if !(8..=16).contains(&bit_depth) {
            return Err(VvError::Unsupported(format!("位深 {bit_depth} 不受支持")));
        }
        let mid = 1u16 << (bit_depth - 1);
        let mut planes = Vec::with_capacity(chroma_format.plane_count());
        planes.push(Plane::new(width, height, mid)?);
        if chroma_format.has_chroma() {
            let cw = width.div_ceil(1 << chroma_format.shift_x());
            let ch = height.div_ceil(1 << chroma_format.shift_y());
            planes.push(Plane::new(cw, ch, mid)?);
            planes.push(Plane::new(cw, ch, mid)?);
        }
        Ok(Self {
            chroma_format,
            bit_depth,
            planes,
        })
    }

    /// 平面数量
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// 获取平面; `c_idx` 超出范围时返回内部错误
    pub fn plane(&self, c_idx: usize) -> VvResult<&Plane> {
        self.planes
            .get(c_idx)
            .ok_or_else(|| VvError::Internal(format!("平面索引越界: {c_idx}")))
    }

    /// 亮度宽度
    pub fn width(&self) -> usize {
        self.planes[0].width()
    }

    /// 亮度高度
    pub fn height(&self) -> usize {
        self.planes[0].height()
    }

    /// 最大采样值
    pub fn max_value(&self) -> i32 {
        (1 << self.bit_depth) - 1
    }

    /// 读取矩形区域到 `dst` (行优先, 步长为 `w`), 越界坐标钳位到边缘
    pub fn read_block(
        &self,
        c_idx: usize,
        x0: usize,
        y0: usize,
        w: usize,
        h: usize,
        dst: &mut [i32],
    ) -> VvResult<()> {
        let plane = self.plane(c_idx)?;
        for y in 0..h {
            for x in 0..w {
                dst[y * w + x] = i32::from(plane.get(x0 + x, y0 + y));
            }
        }
        Ok(())
    }

    /// 把 `src` (行优先, 步长为 `w`) 写回矩形区域, 并裁剪到合法采样范围
    pub fn write_block(
        &self,
        c_idx: usize,
        x0: usize,
        y0: usize,
        w: usize,
        h: usize,
        src: &[i32],
    ) -> VvResult<()> {
        let plane = self.plane(c_idx)?;
        let max = self.max_value();
        for y in 0..h {
            for x in 0..w {
                plane.set(x0 + x, y0 + y, src[y * w + x].clamp(0, max) as u16);
            }
        }
        Ok(())
    }

    /// 从另一幅同尺寸图像复制矩形区域
    pub fn copy_region_from(
        &self,
        src: &Picture,
        c_idx: usize,
        x0: usize,
        y0: usize,
        w: usize,
        h: usize,
    ) -> VvResult<()> {
        let dst_plane = self.plane(c_idx)?;
        let src_plane = src.plane(c_idx)?;
        let x_end = (x0 + w).min(dst_plane.width());
        let y_end = (y0 + h).min(dst_plane.height());
        for y in y0..y_end {
            for x in x0..x_end {
                dst_plane.set(x, y, src_plane.get(x, y));
            }
        }
        Ok(())
    }
}
