//! 跨任务共享的二维网格.
//!
//! 帧级的逐块信息表 (预测模式, QP, 变换块位置等) 和采样平面由多个 CTU 任务
//! 并发访问: 每个单元只由所属 CTU 的任务写入, 相邻 CTU 的任务在依赖满足后读取.
//! 读写顺序由调度器的可用性位图 (acquire/release) 保证, 网格本身只使用
//! relaxed 原子访问, 因此顺序出错时只会读到旧值, 不会产生未定义行为.

use std::sync::atomic::{AtomicI8, AtomicI16, AtomicI32, AtomicU8, AtomicU16, AtomicU32, Ordering};

use crate::error::VvResult;

/// 可放入共享网格的原子单元
pub trait AtomicCell: Send + Sync {
    /// 单元存储的值类型
    type Value: Copy + PartialEq + std::fmt::Debug;

    fn with_value(value: Self::Value) -> Self;
    fn get(&self) -> Self::Value;
    fn set(&self, value: Self::Value);
}

macro_rules! impl_atomic_cell {
    ($($atomic:ty => $value:ty),* $(,)?) => {
        $(
            impl AtomicCell for $atomic {
                type Value = $value;

                #[inline]
                fn with_value(value: $value) -> Self {
                    <$atomic>::new(value)
                }

                #[inline]
                fn get(&self) -> $value {
                    self.load(Ordering::Relaxed)
                }

                #[inline]
                fn set(&self, value: $value) {
                    self.store(value, Ordering::Relaxed)
                }
            }
        )*
    };
}

impl_atomic_cell!(
    AtomicU8 => u8,
    AtomicI8 => i8,
    AtomicU16 => u16,
    AtomicI16 => i16,
    AtomicU32 => u32,
    AtomicI32 => i32,
);

/// 共享二维网格, 行优先存储
pub struct SharedGrid<A: AtomicCell> {
    width: usize,
    height: usize,
    cells: Box<[A]>,
}

impl<A: AtomicCell> SharedGrid<A> {
    /// 创建网格, 所有单元填充 `fill`
    pub fn new(width: usize, height: usize, fill: A::Value) -> VvResult<Self> {
        let len = width * height;
        let mut cells = Vec::new();
        cells.try_reserve_exact(len)?;
        cells.extend((0..len).map(|_| A::with_value(fill)));
        Ok(Self {
            width,
            height,
            cells: cells.into_boxed_slice(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// 读取单元; 越界坐标被钳位到边缘
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> A::Value {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        self.cells[y * self.width + x].get()
    }

    /// 按有符号坐标读取, 越界时返回 `None`
    #[inline]
    pub fn get_checked(&self, x: isize, y: isize) -> Option<A::Value> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(self.cells[y as usize * self.width + x as usize].get())
    }

    #[inline]
    pub fn set(&self, x: usize, y: usize, value: A::Value) {
        if x < self.width && y < self.height {
            self.cells[y * self.width + x].set(value);
        }
    }

    /// 填充矩形区域, 超出网格的部分被裁剪
    pub fn fill_rect(&self, x0: usize, y0: usize, w: usize, h: usize, value: A::Value) {
        let x_end = (x0 + w).min(self.width);
        let y_end = (y0 + h).min(self.height);
        for y in y0..y_end {
            let row = &self.cells[y * self.width..(y + 1) * self.width];
            for cell in &row[x0.min(x_end)..x_end] {
                cell.set(value);
            }
        }
    }

    /// 整表重置
    pub fn reset(&self, value: A::Value) {
        for cell in self.cells.iter() {
            cell.set(value);
        }
    }
}

impl<A: AtomicCell> std::fmt::Debug for SharedGrid<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedGrid")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

pub type GridU8 = SharedGrid<AtomicU8>;
pub type GridI8 = SharedGrid<AtomicI8>;
pub type GridU16 = SharedGrid<AtomicU16>;
pub type GridI16 = SharedGrid<AtomicI16>;
pub type GridU32 = SharedGrid<AtomicU32>;
pub type GridI32 = SharedGrid<AtomicI32>;

#[cfg(test)]
mod tests {
    use super::{GridI8, GridU8};

    #[test]
    fn test_fill_rect_clips_to_grid() {
        let grid = match GridU8::new(4, 3, 0) {
            Ok(grid) => grid,
            Err(err) => panic!("网格分配失败: {err}"),
        };
        grid.fill_rect(2, 1, 8, 8, 7);
        assert_eq!(grid.get(1, 1), 0);
        assert_eq!(grid.get(2, 1), 7);
        assert_eq!(grid.get(3, 2), 7);
        assert_eq!(grid.get(3, 0), 0, "矩形上方不应被填充");
    }

    #[test]
    fn test_get_checked_out_of_range() {
        let grid = match GridI8::new(2, 2, -3) {
            Ok(grid) => grid,
            Err(err) => panic!("网格分配失败: {err}"),
        };
        assert_eq!(grid.get_checked(-1, 0), None);
        assert_eq!(grid.get_checked(1, 1), Some(-3));
        assert_eq!(grid.get(9, 9), -3, "越界读取钳位到右下角");
    }
}
