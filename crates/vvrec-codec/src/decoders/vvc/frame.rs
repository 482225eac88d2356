//! 帧上下文.
//!
//! [`FrameContext`] 汇集一帧解码期间的全部共享状态: 帧级参数, slice 列表,
//! 重建图像, 按 4x4 亮度块存储的逐块信息表, 每个 CTU 的解析结果与滤波参数,
//! 以及供其他帧查询的行进度.
//!
//! 逐块信息表由拥有该 CTU 的任务写入一次, 之后被邻居 CTU 的任务读取;
//! 读写顺序由调度器的就绪条件保证, 表本身是宽松原子数组.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use vvrec_core::{GridI16, GridI32, GridU8, GridU16, GridU32, Picture, VvError, VvResult};

use super::alf::CtuAlfParams;
use super::common::{ChannelType, MIN_BLOCK_LOG2};
use super::config::DecoderConfig;
use super::cu::{CuList, CuPool};
use super::params::{FrameParams, SliceHeader};
use super::pred::{Predictor, ReconArea};
use super::sao::SaoParams;
use super::syntax::SliceSource;

// ============================================================
// 参考帧与 slice
// ============================================================

/// 参考图像
#[derive(Clone)]
pub struct RefPic {
    pub poc: i32,
    /// 参考帧上下文; `None` 表示缺失的参考帧 (视为已完全可用)
    pub frame: Option<Arc<FrameContext>>,
}

impl std::fmt::Debug for RefPic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefPic")
            .field("poc", &self.poc)
            .field("present", &self.frame.is_some())
            .finish()
    }
}

/// L0 / L1 参考列表
pub type RefPicLists = [Vec<RefPic>; 2];

/// 一个 slice: 头信息, 参考列表, 入口点数据
pub struct Slice {
    pub header: SliceHeader,
    pub refs: RefPicLists,
    pub source: Arc<dyn SliceSource>,
}

impl Slice {
    pub fn entry_point_count(&self) -> usize {
        self.header.entry_points.len()
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice")
            .field("header", &self.header)
            .field("refs", &self.refs)
            .finish_non_exhaustive()
    }
}

// ============================================================
// 逐块信息表
// ============================================================

/// 行进度的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    /// 运动信息可用行 (随 PARSE 推进)
    Motion,
    /// 最终像素可用行 (随 ALF 推进)
    Pixel,
}

impl ProgressKind {
    fn index(self) -> usize {
        match self {
            Self::Motion => 0,
            Self::Pixel => 1,
        }
    }
}

/// 按 4x4 亮度块存储的共享信息表
///
/// 带 `[_; 2]` 的表按通道类型 (亮度树 / 色度树) 分别存储, 单树时两份相同.
#[derive(Debug)]
pub struct FrameTables {
    pub width4: usize,
    pub height4: usize,
    pub cb_x: [GridU32; 2],
    pub cb_y: [GridU32; 2],
    pub cb_w: [GridU16; 2],
    pub cb_h: [GridU16; 2],
    pub tb_x: [GridU32; 2],
    pub tb_y: [GridU32; 2],
    pub tb_w: [GridU16; 2],
    pub tb_h: [GridU16; 2],
    /// [`PredMode`](super::common::PredMode) 编码值
    pub pred_mode: [GridU8; 2],
    pub skip: GridU8,
    pub ciip: GridU8,
    /// 亮度帧内模式 (双树色度 CU 的 CCLM / LFNST 推导使用)
    pub intra_mode: GridU8,
    /// 按通道类型存储的 CU QpY (双树时色度树有独立的 QpY)
    pub qp: [GridI16; 2],
    /// 每个平面覆盖该位置的变换块是否有残差
    pub coded: [GridU8; 3],
    pub joint_cbcr: GridU8,
    /// BDPCM 标志 (亮度 / 色度)
    pub bdpcm: [GridU8; 2],
    pub pred_flags: GridU8,
    pub mv_x: [GridI32; 2],
    pub mv_y: [GridI32; 2],
    pub ref_poc: [GridI32; 2],
    pub sub_block: GridU8,
}

impl FrameTables {
    pub fn new(width: usize, height: usize) -> VvResult<Self> {
        let w4 = width.div_ceil(1 << MIN_BLOCK_LOG2);
        let h4 = height.div_ceil(1 << MIN_BLOCK_LOG2);
        let u32s = || -> VvResult<[GridU32; 2]> { Ok([GridU32::new(w4, h4, 0)?, GridU32::new(w4, h4, 0)?]) };
        let u16s = || -> VvResult<[GridU16; 2]> { Ok([GridU16::new(w4, h4, 0)?, GridU16::new(w4, h4, 0)?]) };
        let u8s = || -> VvResult<[GridU8; 2]> { Ok([GridU8::new(w4, h4, 0)?, GridU8::new(w4, h4, 0)?]) };
        let i32s = || -> VvResult<[GridI32; 2]> { Ok([GridI32::new(w4, h4, 0)?, GridI32::new(w4, h4, 0)?]) };
        Ok(Self {
            width4: w4,
            height4: h4,
            cb_x: u32s()?,
            cb_y: u32s()?,
            cb_w: u16s()?,
            cb_h: u16s()?,
            tb_x: u32s()?,
            tb_y: u32s()?,
            tb_w: u16s()?,
            tb_h: u16s()?,
            pred_mode: u8s()?,
            skip: GridU8::new(w4, h4, 0)?,
            ciip: GridU8::new(w4, h4, 0)?,
            intra_mode: GridU8::new(w4, h4, 0)?,
            qp: [GridI16::new(w4, h4, 0)?, GridI16::new(w4, h4, 0)?],
            coded: [
                GridU8::new(w4, h4, 0)?,
                GridU8::new(w4, h4, 0)?,
                GridU8::new(w4, h4, 0)?,
            ],
            joint_cbcr: GridU8::new(w4, h4, 0)?,
            bdpcm: u8s()?,
            pred_flags: GridU8::new(w4, h4, 0)?,
            mv_x: i32s()?,
            mv_y: i32s()?,
            ref_poc: i32s()?,
            sub_block: GridU8::new(w4, h4, 0)?,
        })
    }

    /// 亮度矩形换算为 4x4 网格矩形
    pub fn rect4(x0: usize, y0: usize, w: usize, h: usize) -> (usize, usize, usize, usize) {
        let s = MIN_BLOCK_LOG2;
        let x4 = x0 >> s;
        let y4 = y0 >> s;
        let w4 = ((x0 + w).div_ceil(1 << s)).saturating_sub(x4).max(1);
        let h4 = ((y0 + h).div_ceil(1 << s)).saturating_sub(y4).max(1);
        (x4, y4, w4, h4)
    }

    /// 记录编码块位置与尺寸 (亮度坐标)
    pub fn set_cb(&self, ch: ChannelType, x0: usize, y0: usize, w: usize, h: usize) {
        let c = ch as usize;
        let (x4, y4, w4, h4) = Self::rect4(x0, y0, w, h);
        self.cb_x[c].fill_rect(x4, y4, w4, h4, x0 as u32);
        self.cb_y[c].fill_rect(x4, y4, w4, h4, y0 as u32);
        self.cb_w[c].fill_rect(x4, y4, w4, h4, w as u16);
        self.cb_h[c].fill_rect(x4, y4, w4, h4, h as u16);
    }

    /// 记录变换块位置与尺寸 (亮度坐标)
    pub fn set_tb(&self, ch: ChannelType, x0: usize, y0: usize, w: usize, h: usize) {
        let c = ch as usize;
        let (x4, y4, w4, h4) = Self::rect4(x0, y0, w, h);
        self.tb_x[c].fill_rect(x4, y4, w4, h4, x0 as u32);
        self.tb_y[c].fill_rect(x4, y4, w4, h4, y0 as u32);
        self.tb_w[c].fill_rect(x4, y4, w4, h4, w as u16);
        self.tb_h[c].fill_rect(x4, y4, w4, h4, h as u16);
    }

    /// 亮度坐标处的值读取辅助: 换算到 4x4 网格
    #[inline]
    pub fn at(x: usize, y: usize) -> (usize, usize) {
        (x >> MIN_BLOCK_LOG2, y >> MIN_BLOCK_LOG2)
    }
}

// ============================================================
// CTU 级数据
// ============================================================

/// CTU 解析结果, 由 PARSE 产生, RECON 消费
#[derive(Debug, Default)]
pub struct CtuData {
    pub cus: CuList,
    /// 系数 arena
    pub coeffs: Vec<i32>,
    /// 已重建区域
    pub recon: Vec<ReconArea>,
    /// 每个参考列表中各参考帧需要的最大像素行, 未使用为 0
    pub max_y: [Vec<usize>; 2],
}

/// CTU 的环路滤波参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtuFilterParams {
    pub sao: SaoParams,
    pub alf: CtuAlfParams,
}

// ============================================================
// 帧上下文
// ============================================================

/// 一帧的共享解码状态
pub struct FrameContext {
    pub params: FrameParams,
    pub slices: Vec<Slice>,
    pub poc: i32,
    /// 解码顺序, 调度器优先处理较早的帧
    pub decode_order: u64,
    /// 重建 / 去块 / 最终输出图像
    pub pic: Picture,
    /// SAO 输出, ALF 输入; SAO 与 ALF 都关闭时为 `None`
    pub staging: Option<Picture>,
    pub tables: FrameTables,
    pub pool: Arc<CuPool>,
    pub predictor: Arc<dyn Predictor>,
    pub config: DecoderConfig,
    /// 每个 CTU 所属 slice
    ctu_slice: Vec<Option<usize>>,
    ctu_data: Vec<Mutex<Option<CtuData>>>,
    ctu_filters: Vec<OnceLock<CtuFilterParams>>,
    progress: [AtomicUsize; 2],
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("poc", &self.poc)
            .field("decode_order", &self.decode_order)
            .field("slices", &self.slices.len())
            .finish_non_exhaustive()
    }
}

impl FrameContext {
    /// 分配帧上下文
    ///
    /// 校验 slice 覆盖的 CTU 地址: 越界或被多个 slice 重复覆盖均为非法数据.
    pub fn new(
        params: FrameParams,
        slices: Vec<Slice>,
        poc: i32,
        decode_order: u64,
        pool: Arc<CuPool>,
        predictor: Arc<dyn Predictor>,
        config: DecoderConfig,
    ) -> VvResult<Arc<Self>> {
        let sps = Arc::clone(&params.sps);
        let count = params.geometry.ctb_count();
        let mut ctu_slice = vec![None; count];
        for (s, slice) in slices.iter().enumerate() {
            if slice.header.entry_points.first() != Some(&0) {
                return Err(VvError::InvalidData(format!("slice {s} 的首个入口点必须从 0 开始")));
            }
            if slice.header.entry_points.windows(2).any(|w| w[0] >= w[1])
                || slice
                    .header
                    .entry_points
                    .last()
                    .is_some_and(|&ep| ep >= slice.header.ctb_addrs.len().max(1))
            {
                return Err(VvError::InvalidData(format!("slice {s} 入口点非法")));
            }
            for &addr in &slice.header.ctb_addrs {
                let Some(slot) = ctu_slice.get_mut(addr) else {
                    return Err(VvError::InvalidData(format!(
                        "slice {s} 的 CTU 地址越界: {addr}"
                    )));
                };
                if slot.replace(s).is_some() {
                    return Err(VvError::InvalidData(format!(
                        "CTU {addr} 被多个 slice 覆盖"
                    )));
                }
            }
        }

        let pic = Picture::new(sps.width, sps.height, sps.chroma_format, sps.bit_depth)?;
        let needs_staging = slices.iter().any(|s| {
            s.header.sao_luma || s.header.sao_chroma || s.header.alf_enabled
        }) && (sps.sao_enabled || sps.alf_enabled);
        let staging = if needs_staging {
            Some(Picture::new(sps.width, sps.height, sps.chroma_format, sps.bit_depth)?)
        } else {
            None
        };
        let tables = FrameTables::new(sps.width, sps.height)?;

        let mut ctu_data = Vec::new();
        ctu_data.try_reserve_exact(count)?;
        ctu_data.extend((0..count).map(|_| Mutex::new(None)));
        let mut ctu_filters = Vec::new();
        ctu_filters.try_reserve_exact(count)?;
        ctu_filters.extend((0..count).map(|_| OnceLock::new()));

        Ok(Arc::new(Self {
            params,
            slices,
            poc,
            decode_order,
            pic,
            staging,
            tables,
            pool,
            predictor,
            config,
            ctu_slice,
            ctu_data,
            ctu_filters,
            progress: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }))
    }

    /// CTU 光栅地址
    pub fn ctb_addr(&self, rx: usize, ry: usize) -> usize {
        ry * self.params.geometry.ctb_width + rx
    }

    /// CTU 所属 slice 下标
    pub fn slice_index(&self, rx: usize, ry: usize) -> Option<usize> {
        self.ctu_slice.get(self.ctb_addr(rx, ry)).copied().flatten()
    }

    /// CTU 所属 slice
    pub fn slice_at(&self, rx: usize, ry: usize) -> Option<&Slice> {
        self.slice_index(rx, ry).and_then(|s| self.slices.get(s))
    }

    /// 亮度坐标所在 CTU 的 slice 下标
    pub fn slice_index_at_sample(&self, x: usize, y: usize) -> Option<usize> {
        let log2 = self.params.geometry.log2_ctb_size;
        self.slice_index(x >> log2, y >> log2)
    }

    /// 保存 CTU 解析结果
    pub fn store_ctu_data(&self, rx: usize, ry: usize, data: CtuData) -> VvResult<()> {
        let slot = self
            .ctu_data
            .get(self.ctb_addr(rx, ry))
            .ok_or_else(|| VvError::Internal(format!("CTU ({rx},{ry}) 越界")))?;
        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(data);
        Ok(())
    }

    /// 在 CTU 解析结果上执行只读操作
    pub fn with_ctu_data<R>(&self, rx: usize, ry: usize, f: impl FnOnce(Option<&CtuData>) -> R) -> R {
        match self.ctu_data.get(self.ctb_addr(rx, ry)) {
            Some(slot) => f(slot.lock().unwrap_or_else(|e| e.into_inner()).as_ref()),
            None => f(None),
        }
    }

    /// 取走 CTU 解析结果
    pub fn take_ctu_data(&self, rx: usize, ry: usize) -> Option<CtuData> {
        self.ctu_data
            .get(self.ctb_addr(rx, ry))
            .and_then(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).take())
    }

    /// 把 CU 链表与系数 arena 归还池
    pub fn release_ctu_data(&self, data: CtuData) {
        self.pool.release(data.cus);
        self.pool.release_coeffs(data.coeffs);
    }

    /// 记录 CTU 滤波参数; 重复设置视为内部错误
    pub fn set_filter_params(&self, rx: usize, ry: usize, params: CtuFilterParams) -> VvResult<()> {
        let slot = self
            .ctu_filters
            .get(self.ctb_addr(rx, ry))
            .ok_or_else(|| VvError::Internal(format!("CTU ({rx},{ry}) 越界")))?;
        slot.set(params)
            .map_err(|_| VvError::Internal(format!("CTU ({rx},{ry}) 滤波参数重复设置")))
    }

    /// CTU 滤波参数, 未解析时返回默认值 (全部关闭)
    pub fn filter_params(&self, rx: usize, ry: usize) -> CtuFilterParams {
        self.ctu_filters
            .get(self.ctb_addr(rx, ry))
            .and_then(|slot| slot.get().copied())
            .unwrap_or_default()
    }

    /// 已报告的行进度 (亮度采样行)
    pub fn progress(&self, kind: ProgressKind) -> usize {
        self.progress[kind.index()].load(Ordering::Acquire)
    }

    /// 推进行进度, 只增不减
    pub(crate) fn advance_progress(&self, kind: ProgressKind, rows: usize) -> bool {
        let prev = self.progress[kind.index()].fetch_max(rows, Ordering::AcqRel);
        rows > prev
    }

    /// 图像高度
    pub fn height(&self) -> usize {
        self.params.sps.height
    }
}
