//! 编码单元 / 变换单元数据结构与按帧复用的 CU 池.
//!
//! 每个 CTU 持有一个 [`CuList`]: CU 记录存放在 arena 中, 以下标 `next` 串成
//! 单链表 (插入顺序 = 解码顺序). CTU 重建完成后整个链表一次性归还 [`CuPool`],
//! CU 记录及其 TU 向量的容量在下一帧继续使用.

use std::sync::Mutex;

use bitflags::bitflags;
use vvrec_core::VvResult;

use super::common::{ChannelType, IspType, ModeType, PredMode, TreeType};

bitflags! {
    /// CU 级标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CuFlags: u16 {
        /// `cu_skip_flag`
        const SKIP               = 1 << 0;
        /// `cu_coded_flag` (根 cbf)
        const CODED              = 1 << 1;
        /// 组合帧间帧内预测
        const CIIP               = 1 << 2;
        /// 矩阵加权帧内预测
        const MIP                = 1 << 3;
        const MIP_TRANSPOSED     = 1 << 4;
        const BDPCM_LUMA         = 1 << 5;
        /// 亮度 BDPCM 方向为垂直
        const BDPCM_LUMA_VER     = 1 << 6;
        const BDPCM_CHROMA       = 1 << 7;
        const BDPCM_CHROMA_VER   = 1 << 8;
        /// 子块运动 (仿射 / SbTMVP)
        const SUB_BLOCK_MOTION   = 1 << 9;
        /// 帧内块拷贝
        const IBC                = 1 << 10;
    }
}

bitflags! {
    /// TU 级标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TuFlags: u8 {
        const CODED_Y     = 1 << 0;
        const CODED_CB    = 1 << 1;
        const CODED_CR    = 1 << 2;
        /// `tu_joint_cbcr_residual_flag`
        const JOINT_CBCR  = 1 << 3;
        /// 本 TU 是 ISP 的最后一个子划分
        const ISP_LAST    = 1 << 4;
    }
}

bitflags! {
    /// 参考列表使用标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PredFlags: u8 {
        const L0 = 1 << 0;
        const L1 = 1 << 1;
    }
}

impl TuFlags {
    /// 平面 `c_idx` 的 coded flag
    pub fn coded_flag(c_idx: usize) -> Self {
        match c_idx {
            0 => Self::CODED_Y,
            1 => Self::CODED_CB,
            _ => Self::CODED_CR,
        }
    }
}

/// 运动矢量, 1/16 像素精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mv {
    pub x: i32,
    pub y: i32,
}

impl Mv {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 任一分量差值不小于 `threshold`
    pub fn differs(self, other: Mv, threshold: i32) -> bool {
        (self.x - other.x).abs() >= threshold || (self.y - other.y).abs() >= threshold
    }
}

/// 帧间运动数据 (由外部运动推导给出)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionInfo {
    pub pred_flags: PredFlags,
    pub ref_idx: [usize; 2],
    pub mv: [Mv; 2],
    /// 是否组合帧间帧内预测
    pub ciip: bool,
    /// 是否子块运动
    pub sub_block: bool,
}

impl MotionInfo {
    /// 单向整像素运动
    pub fn uni(list: usize, ref_idx: usize, mv: Mv) -> Self {
        let mut info = Self {
            pred_flags: if list == 0 { PredFlags::L0 } else { PredFlags::L1 },
            ..Self::default()
        };
        info.ref_idx[list] = ref_idx;
        info.mv[list] = mv;
        info
    }

    /// 使用的 MV 个数
    pub fn mv_count(&self) -> usize {
        self.pred_flags.bits().count_ones() as usize
    }
}

/// 帧内亮度信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntraInfo {
    /// 亮度帧内模式 (MIP 时为 MIP 模式号)
    pub luma_mode: u8,
    /// 推导后的色度帧内模式
    pub chroma_mode: u8,
    /// 多参考行索引
    pub mrl_idx: u8,
    pub isp: IspType,
    pub num_isp: usize,
}

/// 子块变换 (SBT) 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtInfo {
    /// 划分方向为水平 (上下两个 TU)
    pub horizontal: bool,
    /// 1/4 划分
    pub quad: bool,
    /// 有系数的 TU 位于第二块
    pub pos: bool,
}

/// 变换块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformBlock {
    pub c_idx: usize,
    /// 平面坐标
    pub x0: usize,
    pub y0: usize,
    pub log2_w: u32,
    pub log2_h: u32,
    pub min_scan_x: usize,
    pub min_scan_y: usize,
    pub max_scan_x: usize,
    pub max_scan_y: usize,
    /// 扫描顺序中最后一个非零系数的位置
    pub last_scan_pos: usize,
    /// 最后一个非零系数所在的 4x4 子块
    pub last_sub_block: usize,
    pub qp: i32,
    pub ts: bool,
    pub has_coeffs: bool,
    /// 在 CTU 系数 arena 中的偏移
    pub coeff_offset: usize,
}

impl TransformBlock {
    pub fn width(&self) -> usize {
        1 << self.log2_w
    }

    pub fn height(&self) -> usize {
        1 << self.log2_h
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }
}

/// 变换单元
#[derive(Debug, Clone, Default)]
pub struct TransformUnit {
    /// 亮度坐标
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    pub flags: TuFlags,
    /// `tu_cu_chroma_qp_offset_idx`, 未使用时为 `None`
    pub chroma_qp_offset_idx: Option<usize>,
    pub tbs: Vec<TransformBlock>,
}

impl TransformUnit {
    /// 联合 CbCr 模式: 1 = 仅 Cb 编码, 2 = 两者, 3 = 仅 Cr
    pub fn joint_cbcr_mode(&self) -> u8 {
        if !self.flags.contains(TuFlags::JOINT_CBCR) {
            return 0;
        }
        match (
            self.flags.contains(TuFlags::CODED_CB),
            self.flags.contains(TuFlags::CODED_CR),
        ) {
            (true, true) => 2,
            (true, false) => 1,
            _ => 3,
        }
    }

    /// 平面 `c_idx` 的变换块
    pub fn tb(&self, c_idx: usize) -> Option<&TransformBlock> {
        self.tbs.iter().find(|tb| tb.c_idx == c_idx)
    }
}

/// 编码单元
#[derive(Debug, Clone, Default)]
pub struct CodingUnit {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    pub tree: TreeType,
    pub mode_type: ModeType,
    pub pred_mode: PredMode,
    pub flags: CuFlags,
    /// Y (不含位深偏移), Cb, Cr, CbCr (含位深偏移)
    pub qp: [i32; 4],
    pub intra: IntraInfo,
    pub motion: MotionInfo,
    pub sbt: Option<SbtInfo>,
    pub lfnst_idx: u8,
    pub mts_idx: u8,
    pub tus: Vec<TransformUnit>,
    /// 链表中的下一个 CU
    pub next: Option<usize>,
}

impl CodingUnit {
    /// 清空为初始状态, 保留 TU 向量容量
    pub fn reset(&mut self) {
        let mut tus = std::mem::take(&mut self.tus);
        tus.clear();
        *self = Self {
            tus,
            ..Self::default()
        };
    }

    pub fn channel(&self) -> ChannelType {
        self.tree.channel()
    }

    pub fn is_intra(&self) -> bool {
        self.pred_mode == PredMode::Intra
    }

    pub fn is_ciip(&self) -> bool {
        self.flags.contains(CuFlags::CIIP)
    }

    pub fn is_coded(&self) -> bool {
        self.flags.contains(CuFlags::CODED)
    }

    pub fn log2_w(&self) -> u32 {
        self.width.trailing_zeros()
    }

    pub fn log2_h(&self) -> u32 {
        self.height.trailing_zeros()
    }

    /// 平面 `c_idx` 是否使用 BDPCM
    pub fn bdpcm(&self, c_idx: usize) -> Option<bool> {
        let (on, ver) = if c_idx == 0 {
            (CuFlags::BDPCM_LUMA, CuFlags::BDPCM_LUMA_VER)
        } else {
            (CuFlags::BDPCM_CHROMA, CuFlags::BDPCM_CHROMA_VER)
        };
        self.flags.contains(on).then(|| self.flags.contains(ver))
    }
}

// ============================================================
// CU 链表
// ============================================================

/// 单个 CTU 的 CU 链表
#[derive(Debug, Default)]
pub struct CuList {
    arena: Vec<CodingUnit>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl CuList {
    /// 追加 CU, 返回其下标
    pub fn push(&mut self, mut cu: CodingUnit) -> VvResult<usize> {
        self.arena.try_reserve(1)?;
        let idx = self.arena.len();
        cu.next = None;
        self.arena.push(cu);
        if let Some(tail) = self.tail {
            self.arena[tail].next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&CodingUnit> {
        self.arena.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut CodingUnit> {
        self.arena.get_mut(idx)
    }

    /// 按解码顺序遍历
    pub fn iter(&self) -> CuIter<'_> {
        CuIter {
            list: self,
            cur: self.head,
        }
    }
}

/// [`CuList`] 的链表遍历器
pub struct CuIter<'a> {
    list: &'a CuList,
    cur: Option<usize>,
}

impl<'a> Iterator for CuIter<'a> {
    type Item = &'a CodingUnit;

    fn next(&mut self) -> Option<Self::Item> {
        let cu = self.list.arena.get(self.cur?)?;
        self.cur = cu.next;
        Some(cu)
    }
}

// ============================================================
// 池
// ============================================================

/// CU 记录与系数 arena 的复用池
#[derive(Debug, Default)]
pub struct CuPool {
    cus: Mutex<Vec<CodingUnit>>,
    coeffs: Mutex<Vec<Vec<i32>>>,
}

impl CuPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出一个已清空的 CU 记录
    pub fn alloc_cu(&self) -> CodingUnit {
        let recycled = self
            .cus
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        match recycled {
            Some(mut cu) => {
                cu.reset();
                cu
            }
            None => CodingUnit::default(),
        }
    }

    /// 取出一个空的系数 arena
    pub fn alloc_coeffs(&self) -> Vec<i32> {
        let mut buf = self
            .coeffs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf
    }

    /// 归还整个 CU 链表
    pub fn release(&self, list: CuList) {
        let mut cus = self.cus.lock().unwrap_or_else(|e| e.into_inner());
        cus.extend(list.arena);
    }

    /// 归还单个未入链的 CU 记录
    pub fn release_one(&self, cu: CodingUnit) {
        self.cus.lock().unwrap_or_else(|e| e.into_inner()).push(cu);
    }

    /// 归还系数 arena
    pub fn release_coeffs(&self, buf: Vec<i32>) {
        self.coeffs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(buf);
    }

    /// 池中空闲 CU 记录数
    pub fn free_cus(&self) -> usize {
        self.cus.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::{CodingUnit, CuList, CuPool, TransformUnit, TuFlags};

    fn cu_at(x0: usize) -> CodingUnit {
        CodingUnit {
            x0,
            width: 8,
            height: 8,
            ..CodingUnit::default()
        }
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let mut list = CuList::default();
        for x in [0, 8, 16] {
            if let Err(err) = list.push(cu_at(x)) {
                panic!("追加 CU 失败: {err}");
            }
        }
        let order: Vec<usize> = list.iter().map(|cu| cu.x0).collect();
        assert_eq!(order, vec![0, 8, 16]);
        assert_eq!(list.get(0).and_then(|cu| cu.next), Some(1));
        assert_eq!(list.get(2).and_then(|cu| cu.next), None);
    }

    #[test]
    fn test_pool_recycles_records() {
        let pool = CuPool::new();
        let mut list = CuList::default();
        let mut cu = pool.alloc_cu();
        cu.tus.push(TransformUnit::default());
        if let Err(err) = list.push(cu) {
            panic!("追加 CU 失败: {err}");
        }
        pool.release(list);
        assert_eq!(pool.free_cus(), 1);
        let reused = pool.alloc_cu();
        assert!(reused.tus.is_empty(), "复用的 CU 应被清空");
        assert!(reused.tus.capacity() >= 1, "TU 向量容量应保留");
        assert_eq!(pool.free_cus(), 0);
    }

    #[test]
    fn test_joint_cbcr_mode() {
        let mut tu = TransformUnit {
            flags: TuFlags::JOINT_CBCR | TuFlags::CODED_CB,
            ..TransformUnit::default()
        };
        assert_eq!(tu.joint_cbcr_mode(), 1);
        tu.flags |= TuFlags::CODED_CR;
        assert_eq!(tu.joint_cbcr_mode(), 2);
        tu.flags = TuFlags::JOINT_CBCR | TuFlags::CODED_CR;
        assert_eq!(tu.joint_cbcr_mode(), 3);
        tu.flags = TuFlags::CODED_CR;
        assert_eq!(tu.joint_cbcr_mode(), 0);
    }
}
