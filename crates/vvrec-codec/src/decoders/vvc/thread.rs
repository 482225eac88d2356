//! 帧级任务调度.
//!
//! 每个 CTU 依次经过 8 个阶段: PARSE, INTER, RECON, LMCS, DEBLOCK_V, DEBLOCK_H,
//! SAO, ALF. 一个阶段完成后把同一 CTU 的下一阶段放入执行器, 任务在依赖的
//! 邻居阶段全部完成前留在待执行列表中. 阶段完成情况记录在每个 CTU 一个字节的
//! 可用位图里, 位只置不清.
//!
//! 跨帧依赖通过参考帧的行进度表达: `Motion` 随 PARSE 行推进, `Pixel` 随 ALF
//! 行推进. 进度推进时唤醒执行器, 等待参考帧的任务随之重新检查就绪条件.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bitflags::bitflags;
use log::{debug, error, trace, warn};
use vvrec_core::{VvError, VvResult};

use super::alf::alf_filter;
use super::config::DecoderConfig;
use super::ctu::{ParseContext, QpState, coding_tree_unit};
use super::deblock::{deblock_horizontal, deblock_vertical};
use super::executor::{Executor, Job};
use super::frame::{FrameContext, ProgressKind};
use super::lmcs::lmcs_filter;
use super::recon::reconstruct;
use super::sao::sao_filter;
use super::syntax::SyntaxReader;

// ============================================================
// 任务类型
// ============================================================

/// 任务类型, 按流水线顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskType {
    Parse,
    Inter,
    Recon,
    Lmcs,
    DeblockV,
    DeblockH,
    Sao,
    Alf,
}

bitflags! {
    /// CTU 已完成阶段的位图
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskMask: u8 {
        const PARSE     = 1 << 0;
        const INTER     = 1 << 1;
        const RECON     = 1 << 2;
        const LMCS      = 1 << 3;
        const DEBLOCK_V = 1 << 4;
        const DEBLOCK_H = 1 << 5;
        const SAO       = 1 << 6;
        const ALF       = 1 << 7;
    }
}

impl TaskType {
    pub const ALL: [Self; 8] = [
        Self::Parse,
        Self::Inter,
        Self::Recon,
        Self::Lmcs,
        Self::DeblockV,
        Self::DeblockH,
        Self::Sao,
        Self::Alf,
    ];

    pub fn mask(self) -> TaskMask {
        TaskMask::from_bits_retain(1 << self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Parse => "PARSE",
            Self::Inter => "INTER",
            Self::Recon => "RECON",
            Self::Lmcs => "LMCS",
            Self::DeblockV => "DEBLOCK_V",
            Self::DeblockH => "DEBLOCK_H",
            Self::Sao => "SAO",
            Self::Alf => "ALF",
        }
    }

    /// 同一 CTU 上紧随其后的阶段; ALF 由 SAO 邻域完成触发, 不在此链上
    fn next(self) -> Option<Self> {
        match self {
            Self::Parse => Some(Self::Inter),
            Self::Inter => Some(Self::Recon),
            Self::Recon => Some(Self::Lmcs),
            Self::Lmcs => Some(Self::DeblockV),
            Self::DeblockV => Some(Self::DeblockH),
            Self::DeblockH => Some(Self::Sao),
            Self::Sao | Self::Alf => None,
        }
    }
}

/// 相对位置上的依赖
type Dep = (isize, isize, TaskType);

/// 非 PARSE / INTER 阶段的邻居依赖
pub(crate) fn stage_deps(kind: TaskType) -> &'static [Dep] {
    use TaskType::*;
    match kind {
        Parse | Inter | Alf => &[],
        Recon => &[(0, 0, Inter), (1, -1, Recon), (-1, 0, Recon)],
        Lmcs => &[(1, 1, Recon), (0, 1, Recon), (1, 0, Recon)],
        // 左边界滤波会改写左侧 CTU 的采样, 因此还要求左侧已反向映射并完成垂直滤波
        DeblockV => &[(-1, 0, Lmcs), (0, 0, Lmcs), (1, 0, Lmcs), (-1, 0, DeblockV)],
        DeblockH => &[(-1, 0, DeblockH), (0, -1, DeblockH), (0, 0, DeblockV)],
        Sao => &[(1, -1, Sao), (-1, 1, DeblockH), (0, 1, DeblockH), (1, 1, DeblockH)],
    }
}

/// 一次任务派发记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub kind: TaskType,
    pub rx: usize,
    pub ry: usize,
}

// ============================================================
// 帧线程状态
// ============================================================

/// INTER 阶段的参考行需求与检查游标
#[derive(Debug, Default)]
struct InterState {
    /// `[list][ref_idx]` 需要的参考帧像素行, 0 表示未使用
    max_y: [Vec<AtomicUsize>; 2],
    /// 每个列表下一个待检查的参考下标
    cursor: [AtomicUsize; 2],
}

/// 一帧的调度状态
pub struct FrameThread {
    pub fc: Arc<FrameContext>,
    exec: Arc<Executor<Task>>,
    avail: Vec<AtomicU8>,
    alf_queued: Vec<AtomicBool>,
    inter: Vec<InterState>,
    nb_scheduled: AtomicUsize,
    nb_parse: AtomicUsize,
    /// `[stage][row]` 已完成的 CTU 数
    row_done: Vec<Vec<AtomicUsize>>,
    /// PARSE / ALF 已连续完成的行数
    row_scan: Mutex<[usize; 2]>,
    error: AtomicBool,
    first_error: Mutex<Option<VvError>>,
    done: Mutex<bool>,
    done_cond: Condvar,
    dispatch: Option<Mutex<Vec<Dispatch>>>,
}

impl std::fmt::Debug for FrameThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameThread")
            .field("poc", &self.fc.poc)
            .field("scheduled", &self.nb_scheduled.load(Ordering::Relaxed))
            .field("parse", &self.nb_parse.load(Ordering::Relaxed))
            .field("error", &self.has_error())
            .finish_non_exhaustive()
    }
}

/// 分配帧调度状态
///
/// 不属于任何 slice 的 CTU 直接标记为全部完成, 使邻居不会无限等待;
/// 缺失 slice 在全部 PARSE 结束后统一检查.
pub fn frame_thread_init(fc: Arc<FrameContext>, exec: Arc<Executor<Task>>) -> VvResult<Arc<FrameThread>> {
    let geo = &fc.params.geometry;
    let count = geo.ctb_count();
    let (cw, ch) = (geo.ctb_width, geo.ctb_height);

    let mut avail = Vec::new();
    avail.try_reserve_exact(count)?;
    let mut alf_queued = Vec::new();
    alf_queued.try_reserve_exact(count)?;
    let mut inter = Vec::new();
    inter.try_reserve_exact(count)?;
    for addr in 0..count {
        let (rx, ry) = geo.ctb_pos(addr);
        let refs = fc.slice_at(rx, ry).map(|s| [s.refs[0].len(), s.refs[1].len()]);
        let bits = if refs.is_some() { 0 } else { TaskMask::all().bits() };
        avail.push(AtomicU8::new(bits));
        alf_queued.push(AtomicBool::new(refs.is_none()));
        let [n0, n1] = refs.unwrap_or([0, 0]);
        inter.push(InterState {
            max_y: [
                (0..n0).map(|_| AtomicUsize::new(0)).collect(),
                (0..n1).map(|_| AtomicUsize::new(0)).collect(),
            ],
            cursor: [AtomicUsize::new(0), AtomicUsize::new(0)],
        });
    }

    let mut row_done = Vec::with_capacity(TaskType::ALL.len());
    for _ in TaskType::ALL {
        let mut rows = Vec::new();
        rows.try_reserve_exact(ch)?;
        rows.extend((0..ch).map(|ry| {
            let missing = (0..cw).filter(|&rx| fc.slice_index(rx, ry).is_none()).count();
            AtomicUsize::new(missing)
        }));
        row_done.push(rows);
    }

    let dispatch = fc.config.record_dispatch.then(|| Mutex::new(Vec::new()));
    let ft = Arc::new(FrameThread {
        fc,
        exec,
        avail,
        alf_queued,
        inter,
        // 1 为 submit 持有的保护计数
        nb_scheduled: AtomicUsize::new(1),
        nb_parse: AtomicUsize::new(1),
        row_done,
        row_scan: Mutex::new([0, 0]),
        error: AtomicBool::new(false),
        first_error: Mutex::new(None),
        done: Mutex::new(false),
        done_cond: Condvar::new(),
        dispatch,
    });
    ft.scan_rows(TaskType::Parse);
    ft.scan_rows(TaskType::Alf);
    Ok(ft)
}

/// 释放帧调度状态, 把出错时残留的 CTU 解析结果归还池
pub fn frame_thread_free(ft: Arc<FrameThread>) {
    let geo = &ft.fc.params.geometry;
    let mut leaked = 0;
    for addr in 0..geo.ctb_count() {
        let (rx, ry) = geo.ctb_pos(addr);
        if let Some(data) = ft.fc.take_ctu_data(rx, ry) {
            ft.fc.release_ctu_data(data);
            leaked += 1;
        }
    }
    if leaked > 0 {
        debug!("VVC: 帧 POC {} 释放 {} 个未重建的 CTU", ft.fc.poc, leaked);
    }
}

/// 等待帧内全部任务结束, 返回记录的首个错误
pub fn frame_wait(ft: &FrameThread) -> VvResult<()> {
    let mut done = ft.done.lock().unwrap_or_else(|e| e.into_inner());
    while !*done {
        done = ft.done_cond.wait(done).unwrap_or_else(|e| e.into_inner());
    }
    drop(done);
    match ft.first_error.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

impl FrameThread {
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// 已报告的行进度 (亮度采样行)
    pub fn progress(&self, kind: ProgressKind) -> usize {
        self.fc.progress(kind)
    }

    /// 推进行进度并唤醒等待该帧的任务
    pub fn report_progress(&self, kind: ProgressKind, rows: usize) {
        if self.fc.advance_progress(kind, rows.min(self.fc.height())) {
            trace!("VVC: 帧 POC {} {:?} 进度推进到 {}", self.fc.poc, kind, rows);
            self.exec.wake();
        }
    }

    /// CTU 已完成的阶段
    pub fn avail(&self, rx: usize, ry: usize) -> TaskMask {
        self.avail
            .get(self.fc.ctb_addr(rx, ry))
            .map_or(TaskMask::empty(), |a| TaskMask::from_bits_retain(a.load(Ordering::Acquire)))
    }

    /// 派发记录 (需开启 `record_dispatch`)
    pub fn dispatch_log(&self) -> Vec<Dispatch> {
        self.dispatch
            .as_ref()
            .map(|log| log.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    /// 相对位置上的阶段是否完成; 图像外的邻居视为已完成
    fn done_at(&self, rx: usize, ry: usize, dx: isize, dy: isize, kind: TaskType) -> bool {
        let geo = &self.fc.params.geometry;
        let (Some(x), Some(y)) = (rx.checked_add_signed(dx), ry.checked_add_signed(dy)) else {
            return true;
        };
        if x >= geo.ctb_width || y >= geo.ctb_height {
            return true;
        }
        self.avail(x, y).contains(kind.mask())
    }

    fn parse_ready(&self, rx: usize, ry: usize) -> bool {
        let fc = &self.fc;
        let geo = &fc.params.geometry;
        if fc.params.sps.entropy_coding_sync && ry > geo.ctb_to_row_bd[ry] {
            let ax = (rx + 1).min(geo.tile_right(rx));
            if !self.avail(ax, ry - 1).contains(TaskMask::PARSE) {
                return false;
            }
        }
        let Some(slice) = fc.slice_at(rx, ry) else {
            return true;
        };
        let Some(col) = slice.header.temporal_mvp else {
            return true;
        };
        match slice.refs.get(col.list).and_then(|l| l.get(col.ref_idx)) {
            Some(r) => r.frame.as_ref().is_none_or(|f| {
                let need = ((ry + 1) << geo.log2_ctb_size).min(f.height());
                f.progress(ProgressKind::Motion) >= need
            }),
            None => true,
        }
    }

    fn inter_ready(&self, rx: usize, ry: usize) -> bool {
        let fc = &self.fc;
        let Some(slice) = fc.slice_at(rx, ry) else {
            return true;
        };
        let Some(state) = self.inter.get(fc.ctb_addr(rx, ry)) else {
            return true;
        };
        for list in 0..2 {
            let mut cursor = state.cursor[list].load(Ordering::Relaxed);
            while let Some(max_y) = state.max_y[list].get(cursor) {
                let need = max_y.load(Ordering::Relaxed);
                let frame = slice.refs[list].get(cursor).and_then(|r| r.frame.as_ref());
                if need > 0
                    && let Some(f) = frame
                    && f.progress(ProgressKind::Pixel) < need.min(f.height())
                {
                    state.cursor[list].store(cursor, Ordering::Relaxed);
                    return false;
                }
                cursor += 1;
            }
            state.cursor[list].store(cursor, Ordering::Relaxed);
        }
        true
    }

    fn is_ready(&self, kind: TaskType, rx: usize, ry: usize) -> bool {
        if self.has_error() {
            return true;
        }
        match kind {
            TaskType::Parse => self.parse_ready(rx, ry),
            TaskType::Inter => self.inter_ready(rx, ry),
            _ => stage_deps(kind)
                .iter()
                .all(|&(dx, dy, dep)| self.done_at(rx, ry, dx, dy, dep)),
        }
    }

    fn schedule(self: &Arc<Self>, task: Task) {
        self.nb_scheduled.fetch_add(1, Ordering::AcqRel);
        if task.kind == TaskType::Parse {
            self.nb_parse.fetch_add(1, Ordering::AcqRel);
        }
        self.exec.enqueue(task);
    }

    fn stage_task(self: &Arc<Self>, kind: TaskType, rx: usize, ry: usize) -> Task {
        Task {
            kind,
            rx,
            ry,
            ft: Arc::clone(self),
            parse: None,
        }
    }

    /// 记录首个错误; 之后该帧的全部任务立即就绪并直接返回
    fn record_error(&self, err: VvError, kind: TaskType, rx: usize, ry: usize) {
        let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            error!(
                "VVC: 帧 POC {} CTU ({},{}) {} 阶段出错 [{}]: {}",
                self.fc.poc,
                rx,
                ry,
                kind.name(),
                err.kind_name(),
                err
            );
            *slot = Some(err);
        }
        drop(slot);
        self.error.store(true, Ordering::Release);
        self.exec.wake();
    }

    fn mark_done(&self, kind: TaskType, rx: usize, ry: usize) {
        if let Some(a) = self.avail.get(self.fc.ctb_addr(rx, ry)) {
            a.fetch_or(kind.mask().bits(), Ordering::Release);
        }
        let width = self.fc.params.geometry.ctb_width;
        let Some(counter) = self.row_done.get(kind as usize).and_then(|rows| rows.get(ry)) else {
            return;
        };
        if counter.fetch_add(1, Ordering::AcqRel) + 1 == width
            && matches!(kind, TaskType::Parse | TaskType::Alf)
        {
            self.scan_rows(kind);
        }
    }

    /// 从已报告的行继续扫描连续完成的行, 推进对应进度
    fn scan_rows(&self, kind: TaskType) {
        let (slot, progress) = match kind {
            TaskType::Parse => (0, ProgressKind::Motion),
            TaskType::Alf => (1, ProgressKind::Pixel),
            _ => return,
        };
        let geo = &self.fc.params.geometry;
        let Some(rows) = self.row_done.get(kind as usize) else {
            return;
        };
        let mut scan = self.row_scan.lock().unwrap_or_else(|e| e.into_inner());
        let start = scan[slot];
        while scan[slot] < geo.ctb_height
            && rows[scan[slot]].load(Ordering::Acquire) >= geo.ctb_width
        {
            scan[slot] += 1;
        }
        if scan[slot] > start {
            let luma_rows = scan[slot] << geo.log2_ctb_size;
            drop(scan);
            self.report_progress(progress, luma_rows);
        }
    }

    /// SAO 完成后, 检查以其为邻居的 CTU 能否进入 ALF
    fn queue_alf_around(self: &Arc<Self>, rx: usize, ry: usize) {
        let geo = &self.fc.params.geometry;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (Some(cx), Some(cy)) = (rx.checked_add_signed(dx), ry.checked_add_signed(dy)) else {
                    continue;
                };
                if cx >= geo.ctb_width || cy >= geo.ctb_height {
                    continue;
                }
                let sao_ready = (-1..=1).all(|ny| (-1..=1).all(|nx| self.done_at(cx, cy, nx, ny, TaskType::Sao)));
                if !sao_ready {
                    continue;
                }
                let queued = &self.alf_queued[self.fc.ctb_addr(cx, cy)];
                if !queued.swap(true, Ordering::AcqRel) {
                    self.schedule(self.stage_task(TaskType::Alf, cx, cy));
                }
            }
        }
    }

    /// PARSE 计数归零时检查是否每个 CTU 都被解析
    fn parse_finished(&self) {
        if self.nb_parse.fetch_sub(1, Ordering::AcqRel) != 1 || self.has_error() {
            return;
        }
        let geo = &self.fc.params.geometry;
        let missing: Vec<(usize, usize)> = (0..geo.ctb_count())
            .map(|addr| geo.ctb_pos(addr))
            .filter(|&(rx, ry)| self.fc.slice_index(rx, ry).is_none() || !self.avail(rx, ry).contains(TaskMask::PARSE))
            .collect();
        let Some(&(rx, ry)) = missing.first() else {
            return;
        };
        if self.fc.config.error_on_missing_slices {
            self.record_error(
                VvError::InvalidData(format!("{} 个 CTU 未被任何 slice 解码", missing.len())),
                TaskType::Parse,
                rx,
                ry,
            );
        } else {
            warn!(
                "VVC: 帧 POC {} 有 {} 个 CTU 缺少 slice, 首个位于 ({},{})",
                self.fc.poc,
                missing.len(),
                rx,
                ry
            );
        }
    }

    /// 计划任务计数归零时结束该帧
    fn task_finished(&self) {
        if self.nb_scheduled.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let height = self.fc.height();
        self.fc.advance_progress(ProgressKind::Motion, height);
        self.fc.advance_progress(ProgressKind::Pixel, height);
        *self.done.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.done_cond.notify_all();
        debug!("VVC: 帧 POC {} 全部任务结束, error={}", self.fc.poc, self.has_error());
        self.exec.wake();
    }
}

// ============================================================
// 任务
// ============================================================

/// PARSE 任务携带的入口点状态
struct ParseState {
    slice: usize,
    /// 当前 CTU 在 `ctb_addrs` 中的下标
    ctb_idx: usize,
    /// 入口点的结束下标 (不含)
    end: usize,
    reader: Box<dyn SyntaxReader + Send>,
    qp: QpState,
}

/// 一个 CTU 上的一个阶段
pub struct Task {
    pub kind: TaskType,
    pub rx: usize,
    pub ry: usize,
    ft: Arc<FrameThread>,
    parse: Option<ParseState>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("rx", &self.rx)
            .field("ry", &self.ry)
            .field("poc", &self.ft.fc.poc)
            .finish()
    }
}

/// 优先级键: 解码顺序, PARSE 优先, 其余按反对角线推进
pub type TaskKey = (u64, u8, usize, usize, usize);

pub(crate) fn task_key(decode_order: u64, kind: TaskType, rx: usize, ry: usize) -> TaskKey {
    match kind {
        TaskType::Parse => (decode_order, 0, ry, rx, 0),
        _ => (decode_order, 1, rx + ry + kind as usize, rx + ry, ry),
    }
}

impl Task {
    fn execute(&mut self) -> VvResult<()> {
        let ft = &self.ft;
        let fc = ft.fc.as_ref();
        let (rx, ry) = (self.rx, self.ry);
        match self.kind {
            TaskType::Parse => {
                let state = self
                    .parse
                    .as_mut()
                    .ok_or_else(|| VvError::Internal(format!("PARSE ({rx},{ry}) 缺少入口点状态")))?;
                let slice = fc
                    .slices
                    .get(state.slice)
                    .ok_or_else(|| VvError::Internal(format!("slice {} 不存在", state.slice)))?;
                let mut ctx = ParseContext::new(fc, slice, state.reader.as_mut(), &mut state.qp, rx, ry);
                coding_tree_unit(&mut ctx)?;
                let data = ctx.finish();
                if let Some(inter) = ft.inter.get(fc.ctb_addr(rx, ry)) {
                    for list in 0..2 {
                        for (slot, &y) in inter.max_y[list].iter().zip(&data.max_y[list]) {
                            slot.store(y, Ordering::Relaxed);
                        }
                    }
                }
                fc.store_ctu_data(rx, ry, data)
            }
            // 参考帧行已就绪, 运动补偿在 RECON 中完成
            TaskType::Inter => Ok(()),
            TaskType::Recon => reconstruct(fc, rx, ry),
            TaskType::Lmcs => lmcs_filter(fc, rx, ry),
            TaskType::DeblockV => deblock_vertical(fc, rx, ry),
            TaskType::DeblockH => deblock_horizontal(fc, rx, ry),
            TaskType::Sao => sao_filter(fc, rx, ry),
            TaskType::Alf => alf_filter(fc, rx, ry),
        }
    }

    /// 入队同一 CTU 的后续阶段, PARSE 还要入队入口点内的下一个 CTU
    fn schedule_follow_ons(mut self) {
        let ft = Arc::clone(&self.ft);
        if let Some(next) = self.kind.next() {
            ft.schedule(ft.stage_task(next, self.rx, self.ry));
        }
        match self.kind {
            TaskType::Sao => ft.queue_alf_around(self.rx, self.ry),
            TaskType::Parse => {
                let Some(mut state) = self.parse.take() else {
                    return;
                };
                state.ctb_idx += 1;
                if state.ctb_idx >= state.end {
                    return;
                }
                let addr = ft
                    .fc
                    .slices
                    .get(state.slice)
                    .and_then(|s| s.header.ctb_addrs.get(state.ctb_idx).copied());
                if let Some(addr) = addr {
                    let (rx, ry) = ft.fc.params.geometry.ctb_pos(addr);
                    ft.schedule(Task {
                        kind: TaskType::Parse,
                        rx,
                        ry,
                        ft: Arc::clone(&ft),
                        parse: Some(state),
                    });
                }
            }
            _ => {}
        }
    }
}

impl Job for Task {
    type Key = TaskKey;

    fn key(&self) -> TaskKey {
        task_key(self.ft.fc.decode_order, self.kind, self.rx, self.ry)
    }

    fn ready(&self) -> bool {
        self.ft.is_ready(self.kind, self.rx, self.ry)
    }

    fn run(mut self) {
        let ft = Arc::clone(&self.ft);
        let (kind, rx, ry) = (self.kind, self.rx, self.ry);
        if let Some(log) = &ft.dispatch {
            log.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(Dispatch { kind, rx, ry });
        }
        if !ft.has_error() {
            match self.execute() {
                Ok(()) => {
                    ft.mark_done(kind, rx, ry);
                    self.schedule_follow_ons();
                }
                Err(err) => ft.record_error(err, kind, rx, ry),
            }
        }
        if kind == TaskType::Parse {
            ft.parse_finished();
        }
        ft.task_finished();
    }
}

// ============================================================
// 帧解码器
// ============================================================

/// 多帧共享一个执行器的解码入口
#[derive(Debug)]
pub struct FrameDecoder {
    exec: Arc<Executor<Task>>,
}

impl FrameDecoder {
    pub fn new(config: &DecoderConfig) -> VvResult<Self> {
        Ok(Self {
            exec: Executor::new(config.threads)?,
        })
    }

    pub fn threads(&self) -> usize {
        self.exec.threads()
    }

    /// 提交一帧: 为每个入口点创建读取器, 入队其第一个 CTU 的 PARSE 任务
    pub fn submit(&self, fc: Arc<FrameContext>) -> VvResult<Arc<FrameThread>> {
        let ft = frame_thread_init(fc, Arc::clone(&self.exec))?;
        let fc = Arc::clone(&ft.fc);
        let mut entries = 0;
        let mut result = Ok(());
        'slices: for (s, slice) in fc.slices.iter().enumerate() {
            let sh = &slice.header;
            for ep in 0..slice.entry_point_count() {
                let range = sh.entry_point_range(ep);
                let Some(&addr) = sh.ctb_addrs.get(range.start) else {
                    continue;
                };
                let reader = match slice.source.entry_reader(ep) {
                    Ok(r) => r,
                    Err(err) => {
                        result = Err(err);
                        break 'slices;
                    }
                };
                let (rx, ry) = fc.params.geometry.ctb_pos(addr);
                ft.schedule(Task {
                    kind: TaskType::Parse,
                    rx,
                    ry,
                    ft: Arc::clone(&ft),
                    parse: Some(ParseState {
                        slice: s,
                        ctb_idx: range.start,
                        end: range.end,
                        reader,
                        qp: QpState::new(sh.slice_qp_y),
                    }),
                });
                entries += 1;
            }
        }
        if let Err(err) = result {
            ft.record_error(err, TaskType::Parse, 0, 0);
        }
        debug!(
            "VVC: 提交帧 POC {} (解码顺序 {}), {} 个 slice, {} 个入口点",
            fc.poc,
            fc.decode_order,
            fc.slices.len(),
            entries
        );
        // 释放 submit 持有的保护计数
        ft.parse_finished();
        ft.task_finished();
        Ok(ft)
    }

    /// 等待帧解码结束并释放调度状态
    pub fn wait(&self, ft: Arc<FrameThread>) -> VvResult<()> {
        let result = frame_wait(&ft);
        frame_thread_free(ft);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskMask, TaskType, stage_deps, task_key};

    #[test]
    fn test_task_masks_are_distinct() {
        let all = TaskType::ALL.iter().fold(TaskMask::empty(), |acc, t| {
            assert!(!acc.contains(t.mask()), "{} 的位与其他阶段重叠", t.name());
            acc | t.mask()
        });
        assert_eq!(all, TaskMask::all());
    }

    #[test]
    fn test_parse_keys_precede_other_stages() {
        let parse = task_key(0, TaskType::Parse, 9, 9);
        let recon = task_key(0, TaskType::Recon, 0, 0);
        assert!(parse < recon, "同一帧内 PARSE 优先");
        let older = task_key(0, TaskType::Alf, 5, 5);
        let newer = task_key(1, TaskType::Parse, 0, 0);
        assert!(older < newer, "较早解码的帧优先");
    }

    #[test]
    fn test_stage_keys_follow_anti_diagonal() {
        let a = task_key(0, TaskType::Recon, 1, 0);
        let b = task_key(0, TaskType::Recon, 0, 1);
        let c = task_key(0, TaskType::Recon, 1, 1);
        assert!(a < b, "同一反对角线上按行排序");
        assert!(b < c);
    }

    #[test]
    fn test_dependencies_point_to_earlier_or_same_stage() {
        for kind in TaskType::ALL {
            for &(_, _, dep) in stage_deps(kind) {
                assert!(dep <= kind, "{} 依赖了后续阶段 {}", kind.name(), dep.name());
            }
        }
    }
}
