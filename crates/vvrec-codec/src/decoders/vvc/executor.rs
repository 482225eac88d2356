//! 优先级任务执行器.
//!
//! 待执行任务按优先级键排序保存在互斥保护的列表中. 线程池里运行的是
//! "泵" 作业: 每个泵取出列表中第一个已就绪的任务并执行.
//! 入队, 任务完成, 进度推进时都会投递新的泵, 因此任务之间从不互相阻塞.

use std::sync::{Arc, Mutex};

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use vvrec_core::{VvError, VvResult};

/// 可调度的作业
pub trait Job: Send + 'static {
    /// 优先级键, 越小越先执行
    type Key: Ord;

    fn key(&self) -> Self::Key;

    /// 依赖是否已满足; 在持有执行器锁时调用, 不能阻塞
    fn ready(&self) -> bool;

    /// 执行作业 (不持有执行器锁)
    fn run(self);
}

/// 基于 rayon 线程池的优先级执行器
pub struct Executor<T: Job> {
    pool: ThreadPool,
    pending: Mutex<Vec<T>>,
}

impl<T: Job> std::fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("threads", &self.pool.current_num_threads())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<T: Job> Executor<T> {
    /// 创建执行器, `threads == 0` 时使用可用并行度
    pub fn new(threads: usize) -> VvResult<Arc<Self>> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vvrec-worker-{i}"))
            .build()
            .map_err(|e| VvError::Internal(format!("创建线程池失败: {e}")))?;
        debug!("VVC: 执行器启动, {threads} 个工作线程");
        Ok(Arc::new(Self {
            pool,
            pending: Mutex::new(Vec::new()),
        }))
    }

    /// 工作线程数
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// 尚未执行的任务数
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 按优先级插入任务并投递一个泵
    pub fn enqueue(self: &Arc<Self>, job: T) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let key = job.key();
            let pos = pending.partition_point(|t| t.key() <= key);
            pending.insert(pos, job);
        }
        self.wake();
    }

    /// 投递一个泵, 让可能已就绪的任务得到执行
    pub fn wake(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.pool.spawn(move || this.pump());
    }

    fn pump(self: &Arc<Self>) {
        let job = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let Some(pos) = pending.iter().position(|t| t.ready()) else {
                return;
            };
            let job = pending.remove(pos);
            // 还有就绪任务时再投递一个泵, 让空闲线程接手
            if pending[pos..].iter().any(|t| t.ready()) {
                self.wake();
            }
            job
        };
        job.run();
        self.wake();
    }
}
