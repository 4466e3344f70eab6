//! BlockingPool - concurrent lane のデフォルト実装
//!
//! work はブロッキングなクロージャなので tokio の blocking pool 上で実行する。
//!
//! - `max_threads == 0`: cached（必要に応じてスレッドを増やし、アイドルなスレッドは再利用）
//! - `max_threads == N`: Semaphore で同時実行数を N に制限（fixed pool 相当）

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::domain::TaskError;
use crate::ports::{Executor, Thunk};

/// BlockingPool は順序保証なしで job を並行実行する
pub struct BlockingPool {
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
    max_threads: usize,
    closed: AtomicBool,
}

impl BlockingPool {
    /// `max_threads == 0` なら cached、それ以外は fixed
    pub fn new(handle: Handle, max_threads: usize) -> Self {
        let permits = (max_threads > 0).then(|| Arc::new(Semaphore::new(max_threads)));
        Self {
            handle,
            permits,
            max_threads,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cached(handle: Handle) -> Self {
        Self::new(handle, 0)
    }

    pub fn fixed(handle: Handle, max_threads: usize) -> Self {
        Self::new(handle, max_threads.max(1))
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }
}

impl Executor for BlockingPool {
    fn execute(&self, job: Thunk) -> Result<(), TaskError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TaskError::Shutdown);
        }

        match &self.permits {
            None => {
                self.handle.spawn_blocking(job);
            }
            Some(permits) => {
                let permits = Arc::clone(permits);
                self.handle.spawn(async move {
                    // Semaphore が close されたら job は実行せずに drop
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    if let Err(err) = tokio::task::spawn_blocking(job).await {
                        tracing::warn!(error = %err, "concurrent lane job aborted");
                    }
                });
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }

    fn describe(&self) -> String {
        match self.max_threads {
            0 => "blocking-pool(cached)".to_string(),
            n => format!("blocking-pool(fixed={n})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn fixed_pool_bounds_parallelism() {
        let rt = runtime();
        let pool = BlockingPool::fixed(rt.handle().clone(), 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..8 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..8 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn cached_pool_runs_jobs_concurrently() {
        let rt = runtime();
        let pool = BlockingPool::cached(rt.handle().clone());
        let barrier = Arc::new(std::sync::Barrier::new(3));
        let (tx, rx) = mpsc::channel();

        // 3 本が同時に走らないと barrier を抜けられない
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                barrier.wait();
                tx.send(()).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn rejects_after_shutdown() {
        let rt = runtime();
        let pool = BlockingPool::fixed(rt.handle().clone(), 1);
        pool.shutdown();
        let result = pool.execute(Box::new(|| {}));
        assert!(matches!(result, Err(TaskError::Shutdown)));
    }

    #[test]
    fn describe_reports_mode() {
        let rt = runtime();
        assert_eq!(
            BlockingPool::cached(rt.handle().clone()).describe(),
            "blocking-pool(cached)"
        );
        assert_eq!(
            BlockingPool::fixed(rt.handle().clone(), 4).describe(),
            "blocking-pool(fixed=4)"
        );
    }
}
