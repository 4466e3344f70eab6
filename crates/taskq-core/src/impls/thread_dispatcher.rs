//! ThreadDispatcher - 専用スレッド 1 本でコールバックを配送する dispatcher
//!
//! # 学習ポイント
//! - tokio の unbounded mpsc を runtime 外のスレッドから `blocking_recv` で読む
//! - `catch_unwind` でコールバックの panic を閉じ込め、後続の thunk（done を含む）を止めない

use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::{TaskError, WorkError};
use crate::ports::{CompletionDispatcher, Thunk};

/// ThreadDispatcher は post された thunk を 1 本のスレッドで FIFO 実行する
///
/// # 使用例
/// ```ignore
/// let dispatcher = ThreadDispatcher::spawn("callbacks")?;
/// dispatcher.post(Box::new(|| println!("on dispatcher thread")));
/// ```
pub struct ThreadDispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<Thunk>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadDispatcher {
    /// 名前付きスレッドを起動して dispatcher を作成
    pub fn spawn(name: impl Into<String>) -> Result<Self, TaskError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Thunk>();
        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while let Some(thunk) = rx.blocking_recv() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(thunk)) {
                        let err = WorkError::from_panic(payload);
                        tracing::warn!(error = %err, "callback panicked on completion dispatcher");
                    }
                }
                tracing::debug!("completion dispatcher drained");
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// close して、既に post 済みの thunk がすべて終わるまで待つ
    ///
    /// dispatcher スレッド自身から呼ばれた場合は待たない。
    pub fn join(&self) {
        self.close();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("completion dispatcher thread terminated abnormally");
            }
        }
    }
}

impl CompletionDispatcher for ThreadDispatcher {
    fn post(&self, thunk: Thunk) -> bool {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(thunk).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        // sender を drop するとスレッドは残りを処理してから終了する
        self.tx.lock().take();
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
