//! SerialLane - ワーカー 1 本の厳密 FIFO lane
//!
//! job は mpsc に積まれ、1 つの tokio task が順番に取り出して
//! `spawn_blocking` の完了を await してから次の job に進む。
//! そのため job i が終わる前に job i+1 が始まることはない。
//!
//! serial lane は差し替え不可（`TaskQueue::set_executor` は拒否する）。

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::domain::TaskError;
use crate::ports::{Executor, Thunk};

pub struct SerialLane {
    tx: Mutex<Option<mpsc::UnboundedSender<Thunk>>>,
}

impl SerialLane {
    /// runtime 上にワーカー task を 1 本起動
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Thunk>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = tokio::task::spawn_blocking(job).await {
                    tracing::warn!(error = %err, "serial lane job aborted");
                }
            }
            tracing::debug!("serial lane stopped");
        });
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl Executor for SerialLane {
    fn execute(&self, job: Thunk) -> Result<(), TaskError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TaskError::Shutdown)?;
        tx.send(job).map_err(|_| TaskError::Shutdown)
    }

    fn shutdown(&self) {
        self.tx.lock().take();
    }

    fn describe(&self) -> String {
        "serial(1)".to_string()
    }
}
