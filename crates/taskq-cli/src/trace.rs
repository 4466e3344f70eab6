//! コールバックの記録

use std::sync::Arc;

use parking_lot::Mutex;
use taskq_core::{Callbacks, TaskStatus};
use tokio::sync::mpsc;

pub type DoneRx = mpsc::UnboundedReceiver<(String, TaskStatus)>;

/// dispatcher 上で呼ばれたコールバックを順番に記録する
#[derive(Clone)]
pub struct Trace {
    lines: Arc<Mutex<Vec<String>>>,
    done: mpsc::UnboundedSender<(String, TaskStatus)>,
}

impl Trace {
    pub fn new() -> (Self, DoneRx) {
        let (done, rx) = mpsc::unbounded_channel();
        let trace = Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            done,
        };
        (trace, rx)
    }

    fn record(&self, line: String) {
        println!("  {line}");
        self.lines.lock().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn callbacks<T: std::fmt::Debug + Send + 'static>(&self, label: &'static str) -> Callbacks<T> {
        let [started, success, failure, cancelled, finished, done] =
            std::array::from_fn(|_| self.clone());
        Callbacks::new()
            .on_started(move |_| started.record(format!("onStarted({label})")))
            .on_success(move |v| success.record(format!("onSuccess({label}, {v:?})")))
            .on_failure(move |e| failure.record(format!("onFailure({label}, {e})")))
            .on_cancelled(move |_| cancelled.record(format!("onCancelled({label})")))
            .on_finished(move |_| finished.record(format!("onFinished({label})")))
            .on_done(move |_, status| {
                done.record(format!("done({label}) -> {status}"));
                let _ = done.done.send((label.to_string(), status));
            })
    }
}

/// n 件の done を待つ
pub async fn wait_done(rx: &mut DoneRx, n: usize) -> Vec<(String, TaskStatus)> {
    let mut seen = Vec::with_capacity(n);
    while seen.len() < n {
        match rx.recv().await {
            Some(done) => seen.push(done),
            None => break,
        }
    }
    seen
}
