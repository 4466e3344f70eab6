//! TaskRunner - 1 つの task の実行状態機械
//!
//! # フロー
//! 1. Idle → Running（キューに入ったままキャンセルされていれば Idle → Cancelled）
//! 2. Checkpoint A: キャンセル済みなら work を実行しない
//! 3. work 実行（`Err` も panic も捕捉して WorkError にする）
//! 4. Checkpoint B: 実行中に届いたキャンセルを再確認
//! 5. 終端ステータスを決定して記録
//! 6. コールバックを dispatcher に post（owner の生存確認つき）
//! 7. done を post（インデックスから削除）。これだけは必ず 1 回
//! 8. work / callbacks / owner への参照を解放
//!
//! lane に拾われずに drop された runner（lane 停止、runtime 終了）も
//! Cancelled として 6〜8 を行う。

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::builder::{Callbacks, Work};
use crate::domain::{OwnerRef, TaskStatus, TaskTag, WorkError};
use crate::observability::TaskInfo;
use crate::ports::{CompletionDispatcher, Lane, LivenessOracle, Thunk};

/// インデックス削除用のフック（冪等）
pub(crate) type DoneHook = Arc<dyn Fn(&TaskTag) + Send + Sync + 'static>;

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskControl>>> = const { RefCell::new(None) };
}

/// Reports whether the task running on the current lane thread has been
/// cancelled. Long-running work should poll this and return early.
///
/// Always `false` outside of a task.
pub fn is_interrupted() -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|control| control.is_cancelled())
    })
}

struct InterruptScope;

impl InterruptScope {
    fn enter(control: &Arc<TaskControl>) -> Self {
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(control)));
        InterruptScope
    }
}

impl Drop for InterruptScope {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
    }
}

/// done をまだ post していない runner の数
///
/// shutdown はこれが 0 になるまで（最大 grace 期間）dispatcher を閉じない。
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard(Arc::clone(self))
    }

    pub(crate) fn count(&self) -> usize {
        *self.count.lock()
    }

    /// 0 になれば true、timeout に達すれば false
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

pub(crate) struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

#[derive(Debug, Default)]
struct Timing {
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

/// Shared control block of one task.
///
/// The index keeps this (not the runner), so cancellation and status queries
/// never touch the work or the callbacks.
///
/// It also holds the owner handle, so the owner's allocation (and with it the
/// group key) cannot be reused while the entry is still indexed.
#[derive(Debug)]
pub(crate) struct TaskControl {
    tag: TaskTag,
    lane: Lane,
    owner: OwnerRef,
    status: AtomicU8,
    cancelled: AtomicBool,
    timing: Mutex<Timing>,
}

impl TaskControl {
    pub(crate) fn new(tag: TaskTag, lane: Lane, owner: OwnerRef) -> Self {
        Self {
            tag,
            lane,
            owner,
            status: AtomicU8::new(TaskStatus::Idle.as_u8()),
            cancelled: AtomicBool::new(false),
            timing: Mutex::new(Timing::default()),
        }
    }

    pub(crate) fn tag(&self) -> &TaskTag {
        &self.tag
    }

    pub(crate) fn name(&self) -> &str {
        self.tag.name()
    }

    pub(crate) fn owner(&self) -> &OwnerRef {
        &self.owner
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Requests cancellation. A task that has not been picked up yet goes
    /// straight to `Cancelled`; a running task observes the flag at its next
    /// checkpoint. Returns `false` if cancellation was already requested.
    pub(crate) fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if self
            .status
            .compare_exchange(
                TaskStatus::Idle.as_u8(),
                TaskStatus::Cancelled.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.timing.lock().ended_at = Some(Instant::now());
        }
        first
    }

    /// Idle -> Running. Fails when the task was cancelled while queued.
    fn begin(&self) -> bool {
        let started = self
            .status
            .compare_exchange(
                TaskStatus::Idle.as_u8(),
                TaskStatus::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if started {
            self.timing.lock().started_at = Some(Instant::now());
        }
        started
    }

    /// Moves to a terminal status unless one was already reached.
    fn finish(&self, status: TaskStatus) {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if TaskStatus::from_u8(current).is_terminal() {
                return;
            }
            match self.status.compare_exchange_weak(
                current,
                status.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.timing.lock().ended_at = Some(Instant::now());
    }

    /// end - start; running time so far while running; zero if never started.
    pub(crate) fn duration(&self) -> Duration {
        let timing = self.timing.lock();
        match (timing.started_at, timing.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.tag.name().to_string(),
            group: self.tag.group().to_string(),
            sequence: self.tag.sequence(),
            created_at: self.tag.created_at(),
            lane: self.lane,
            status: self.status(),
            duration_ms: self.duration().as_millis() as u64,
        }
    }
}

/// owner の生存確認
#[derive(Clone)]
pub(crate) struct LivenessGate {
    owner: OwnerRef,
    oracle: Arc<dyn LivenessOracle>,
    check: bool,
}

impl LivenessGate {
    pub(crate) fn new(owner: OwnerRef, oracle: Arc<dyn LivenessOracle>, check: bool) -> Self {
        Self {
            owner,
            oracle,
            check,
        }
    }

    /// 解放済みの owner は check フラグに関係なく dead
    fn allows(&self) -> bool {
        match self.owner.upgrade() {
            None => false,
            Some(owner) => !self.check || self.oracle.is_alive(&*owner),
        }
    }
}

enum Verdict<T> {
    Success(T),
    Failure(WorkError),
    Cancelled,
}

impl<T> Verdict<T> {
    fn status(&self) -> TaskStatus {
        match self {
            Verdict::Success(_) => TaskStatus::Success,
            Verdict::Failure(_) => TaskStatus::Failure,
            Verdict::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// TaskRunner は work・callbacks・owner をまとめて lane 上で実行する
pub(crate) struct TaskRunner<T: Send + 'static> {
    control: Arc<TaskControl>,
    work: Option<Work<T>>,
    callbacks: Callbacks<T>,
    gate: LivenessGate,
    dispatcher: Arc<dyn CompletionDispatcher>,
    done: Option<DoneHook>,
    in_flight: Option<InFlightGuard>,
}

impl<T: Send + 'static> TaskRunner<T> {
    pub(crate) fn new(
        control: Arc<TaskControl>,
        work: Work<T>,
        callbacks: Callbacks<T>,
        gate: LivenessGate,
        dispatcher: Arc<dyn CompletionDispatcher>,
        done: DoneHook,
        in_flight: InFlightGuard,
    ) -> Self {
        Self {
            control,
            work: Some(work),
            callbacks,
            gate,
            dispatcher,
            done: Some(done),
            in_flight: Some(in_flight),
        }
    }

    /// lane のワーカー上で 1 回だけ呼ばれる
    pub(crate) fn run(mut self) {
        let mut outcome = None;

        // Checkpoint A
        if self.control.begin() && !self.control.is_cancelled() {
            tracing::debug!(name = %self.control.name(), "task started");
            if let Some(f) = self.callbacks.on_started.take() {
                let name = self.control.name().to_string();
                self.post_gated(move || f(&name));
            }
            if let Some(work) = self.work.take() {
                outcome = Some(self.execute(work));
            }
        }

        // Checkpoint B
        let verdict = match outcome {
            _ if self.control.is_cancelled() => Verdict::Cancelled,
            None => Verdict::Cancelled,
            Some(Ok(value)) => Verdict::Success(value),
            Some(Err(err)) => Verdict::Failure(err),
        };
        self.complete(verdict);
    }

    fn execute(&self, work: Work<T>) -> Result<T, WorkError> {
        let _scope = InterruptScope::enter(&self.control);
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(WorkError::Failed(err)),
            Err(payload) => Err(WorkError::from_panic(payload)),
        }
    }

    fn complete(&mut self, verdict: Verdict<T>) {
        let status = verdict.status();
        self.control.finish(status);
        tracing::debug!(
            name = %self.control.name(),
            status = %status,
            duration_ms = self.control.duration().as_millis() as u64,
            "task completed"
        );

        let name = self.control.name().to_string();
        match verdict {
            Verdict::Cancelled => {
                if let Some(f) = self.callbacks.on_cancelled.take() {
                    let name = name.clone();
                    self.post_gated(move || f(&name));
                }
            }
            Verdict::Success(value) => {
                if let Some(f) = self.callbacks.on_success.take() {
                    self.post_gated(move || f(value));
                }
            }
            Verdict::Failure(err) => {
                tracing::debug!(name = %name, error = %err, "task failed");
                if let Some(f) = self.callbacks.on_failure.take() {
                    self.post_gated(move || f(err));
                }
            }
        }
        if status != TaskStatus::Cancelled
            && let Some(f) = self.callbacks.on_finished.take()
        {
            let name = name.clone();
            self.post_gated(move || f(&name));
        }

        self.post_done(status);

        // 完了後に work / callbacks / owner を保持し続けない
        self.work = None;
        self.callbacks = Callbacks::new();
    }

    fn post_done(&mut self, status: TaskStatus) {
        let Some(hook) = self.done.take() else {
            return;
        };
        let tag = self.control.tag().clone();
        let user_done = self.callbacks.on_done.take();
        let posted = {
            let hook = Arc::clone(&hook);
            let tag = tag.clone();
            self.post(Box::new(move || {
                // インデックス削除はユーザーコールバックより先
                hook(&tag);
                if let Some(f) = user_done {
                    f(tag.name(), status);
                }
            }))
        };
        if !posted {
            // dispatcher が閉じていてもインデックスは必ず片付ける
            hook(&tag);
        }
        // done を post し終えてから shutdown 待ちを解除する
        self.in_flight.take();
    }

    fn post_gated(&self, f: impl FnOnce() + Send + 'static) {
        let gate = self.gate.clone();
        self.post(Box::new(move || {
            if gate.allows() {
                f();
            }
        }));
    }

    fn post(&self, thunk: Thunk) -> bool {
        let posted = self.dispatcher.post(thunk);
        if !posted {
            tracing::debug!(name = %self.control.name(), "dispatcher closed; callback dropped");
        }
        posted
    }
}

impl<T: Send + 'static> Drop for TaskRunner<T> {
    fn drop(&mut self) {
        if self.done.is_some() {
            // lane に拾われずに捨てられた
            self.control.cancel();
            self.complete(Verdict::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BoxError;
    use crate::impls::{AssumeAlive, ThreadDispatcher};
    use std::sync::mpsc;

    struct Owner;

    struct Harness {
        owner: Arc<Owner>,
        dispatcher: Arc<ThreadDispatcher>,
        removed: Arc<Mutex<Vec<String>>>,
        events: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<InFlight>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                owner: Arc::new(Owner),
                dispatcher: Arc::new(ThreadDispatcher::spawn("runner-test").unwrap()),
                removed: Arc::new(Mutex::new(Vec::new())),
                events: Arc::new(Mutex::new(Vec::new())),
                in_flight: Arc::new(InFlight::default()),
            }
        }

        fn control(&self, lane: Lane) -> Arc<TaskControl> {
            let owner = OwnerRef::new(&self.owner);
            let tag = TaskTag::new(&owner);
            Arc::new(TaskControl::new(tag, lane, owner))
        }

        fn runner(
            &self,
            control: &Arc<TaskControl>,
            work: Work<i32>,
        ) -> (TaskRunner<i32>, mpsc::Receiver<TaskStatus>) {
            let (tx, rx) = mpsc::channel();
            let events = Arc::clone(&self.events);
            let events2 = Arc::clone(&self.events);
            let callbacks = Callbacks::new()
                .on_started(ev("started", &self.events))
                .on_success(move |v: i32| events.lock().push(format!("success:{v}")))
                .on_failure(move |e| events2.lock().push(format!("failure:{e}")))
                .on_cancelled(ev("cancelled", &self.events))
                .on_finished(ev("finished", &self.events))
                .on_done(move |_, status| tx.send(status).unwrap());
            let removed = Arc::clone(&self.removed);
            let done: DoneHook =
                Arc::new(move |tag: &TaskTag| removed.lock().push(tag.name().to_string()));
            let gate = LivenessGate::new(OwnerRef::new(&self.owner), Arc::new(AssumeAlive), true);
            let runner = TaskRunner::new(
                Arc::clone(control),
                work,
                callbacks,
                gate,
                self.dispatcher.clone(),
                done,
                self.in_flight.enter(),
            );
            (runner, rx)
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    fn ev(label: &'static str, events: &Arc<Mutex<Vec<String>>>) -> impl FnOnce(&str) + Send + 'static {
        let events = Arc::clone(events);
        move |_: &str| events.lock().push(label.to_string())
    }

    fn recv(rx: &mpsc::Receiver<TaskStatus>) -> TaskStatus {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn success_path() {
        let h = Harness::new();
        let control = h.control(Lane::Serial);
        let (runner, rx) = h.runner(&control, Box::new(|| Ok(7)));

        runner.run();

        assert_eq!(recv(&rx), TaskStatus::Success);
        assert_eq!(control.status(), TaskStatus::Success);
        assert_eq!(h.events(), vec!["started", "success:7", "finished"]);
        assert_eq!(*h.removed.lock(), vec![control.name().to_string()]);
    }

    #[test]
    fn error_and_panic_become_failure() {
        let h = Harness::new();
        let c1 = h.control(Lane::Concurrent);
        let (runner, rx) = h.runner(&c1, Box::new(|| Err::<i32, BoxError>("bad".into())));
        runner.run();
        assert_eq!(recv(&rx), TaskStatus::Failure);

        let c2 = h.control(Lane::Concurrent);
        let (runner, rx) = h.runner(&c2, Box::new(|| -> Result<i32, BoxError> { panic!("kaboom") }));
        runner.run();
        assert_eq!(recv(&rx), TaskStatus::Failure);

        assert_eq!(
            h.events(),
            vec![
                "started",
                "failure:bad",
                "finished",
                "started",
                "failure:work panicked: kaboom",
                "finished",
            ]
        );
    }

    #[test]
    fn cancelled_while_queued_skips_work() {
        let h = Harness::new();
        let control = h.control(Lane::Serial);
        let (ran_tx, ran_rx) = mpsc::channel::<()>();
        let (runner, rx) = h.runner(
            &control,
            Box::new(move || {
                ran_tx.send(()).unwrap();
                Ok(1)
            }),
        );

        assert!(control.cancel());
        assert_eq!(control.status(), TaskStatus::Cancelled);
        runner.run();

        assert_eq!(recv(&rx), TaskStatus::Cancelled);
        assert!(ran_rx.try_recv().is_err());
        assert_eq!(h.events(), vec!["cancelled"]);
        assert_eq!(control.duration(), Duration::ZERO);
    }

    #[test]
    fn cancel_during_work_is_seen_at_checkpoint_b() {
        let h = Harness::new();
        let control = h.control(Lane::Concurrent);
        let inner = Arc::clone(&control);
        let (runner, rx) = h.runner(
            &control,
            Box::new(move || {
                inner.cancel();
                assert!(is_interrupted());
                Ok(1)
            }),
        );

        runner.run();

        assert_eq!(recv(&rx), TaskStatus::Cancelled);
        assert_eq!(h.events(), vec!["started", "cancelled"]);
        assert!(!is_interrupted());
    }

    #[test]
    fn dropped_runner_still_reports_done() {
        let h = Harness::new();
        let control = h.control(Lane::Concurrent);
        let (runner, rx) = h.runner(&control, Box::new(|| Ok(1)));

        drop(runner);

        assert_eq!(recv(&rx), TaskStatus::Cancelled);
        assert_eq!(control.status(), TaskStatus::Cancelled);
        assert_eq!(h.removed.lock().len(), 1);
    }

    #[test]
    fn done_hook_runs_inline_when_dispatcher_is_closed() {
        let h = Harness::new();
        h.dispatcher.close();
        let control = h.control(Lane::Concurrent);
        let (runner, _rx) = h.runner(&control, Box::new(|| Ok(1)));

        runner.run();

        assert_eq!(*h.removed.lock(), vec![control.name().to_string()]);
        assert!(h.events().is_empty());
    }

    #[test]
    fn terminal_status_is_sticky() {
        let h = Harness::new();
        let control = h.control(Lane::Concurrent);
        assert!(control.begin());
        control.finish(TaskStatus::Success);
        control.finish(TaskStatus::Failure);
        control.cancel();
        assert_eq!(control.status(), TaskStatus::Success);
        assert!(!control.begin());
    }

    #[test]
    fn dead_owner_suppresses_everything_but_done() {
        let h = Harness::new();
        let control = h.control(Lane::Serial);
        let (tx, rx) = mpsc::channel();
        let events = Arc::clone(&h.events);
        let callbacks = Callbacks::new()
            .on_success(move |v: i32| events.lock().push(format!("success:{v}")))
            .on_done(move |_, status| tx.send(status).unwrap());
        let gate = LivenessGate::new(
            OwnerRef::new(&h.owner),
            Arc::new(|_: &crate::domain::AnyOwner| false),
            true,
        );
        let done: DoneHook = Arc::new(|_: &TaskTag| {});
        let runner = TaskRunner::new(
            Arc::clone(&control),
            Box::new(|| Ok(3)),
            callbacks,
            gate,
            h.dispatcher.clone(),
            done,
            h.in_flight.enter(),
        );

        runner.run();

        assert_eq!(recv(&rx), TaskStatus::Success);
        assert!(h.events().is_empty());
    }

    #[test]
    fn in_flight_is_released_once_done_is_posted() {
        let h = Harness::new();
        let control = h.control(Lane::Concurrent);
        let (runner, rx) = h.runner(&control, Box::new(|| Ok(1)));
        let (queued, _rx2) = h.runner(&h.control(Lane::Serial), Box::new(|| Ok(2)));
        assert_eq!(h.in_flight.count(), 2);
        assert!(!h.in_flight.wait_idle(Duration::from_millis(10)));

        runner.run();
        assert_eq!(h.in_flight.count(), 1);
        drop(queued);

        assert!(h.in_flight.wait_idle(Duration::from_secs(1)));
        assert_eq!(recv(&rx), TaskStatus::Success);
    }

    #[test]
    fn control_keeps_owner_address_reserved() {
        let owner = Arc::new(Owner);
        let handle = OwnerRef::new(&owner);
        let control = TaskControl::new(TaskTag::new(&handle), Lane::Serial, handle);
        drop(owner);

        assert!(control.owner().is_released());
        let fresh: Vec<_> = (0..64).map(|_| Arc::new(Owner)).collect();
        assert!(
            fresh
                .iter()
                .all(|o| crate::domain::group_of(o) != control.tag().group())
        );
    }
}
