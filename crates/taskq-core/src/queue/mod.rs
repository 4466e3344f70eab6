//! TaskQueue - 2 本の lane と name / group 索引を持つ非同期タスクキュー
//!
//! # 構成
//! - **concurrent lane**: 順序保証なし。`max_threads` で cached / fixed を選ぶ。差し替え可能
//! - **serial lane**: ワーカー 1 本の厳密 FIFO。差し替え不可
//! - **索引**: `names`（name → task）と `groups`（group → names）。1 つの Mutex で同時に更新
//! - **completion dispatcher**: すべてのコールバックと done を 1 本のスレッドで順番に配送
//!
//! # 使用例
//! ```ignore
//! let queue = TaskQueue::builder().max_threads(4).build()?;
//! let name = TaskBuilder::new()
//!     .work(|| Ok::<_, BoxError>(fetch()?))
//!     .owner(&screen)
//!     .on_success(|data| render(data))
//!     .start(&queue)?;
//! queue.cancel_group(&screen);
//! queue.shutdown();
//! ```

mod builder;
mod config;
mod index;
mod runner;


use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::watch;

use self::index::TaskIndex;
use self::runner::{DoneHook, InFlight, LivenessGate, TaskControl, TaskRunner};
use crate::domain::{TaskError, TaskStatus, TaskTag, group_of};
use crate::impls::{AssumeAlive, BlockingPool, SerialLane, ThreadDispatcher};
use crate::observability::{QueueSnapshot, StatusCounts, TaskInfo};
use crate::ports::{Clock, CompletionDispatcher, Executor, Lane, LivenessOracle, SystemClock, Thunk};

pub use self::builder::{Callbacks, TaskBuilder};
pub use self::config::QueueConfig;
pub use self::runner::is_interrupted;

/// TaskQueue は task の投入・キャンセル・照会を行う
///
/// 自前の runtime を持つ場合、drop（または `shutdown`）でその runtime も止める。
pub struct TaskQueue {
    inner: Arc<QueueInner>,
    runtime: Option<Runtime>,
    drained: bool,
}

struct QueueInner {
    index: Mutex<TaskIndex>,
    concurrent: RwLock<Arc<dyn Executor>>,
    serial: Arc<dyn Executor>,
    dispatcher: Arc<dyn CompletionDispatcher>,
    owned_dispatcher: Option<Arc<ThreadDispatcher>>,
    liveness: Arc<dyn LivenessOracle>,
    clock: Arc<dyn Clock>,
    handle: Handle,
    config: QueueConfig,
    closed: AtomicBool,
    /// close で true になる（delay 中の task を起こす）
    closed_signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
}

impl QueueInner {
    fn lane(&self, lane: Lane) -> Arc<dyn Executor> {
        match lane {
            Lane::Concurrent => self.concurrent.read().clone(),
            Lane::Serial => Arc::clone(&self.serial),
        }
    }
}

impl TaskQueue {
    /// デフォルト設定（自前の runtime と dispatcher）で作成
    pub fn new() -> Result<Self, TaskError> {
        Self::builder().build()
    }

    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// プロセス全体で共有するデフォルトのキュー（初回呼び出し時に作成）
    pub fn global() -> Result<&'static TaskQueue, TaskError> {
        static GLOBAL: OnceCell<TaskQueue> = OnceCell::new();
        GLOBAL.get_or_try_init(TaskQueue::new)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// task を登録して lane に渡し、name を返す（ブロックしない）
    ///
    /// # Errors
    /// - work / owner が未設定: `TaskError::InvalidArgument`
    /// - キューまたは lane が停止済み: `TaskError::Shutdown`
    pub fn submit<T: Send + 'static>(&self, task: TaskBuilder<T>) -> Result<String, TaskError> {
        if self.is_closed() {
            return Err(TaskError::Shutdown);
        }
        let parts = task.into_parts()?;

        let lane = if parts.serial {
            Lane::Serial
        } else {
            Lane::Concurrent
        };
        let tag = TaskTag::with_clock(&parts.owner, &*self.inner.clock);
        let name = tag.name().to_string();
        let control = Arc::new(TaskControl::new(tag, lane, parts.owner));

        {
            // close と競合した submit は索引に入れずに拒否する
            let mut index = self.inner.index.lock();
            if self.is_closed() {
                return Err(TaskError::Shutdown);
            }
            index.insert(Arc::clone(&control));
        }
        tracing::debug!(
            name = %name,
            group = %control.tag().group(),
            lane = %lane,
            delay_ms = parts.delay.as_millis() as u64,
            "task submitted"
        );

        let check = parts
            .check_liveness
            .unwrap_or(self.inner.config.check_liveness);
        let gate = LivenessGate::new(
            control.owner().clone(),
            Arc::clone(&self.inner.liveness),
            check,
        );
        let runner = TaskRunner::new(
            control,
            parts.work,
            parts.callbacks,
            gate,
            Arc::clone(&self.inner.dispatcher),
            self.done_hook(),
            self.inner.in_flight.enter(),
        );

        let job: Thunk = Box::new(move || runner.run());
        let result = if parts.delay.is_zero() {
            self.inner.lane(lane).execute(job)
        } else {
            self.schedule(lane, parts.delay, job);
            Ok(())
        };

        if let Err(err) = result {
            // 拒否された job は drop 済み（runner が Cancelled として done を出す）
            tracing::warn!(name = %name, lane = %lane, error = %err, "lane rejected task");
            self.inner.index.lock().remove(&name);
            return Err(err);
        }
        Ok(name)
    }

    fn schedule(&self, lane: Lane, delay: Duration, job: Thunk) {
        let inner = Arc::downgrade(&self.inner);
        let mut closed = self.inner.closed_signal.subscribe();
        self.inner.handle.spawn(async move {
            // close されたら delay を待たずに lane へ渡す（拒否されて Cancelled になる）
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = closed.wait_for(|closed| *closed) => {}
            }
            // キューが先に消えていれば job は drop されて Cancelled になる
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(err) = inner.lane(lane).execute(job) {
                tracing::debug!(lane = %lane, error = %err, "delayed task dropped");
            }
        });
    }

    fn done_hook(&self) -> DoneHook {
        let inner: Weak<QueueInner> = Arc::downgrade(&self.inner);
        Arc::new(move |tag: &TaskTag| {
            if let Some(inner) = inner.upgrade()
                && inner.index.lock().remove(tag.name()).is_some()
            {
                tracing::debug!(name = %tag.name(), "task removed");
            }
        })
    }

    /// name で 1 つキャンセル
    ///
    /// 索引から即座に外し、実行中なら割り込みを通知する。
    /// 未知の name、または既に終端ステータスの task（done 配送待ち）なら `false`。
    pub fn cancel(&self, name: &str) -> bool {
        let control = {
            let mut index = self.inner.index.lock();
            match index.get(name) {
                Some(control) if !control.status().is_terminal() => index.remove(name),
                _ => None,
            }
        };
        match control {
            Some(control) => {
                control.cancel();
                tracing::debug!(name = %name, status = %control.status(), "task cancelled");
                true
            }
            None => false,
        }
    }

    /// owner が投入したすべての task をキャンセルし、件数を返す
    pub fn cancel_group<O: Any + Send + Sync>(&self, owner: &Arc<O>) -> usize {
        self.cancel_group_key(&group_of(owner))
    }

    /// group 文字列（`TaskTag::group` / `group_of`）でキャンセル
    pub fn cancel_group_key(&self, group: &str) -> usize {
        let controls = self.inner.index.lock().pop_group(group);
        for control in &controls {
            control.cancel();
        }
        if !controls.is_empty() {
            tracing::debug!(group = %group, count = controls.len(), "group cancelled");
        }
        controls.len()
    }

    /// 登録中のすべての task をキャンセルし、件数を返す
    pub fn cancel_all(&self) -> usize {
        let controls = self.inner.index.lock().drain();
        for control in &controls {
            control.cancel();
        }
        if !controls.is_empty() {
            tracing::debug!(count = controls.len(), "all tasks cancelled");
        }
        controls.len()
    }

    /// status が Running の間だけ true（キュー待ちは false）
    pub fn is_running(&self, name: &str) -> bool {
        self.status(name) == Some(TaskStatus::Running)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        let control = self.inner.index.lock().get(name)?;
        Some(control.status())
    }

    pub fn info(&self, name: &str) -> Option<TaskInfo> {
        let control = self.inner.index.lock().get(name)?;
        Some(control.info())
    }

    /// 登録中（done がまだ配送されていない）の task 数
    pub fn len(&self) -> usize {
        self.inner.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.lock().is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let (controls, groups) = {
            let index = self.inner.index.lock();
            let groups: BTreeMap<String, Vec<String>> = index
                .groups()
                .map(|(group, names)| (group.to_string(), names.to_vec()))
                .collect();
            (index.all(), groups)
        };

        let mut tasks: Vec<TaskInfo> = controls.iter().map(|control| control.info()).collect();
        tasks.sort_by_key(|info| info.sequence);
        let mut counts = StatusCounts::default();
        for info in &tasks {
            counts.record(info.status);
        }

        QueueSnapshot {
            closed: self.is_closed(),
            concurrent_lane: self.inner.concurrent.read().describe(),
            serial_lane: self.inner.serial.describe(),
            counts,
            tasks,
            groups,
        }
    }

    /// concurrent lane のワーカープールを差し替える
    ///
    /// 既に渡した job は古い executor で最後まで実行される。
    /// serial lane は常にワーカー 1 本なので差し替えられない。
    pub fn set_executor(&self, lane: Lane, executor: Arc<dyn Executor>) -> Result<(), TaskError> {
        if self.is_closed() {
            return Err(TaskError::Shutdown);
        }
        match lane {
            Lane::Serial => Err(TaskError::InvalidArgument(
                "serial lane is not substitutable".to_string(),
            )),
            Lane::Concurrent => {
                tracing::info!(executor = %executor.describe(), "concurrent lane replaced");
                *self.inner.concurrent.write() = executor;
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 新規 submit を止め、登録中の task をすべてキャンセルし、lane を閉じる
    ///
    /// 実行中の work は次のチェックポイントで Cancelled になる。
    /// キャンセル済みのコールバックと done は引き続き配送される。
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.closed_signal.send_replace(true);
        let cancelled = self.cancel_all();
        self.inner.serial.shutdown();
        self.inner.concurrent.read().shutdown();
        tracing::info!(cancelled, "task queue closed");
    }

    /// close したうえで、実行中の task が done を post し終えるまで
    /// `shutdown_grace_ms` を上限に待ち、自前の runtime を止め、
    /// 自前の dispatcher に残ったコールバックを配送し終えるまで待つ
    ///
    /// grace を過ぎても終わらない work のコールバックは配送されない
    /// （索引からの削除だけは行われる）。
    pub fn shutdown(mut self) {
        self.drain();
        if let Some(dispatcher) = &self.inner.owned_dispatcher {
            dispatcher.join();
        }
        tracing::info!("task queue shut down");
    }

    fn drain(&mut self) {
        if self.drained {
            return;
        }
        self.drained = true;
        self.close();
        if !self.wait_in_flight() {
            tracing::warn!(
                in_flight = self.inner.in_flight.count(),
                grace_ms = self.inner.config.shutdown_grace_ms,
                "tasks still running after shutdown grace"
            );
        }
        self.stop_runtime();
    }

    fn wait_in_flight(&self) -> bool {
        let grace = self.inner.config.shutdown_grace();
        let in_flight = &self.inner.in_flight;
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| in_flight.wait_idle(grace))
            }
            _ => in_flight.wait_idle(grace),
        }
    }

    fn stop_runtime(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            // runtime の中からは待てない
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.inner.config.shutdown_grace());
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.drain();
        if let Some(dispatcher) = &self.inner.owned_dispatcher {
            dispatcher.close();
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

/// QueueBuilder は TaskQueue の組み立て
///
/// # 使用例
/// ```ignore
/// let queue = TaskQueue::builder()
///     .config(QueueConfig::from_json_file("queue.json")?)
///     .runtime(Handle::current())
///     .liveness(TypedLiveness::new(|screen: &Screen| !screen.is_destroyed()))
///     .build()?;
/// ```
pub struct QueueBuilder {
    config: QueueConfig,
    handle: Option<Handle>,
    dispatcher: Option<Arc<dyn CompletionDispatcher>>,
    liveness: Arc<dyn LivenessOracle>,
    clock: Arc<dyn Clock>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            handle: None,
            dispatcher: None,
            liveness: Arc::new(AssumeAlive),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// 0 = cached、N = fixed N
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.config.max_threads = max_threads;
        self
    }

    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.config.thread_name = thread_name.into();
        self
    }

    /// 既存の runtime 上で動かす（指定しなければ専用 runtime を作る）
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// コールバックの配送先（指定しなければ専用スレッドを起動）
    pub fn dispatcher(mut self, dispatcher: Arc<dyn CompletionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn liveness(mut self, oracle: impl LivenessOracle + 'static) -> Self {
        self.liveness = Arc::new(oracle);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<TaskQueue, TaskError> {
        let config = self.config;

        let (runtime, handle) = match self.handle {
            Some(handle) => (None, handle),
            None => {
                let runtime = build_runtime(&config)?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        let (dispatcher, owned_dispatcher) = match self.dispatcher {
            Some(dispatcher) => (dispatcher, None),
            None => {
                let owned = Arc::new(ThreadDispatcher::spawn(format!(
                    "{}-dispatch",
                    config.thread_name
                ))?);
                let dispatcher: Arc<dyn CompletionDispatcher> = owned.clone();
                (dispatcher, Some(owned))
            }
        };

        let concurrent: Arc<dyn Executor> =
            Arc::new(BlockingPool::new(handle.clone(), config.max_threads));
        let serial: Arc<dyn Executor> = Arc::new(SerialLane::spawn(&handle));

        tracing::info!(
            max_threads = config.max_threads,
            thread_name = %config.thread_name,
            owns_runtime = runtime.is_some(),
            "task queue started"
        );

        Ok(TaskQueue {
            inner: Arc::new(QueueInner {
                index: Mutex::new(TaskIndex::new()),
                concurrent: RwLock::new(concurrent),
                serial,
                dispatcher,
                owned_dispatcher,
                liveness: self.liveness,
                clock: self.clock,
                handle,
                config,
                closed: AtomicBool::new(false),
                closed_signal: watch::Sender::new(false),
                in_flight: Arc::new(InFlight::default()),
            }),
            runtime,
            drained: false,
        })
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_runtime(config: &QueueConfig) -> Result<Runtime, TaskError> {
    let prefix = format!("{}-{}", config.thread_name, config.max_threads);
    let counter = AtomicUsize::new(0);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(512)
        .thread_name_fn(move || {
            let id = counter.fetch_add(1, Ordering::Relaxed) + 1;
            format!("{prefix}:thread-{id}")
        })
        .enable_time()
        .build()?;
    Ok(runtime)
}
