//! TaskBuilder - submit する task の組み立て
//!
//! # 使用例
//! ```ignore
//! let name = TaskBuilder::new()
//!     .work(|| Ok::<_, std::io::Error>(load_profile()?))
//!     .owner(&screen)
//!     .serial(true)
//!     .on_success(|profile| render(profile))
//!     .on_failure(|err| show_error(err))
//!     .start(&queue)?;
//! ```
//!
//! work と owner は必須。欠けていれば submit 時に `TaskError::InvalidArgument`。

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{BoxError, OwnerRef, TaskError, TaskStatus, WorkError};
use crate::queue::TaskQueue;

pub(crate) type Work<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send + 'static>;
pub(crate) type NameCallback = Box<dyn FnOnce(&str) + Send + 'static>;
pub(crate) type DoneCallback = Box<dyn FnOnce(&str, TaskStatus) + Send + 'static>;

/// Callbacks はユーザー向けのコールバック群
///
/// すべて completion dispatcher 上で、1 task につき高々 1 回呼ばれる。
/// 順序: `on_started → {on_success | on_failure | on_cancelled} → on_finished → on_done`
///
/// - `on_finished` はキャンセル時には呼ばれない
/// - owner が dead なら `on_done` 以外は抑制される
/// - `on_done` は結果に関係なく必ず 1 回（インデックスから削除された直後）
pub struct Callbacks<T> {
    pub(crate) on_started: Option<NameCallback>,
    pub(crate) on_success: Option<Box<dyn FnOnce(T) + Send + 'static>>,
    pub(crate) on_failure: Option<Box<dyn FnOnce(WorkError) + Send + 'static>>,
    pub(crate) on_cancelled: Option<NameCallback>,
    pub(crate) on_finished: Option<NameCallback>,
    pub(crate) on_done: Option<DoneCallback>,
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self {
            on_started: None,
            on_success: None,
            on_failure: None,
            on_cancelled: None,
            on_finished: None,
            on_done: None,
        }
    }

    pub fn on_started(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_started = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(WorkError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn on_cancelled(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_cancelled = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    pub fn on_done(mut self, f: impl FnOnce(&str, TaskStatus) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_started", &self.on_started.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_cancelled", &self.on_cancelled.is_some())
            .field("on_finished", &self.on_finished.is_some())
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

/// 検証済みの submit 内容
pub(crate) struct TaskParts<T> {
    pub work: Work<T>,
    pub owner: OwnerRef,
    pub callbacks: Callbacks<T>,
    pub serial: bool,
    pub check_liveness: Option<bool>,
    pub delay: Duration,
}

/// TaskBuilder は 1 つの task を組み立てる
pub struct TaskBuilder<T> {
    work: Option<Work<T>>,
    owner: Option<OwnerRef>,
    callbacks: Callbacks<T>,
    serial: bool,
    check_liveness: Option<bool>,
    delay: Duration,
}

impl<T: Send + 'static> TaskBuilder<T> {
    pub fn new() -> Self {
        Self {
            work: None,
            owner: None,
            callbacks: Callbacks::new(),
            serial: false,
            check_liveness: None,
            delay: Duration::ZERO,
        }
    }

    /// 実行する work を設定（ブロッキングでよい）
    pub fn work<F, E>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.work = Some(Box::new(move || f().map_err(Into::into)));
        self
    }

    /// owner を設定（弱参照だけを保持する）
    pub fn owner<O: Any + Send + Sync>(mut self, owner: &Arc<O>) -> Self {
        self.owner = Some(OwnerRef::new(owner));
        self
    }

    /// true なら serial lane（FIFO、ワーカー 1 本）で実行
    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    /// false にするとこの task だけ LivenessOracle を参照しない
    pub fn check_liveness(mut self, check: bool) -> Self {
        self.check_liveness = Some(check);
        self
    }

    /// 登録は即時、lane への投入だけを遅らせる
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks<T>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn on_started(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_started(f);
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_success(f);
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(WorkError) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_failure(f);
        self
    }

    pub fn on_cancelled(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_cancelled(f);
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_finished(f);
        self
    }

    pub fn on_done(mut self, f: impl FnOnce(&str, TaskStatus) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_done(f);
        self
    }

    /// `queue.submit(self)` のショートカット
    pub fn start(self, queue: &TaskQueue) -> Result<String, TaskError> {
        queue.submit(self)
    }

    pub(crate) fn into_parts(self) -> Result<TaskParts<T>, TaskError> {
        let work = self
            .work
            .ok_or_else(|| TaskError::InvalidArgument("work must be set".to_string()))?;
        let owner = self
            .owner
            .ok_or_else(|| TaskError::InvalidArgument("owner must be set".to_string()))?;
        Ok(TaskParts {
            work,
            owner,
            callbacks: self.callbacks,
            serial: self.serial,
            check_liveness: self.check_liveness,
            delay: self.delay,
        })
    }
}

impl TaskBuilder<()> {
    /// 戻り値のない work 用
    pub fn runnable(self, f: impl FnOnce() + Send + 'static) -> Self {
        self.work(move || {
            f();
            Ok::<(), BoxError>(())
        })
    }
}

impl<T: Send + 'static> Default for TaskBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Owner;

    #[test]
    fn missing_work_is_rejected() {
        let owner = Arc::new(Owner);
        let result = TaskBuilder::<i32>::new().owner(&owner).into_parts();
        assert!(matches!(
            result,
            Err(TaskError::InvalidArgument(msg)) if msg.contains("work")
        ));
    }

    #[test]
    fn missing_owner_is_rejected() {
        let result = TaskBuilder::new()
            .work(|| Ok::<_, BoxError>(1))
            .into_parts();
        assert!(matches!(
            result,
            Err(TaskError::InvalidArgument(msg)) if msg.contains("owner")
        ));
    }

    #[test]
    fn parts_carry_flags() {
        let owner = Arc::new(Owner);
        let parts = TaskBuilder::new()
            .work(|| Ok::<_, BoxError>("v"))
            .owner(&owner)
            .serial(true)
            .check_liveness(false)
            .delay(Duration::from_millis(5))
            .on_success(|_| {})
            .into_parts()
            .unwrap();

        assert!(parts.serial);
        assert_eq!(parts.check_liveness, Some(false));
        assert_eq!(parts.delay, Duration::from_millis(5));
        assert!(parts.callbacks.on_success.is_some());
        assert!(parts.callbacks.on_failure.is_none());
        assert_eq!(parts.owner.group(), crate::domain::group_of(&owner));
    }

    #[test]
    fn work_errors_are_boxed() {
        let owner = Arc::new(Owner);
        let parts = TaskBuilder::<u8>::new()
            .work(|| Err::<u8, _>(std::io::Error::other("nope")))
            .owner(&owner)
            .into_parts()
            .unwrap();
        let err = (parts.work)().unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn runnable_wraps_unit_work() {
        let owner = Arc::new(Owner);
        let parts = TaskBuilder::<()>::new()
            .runnable(|| {})
            .owner(&owner)
            .into_parts()
            .unwrap();
        assert!((parts.work)().is_ok());
    }
}
