//! CompletionDispatcher port - コールバックを配送する単一の実行コンテキスト
//!
//! すべてのユーザー向けコールバックはここに post される。
//! post された順（FIFO）に 1 つずつ実行されるので、コールバック側はロック不要。

/// Unit of deferred work posted to a dispatcher or a lane.
pub type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// CompletionDispatcher はコールバックを単一コンテキストで順番に実行
///
/// # 契約
/// - `post` はブロックしない
/// - 同じ dispatcher に post された thunk は post 順に実行される
/// - thunk 同士が並行に実行されることはない
pub trait CompletionDispatcher: Send + Sync {
    /// Schedules `thunk`. Returns `false` when the dispatcher is closed and the
    /// thunk was dropped without running.
    fn post(&self, thunk: Thunk) -> bool;

    /// Stops accepting new thunks. Already posted thunks still run.
    fn close(&self) {}
}
