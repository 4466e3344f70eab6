//! Ports - 抽象化レイヤー
//!
//! キューのコアが外部に依存する部分を trait として定義します。
//! 実装は `impls` にあり、すべて差し替え可能です。
//!
//! - **Clock**: TaskTag の作成時刻
//! - **LivenessOracle**: owner の生存判定
//! - **CompletionDispatcher**: コールバック配送コンテキスト
//! - **Executor**: lane（ワーカープール）

pub mod clock;
pub mod dispatcher;
pub mod executor;
pub mod liveness;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatcher::{CompletionDispatcher, Thunk};
pub use self::executor::{Executor, Lane};
pub use self::liveness::LivenessOracle;
