//! Impls - ports のデフォルト実装
//!
//! # 含まれる実装
//! - **ThreadDispatcher**: 専用スレッド 1 本の CompletionDispatcher
//! - **BlockingPool**: concurrent lane（cached / fixed）
//! - **SerialLane**: serial lane（ワーカー 1 本、FIFO）
//! - **AssumeAlive / TypedLiveness**: LivenessOracle

pub mod liveness;
pub mod pool;
pub mod serial;
pub mod thread_dispatcher;

// 主要な型を再エクスポート
pub use self::liveness::{AssumeAlive, TypedLiveness};
pub use self::pool::BlockingPool;
pub use self::serial::SerialLane;
pub use self::thread_dispatcher::ThreadDispatcher;
