//! taskq-core
//!
//! Owner-scoped task queue with a concurrent lane and a strictly ordered
//! serial lane.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskTag, OwnerRef, TaskStatus, errors）
//! - **ports**: 抽象化レイヤー（Clock, LivenessOracle, CompletionDispatcher, Executor）
//! - **impls**: ports の実装（ThreadDispatcher, BlockingPool, SerialLane, AssumeAlive など）
//! - **queue**: TaskQueue / TaskBuilder / QueueConfig と実行状態機械
//! - **observability**: TaskInfo / QueueSnapshot

pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use domain::{BoxError, OwnerRef, TaskError, TaskStatus, TaskTag, WorkError, group_of};
pub use observability::{QueueSnapshot, StatusCounts, TaskInfo};
pub use ports::Lane;
pub use queue::{Callbacks, QueueBuilder, QueueConfig, TaskBuilder, TaskQueue, is_interrupted};
