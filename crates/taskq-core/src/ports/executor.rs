//! Executor port - lane（ワーカープール）の抽象化
//!
//! concurrent lane は差し替え可能、serial lane は常にワーカー 1 本。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::dispatcher::Thunk;
use crate::domain::TaskError;

/// Lane は task を実行するワーカープールの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// 複数ワーカー、順序保証なし
    Concurrent,
    /// ワーカー 1 本、厳密な FIFO
    Serial,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Concurrent => f.write_str("concurrent"),
            Lane::Serial => f.write_str("serial"),
        }
    }
}

/// Executor は job を受け取ってワーカー上で実行する
///
/// # 契約
/// - `execute` はブロックしない（enqueue して即 return）
/// - job はブロッキングなコードを含んでよい
/// - 停止後の `execute` は `TaskError::Shutdown`
/// - 受け付けた job を実行せずに捨てる場合は drop するだけでよい
///   （runner 側の Drop が Cancelled として後始末する）
pub trait Executor: Send + Sync {
    fn execute(&self, job: Thunk) -> Result<(), TaskError>;

    /// Stops accepting new jobs.
    fn shutdown(&self) {}

    /// Human readable description used in snapshots.
    fn describe(&self) -> String;
}
