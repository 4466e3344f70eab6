//! Errors - エラー型と分類
//!
//! - `TaskError`: submit / cancel / 構築時に呼び出し元へ同期的に返るエラー
//! - `WorkError`: work の失敗。`on_failure` コールバックにだけ渡され、呼び出し元や lane には伝播しない
//!
//! キャンセルはエラーではなく終端ステータス（`TaskStatus::Cancelled`）として扱う。

use thiserror::Error;

/// Boxed error returned by user work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// TaskError は API 呼び出しで同期的に返るエラー
#[derive(Debug, Error)]
pub enum TaskError {
    /// 必須の引数（work / owner など）が欠けている
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// キューまたは lane が既に停止している
    #[error("task queue is shut down")]
    Shutdown,

    #[error("invalid queue config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// WorkError は work 実行中に捕捉された失敗
#[derive(Debug, Error)]
pub enum WorkError {
    /// work が `Err` を返した
    #[error("{0}")]
    Failed(BoxError),

    /// work が panic した（lane のスレッドは生き残る）
    #[error("work panicked: {0}")]
    Panicked(String),
}

impl WorkError {
    /// Builds a `Panicked` error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        WorkError::Panicked(msg)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, WorkError::Panicked(_))
    }
}
