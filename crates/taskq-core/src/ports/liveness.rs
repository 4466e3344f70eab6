//! LivenessOracle port - owner がまだコールバックを受け取れる状態かを判定
//!
//! キュー自体はホスト側フレームワーク（画面・セッションなど）を知らない。
//! 「破棄済みか」の判定はこの trait で注入する。
//! owner の最後の strong 参照が drop された場合は、oracle に関係なく常に dead 扱い。

use crate::domain::AnyOwner;

/// LivenessOracle は owner の生存を判定
///
/// 結果コールバック（started / success / failure / cancelled / finished）を
/// 配送する直前に、completion dispatcher 上で呼ばれる。
pub trait LivenessOracle: Send + Sync {
    fn is_alive(&self, owner: &AnyOwner) -> bool;
}

impl<F> LivenessOracle for F
where
    F: Fn(&AnyOwner) -> bool + Send + Sync,
{
    fn is_alive(&self, owner: &AnyOwner) -> bool {
        self(owner)
    }
}
