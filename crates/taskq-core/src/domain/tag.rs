//! TaskTag - タスクの識別子
//!
//! - **group**: owner の型名 + identity から導出（owner ごとのキャンセル単位）
//! - **name**: group + プロセス全体で単調増加する sequence + 作成時刻（再利用されない）
//!
//! 文字列を split して group を取り出すことはしない。
//! 各フィールドを構造体としてそのまま保持する。

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::owner::OwnerRef;
use crate::ports::{Clock, SystemClock};

const SEP: char = '|';

/// プロセス全体の sequence（リセットされない）
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1
}

/// TaskTag は submit ごとに 1 つ作られる不変の識別子
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaskTag {
    group: String,
    name: String,
    sequence: u64,
    created_at: DateTime<Utc>,
}

impl TaskTag {
    /// 現在時刻で TaskTag を作成
    pub fn new(owner: &OwnerRef) -> Self {
        Self::with_clock(owner, &SystemClock)
    }

    /// Clock を指定して TaskTag を作成（テストでは FixedClock を使う）
    pub fn with_clock<C: Clock + ?Sized>(owner: &OwnerRef, clock: &C) -> Self {
        let created_at = clock.now();
        let sequence = next_sequence();
        let group = owner.group();
        let name = format!(
            "{group}{SEP}{sequence}{SEP}{}",
            created_at.format("%H%M%S%3f")
        );
        Self {
            group,
            name,
            sequence,
            created_at,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// owner からキャンセル group を求める（tag を作らない純粋関数）
pub fn group_of<O: Any + Send + Sync>(owner: &Arc<O>) -> String {
    OwnerRef::new(owner).group()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use std::collections::HashSet;

    struct Caller;

    #[test]
    fn tags_from_same_owner_share_group() {
        let owner = Arc::new(Caller);
        let handle = OwnerRef::new(&owner);
        let t1 = TaskTag::new(&handle);
        let t2 = TaskTag::new(&handle);

        assert_eq!(t1.group(), t2.group());
        assert_eq!(t1.group(), group_of(&owner));
        assert_ne!(t1.name(), t2.name());
        assert!(t2.sequence() > t1.sequence());
    }

    #[test]
    fn names_are_unique_across_threads() {
        let owner = Arc::new(Caller);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let handle = OwnerRef::new(&owner);
                std::thread::spawn(move || {
                    (0..200)
                        .map(|_| TaskTag::new(&handle).name().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for name in h.join().unwrap() {
                assert!(seen.insert(name), "duplicate tag name");
            }
        }
        assert_eq!(seen.len(), 8 * 200);
    }

    #[test]
    fn name_embeds_group_sequence_and_time() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap();
        let clock = FixedClock::new(fixed);
        let owner = Arc::new(Caller);
        let tag = TaskTag::with_clock(&OwnerRef::new(&owner), &clock);

        assert_eq!(tag.created_at(), fixed);
        let expected = format!("{}|{}|123456000", tag.group(), tag.sequence());
        assert_eq!(tag.name(), expected);
        assert_eq!(tag.to_string(), expected);
    }
}
