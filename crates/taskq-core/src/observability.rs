//! Observability - キューの状態ビュー
//!
//! `TaskQueue::info` / `TaskQueue::snapshot` が返す読み取り専用の型。
//! どれも serde で JSON にできる。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::TaskStatus;
use crate::ports::Lane;

/// 1 task の状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub group: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub lane: Lane,
    pub status: TaskStatus,
    /// end - start（未開始なら 0、実行中なら経過時間）
    pub duration_ms: u64,
}

/// 登録中 task のステータス別件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub idle: usize,
    pub running: usize,
    /// 終端に達したが done がまだ配送されていない
    pub terminal: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Idle => self.idle += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled => {
                self.terminal += 1
            }
        }
    }

    pub fn total(&self) -> usize {
        self.idle + self.running + self.terminal
    }
}

/// QueueSnapshot はある時点のキュー全体のダンプ
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub closed: bool,
    pub concurrent_lane: String,
    pub serial_lane: String,
    pub counts: StatusCounts,
    /// sequence 順
    pub tasks: Vec<TaskInfo>,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl QueueSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Idle, StatusCounts { idle: 1, running: 0, terminal: 0 })]
    #[case(TaskStatus::Running, StatusCounts { idle: 0, running: 1, terminal: 0 })]
    #[case(TaskStatus::Success, StatusCounts { idle: 0, running: 0, terminal: 1 })]
    #[case(TaskStatus::Cancelled, StatusCounts { idle: 0, running: 0, terminal: 1 })]
    fn counts_bucket_by_status(#[case] status: TaskStatus, #[case] expected: StatusCounts) {
        let mut counts = StatusCounts::default();
        counts.record(status);
        assert_eq!(counts, expected);
        assert_eq!(counts.total(), 1);
    }

    #[test]
    fn snapshot_serializes_lanes_and_status_in_snake_case() {
        let info = TaskInfo {
            name: "Screen|1|1|120000000".to_string(),
            group: "Screen|1".to_string(),
            sequence: 1,
            created_at: DateTime::<Utc>::default(),
            lane: Lane::Serial,
            status: TaskStatus::Running,
            duration_ms: 5,
        };
        let snapshot = QueueSnapshot {
            closed: false,
            concurrent_lane: "blocking-pool(cached)".to_string(),
            serial_lane: "serial(1)".to_string(),
            counts: StatusCounts {
                idle: 0,
                running: 1,
                terminal: 0,
            },
            tasks: vec![info.clone()],
            groups: BTreeMap::from([(info.group.clone(), vec![info.name.clone()])]),
        };

        let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(value["tasks"][0]["lane"], "serial");
        assert_eq!(value["tasks"][0]["status"], "running");
        assert_eq!(value["counts"]["running"], 1);
        assert_eq!(value["groups"]["Screen|1"][0], "Screen|1|1|120000000");
    }
}
