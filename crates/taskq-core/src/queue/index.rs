//! TaskIndex - 実行中 task の name / group 索引
//!
//! 不変条件:
//! - `names` にある task は、その tag の group の `groups` エントリにちょうど 1 回現れる
//! - 空になった group エントリは残さない
//!
//! ロックは `TaskQueue` 側で 1 つだけ持つ。ここはロックを知らない。
//! cancel は即座に索引から外し、done による削除は既に無ければ何もしない。

use std::collections::HashMap;
use std::sync::Arc;

use super::runner::TaskControl;

#[derive(Debug, Default)]
pub(crate) struct TaskIndex {
    names: HashMap<String, Arc<TaskControl>>,
    groups: HashMap<String, Vec<String>>,
}

impl TaskIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, control: Arc<TaskControl>) {
        let name = control.name().to_string();
        let group = control.tag().group().to_string();
        if self.names.insert(name.clone(), control).is_none() {
            self.groups.entry(group).or_default().push(name);
        }
    }

    /// name で削除。既に無ければ None（done の二重配送は無害）
    pub(crate) fn remove(&mut self, name: &str) -> Option<Arc<TaskControl>> {
        let control = self.names.remove(name)?;
        let group = control.tag().group();
        if let Some(names) = self.groups.get_mut(group) {
            names.retain(|n| n != name);
            if names.is_empty() {
                self.groups.remove(group);
            }
        }
        Some(control)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<TaskControl>> {
        self.names.get(name).cloned()
    }

    /// group の name リストをまとめて取り出す
    pub(crate) fn pop_group(&mut self, group: &str) -> Vec<Arc<TaskControl>> {
        let Some(names) = self.groups.remove(group) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| self.names.remove(name))
            .collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<TaskControl>> {
        self.groups.clear();
        self.names.drain().map(|(_, control)| control).collect()
    }

    pub(crate) fn group_len(&self, group: &str) -> usize {
        self.groups.get(group).map_or(0, Vec::len)
    }

    pub(crate) fn all(&self) -> Vec<Arc<TaskControl>> {
        self.names.values().cloned().collect()
    }

    pub(crate) fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|(group, names)| (group.as_str(), names.as_slice()))
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let grouped: usize = self.groups.values().map(Vec::len).sum();
        grouped == self.names.len()
            && self.groups.values().all(|names| !names.is_empty())
            && self.groups.iter().all(|(group, names)| {
                names.iter().all(|name| {
                    self.names
                        .get(name)
                        .is_some_and(|control| control.tag().group() == group)
                })
            })
    }
}
