//! 文件快照与快照集合

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::storage::FileMeta;

/// 单个文件在某一时刻的观测状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    /// 相对于根目录的路径（统一使用 /）
    pub path: String,
    /// Unix 毫秒时间戳
    pub modified_time: i64,
    pub size: u64,
    pub exists: bool,
}

impl FileSnapshot {
    pub fn new(path: impl Into<String>, modified_time: i64, size: u64) -> Self {
        Self {
            path: path.into(),
            modified_time,
            size,
            exists: true,
        }
    }

    /// 表示已删除 / 不存在的文件
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            modified_time: 0,
            size: 0,
            exists: false,
        }
    }

    pub fn from_meta(path: impl Into<String>, meta: FileMeta) -> Self {
        if meta.exists {
            Self::new(path, meta.modified_time, meta.size)
        } else {
            Self::missing(path)
        }
    }

    /// 时间、大小或存在性是否不同
    pub fn differs_from(&self, other: &FileSnapshot) -> bool {
        self.exists != other.exists
            || self.modified_time != other.modified_time
            || self.size != other.size
    }
}

/// 相对路径 -> 快照
pub type SnapshotSet = BTreeMap<String, FileSnapshot>;

/// 比较两次快照，返回发生变化的相对路径
pub fn diff(previous: &SnapshotSet, current: &SnapshotSet) -> HashSet<String> {
    let mut changed = HashSet::new();

    for (path, snapshot) in current {
        match previous.get(path) {
            Some(old) if !old.differs_from(snapshot) => {}
            _ => {
                changed.insert(path.clone());
            }
        }
    }

    for path in previous.keys() {
        if !current.contains_key(path) {
            changed.insert(path.clone());
        }
    }

    changed
}

/// 查找快照，不存在时返回 missing
pub fn lookup(set: &SnapshotSet, path: &str) -> FileSnapshot {
    set.get(path)
        .cloned()
        .unwrap_or_else(|| FileSnapshot::missing(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(&str, i64, u64)]) -> SnapshotSet {
        entries
            .iter()
            .map(|(p, t, s)| (p.to_string(), FileSnapshot::new(*p, *t, *s)))
            .collect()
    }

    #[test]
    fn test_diff_reports_added_removed_and_modified() {
        let previous = set(&[("a.txt", 1, 10), ("b.txt", 1, 10), ("c.txt", 1, 10)]);
        let current = set(&[("a.txt", 1, 10), ("b.txt", 2, 10), ("d.txt", 1, 1)]);

        let changed = diff(&previous, &current);
        let mut changed: Vec<_> = changed.into_iter().collect();
        changed.sort();
        assert_eq!(changed, vec!["b.txt", "c.txt", "d.txt"]);
    }

    #[test]
    fn test_diff_size_only_change() {
        let previous = set(&[("a.txt", 5, 10)]);
        let current = set(&[("a.txt", 5, 11)]);
        assert!(diff(&previous, &current).contains("a.txt"));
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let previous = set(&[("a.txt", 5, 10), ("dir/b.txt", 6, 0)]);
        assert!(diff(&previous, &previous.clone()).is_empty());
    }

    #[test]
    fn test_missing_snapshot_equality() {
        assert_eq!(FileSnapshot::missing("x"), FileSnapshot::missing("x"));
        assert!(FileSnapshot::missing("x").differs_from(&FileSnapshot::new("x", 0, 0)));
        assert_eq!(
            FileSnapshot::from_meta("x", FileMeta::missing()),
            FileSnapshot::missing("x")
        );
    }
}
