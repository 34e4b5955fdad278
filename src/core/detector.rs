//! 变更检测 - 本地靠通知，远端靠定时全量扫描

use super::scanner::FileScanner;
use super::snapshot::{diff, FileSnapshot, SnapshotSet};
use crate::storage::MetadataProvider;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 某个根目录当前观测到的两边快照
#[derive(Debug, Default, Clone)]
struct CurrentSnapshots {
    local: SnapshotSet,
    remote: SnapshotSet,
}

/// 变更检测器，独占每个根目录的当前快照，对外只给副本
pub struct ChangeDetector {
    scanner: FileScanner,
    local: Arc<dyn MetadataProvider>,
    remote: Arc<dyn MetadataProvider>,
    current: Mutex<HashMap<PathBuf, CurrentSnapshots>>,
}

impl ChangeDetector {
    pub fn new(
        scanner: FileScanner,
        local: Arc<dyn MetadataProvider>,
        remote: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            scanner,
            local,
            remote,
            current: Mutex::new(HashMap::new()),
        }
    }

    pub fn scanner(&self) -> &FileScanner {
        &self.scanner
    }

    pub fn local_provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.local
    }

    pub fn remote_provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.remote
    }

    fn with_current<T>(&self, f: impl FnOnce(&mut HashMap<PathBuf, CurrentSnapshots>) -> T) -> T {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// 开始记录某个根目录；只有已记录的目录才会保存扫描结果
    pub fn track(&self, root: &Path) {
        self.with_current(|current| {
            current.entry(root.to_path_buf()).or_default();
        });
    }

    pub fn is_tracked(&self, root: &Path) -> bool {
        self.with_current(|current| current.contains_key(root))
    }

    /// 重新扫描本地，保存并返回副本
    pub async fn snapshot_local(&self, root: &Path) -> SnapshotSet {
        let set = self.scanner.snapshot(self.local.as_ref(), root).await;
        self.with_current(|current| {
            // 扫描期间目录可能已被停用
            if let Some(entry) = current.get_mut(root) {
                entry.local = set.clone();
            }
        });
        set
    }

    /// 重新扫描远端，保存并返回副本
    pub async fn snapshot_remote(&self, root: &Path) -> SnapshotSet {
        let set = self.scanner.snapshot(self.remote.as_ref(), root).await;
        self.with_current(|current| {
            if let Some(entry) = current.get_mut(root) {
                entry.remote = set.clone();
            }
        });
        set
    }

    /// 一次远端轮询：与上一次远端快照（不是基准）比较
    pub async fn poll_remote(&self, root: &Path) -> HashSet<String> {
        let set = self.scanner.snapshot(self.remote.as_ref(), root).await;
        let changed = self.with_current(|current| {
            let Some(entry) = current.get_mut(root) else {
                return HashSet::new();
            };
            let changed = diff(&entry.remote, &set);
            entry.remote = set;
            changed
        });

        if !changed.is_empty() {
            debug!("远端轮询 {}: {} 个变更", root.display(), changed.len());
        }
        changed
    }

    /// 推送成功后远端就是本地的版本，下次轮询不再把它当作远端变更
    pub fn record_pushed(&self, root: &Path, snapshot: &FileSnapshot) {
        self.with_current(|current| {
            let Some(entry) = current.get_mut(root) else {
                return;
            };
            if snapshot.exists {
                entry.remote.insert(snapshot.path.clone(), snapshot.clone());
            } else {
                entry.remote.remove(&snapshot.path);
            }
        });
    }

    /// 最近一次记录的远端快照
    pub fn current_remote(&self, root: &Path) -> SnapshotSet {
        self.with_current(|current| {
            current
                .get(root)
                .map(|c| c.remote.clone())
                .unwrap_or_default()
        })
    }

    pub fn current_local(&self, root: &Path) -> SnapshotSet {
        self.with_current(|current| {
            current
                .get(root)
                .map(|c| c.local.clone())
                .unwrap_or_default()
        })
    }

    /// 过滤本地通知并转为相对路径
    pub fn filter_notification(&self, root: &Path, paths: &[PathBuf]) -> HashSet<String> {
        self.scanner.filter_changes(root, paths)
    }

    pub fn forget(&self, root: &Path) {
        self.with_current(|current| {
            current.remove(root);
        });
    }
}
