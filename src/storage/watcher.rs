//! 基于 notify 的本地变更通知

use super::{ChangeNotifier, ChangeSubscription};
use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 平台文件系统事件源（FSEvents / inotify / ReadDirectoryChangesW）
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatcher;

impl NotifyWatcher {
    pub fn new() -> Self {
        Self
    }
}

impl ChangeNotifier for NotifyWatcher {
    fn subscribe(&self, root: &Path) -> Result<ChangeSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) || event.paths.is_empty() {
                    return;
                }
                // 接收端已关闭说明订阅已取消
                let _ = tx.send(event.paths);
            }
            Err(e) => warn!("文件监听错误: {}", e),
        })?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        info!("开始监听目录: {}", root.display());

        Ok(ChangeSubscription::new(rx, Box::new(WatchGuard { watcher })))
    }
}

/// 持有 watcher，drop 时停止监听
struct WatchGuard {
    #[allow(dead_code)]
    watcher: RecommendedWatcher,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        debug!("停止文件监听");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscription_delivers_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut sub = NotifyWatcher::new().subscribe(&root).unwrap();

        std::fs::write(root.join("a.txt"), b"hello").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), sub.next_batch())
            .await
            .expect("no event delivered")
            .expect("watcher closed");
        assert!(batch.iter().any(|p| p.ends_with("a.txt")));
    }
}
