//! 防抖调度 - 一阵变更平静下来后只触发一次同步

use super::events::{EventStream, SyncEvent};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// 防抖到期后调用的同步入口
pub type PassTrigger = Arc<dyn Fn(PathBuf, HashSet<String>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Pending {
    paths: HashSet<String>,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

type PendingTable = Arc<Mutex<HashMap<PathBuf, Pending>>>;

/// 每个根目录最多一个定时任务
pub struct DebounceScheduler {
    quiet_period: Duration,
    events: Arc<EventStream>,
    trigger: PassTrigger,
    pending: PendingTable,
    generation: AtomicU64,
}

impl DebounceScheduler {
    pub fn new(quiet_period: Duration, events: Arc<EventStream>, trigger: PassTrigger) -> Self {
        Self {
            quiet_period,
            events,
            trigger,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// 合并变更并重新计时
    pub fn on_change(&self, root: &Path, paths: HashSet<String>) {
        if paths.is_empty() {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut table = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let entry = table.entry(root.to_path_buf()).or_default();
        entry.paths.extend(paths);

        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }

        entry.generation = generation;
        entry.handle = Some(tokio::spawn(Self::fire(
            self.pending.clone(),
            self.events.clone(),
            self.trigger.clone(),
            root.to_path_buf(),
            generation,
            self.quiet_period,
        )));

        debug!(
            "{}: 累计 {} 个待同步变更",
            root.display(),
            entry.paths.len()
        );
    }

    async fn fire(
        pending: PendingTable,
        events: Arc<EventStream>,
        trigger: PassTrigger,
        root: PathBuf,
        generation: u64,
        quiet_period: Duration,
    ) {
        tokio::time::sleep(quiet_period).await;

        // 取走后从表中摘除，之后的变更不会再中止本次同步
        let paths = {
            let mut table = pending.lock().unwrap_or_else(|e| e.into_inner());
            if table.get(&root).map(|e| e.generation) != Some(generation) {
                return;
            }
            table.remove(&root).map(|e| e.paths).unwrap_or_default()
        };

        debug!("{}: 防抖到期，触发同步 ({} 个变更)", root.display(), paths.len());
        events.emit(SyncEvent::Progress {
            root: root.clone(),
            done: 0,
            total: paths.len(),
        });
        trigger(root, paths).await;
    }

    /// 取消某个根目录的定时任务并清空待同步集合
    pub fn cancel(&self, root: &Path) {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(root);
        if let Some(Pending {
            handle: Some(handle),
            ..
        }) = removed
        {
            handle.abort();
            debug!("{}: 已取消待触发的同步", root.display());
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, pending) in drained {
            if let Some(handle) = pending.handle {
                handle.abort();
            }
        }
    }

    /// 是否有尚未到期的定时任务
    pub fn is_scheduled(&self, root: &Path) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(root)
    }

    pub fn pending_count(&self, root: &Path) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(root)
            .map(|p| p.paths.len())
            .unwrap_or(0)
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
