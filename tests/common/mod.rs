#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use sharesync_lib::core::{FileSnapshot, ScanConfig, SyncEvent};
use sharesync_lib::core::events::EventSubscription;
use sharesync_lib::storage::{
    ChangeNotifier, ChangePropagator, ChangeSubscription, Enumeration, FileMeta, LocalStorage,
    MetadataProvider,
};
use sharesync_lib::{Collaborators, SyncConfig, SyncEngine};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

/// 内存中的文件元数据；`skipped` 模拟无法读取的子目录
#[derive(Default)]
pub struct MemoryProvider {
    files: Mutex<BTreeMap<PathBuf, FileMeta>>,
    pub skipped: AtomicUsize,
}

impl MemoryProvider {
    pub fn set(&self, path: impl Into<PathBuf>, modified_time: i64, size: u64) {
        self.files.lock().unwrap().insert(
            path.into(),
            FileMeta {
                exists: true,
                modified_time,
                size,
            },
        );
    }

    pub fn remove(&self, path: &Path) {
        self.files.lock().unwrap().remove(path);
    }
}

#[async_trait]
impl MetadataProvider for MemoryProvider {
    async fn stat(&self, path: &Path) -> Result<FileMeta> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_else(FileMeta::missing))
    }

    async fn enumerate(&self, root: &Path) -> Result<Enumeration> {
        let files = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.starts_with(root))
            .map(|(path, meta)| (path.clone(), *meta))
            .collect();
        Ok(Enumeration {
            files,
            skipped: self.skipped.load(Ordering::SeqCst),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// 由测试手动推送的变更通知
#[derive(Default)]
pub struct ManualNotifier {
    senders: Mutex<HashMap<PathBuf, mpsc::UnboundedSender<Vec<PathBuf>>>>,
    pub fail: AtomicBool,
}

impl ManualNotifier {
    pub fn push(&self, root: &Path, paths: Vec<PathBuf>) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(root)
            .is_some_and(|tx| tx.send(paths).is_ok())
    }
}

impl ChangeNotifier for ManualNotifier {
    fn subscribe(&self, root: &Path) -> Result<ChangeSubscription> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("notification service unavailable");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(root.to_path_buf(), tx);
        Ok(ChangeSubscription::new(rx, Box::new(())))
    }
}

/// 记录推送并写入远端；设置 gate 后每次推送都会等待放行
#[derive(Default)]
pub struct RecordingPropagator {
    pub pushed: Mutex<Vec<FileSnapshot>>,
    pub gate: Option<Gate>,
    pub fail_on: Option<String>,
    pub mirror: Option<Arc<MemoryProvider>>,
}

#[derive(Default, Clone)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl ChangePropagator for RecordingPropagator {
    async fn push(&self, root: &Path, snapshot: &FileSnapshot) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_on.as_deref() == Some(snapshot.path.as_str()) {
            bail!("server rejected {}", snapshot.path);
        }
        if let Some(remote) = &self.mirror {
            let path = root.join(&snapshot.path);
            if snapshot.exists {
                remote.set(path, snapshot.modified_time, snapshot.size);
            } else {
                remote.remove(&path);
            }
        }
        self.pushed.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

/// 不会自行触发后台同步的配置
pub fn quiet_config() -> SyncConfig {
    SyncConfig {
        debounce: Duration::from_secs(3600),
        remote_poll_interval: Duration::from_secs(3600),
        scan_config: ScanConfig::default(),
        max_concurrent_roots: 2,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub local: Arc<MemoryProvider>,
    pub remote: Arc<MemoryProvider>,
    pub notifier: Arc<ManualNotifier>,
    pub propagator: Arc<RecordingPropagator>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(quiet_config(), RecordingPropagator::default())
    }

    pub fn build(config: SyncConfig, propagator: RecordingPropagator) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(MemoryProvider::default());
        let remote = Arc::new(MemoryProvider::default());
        let notifier = Arc::new(ManualNotifier::default());
        let propagator = Arc::new(RecordingPropagator {
            mirror: Some(remote.clone()),
            ..propagator
        });

        let engine = SyncEngine::with_config(
            Collaborators {
                local: local.clone(),
                remote: remote.clone(),
                copier: Arc::new(LocalStorage::new()),
                notifier: notifier.clone(),
                propagator: propagator.clone(),
            },
            config,
        );

        Self {
            dir,
            local,
            remote,
            notifier,
            propagator,
            engine,
        }
    }

    /// 规范化后的根目录，与引擎内部使用的键一致
    pub fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    /// 在根目录下新建子目录作为另一个同步根
    pub fn subroot(&self, name: &str) -> PathBuf {
        let path = self.root().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }
}

/// 等待下一个事件，超时视为失败
pub async fn next_event(events: &mut EventSubscription) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// 跳过进度事件，等待某个根目录的下一个结束事件
pub async fn next_outcome(events: &mut EventSubscription, root: &Path) -> SyncEvent {
    loop {
        let event = next_event(events).await;
        if event.root() != root {
            continue;
        }
        match event {
            SyncEvent::Completed { .. } | SyncEvent::Failed { .. } => return event,
            _ => {}
        }
    }
}
