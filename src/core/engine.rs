use crate::core::conflict::{ConflictInfo, ConflictResolution, ConflictResolver, Detection};
use crate::core::debounce::{DebounceScheduler, PassTrigger};
use crate::core::detector::ChangeDetector;
use crate::core::events::{EventStream, EventSubscription, SyncEvent};
use crate::core::file_state::FileState;
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::core::session::{RootSession, SessionPhase, SyncRoot};
use crate::core::snapshot::{lookup, FileSnapshot, SnapshotSet};
use crate::error::{Result, SyncError};
use crate::storage::{
    ChangeNotifier, ChangePropagator, ChangeSubscription, FileCopier, FileMeta, LocalStorage,
    MetadataProvider, NoopPropagator, NotifyWatcher,
};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 防抖静默期
    pub debounce: Duration,
    /// 远端轮询间隔
    pub remote_poll_interval: Duration,
    /// 扫描配置
    pub scan_config: ScanConfig,
    /// 批量启用/停用时的最大并发数
    pub max_concurrent_roots: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            remote_poll_interval: Duration::from_secs(5),
            scan_config: ScanConfig::default(),
            max_concurrent_roots: 4,
        }
    }
}

/// 引擎依赖的外部服务，构造时注入
#[derive(Clone)]
pub struct Collaborators {
    pub local: Arc<dyn MetadataProvider>,
    pub remote: Arc<dyn MetadataProvider>,
    pub copier: Arc<dyn FileCopier>,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub propagator: Arc<dyn ChangePropagator>,
}

impl Collaborators {
    /// 挂载场景：本地与远端都通过挂载点访问，写入由挂载点负责
    pub fn local() -> Self {
        let storage = Arc::new(LocalStorage::new());
        Self {
            local: storage.clone(),
            remote: Arc::new(LocalStorage::with_name("remote")),
            copier: storage,
            notifier: Arc::new(NotifyWatcher::new()),
            propagator: Arc::new(NoopPropagator),
        }
    }
}

/// 单次同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub root: PathBuf,
    pub files_scanned: usize,
    pub conflicts: usize,
    pub files_pushed: usize,
    pub baseline_updates: usize,
    pub duration_ms: u64,
}

/// 一次同步要做的事情
#[derive(Debug, Default)]
struct SyncPlan {
    /// 需要推送到远端的本地变更
    outgoing: Vec<FileSnapshot>,
    /// 成功后写入基准的快照
    baseline_updates: Vec<FileSnapshot>,
}

impl SyncPlan {
    fn build(
        baseline: &SnapshotSet,
        local: &SnapshotSet,
        remote: &SnapshotSet,
        detection: &Detection,
    ) -> Self {
        let mut plan = SyncPlan::default();
        let paths: BTreeSet<&String> = baseline
            .keys()
            .chain(local.keys())
            .chain(remote.keys())
            .collect();

        for path in paths {
            if detection.contains(path) {
                continue;
            }

            let state = FileState::new(baseline.get(path).cloned(), lookup(local, path), lookup(remote, path));
            match (state.is_locally_modified(), state.is_remotely_modified()) {
                (false, false) => {}
                (true, false) => {
                    plan.outgoing.push(state.local.clone());
                    plan.baseline_updates.push(state.local);
                }
                (false, true) => plan.baseline_updates.push(state.remote),
                // 两边都是新文件、两边改成了同一版本，或本地删除而远端修改
                (true, true) => {
                    if state.local.exists {
                        if state.local.differs_from(&state.remote) {
                            plan.outgoing.push(state.local.clone());
                        }
                        plan.baseline_updates.push(state.local);
                    } else {
                        plan.baseline_updates.push(state.remote);
                    }
                }
            }
        }

        plan
    }
}

/// 同步引擎
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: SyncConfig,
    sessions: RwLock<HashMap<PathBuf, Arc<RootSession>>>,
    detector: ChangeDetector,
    resolver: ConflictResolver,
    scheduler: DebounceScheduler,
    notifier: Arc<dyn ChangeNotifier>,
    propagator: Arc<dyn ChangePropagator>,
    events: Arc<EventStream>,
}

impl SyncEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self::with_config(collaborators, SyncConfig::default())
    }

    pub fn with_config(collaborators: Collaborators, config: SyncConfig) -> Self {
        let events = Arc::new(EventStream::new());

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let weak = weak.clone();
            let trigger: PassTrigger = Arc::new(move |root: PathBuf, paths: HashSet<String>| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.scheduled_pass(root, paths).await;
                    }
                }
                .boxed()
            });

            EngineInner {
                detector: ChangeDetector::new(
                    FileScanner::with_config(config.scan_config.clone()),
                    collaborators.local.clone(),
                    collaborators.remote.clone(),
                ),
                resolver: ConflictResolver::new(collaborators.copier.clone(), collaborators.local.clone()),
                scheduler: DebounceScheduler::new(config.debounce, events.clone(), trigger),
                notifier: collaborators.notifier.clone(),
                propagator: collaborators.propagator.clone(),
                sessions: RwLock::new(HashMap::new()),
                events: events.clone(),
                config,
            }
        });

        Self { inner }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// 订阅事件流；之前的订阅会结束
    pub fn events(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// 启用同步；已启用时只更新双向标志。两种情况都会取消尚未触发的同步
    pub async fn enable_sync(&self, root: impl AsRef<Path>, bidirectional: bool) -> Result<()> {
        let root = normalize_root(root.as_ref());
        match tokio::fs::metadata(&root).await {
            Ok(metadata) if metadata.is_dir() => {}
            _ => {
                warn!("无效的同步目录: {}", root.display());
                return Err(SyncError::InvalidRoot(root));
            }
        }

        self.inner.scheduler.cancel(&root);

        if let Some(session) = self.inner.session(&root) {
            session.update_root(|r| r.bidirectional = bidirectional);
            info!("同步已启用，更新双向标志: {} (bidirectional={})", root.display(), bidirectional);
            return Ok(());
        }

        info!("启用同步: {} (bidirectional={})", root.display(), bidirectional);
        self.inner.detector.track(&root);
        let baseline = self.inner.detector.snapshot_local(&root).await;
        self.inner.detector.snapshot_remote(&root).await;

        let session = Arc::new(RootSession::new(
            SyncRoot {
                path: root.clone(),
                bidirectional,
                enabled_at: Utc::now(),
                last_sync_at: None,
            },
            baseline,
        ));

        {
            let mut sessions = self.inner.sessions.write().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = sessions.get(&root) {
                // 并发启用，保留先到的会话
                existing.update_root(|r| r.bidirectional = bidirectional);
                return Ok(());
            }
            sessions.insert(root.clone(), session.clone());
        }

        self.inner.start_watching(&root, &session);
        session.set_phase(SessionPhase::Idle);
        self.inner.events.emit(SyncEvent::Started { root });
        Ok(())
    }

    /// 停用同步；幂等
    pub fn disable_sync(&self, root: impl AsRef<Path>) {
        let root = normalize_root(root.as_ref());
        self.inner.scheduler.cancel(&root);

        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&root);

        if let Some(session) = removed {
            session.shutdown();
            self.inner.detector.forget(&root);
            info!("已停用同步: {}", root.display());
        }
    }

    /// 立即同步；同一目录已有同步在进行时排队等待
    pub async fn sync_now(&self, root: impl AsRef<Path>) -> Result<SyncReport> {
        let root = normalize_root(root.as_ref());
        let session = self
            .inner
            .session(&root)
            .ok_or_else(|| SyncError::NotEnabled(root.clone()))?;
        self.inner.run_pass(&root, &session).await
    }

    /// 取消正在进行的同步（目录保持启用）
    pub fn cancel_sync(&self, root: impl AsRef<Path>) -> Result<bool> {
        let root = normalize_root(root.as_ref());
        let session = self
            .inner
            .session(&root)
            .ok_or(SyncError::NotEnabled(root))?;
        Ok(session.cancel_pass())
    }

    /// 立即执行一次远端轮询，返回变化的文件数
    pub async fn refresh_remote(&self, root: impl AsRef<Path>) -> Result<usize> {
        let root = normalize_root(root.as_ref());
        if self.inner.session(&root).is_none() {
            return Err(SyncError::NotEnabled(root));
        }
        Ok(self.inner.poll_once(&root).await)
    }

    pub fn is_sync_enabled(&self, root: impl AsRef<Path>) -> bool {
        self.inner.session(&normalize_root(root.as_ref())).is_some()
    }

    pub fn sync_enabled_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        roots.sort();
        roots
    }

    pub fn sync_root(&self, root: impl AsRef<Path>) -> Option<SyncRoot> {
        self.inner
            .session(&normalize_root(root.as_ref()))
            .map(|s| s.root())
    }

    pub fn session_phase(&self, root: impl AsRef<Path>) -> Option<SessionPhase> {
        self.inner
            .session(&normalize_root(root.as_ref()))
            .map(|s| s.phase())
    }

    /// 基准快照的副本
    pub async fn baseline(&self, root: impl AsRef<Path>) -> Option<SnapshotSet> {
        let session = self.inner.session(&normalize_root(root.as_ref()))?;
        let state = session.state.lock().await;
        Some(state.baseline.clone())
    }

    /// 单个文件的冲突检测：两边都相对基准发生变化时返回冲突
    pub async fn detect_conflict(&self, local_path: &Path, remote_path: &Path) -> Option<ConflictInfo> {
        let local_path = normalize_root(local_path);
        let (root, session) = self.inner.session_containing(&local_path)?;
        let relative = FileScanner::relativize(&root, &local_path)?;

        let local = stat_or_missing(self.inner.detector.local_provider().as_ref(), &local_path).await;
        let remote = stat_or_missing(self.inner.detector.remote_provider().as_ref(), remote_path).await;

        let base = session.state.lock().await.baseline.get(&relative).cloned()?;
        let state = FileState::new(
            Some(base),
            FileSnapshot::from_meta(relative.clone(), local),
            FileSnapshot::from_meta(relative, remote),
        );

        state
            .needs_resolution()
            .then(|| ConflictInfo::new(&root, &state))
    }

    pub async fn resolve_conflict(
        &self,
        conflict: &ConflictInfo,
        resolution: ConflictResolution,
        root: impl AsRef<Path>,
    ) -> Result<()> {
        let root = normalize_root(root.as_ref());
        let session = self
            .inner
            .session(&root)
            .ok_or_else(|| SyncError::NotEnabled(root.clone()))?;
        self.inner
            .resolver
            .resolve(&root, &session.state, conflict, resolution)
            .await
    }

    pub async fn pending_conflicts(&self, root: impl AsRef<Path>) -> Vec<ConflictInfo> {
        let Some(session) = self.inner.session(&normalize_root(root.as_ref())) else {
            return Vec::new();
        };
        let state = session.state.lock().await;
        state.pending.values().cloned().collect()
    }

    /// 批量启用，最多 max_concurrent_roots 个同时进行；单个失败不影响其他
    pub async fn enable_many(&self, roots: Vec<(PathBuf, bool)>) -> Vec<(PathBuf, Result<()>)> {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent_roots.max(1)));
        let mut handles = Vec::new();

        for (root, bidirectional) in roots {
            let semaphore = semaphore.clone();
            let engine = self.clone();
            let task_root = root.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                engine.enable_sync(&task_root, bidirectional).await
            });
            handles.push((root, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (root, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(SyncError::Task(e.to_string())));
            if let Err(e) = &result {
                warn!("启用同步失败: {} - {}", root.display(), e);
            }
            results.push((root, result));
        }
        results
    }

    pub fn disable_all(&self) {
        for root in self.sync_enabled_roots() {
            self.disable_sync(&root);
        }
    }

    /// 停止所有目录的同步
    pub fn shutdown(&self) {
        info!("正在停止同步引擎...");
        self.disable_all();
        self.inner.scheduler.cancel_all();
    }
}

impl EngineInner {
    fn session(&self, root: &Path) -> Option<Arc<RootSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(root)
            .cloned()
    }

    /// 找到包含该路径的已启用目录（最深的一个）
    fn session_containing(&self, path: &Path) -> Option<(PathBuf, Arc<RootSession>)> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(root, session)| (root.clone(), session.clone()))
    }

    /// 启动本地监听和远端轮询
    fn start_watching(self: &Arc<Self>, root: &Path, session: &Arc<RootSession>) {
        match self.notifier.subscribe(root) {
            Ok(subscription) => {
                let handle = tokio::spawn(Self::listen(
                    Arc::downgrade(self),
                    root.to_path_buf(),
                    subscription,
                    session.token.clone(),
                ));
                session.add_task(handle);
            }
            Err(e) => warn!("无法订阅本地变更，仅依赖轮询: {} - {}", root.display(), e),
        }

        let handle = tokio::spawn(Self::poll(
            Arc::downgrade(self),
            root.to_path_buf(),
            self.config.remote_poll_interval,
            session.token.clone(),
        ));
        session.add_task(handle);
    }

    async fn listen(
        weak: Weak<EngineInner>,
        root: PathBuf,
        mut subscription: ChangeSubscription,
        token: CancellationToken,
    ) {
        loop {
            let batch = tokio::select! {
                _ = token.cancelled() => break,
                batch = subscription.next_batch() => batch,
            };

            let Some(batch) = batch else {
                warn!("本地变更通知已关闭: {}", root.display());
                break;
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };

            let changed = inner.detector.filter_notification(&root, &batch);
            if !changed.is_empty() {
                debug!("本地变更 {}: {} 个文件", root.display(), changed.len());
                inner.scheduler.on_change(&root, changed);
            }
        }
        debug!("停止本地监听: {}", root.display());
    }

    async fn poll(weak: Weak<EngineInner>, root: PathBuf, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回，启用时已经扫描过
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(inner) = weak.upgrade() else {
                break;
            };
            if token.is_cancelled() {
                break;
            }
            inner.poll_once(&root).await;
        }
        debug!("停止远端轮询: {}", root.display());
    }

    async fn poll_once(&self, root: &Path) -> usize {
        let changed = self.detector.poll_remote(root).await;
        let count = changed.len();
        if count > 0 && self.session(root).is_some() {
            self.scheduler.on_change(root, changed);
        }
        count
    }

    /// 防抖触发的同步：失败只通过事件流报告
    async fn scheduled_pass(&self, root: PathBuf, paths: HashSet<String>) {
        let Some(session) = self.session(&root) else {
            debug!("目录已停用，忽略同步: {}", root.display());
            return;
        };

        debug!("后台同步 {} ({} 个变更)", root.display(), paths.len());
        if let Err(e) = self.run_pass(&root, &session).await {
            debug!("后台同步未完成: {} - {}", root.display(), e);
        }
    }

    /// 串行执行一次同步并发送结束事件
    async fn run_pass(&self, root: &Path, session: &Arc<RootSession>) -> Result<SyncReport> {
        let _serial = session.pass_lock.lock().await;
        let token = session.begin_pass();
        session.set_phase(SessionPhase::Syncing);

        let result = {
            let _guard = scopeguard::guard((), |_| {
                session.end_pass();
                if session.phase() == SessionPhase::Syncing {
                    session.set_phase(SessionPhase::Idle);
                }
            });
            self.execute_pass(root, session, &token).await
        };

        match &result {
            Ok(report) => {
                info!(
                    "同步完成: {} - 扫描 {}, 冲突 {}, 推送 {}, 更新基准 {} ({}ms)",
                    root.display(),
                    report.files_scanned,
                    report.conflicts,
                    report.files_pushed,
                    report.baseline_updates,
                    report.duration_ms
                );
                self.events.emit(SyncEvent::Completed {
                    root: root.to_path_buf(),
                });
            }
            Err(SyncError::Cancelled) => {
                warn!("同步已取消: {}", root.display());
                self.events.emit(SyncEvent::Failed {
                    root: root.to_path_buf(),
                    reason: SyncError::Cancelled.to_string(),
                });
            }
            Err(e) => {
                error!("同步失败: {} - {}", root.display(), e);
                self.events.emit(SyncEvent::Failed {
                    root: root.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    async fn execute_pass(
        &self,
        root: &Path,
        session: &RootSession,
        token: &CancellationToken,
    ) -> Result<SyncReport> {
        let start = Instant::now();

        // 检查点：扫描前
        checkpoint(token)?;
        let local = self.detector.snapshot_local(root).await;
        let remote = self.detector.current_remote(root);

        // 检查点：冲突检测前
        checkpoint(token)?;
        let (plan, detection) = {
            let mut state = session.state.lock().await;
            let detection = self.resolver.detect_all(root, &mut state, &local, &remote);
            let plan = SyncPlan::build(&state.baseline, &local, &remote, &detection);
            (plan, detection)
        };

        for conflict in &detection.new_conflicts {
            self.events.emit(SyncEvent::Conflict {
                root: root.to_path_buf(),
                conflict: conflict.clone(),
            });
        }

        // 检查点：推送前
        checkpoint(token)?;
        let mut pushed = 0;
        if session.root().bidirectional && !plan.outgoing.is_empty() {
            let total = plan.outgoing.len();
            self.events.emit(SyncEvent::Progress {
                root: root.to_path_buf(),
                done: 0,
                total,
            });

            for snapshot in &plan.outgoing {
                checkpoint(token)?;
                self.propagator
                    .push(root, snapshot)
                    .await
                    .map_err(|e| SyncError::Propagation {
                        path: snapshot.path.clone(),
                        reason: e.to_string(),
                    })?;
                self.detector.record_pushed(root, snapshot);
                pushed += 1;
                self.events.emit(SyncEvent::Progress {
                    root: root.to_path_buf(),
                    done: pushed,
                    total,
                });
            }
        }

        // 检查点：写入基准前
        checkpoint(token)?;
        let updates = plan.baseline_updates.len();
        {
            let mut state = session.state.lock().await;
            for snapshot in plan.baseline_updates {
                state.record(snapshot);
            }
        }
        session.update_root(|r| r.last_sync_at = Some(Utc::now()));

        Ok(SyncReport {
            root: root.to_path_buf(),
            files_scanned: local.len(),
            conflicts: detection.conflicts.len(),
            files_pushed: pushed,
            baseline_updates: updates,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

async fn stat_or_missing(provider: &dyn MetadataProvider, path: &Path) -> FileMeta {
    match provider.stat(path).await {
        Ok(meta) => meta,
        Err(e) => {
            debug!("stat 失败，按不存在处理: {:?} - {}", path, e);
            FileMeta::missing()
        }
    }
}

/// 规范化根路径：能解析就取真实路径，否则只做词法清理
fn normalize_root(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.components().collect())
}
