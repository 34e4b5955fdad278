//! 每个同步根目录的会话状态

use super::conflict::ConflictInfo;
use super::file_state::FileState;
use super::snapshot::{FileSnapshot, SnapshotSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 一个被监控的根目录（挂载后的共享目录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRoot {
    pub path: PathBuf,
    pub bidirectional: bool,
    pub enabled_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Enabling,
    Idle,
    Syncing,
    Disabling,
}

/// 由同一把锁保护的根目录状态
#[derive(Debug, Default)]
pub struct RootState {
    /// 上次成功同步时的快照
    pub baseline: SnapshotSet,
    /// 相对路径 -> 待解决冲突
    pub pending: BTreeMap<String, ConflictInfo>,
    /// 冲突路径的派生状态
    pub file_states: HashMap<String, FileState>,
}

impl RootState {
    pub fn new(baseline: SnapshotSet) -> Self {
        Self {
            baseline,
            ..Default::default()
        }
    }

    /// 记录单个文件的基准；不存在的文件从基准中移除
    pub fn record(&mut self, snapshot: FileSnapshot) {
        if snapshot.exists {
            self.baseline.insert(snapshot.path.clone(), snapshot);
        } else {
            self.baseline.remove(&snapshot.path);
        }
    }
}

/// 会话：根目录信息 + 状态 + 后台任务
pub struct RootSession {
    pub root: StdMutex<SyncRoot>,
    pub phase: StdMutex<SessionPhase>,
    pub state: Mutex<RootState>,
    /// 同一根目录的同步串行执行
    pub pass_lock: Mutex<()>,
    /// 禁用时取消所有后台任务
    pub token: CancellationToken,
    /// 当前同步的取消令牌
    pub current_pass: StdMutex<Option<CancellationToken>>,
    pub tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl RootSession {
    pub fn new(root: SyncRoot, baseline: SnapshotSet) -> Self {
        Self {
            root: StdMutex::new(root),
            phase: StdMutex::new(SessionPhase::Enabling),
            state: Mutex::new(RootState::new(baseline)),
            pass_lock: Mutex::new(()),
            token: CancellationToken::new(),
            current_pass: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> SyncRoot {
        self.root.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_root(&self, f: impl FnOnce(&mut SyncRoot)) {
        f(&mut self.root.lock().unwrap_or_else(|e| e.into_inner()));
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// 为一次同步创建子令牌
    pub fn begin_pass(&self) -> CancellationToken {
        let token = self.token.child_token();
        *self.current_pass.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        token
    }

    pub fn end_pass(&self) {
        self.current_pass
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// 取消正在进行的同步；没有时返回 false
    pub fn cancel_pass(&self) -> bool {
        match self
            .current_pass
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// 停止所有后台任务
    pub fn shutdown(&self) {
        self.set_phase(SessionPhase::Disabling);
        self.token.cancel();
        for handle in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
    }
}
