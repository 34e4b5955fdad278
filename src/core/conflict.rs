use super::file_state::FileState;
use super::session::RootState;
use super::snapshot::{lookup, FileSnapshot, SnapshotSet};
use crate::error::{Result, SyncError};
use crate::storage::{FileCopier, MetadataProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 冲突解决策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
    KeepBoth,
    Skip,
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictResolution::KeepLocal => write!(f, "keep_local"),
            ConflictResolution::KeepRemote => write!(f, "keep_remote"),
            ConflictResolution::KeepBoth => write!(f, "keep_both"),
            ConflictResolution::Skip => write!(f, "skip"),
        }
    }
}

impl From<&str> for ConflictResolution {
    fn from(s: &str) -> Self {
        match s {
            "keep_local" => ConflictResolution::KeepLocal,
            "keep_remote" => ConflictResolution::KeepRemote,
            "keep_both" => ConflictResolution::KeepBoth,
            _ => ConflictResolution::Skip,
        }
    }
}

/// 冲突记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub id: Uuid,
    /// 冲突文件的绝对路径
    pub path: std::path::PathBuf,
    pub relative_path: String,
    pub local_modified_time: i64,
    pub local_size: u64,
    pub remote_modified_time: i64,
    pub remote_size: u64,
    /// 远端文件是否还存在（一边修改一边删除时为 false）
    pub remote_exists: bool,
    pub created_at: DateTime<Utc>,
}

impl ConflictInfo {
    pub fn new(root: &Path, state: &FileState) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: root.join(&state.local.path),
            relative_path: state.local.path.clone(),
            local_modified_time: state.local.modified_time,
            local_size: state.local.size,
            remote_modified_time: state.remote.modified_time,
            remote_size: state.remote.size,
            remote_exists: state.remote.exists,
            created_at: Utc::now(),
        }
    }

    pub fn local_snapshot(&self) -> FileSnapshot {
        FileSnapshot::new(
            self.relative_path.clone(),
            self.local_modified_time,
            self.local_size,
        )
    }

    /// 根据记录的远端时间和大小合成快照
    pub fn remote_snapshot(&self) -> FileSnapshot {
        if self.remote_exists {
            FileSnapshot::new(
                self.relative_path.clone(),
                self.remote_modified_time,
                self.remote_size,
            )
        } else {
            FileSnapshot::missing(self.relative_path.clone())
        }
    }

    /// 两边的观测值是否与给定状态一致
    fn describes(&self, state: &FileState) -> bool {
        self.local_snapshot() == state.local && self.remote_snapshot() == state.remote
    }
}

/// 一次冲突检测的结果
#[derive(Debug, Default)]
pub struct Detection {
    /// 当前所有冲突
    pub conflicts: Vec<ConflictInfo>,
    /// 本次新出现的冲突（需要发送事件）
    pub new_conflicts: Vec<ConflictInfo>,
}

impl Detection {
    pub fn contains(&self, relative_path: &str) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.relative_path == relative_path)
    }
}

/// 冲突检测与解决
pub struct ConflictResolver {
    copier: Arc<dyn FileCopier>,
    local: Arc<dyn MetadataProvider>,
}

impl ConflictResolver {
    pub fn new(copier: Arc<dyn FileCopier>, local: Arc<dyn MetadataProvider>) -> Self {
        Self { copier, local }
    }

    /// 对比基准与两边当前快照，更新待解决冲突表
    pub fn detect_all(
        &self,
        root: &Path,
        state: &mut RootState,
        local: &SnapshotSet,
        remote: &SnapshotSet,
    ) -> Detection {
        let mut detection = Detection::default();
        let mut conflicting = HashSet::new();

        for (path, local_snapshot) in local {
            // 基准中没有的是新文件，不算冲突
            let Some(base) = state.baseline.get(path) else {
                continue;
            };

            let file_state = FileState::new(
                Some(base.clone()),
                local_snapshot.clone(),
                lookup(remote, path),
            );
            if !file_state.needs_resolution() {
                continue;
            }

            let info = match state.pending.get(path) {
                Some(existing) if existing.describes(&file_state) => existing.clone(),
                _ => {
                    let info = ConflictInfo::new(root, &file_state);
                    debug!("检测到冲突: {}", path);
                    state.pending.insert(path.clone(), info.clone());
                    detection.new_conflicts.push(info.clone());
                    info
                }
            };

            state.file_states.insert(path.clone(), file_state);
            conflicting.insert(path.clone());
            detection.conflicts.push(info);
        }

        // 已经自然消失的冲突
        state.pending.retain(|path, _| conflicting.contains(path));
        state.file_states.retain(|path, _| conflicting.contains(path));

        if !detection.conflicts.is_empty() {
            info!(
                "{}: {} 个冲突 ({} 个新增)",
                root.display(),
                detection.conflicts.len(),
                detection.new_conflicts.len()
            );
        }

        detection
    }

    /// 按策略解决冲突；只有 keep_both 会做文件 I/O
    pub async fn resolve(
        &self,
        root: &Path,
        state: &Mutex<RootState>,
        conflict: &ConflictInfo,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let relative = conflict.relative_path.as_str();

        let copied = if resolution == ConflictResolution::KeepBoth {
            Some(self.keep_both_copy(root, conflict).await?)
        } else {
            None
        };

        let mut state = state.lock().await;
        match resolution {
            ConflictResolution::KeepLocal => {
                state.record(conflict.local_snapshot());
            }
            ConflictResolution::KeepRemote => {
                state.record(conflict.remote_snapshot());
            }
            ConflictResolution::KeepBoth => {
                state.record(conflict.remote_snapshot());
                if let Some(sibling) = copied {
                    state.record(sibling);
                }
            }
            ConflictResolution::Skip => {}
        }

        state.pending.remove(relative);
        state.file_states.remove(relative);

        info!("冲突已解决: {} ({})", conflict.path.display(), resolution);
        Ok(())
    }

    /// 把本地版本复制为同目录下的冲突副本，返回副本快照
    async fn keep_both_copy(&self, root: &Path, conflict: &ConflictInfo) -> Result<FileSnapshot> {
        let timestamp = Utc::now().timestamp();
        let mut attempt = 0;
        let sibling = loop {
            let candidate =
                Self::generate_conflict_name(&conflict.relative_path, "local", timestamp, attempt);
            let exists = self
                .local
                .stat(&root.join(&candidate))
                .await
                .map(|m| m.exists)
                .unwrap_or(false);
            if !exists {
                break candidate;
            }
            attempt += 1;
        };

        let from = root.join(&conflict.relative_path);
        let to = root.join(&sibling);
        if let Err(e) = self.copier.copy(&from, &to).await {
            warn!("复制冲突副本失败: {:?} -> {:?}: {}", from, to, e);
            return Err(SyncError::CopyFailed {
                from,
                to,
                reason: e.to_string(),
            });
        }

        let snapshot = match self.local.stat(&to).await {
            Ok(meta) if meta.exists => FileSnapshot::from_meta(sibling.clone(), meta),
            _ => FileSnapshot::new(sibling.clone(), conflict.local_modified_time, conflict.local_size),
        };
        debug!("已创建冲突副本: {}", sibling);
        Ok(snapshot)
    }

    /// 生成冲突文件名，如 `dir/report_conflict_local_20240101_120000.txt`
    pub fn generate_conflict_name(path: &str, side: &str, timestamp: i64, attempt: u32) -> String {
        let dt = DateTime::from_timestamp(timestamp, 0)
            .map(|d| d.format("%Y%m%d_%H%M%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let marker = if attempt == 0 {
            format!("_conflict_{}_{}", side, dt)
        } else {
            format!("_conflict_{}_{}_{}", side, dt, attempt)
        };

        let (dir, file) = match path.rfind('/') {
            Some(pos) => path.split_at(pos + 1),
            None => ("", path),
        };

        match file.rfind('.') {
            Some(ext_pos) if ext_pos > 0 => {
                let (name, ext) = file.split_at(ext_pos);
                format!("{}{}{}{}", dir, name, marker, ext)
            }
            _ => format!("{}{}{}", dir, file, marker),
        }
    }

    /// 路径是否是冲突副本
    pub fn is_conflict_copy(path: &str) -> bool {
        path.rsplit('/')
            .next()
            .is_some_and(|name| name.contains("_conflict_"))
    }
}
