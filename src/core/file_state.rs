//! 文件状态 - 基准快照与本地/远端当前快照的对比

use super::snapshot::FileSnapshot;

/// 单个路径的派生状态（不持久化）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// 上次成功同步时的快照；新文件为 None
    pub last_sync: Option<FileSnapshot>,
    pub local: FileSnapshot,
    pub remote: FileSnapshot,
}

impl FileState {
    pub fn new(last_sync: Option<FileSnapshot>, local: FileSnapshot, remote: FileSnapshot) -> Self {
        Self {
            last_sync,
            local,
            remote,
        }
    }

    pub fn is_locally_modified(&self) -> bool {
        Self::modified(self.last_sync.as_ref(), &self.local)
    }

    pub fn is_remotely_modified(&self) -> bool {
        Self::modified(self.last_sync.as_ref(), &self.remote)
    }

    pub fn has_conflict(&self) -> bool {
        self.is_locally_modified() && self.is_remotely_modified()
    }

    /// 两边已经是同一个版本（同一挂载点的两种视图常见）
    pub fn is_converged(&self) -> bool {
        !self.local.differs_from(&self.remote)
    }

    /// 两边都改了且结果不同才需要人工处理
    pub fn needs_resolution(&self) -> bool {
        self.has_conflict() && !self.is_converged()
    }

    fn modified(last_sync: Option<&FileSnapshot>, current: &FileSnapshot) -> bool {
        match last_sync {
            Some(base) => base.differs_from(current),
            // 基准中没有：只要当前存在就算修改
            None => current.exists,
        }
    }
}
