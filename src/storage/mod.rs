pub mod local;
pub mod watcher;

use anyhow::Result;
use async_trait::async_trait;
use std::any::Any;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::core::snapshot::FileSnapshot;

pub use local::LocalStorage;
pub use watcher::NotifyWatcher;

/// 文件元数据（stat 结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub exists: bool,
    /// Unix 毫秒时间戳
    pub modified_time: i64,
    pub size: u64,
}

impl FileMeta {
    pub fn missing() -> Self {
        Self {
            exists: false,
            modified_time: 0,
            size: 0,
        }
    }
}

/// 一次完整遍历的结果
#[derive(Debug, Default)]
pub struct Enumeration {
    /// 普通文件（绝对路径）及其元数据
    pub files: Vec<(PathBuf, FileMeta)>,
    /// 因无法读取而跳过的条目数
    pub skipped: usize,
}

/// 文件元数据查询接口
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// 查询单个路径；不存在时返回 `FileMeta::missing()`
    async fn stat(&self, path: &Path) -> Result<FileMeta>;

    /// 递归列出 root 下所有普通文件
    async fn enumerate(&self, root: &Path) -> Result<Enumeration>;

    /// 名称（用于日志）
    fn name(&self) -> &str;
}

/// 文件复制接口，仅 keep_both 使用
#[async_trait]
pub trait FileCopier: Send + Sync {
    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;
}

/// 向远端推送本地变更（网络 I/O 由外部实现）
#[async_trait]
pub trait ChangePropagator: Send + Sync {
    async fn push(&self, root: &Path, snapshot: &FileSnapshot) -> Result<()>;
}

/// 挂载点本身会写穿到服务器，默认不需要额外推送
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPropagator;

#[async_trait]
impl ChangePropagator for NoopPropagator {
    async fn push(&self, _root: &Path, _snapshot: &FileSnapshot) -> Result<()> {
        Ok(())
    }
}

/// 变更通知订阅；drop 即取消订阅
pub struct ChangeSubscription {
    receiver: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    _guard: Box<dyn Any + Send>,
}

impl ChangeSubscription {
    /// `guard` 在订阅存活期间保持底层监听器
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<PathBuf>>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// 下一批变更的绝对路径；监听器关闭时返回 None
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.receiver.recv().await
    }
}

/// 平台变更通知服务
pub trait ChangeNotifier: Send + Sync {
    fn subscribe(&self, root: &Path) -> Result<ChangeSubscription>;
}
