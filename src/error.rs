//! 同步引擎错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 同步引擎对外暴露的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 根路径不存在或不是目录
    #[error("invalid sync root: {}", .0.display())]
    InvalidRoot(PathBuf),

    /// 该根路径没有启用同步
    #[error("sync is not enabled for {}", .0.display())]
    NotEnabled(PathBuf),

    /// keep_both 复制冲突副本失败
    #[error("failed to copy {} to {}: {reason}", .from.display(), .to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// 同步过程在检查点被取消
    #[error("cancelled")]
    Cancelled,

    /// 部分子目录无法读取（非致命，只用于日志）
    #[error("enumeration of {} skipped {skipped} unreadable entries", .root.display())]
    EnumerationPartial { root: PathBuf, skipped: usize },

    /// 向远端推送本地变更失败
    #[error("failed to propagate {path}: {reason}")]
    Propagation { path: String, reason: String },

    /// 后台任务异常退出
    #[error("task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_reason_is_plain() {
        assert_eq!(SyncError::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_invalid_root_mentions_path() {
        let err = SyncError::InvalidRoot(PathBuf::from("/mnt/share"));
        assert!(err.to_string().contains("/mnt/share"));
    }
}
