//! 同步事件流 - 单订阅者、有序、不丢失、不回放

use super::conflict::ConflictInfo;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// 同步生命周期事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    Started {
        root: PathBuf,
    },
    Progress {
        root: PathBuf,
        done: usize,
        total: usize,
    },
    Completed {
        root: PathBuf,
    },
    Failed {
        root: PathBuf,
        reason: String,
    },
    Conflict {
        root: PathBuf,
        conflict: ConflictInfo,
    },
}

impl SyncEvent {
    pub fn root(&self) -> &PathBuf {
        match self {
            SyncEvent::Started { root }
            | SyncEvent::Progress { root, .. }
            | SyncEvent::Completed { root }
            | SyncEvent::Failed { root, .. }
            | SyncEvent::Conflict { root, .. } => root,
        }
    }
}

/// 事件流，新订阅会替换旧订阅
#[derive(Debug, Default)]
pub struct EventStream {
    subscriber: Mutex<Option<mpsc::UnboundedSender<SyncEvent>>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅之后产生的事件；之前的订阅随之结束
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.subscriber.lock().unwrap_or_else(|e| e.into_inner());
        if guard.replace(tx).is_some() {
            debug!("事件订阅被新的订阅者替换");
        }
        EventSubscription {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// 发送事件；没有订阅者时直接丢弃
    pub fn emit(&self, event: SyncEvent) {
        let mut guard = self.subscriber.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            if tx.send(event).is_err() {
                debug!("事件订阅者已退出");
                *guard = None;
            }
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .map(|g| g.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

/// 一个事件订阅
pub struct EventSubscription {
    inner: UnboundedReceiverStream<SyncEvent>,
}

impl EventSubscription {
    /// 等待下一个事件；订阅被替换或引擎释放后返回 None
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.inner.next().await
    }
}

impl Stream for EventSubscription {
    type Item = SyncEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
