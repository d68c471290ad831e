//! 跨上下文变更通知
//!
//! 两种触发方式：
//! 1. 写操作成功后 `publish`：在共享存储中置脏标记，同时向本上下文广播一个合成信号
//!    （同一上下文内不会收到其他上下文的存储变更通知，只能自己发）。
//! 2. 重新获得焦点时 `take_dirty`：读取并清除脏标记，由调用方决定是否重新同步。
//!
//! 尽力而为：后台期间的多次变更会合并成一次重新同步，标记写入与读取之间没有跨上下文的顺序保证。

use crate::social::error::SyncResult;
use crate::social::storage::{SharedStorage, CONNECTION_CHANGED_KEY};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// 触发变更的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    ConnectRequested,
    RequestAccepted,
    RequestRejected,
}

/// 本上下文内广播的变更信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    pub kind: ChangeKind,
    /// 变更涉及的对方用户（接受/拒绝时可能未知）
    pub other_user_id: Option<String>,
}

/// 可被变更信号驱动重新同步的视图
#[async_trait]
pub trait SyncView: Send + Sync {
    /// 视图名称，仅用于日志
    fn name(&self) -> &'static str;

    async fn resync(&self);
}

pub struct CrossTabNotifier {
    storage: Arc<dyn SharedStorage>,
    tx: broadcast::Sender<ChangeSignal>,
}

impl CrossTabNotifier {
    pub fn new(storage: Arc<dyn SharedStorage>) -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self { storage, tx }
    }

    /// 置脏标记并向本上下文广播；存储失败只记日志，不影响触发它的写操作
    pub async fn publish(&self, kind: ChangeKind, other_user_id: Option<&str>) {
        if let Err(e) = self.storage.set(CONNECTION_CHANGED_KEY, "true").await {
            warn!("[Notifier] 写入脏标记失败: {}", e);
        }
        let signal = ChangeSignal {
            kind,
            other_user_id: other_user_id.map(str::to_string),
        };
        // 没有订阅者时 send 返回 Err，属于正常情况
        let receivers = self.tx.send(signal).unwrap_or(0);
        debug!(
            "[Notifier] 📣 广播变更 {:?}，本上下文订阅者: {}",
            kind, receivers
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSignal> {
        self.tx.subscribe()
    }

    /// 读取并清除脏标记，返回标记此前是否被置位
    pub async fn take_dirty(&self) -> SyncResult<bool> {
        let dirty = self.storage.take(CONNECTION_CHANGED_KEY).await?.is_some();
        if dirty {
            info!("[Notifier] 检测到其他上下文的变更，已清除脏标记");
        }
        Ok(dirty)
    }

    /// 查看脏标记但不清除
    pub async fn is_dirty(&self) -> SyncResult<bool> {
        Ok(self.storage.get(CONNECTION_CHANGED_KEY).await?.is_some())
    }
}

/// 持续消费本上下文的变更信号并驱动视图重新同步，直到通道关闭
pub async fn run_signal_listener(
    mut rx: broadcast::Receiver<ChangeSignal>,
    views: Vec<Arc<dyn SyncView>>,
) {
    loop {
        match rx.recv().await {
            Ok(signal) => {
                debug!("[Notifier] 收到本上下文变更信号: {:?}", signal);
                resync_all(&views).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // 积压的信号合并为一次同步
                warn!("[Notifier] 变更信号积压，跳过 {} 条", skipped);
                resync_all(&views).await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("[Notifier] 信号通道已关闭，监听结束");
                break;
            }
        }
    }
}

async fn resync_all(views: &[Arc<dyn SyncView>]) {
    for view in views {
        debug!("[Notifier] 🔄 重新同步视图: {}", view.name());
        view.resync().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::storage::MemoryStorage;

    #[tokio::test]
    async fn publish_sets_flag_and_signals_same_context() {
        let storage = MemoryStorage::new();
        let notifier = CrossTabNotifier::new(Arc::new(storage.clone()));
        let mut rx = notifier.subscribe();

        notifier
            .publish(ChangeKind::ConnectRequested, Some("bob"))
            .await;

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.kind, ChangeKind::ConnectRequested);
        assert_eq!(signal.other_user_id.as_deref(), Some("bob"));
        assert!(notifier.is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn several_changes_coalesce_into_one_dirty_read() {
        let storage = MemoryStorage::new();
        let writer = CrossTabNotifier::new(Arc::new(storage.clone()));
        let background_tab = CrossTabNotifier::new(Arc::new(storage));

        writer.publish(ChangeKind::ConnectRequested, Some("a")).await;
        writer.publish(ChangeKind::RequestAccepted, None).await;
        writer.publish(ChangeKind::RequestRejected, None).await;

        assert!(background_tab.take_dirty().await.unwrap());
        assert!(!background_tab.take_dirty().await.unwrap());
        assert!(!writer.take_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_marks_dirty() {
        let notifier = CrossTabNotifier::new(Arc::new(MemoryStorage::new()));
        notifier.publish(ChangeKind::RequestAccepted, None).await;
        assert!(notifier.take_dirty().await.unwrap());
    }
}
