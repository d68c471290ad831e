//! 连接状态监听器回调接口

use crate::social::connection::models::ConnectionStatus;
use crate::social::error::SyncError;
use async_trait::async_trait;

#[async_trait]
pub trait ConnectionListener: Send + Sync {
    /// 某个用户的连接状态发生变化（含乐观写入）
    async fn on_status_changed(
        &self,
        other_user_id: &str,
        status: ConnectionStatus,
        optimistic: bool,
    );

    /// 好友申请发送失败，作为内联错误展示
    async fn on_connect_failed(&self, other_user_id: &str, error: &SyncError);
}

/// 默认空实现（无操作）
pub struct EmptyConnectionListener;

#[async_trait]
impl ConnectionListener for EmptyConnectionListener {
    async fn on_status_changed(
        &self,
        _other_user_id: &str,
        _status: ConnectionStatus,
        _optimistic: bool,
    ) {
    }

    async fn on_connect_failed(&self, _other_user_id: &str, _error: &SyncError) {}
}
