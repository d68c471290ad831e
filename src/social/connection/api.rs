//! 连接 HTTP API 客户端
//!
//! 负责所有连接（好友关系）相关的 HTTP 请求

use crate::social::connection::models::{
    ConnectionRequest, ConnectionStatus, FeedKind, UserSummary,
};
use crate::social::error::{SyncError, SyncResult};
use crate::social::types::{handle_http_response, read_http_body};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// 远端连接服务
#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn status(&self, self_id: &str, other_id: &str) -> SyncResult<ConnectionStatus>;

    async fn request(
        &self,
        self_id: &str,
        other_id: &str,
        message: &str,
    ) -> SyncResult<ConnectionRequest>;

    async fn accept(&self, request_id: &str, self_id: &str) -> SyncResult<ConnectionRequest>;

    async fn reject(&self, request_id: &str, self_id: &str) -> SyncResult<ConnectionRequest>;

    async fn pending_requests(&self, self_id: &str) -> SyncResult<Vec<ConnectionRequest>>;

    async fn feed(&self, kind: FeedKind, self_id: &str) -> SyncResult<Vec<UserSummary>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConnectionRequest<'a> {
    to_user_id: &'a str,
    message: &'a str,
}

/// 连接相关的 HTTP API 客户端
pub struct ConnectionApi {
    client: reqwest::Client,
    api_base_url: String,
    feed_limit: u32,
}

impl ConnectionApi {
    /// 创建新的连接 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String, feed_limit: u32) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            feed_limit,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/connections/{}", self.api_base_url, path)
    }

    async fn post_request_action(
        &self,
        action: &str,
        request_id: &str,
        self_id: &str,
    ) -> SyncResult<ConnectionRequest> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url(&format!("{}/{}", action, request_id));

        info!("[ConnAPI] 📡 处理好友申请: {} {}", action, request_id);
        debug!("[ConnAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("operationID", &operation_id)
            .query(&[("userId", self_id)])
            .send()
            .await?;

        handle_http_response::<ConnectionRequest>(response, "处理好友申请").await
    }
}

#[async_trait]
impl ConnectionService for ConnectionApi {
    async fn status(&self, self_id: &str, other_id: &str) -> SyncResult<ConnectionStatus> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url("status");

        debug!(
            "[ConnAPI] 📡 查询连接状态 {} -> {}, 操作ID: {}",
            self_id, other_id, operation_id
        );

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .query(&[("fromUserId", self_id), ("toUserId", other_id)])
            .send()
            .await?;

        // 服务端直接返回状态字符串
        let body = read_http_body(response, "连接状态").await?;
        body.text
            .parse::<ConnectionStatus>()
            .map_err(|e| SyncError::server(200, e))
    }

    async fn request(
        &self,
        self_id: &str,
        other_id: &str,
        message: &str,
    ) -> SyncResult<ConnectionRequest> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url("request");

        info!("[ConnAPI] 📡 发送好友申请 {} -> {}", self_id, other_id);
        debug!("[ConnAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("operationID", &operation_id)
            .query(&[("fromUserId", self_id)])
            .json(&CreateConnectionRequest {
                to_user_id: other_id,
                message,
            })
            .send()
            .await?;

        let created = handle_http_response::<ConnectionRequest>(response, "发送好友申请").await?;
        info!("[ConnAPI] ✅ 好友申请已创建: {}", created.id);
        Ok(created)
    }

    async fn accept(&self, request_id: &str, self_id: &str) -> SyncResult<ConnectionRequest> {
        self.post_request_action("accept", request_id, self_id).await
    }

    async fn reject(&self, request_id: &str, self_id: &str) -> SyncResult<ConnectionRequest> {
        self.post_request_action("reject", request_id, self_id).await
    }

    async fn pending_requests(&self, self_id: &str) -> SyncResult<Vec<ConnectionRequest>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url("pending-requests");

        debug!("[ConnAPI] 📡 请求待处理好友申请, 操作ID: {}", operation_id);

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .query(&[("userId", self_id)])
            .send()
            .await?;

        let requests =
            handle_http_response::<Vec<ConnectionRequest>>(response, "待处理好友申请").await?;
        info!("[ConnAPI] ✅ 待处理好友申请，条目数: {}", requests.len());
        Ok(requests)
    }

    async fn feed(&self, kind: FeedKind, self_id: &str) -> SyncResult<Vec<UserSummary>> {
        let operation_id = Uuid::new_v4().to_string();
        let path = match kind {
            FeedKind::Suggested => "suggested-users",
            FeedKind::Friends => "friends",
            FeedKind::Recent => "recent-users",
            FeedKind::SameCity => "same-city-users",
        };
        let url = self.url(path);
        let limit = self.feed_limit.to_string();

        debug!(
            "[ConnAPI] 📡 请求用户列表 {}, 操作ID: {}",
            kind.as_str(),
            operation_id
        );

        let mut request = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .query(&[("currentUserId", self_id)]);
        if kind != FeedKind::Friends {
            request = request.query(&[("limit", limit.as_str())]);
        }
        let response = request.send().await?;

        let users = handle_http_response::<Vec<UserSummary>>(response, kind.as_str()).await?;
        info!(
            "[ConnAPI] ✅ 用户列表 {} 响应，用户数: {}",
            kind.as_str(),
            users.len()
        );
        Ok(users)
    }
}
