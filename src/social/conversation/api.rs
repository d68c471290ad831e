//! 消息服务 HTTP API 客户端
//!
//! 会话列表、打开会话、拉取消息、发送消息、标记已读。
//! 当前用户通过 `X-User-Id` 请求头传递。

use crate::social::conversation::models::ConversationSummary;
use crate::social::error::SyncResult;
use crate::social::message::models::{ChatMessage, SendMessagePayload};
use crate::social::types::{handle_empty_response, handle_http_response};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

const USER_ID_HEADER: &str = "X-User-Id";

/// 远端消息服务
#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn list_conversations(&self, self_id: &str) -> SyncResult<Vec<ConversationSummary>>;

    /// 打开（必要时创建）与某个用户的会话
    async fn open_conversation(
        &self,
        self_id: &str,
        other_id: &str,
    ) -> SyncResult<ConversationSummary>;

    async fn thread(&self, self_id: &str, conversation_id: &str) -> SyncResult<Vec<ChatMessage>>;

    async fn send(&self, self_id: &str, payload: &SendMessagePayload) -> SyncResult<ChatMessage>;

    async fn mark_read(&self, self_id: &str, conversation_id: &str) -> SyncResult<()>;
}

pub struct MessagingApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl MessagingApi {
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/messages{}", self.api_base_url, path)
    }

    fn get(&self, url: &str, self_id: &str) -> reqwest::RequestBuilder {
        let operation_id = Uuid::new_v4().to_string();
        debug!("[MsgAPI]   GET {}, 操作ID: {}", url, operation_id);
        self.client
            .get(url)
            .header(USER_ID_HEADER, self_id)
            .header("operationID", operation_id)
    }
}

#[async_trait]
impl MessagingService for MessagingApi {
    async fn list_conversations(&self, self_id: &str) -> SyncResult<Vec<ConversationSummary>> {
        let url = self.url("/conversations");
        debug!("[MsgAPI] 📡 请求会话列表");

        let response = self.get(&url, self_id).send().await?;
        let list = handle_http_response::<Vec<ConversationSummary>>(response, "会话列表").await?;
        info!("[MsgAPI] ✅ 会话列表响应，会话数: {}", list.len());
        Ok(list)
    }

    async fn open_conversation(
        &self,
        self_id: &str,
        other_id: &str,
    ) -> SyncResult<ConversationSummary> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url(&format!("/conversations/{}", other_id));
        info!("[MsgAPI] 📡 打开与 {} 的会话", other_id);
        debug!("[MsgAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header(USER_ID_HEADER, self_id)
            .header("operationID", operation_id)
            .send()
            .await?;
        handle_http_response::<ConversationSummary>(response, "打开会话").await
    }

    async fn thread(&self, self_id: &str, conversation_id: &str) -> SyncResult<Vec<ChatMessage>> {
        let url = self.url(&format!("/conversations/{}/messages", conversation_id));
        debug!("[MsgAPI] 📡 请求会话 {} 的消息", conversation_id);

        let response = self.get(&url, self_id).send().await?;
        let messages = handle_http_response::<Vec<ChatMessage>>(response, "会话消息").await?;
        debug!(
            "[MsgAPI] ✅ 会话 {} 消息响应，消息数: {}",
            conversation_id,
            messages.len()
        );
        Ok(messages)
    }

    async fn send(&self, self_id: &str, payload: &SendMessagePayload) -> SyncResult<ChatMessage> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url("");
        info!(
            "[MsgAPI] 📡 发送消息 -> {}（会话: {:?}）",
            payload.recipient_id, payload.conversation_id
        );
        debug!("[MsgAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header(USER_ID_HEADER, self_id)
            .header("operationID", operation_id)
            .json(payload)
            .send()
            .await?;
        let sent = handle_http_response::<ChatMessage>(response, "发送消息").await?;
        info!("[MsgAPI] ✅ 消息已发送: {}", sent.id);
        Ok(sent)
    }

    async fn mark_read(&self, self_id: &str, conversation_id: &str) -> SyncResult<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url(&format!("/conversations/{}/read", conversation_id));
        debug!("[MsgAPI] 📡 标记会话 {} 已读, 操作ID: {}", conversation_id, operation_id);

        let response = self
            .client
            .patch(&url)
            .header(USER_ID_HEADER, self_id)
            .header("operationID", operation_id)
            .send()
            .await?;
        handle_empty_response(response, "标记已读").await
    }
}
