//! 测试用的进程内假服务与数据构造函数

use crate::social::connection::api::ConnectionService;
use crate::social::connection::models::{
    ConnectionRequest, ConnectionStatus, FeedKind, RequestState, UserSummary,
};
use crate::social::conversation::api::MessagingService;
use crate::social::conversation::models::ConversationSummary;
use crate::social::error::{SyncError, SyncResult};
use crate::social::message::models::{ChatMessage, SendMessagePayload};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

static INIT_LOGGER: Once = Once::new();

pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,social_sync_core=debug,sqlx=info");
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

pub fn user(id: &str) -> UserSummary {
    UserSummary {
        user_id: id.to_string(),
        first_name: id.to_string(),
        last_name: "Test".to_string(),
        email: format!("{id}@example.com"),
        profile: Default::default(),
    }
}

/// 最近消息时间为 UNIX 秒 `at` 的会话
pub fn conversation(id: &str, other: &str, at: i64) -> ConversationSummary {
    ConversationSummary {
        conversation_id: id.to_string(),
        other_user_id: other.to_string(),
        other_user_name: other.to_string(),
        other_user_photo_url: None,
        last_message_preview: Some(format!("last in {id}")),
        last_message_at: Utc.timestamp_opt(at, 0).single(),
        has_unread: false,
    }
}

pub fn message_at(
    id: &str,
    conversation_id: &str,
    sender: &str,
    recipient: &str,
    body: &str,
    at: i64,
) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender.to_string(),
        sender_name: sender.to_string(),
        sender_profile_pic_url: None,
        recipient_id: recipient.to_string(),
        body: body.to_string(),
        sent_at: Utc.timestamp_opt(at, 0).unwrap(),
        read_at: None,
    }
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

async fn delay(latency: &Mutex<Duration>) {
    let latency = *latency.lock().unwrap();
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// 假的连接服务，多个客户端共用同一个实例即模拟同一个后端
#[derive(Default)]
pub struct FakeConnectionService {
    statuses: Mutex<HashMap<(String, String), ConnectionStatus>>,
    requests: Mutex<Vec<ConnectionRequest>>,
    feeds: Mutex<HashMap<FeedKind, Vec<UserSummary>>>,
    failing_feeds: Mutex<HashSet<FeedKind>>,
    status_error: Mutex<Option<SyncError>>,
    request_error: Mutex<Option<SyncError>>,
    latency: Mutex<Duration>,
    status_calls: AtomicUsize,
    request_calls: AtomicUsize,
}

impl FakeConnectionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, a: &str, b: &str, status: ConnectionStatus) {
        self.statuses.lock().unwrap().insert(pair(a, b), status);
    }

    pub fn remote_status(&self, a: &str, b: &str) -> ConnectionStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(&pair(a, b))
            .copied()
            .unwrap_or(ConnectionStatus::Connect)
    }

    pub fn fail_status(&self, error: Option<SyncError>) {
        *self.status_error.lock().unwrap() = error;
    }

    pub fn fail_request(&self, error: Option<SyncError>) {
        *self.request_error.lock().unwrap() = error;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_feed(&self, kind: FeedKind, users: Vec<UserSummary>) {
        self.feeds.lock().unwrap().insert(kind, users);
    }

    pub fn fail_feed(&self, kind: FeedKind) {
        self.failing_feeds.lock().unwrap().insert(kind);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    fn resolve(
        &self,
        request_id: &str,
        self_id: &str,
        state: RequestState,
    ) -> SyncResult<ConnectionRequest> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .iter_mut()
            .find(|r| r.id == request_id && r.to_user_id == self_id)
            .ok_or_else(|| SyncError::server(404, "Request not found"))?;
        request.status = state;
        let resolved = request.clone();
        drop(requests);

        let status = match state {
            RequestState::Accepted => ConnectionStatus::Friends,
            _ => ConnectionStatus::Connect,
        };
        self.set_status(&resolved.from_user_id, &resolved.to_user_id, status);
        Ok(resolved)
    }
}

#[async_trait]
impl ConnectionService for FakeConnectionService {
    async fn status(&self, self_id: &str, other_id: &str) -> SyncResult<ConnectionStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        delay(&self.latency).await;
        if let Some(e) = self.status_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.remote_status(self_id, other_id))
    }

    async fn request(
        &self,
        self_id: &str,
        other_id: &str,
        message: &str,
    ) -> SyncResult<ConnectionRequest> {
        let n = self.request_calls.fetch_add(1, Ordering::SeqCst) + 1;
        delay(&self.latency).await;
        if let Some(e) = self.request_error.lock().unwrap().clone() {
            return Err(e);
        }
        let created = ConnectionRequest {
            id: format!("req-{n}"),
            from_user_id: self_id.to_string(),
            to_user_id: other_id.to_string(),
            message: message.to_string(),
            status: RequestState::Pending,
            created_at: None,
            updated_at: None,
        };
        self.requests.lock().unwrap().push(created.clone());
        self.set_status(self_id, other_id, ConnectionStatus::Pending);
        Ok(created)
    }

    async fn accept(&self, request_id: &str, self_id: &str) -> SyncResult<ConnectionRequest> {
        delay(&self.latency).await;
        self.resolve(request_id, self_id, RequestState::Accepted)
    }

    async fn reject(&self, request_id: &str, self_id: &str) -> SyncResult<ConnectionRequest> {
        delay(&self.latency).await;
        self.resolve(request_id, self_id, RequestState::Rejected)
    }

    async fn pending_requests(&self, self_id: &str) -> SyncResult<Vec<ConnectionRequest>> {
        delay(&self.latency).await;
        Ok(self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.to_user_id == self_id && r.status == RequestState::Pending)
            .cloned()
            .collect())
    }

    async fn feed(&self, kind: FeedKind, _self_id: &str) -> SyncResult<Vec<UserSummary>> {
        delay(&self.latency).await;
        if self.failing_feeds.lock().unwrap().contains(&kind) {
            return Err(SyncError::server(500, format!("{} unavailable", kind.as_str())));
        }
        Ok(self
            .feeds
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}

/// 假的消息服务
#[derive(Default)]
pub struct FakeMessagingService {
    conversations: Mutex<Vec<ConversationSummary>>,
    threads: Mutex<HashMap<String, Vec<ChatMessage>>>,
    sent: Mutex<Vec<SendMessagePayload>>,
    list_error: Mutex<Option<SyncError>>,
    thread_error: Mutex<Option<SyncError>>,
    send_error: Mutex<Option<SyncError>>,
    latency: Mutex<Duration>,
    list_calls: AtomicUsize,
    open_calls: AtomicUsize,
    thread_calls: AtomicUsize,
    send_calls: AtomicUsize,
    mark_read_calls: AtomicUsize,
}

impl FakeMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_conversations(&self, list: Vec<ConversationSummary>) {
        *self.conversations.lock().unwrap() = list;
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.conversations.lock().unwrap().clone()
    }

    pub fn set_thread(&self, conversation_id: &str, messages: Vec<ChatMessage>) {
        self.threads
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), messages);
    }

    pub fn fail_list(&self, error: Option<SyncError>) {
        *self.list_error.lock().unwrap() = error;
    }

    pub fn fail_thread(&self, error: Option<SyncError>) {
        *self.thread_error.lock().unwrap() = error;
    }

    pub fn fail_send(&self, error: Option<SyncError>) {
        *self.send_error.lock().unwrap() = error;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn sent_payloads(&self) -> Vec<SendMessagePayload> {
        self.sent.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn thread_calls(&self) -> usize {
        self.thread_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn mark_read_calls(&self) -> usize {
        self.mark_read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingService for FakeMessagingService {
    async fn list_conversations(&self, _self_id: &str) -> SyncResult<Vec<ConversationSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        delay(&self.latency).await;
        if let Some(e) = self.list_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.conversations())
    }

    async fn open_conversation(
        &self,
        _self_id: &str,
        other_id: &str,
    ) -> SyncResult<ConversationSummary> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        delay(&self.latency).await;
        let opened = ConversationSummary {
            last_message_preview: None,
            last_message_at: None,
            ..conversation(&format!("conv-{other_id}"), other_id, 0)
        };
        self.conversations.lock().unwrap().push(opened.clone());
        Ok(opened)
    }

    async fn thread(&self, _self_id: &str, conversation_id: &str) -> SyncResult<Vec<ChatMessage>> {
        self.thread_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self
            .threads
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        delay(&self.latency).await;
        if let Some(e) = self.thread_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(snapshot)
    }

    async fn send(&self, self_id: &str, payload: &SendMessagePayload) -> SyncResult<ChatMessage> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        delay(&self.latency).await;
        if let Some(e) = self.send_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.sent.lock().unwrap().push(payload.clone());
        let conversation_id = payload
            .conversation_id
            .clone()
            .unwrap_or_else(|| format!("conv-{}", payload.recipient_id));
        Ok(ChatMessage {
            id: format!("sent-{n}"),
            conversation_id,
            sender_id: self_id.to_string(),
            sender_name: self_id.to_string(),
            sender_profile_pic_url: None,
            recipient_id: payload.recipient_id.clone(),
            body: payload.body.clone(),
            sent_at: Utc::now(),
            read_at: None,
        })
    }

    async fn mark_read(&self, _self_id: &str, _conversation_id: &str) -> SyncResult<()> {
        delay(&self.latency).await;
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
