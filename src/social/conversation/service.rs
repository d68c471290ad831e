//! 会话列表管理
//!
//! `ConversationBook` 是会话列表的本地状态，由列表管理器、消息线程加载器和发送管道共享。
//! 远端列表与本地状态合并时遵循：
//! - 本地顶置（发送后）且远端尚未确认的会话保留本地预览与时间，排在最前
//! - 本地已读的会话，除非远端有更新的消息，否则保持 `has_unread = false`
//! - 远端列表中缺失的本地会话不删除

use crate::social::conversation::api::MessagingService;
use crate::social::conversation::models::ConversationSummary;
use crate::social::error::SyncResult;
use crate::social::message::models::ChatMessage;
use crate::social::message::service::ThreadLoader;
use crate::social::notifier::SyncView;
use crate::social::session::Session;
use crate::social::types::ReadOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Default)]
struct BookState {
    conversations: Vec<ConversationSummary>,
    selected: Option<String>,
    /// 本地顶置：会话 → (顶置序号, 发送时间)
    bumped: HashMap<String, (u64, DateTime<Utc>)>,
    bump_seq: u64,
    /// 本地已读水位：会话 → 已读到的消息时间
    read_marks: HashMap<String, DateTime<Utc>>,
}

/// 共享的会话列表状态
#[derive(Clone, Default)]
pub struct ConversationBook {
    state: Arc<Mutex<BookState>>,
}

impl ConversationBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        self.lock().conversations.clone()
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationSummary> {
        self.lock()
            .conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
            .cloned()
    }

    pub fn find_by_user(&self, other_user_id: &str) -> Option<ConversationSummary> {
        self.lock()
            .conversations
            .iter()
            .find(|c| c.other_user_id == other_user_id)
            .cloned()
    }

    pub fn selected(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    /// 设置选中项，返回选中项是否发生变化
    fn set_selected(&self, conversation_id: &str) -> bool {
        let mut state = self.lock();
        if state.selected.as_deref() == Some(conversation_id) {
            return false;
        }
        state.selected = Some(conversation_id.to_string());
        true
    }

    fn clear(&self) {
        *self.lock() = BookState::default();
    }

    /// 发送成功后把会话移到最前，预览和时间取自发出的消息
    pub fn bump(&self, conversation: &ConversationSummary, message: &ChatMessage) {
        let mut state = self.lock();
        let mut entry = match state
            .conversations
            .iter()
            .position(|c| c.conversation_id == conversation.conversation_id)
        {
            Some(idx) => state.conversations.remove(idx),
            None => conversation.clone(),
        };
        entry.last_message_preview = Some(message.body.clone());
        entry.last_message_at = Some(message.sent_at);
        entry.has_unread = false;

        state.bump_seq += 1;
        let seq = state.bump_seq;
        state
            .bumped
            .insert(entry.conversation_id.clone(), (seq, message.sent_at));
        state.conversations.insert(0, entry);
    }

    /// 本地标记已读；`through` 为已读到的最新消息时间
    ///
    /// 会话还不在列表中时也记录已读水位，之后合并远端列表时生效
    pub fn mark_read(&self, conversation_id: &str, through: Option<DateTime<Utc>>) {
        let mut state = self.lock();
        let listed_at = match state
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            Some(entry) => {
                entry.has_unread = false;
                entry.last_message_at
            }
            None => None,
        };
        let watermark = match (through, listed_at) {
            (Some(a), Some(b)) => a.max(b),
            (a, b) => a.or(b).unwrap_or_else(Utc::now),
        };
        let previous = state.read_marks.get(conversation_id).copied();
        state.read_marks.insert(
            conversation_id.to_string(),
            previous.map_or(watermark, |p| p.max(watermark)),
        );
    }

    /// 插入到最前（去重）
    fn upsert_front(&self, conversation: ConversationSummary) {
        let mut state = self.lock();
        state.conversations.retain(|c| {
            c.conversation_id != conversation.conversation_id
                && c.other_user_id != conversation.other_user_id
        });
        state.conversations.insert(0, conversation);
    }

    /// 合并远端列表，返回合并后的列表
    pub(crate) fn merge_remote(
        &self,
        remote: Vec<ConversationSummary>,
    ) -> Vec<ConversationSummary> {
        let mut state = self.lock();
        let remote_ids: HashSet<String> =
            remote.iter().map(|c| c.conversation_id.clone()).collect();

        let mut pinned: Vec<(u64, ConversationSummary)> = Vec::new();
        let mut rest: Vec<ConversationSummary> = Vec::new();
        let mut confirmed: Vec<String> = Vec::new();

        for mut incoming in remote {
            let id = incoming.conversation_id.clone();
            if let Some(&(seq, bumped_at)) = state.bumped.get(&id) {
                let unconfirmed = incoming.last_message_at.map_or(true, |t| t < bumped_at);
                if unconfirmed {
                    if let Some(local) =
                        state.conversations.iter().find(|c| c.conversation_id == id)
                    {
                        pinned.push((seq, local.clone()));
                        continue;
                    }
                } else {
                    confirmed.push(id.clone());
                }
            }
            if let Some(&read_through) = state.read_marks.get(&id) {
                if incoming.has_unread
                    && incoming.last_message_at.map_or(true, |t| t <= read_through)
                {
                    incoming.has_unread = false;
                }
            }
            rest.push(incoming);
        }

        for local in &state.conversations {
            if remote_ids.contains(&local.conversation_id) {
                continue;
            }
            match state.bumped.get(&local.conversation_id) {
                Some(&(seq, _)) => pinned.push((seq, local.clone())),
                None => rest.push(local.clone()),
            }
        }

        for id in confirmed {
            state.bumped.remove(&id);
        }

        pinned.sort_by(|a, b| b.0.cmp(&a.0));
        rest.sort_by(ConversationSummary::recency_cmp);
        state.conversations = pinned.into_iter().map(|(_, c)| c).chain(rest).collect();
        state.conversations.clone()
    }
}

/// 会话列表管理器
pub struct ConversationListManager {
    session: Arc<Session>,
    service: Arc<dyn MessagingService>,
    book: ConversationBook,
    threads: Arc<ThreadLoader>,
}

impl ConversationListManager {
    pub fn new(
        session: Arc<Session>,
        service: Arc<dyn MessagingService>,
        book: ConversationBook,
        threads: Arc<ThreadLoader>,
    ) -> Self {
        Self {
            session,
            service,
            book,
            threads,
        }
    }

    pub fn book(&self) -> &ConversationBook {
        &self.book
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.book.snapshot()
    }

    pub fn selected(&self) -> Option<String> {
        self.book.selected()
    }

    /// 拉取远端会话列表并与本地合并，不改变选中项；失败时返回本地缓存和错误
    pub async fn refresh(&self) -> ReadOutcome<Vec<ConversationSummary>> {
        match self.service.list_conversations(&self.session.user_id).await {
            Ok(remote) => {
                let merged = self.book.merge_remote(remote);
                info!("[ConvList] ✅ 会话列表已同步，会话数: {}", merged.len());
                ReadOutcome::ok(merged)
            }
            Err(e) => {
                warn!("[ConvList] 拉取会话列表失败，保留本地缓存: {}", e);
                ReadOutcome::degraded(self.book.snapshot(), e)
            }
        }
    }

    /// 列表视图挂载：同 [`refresh`](Self::refresh)，还没有选中项时自动选中第一项并加载消息
    pub async fn list(&self) -> ReadOutcome<Vec<ConversationSummary>> {
        let outcome = self.refresh().await;
        if self.book.selected().is_none() {
            if let Some(first) = outcome.value.first() {
                let id = first.conversation_id.clone();
                debug!("[ConvList] 自动选中第一个会话: {}", id);
                self.select(&id).await;
            }
        }
        outcome
    }

    /// 选中会话并加载消息；重复选中当前会话不做任何事
    pub async fn select(&self, conversation_id: &str) {
        if !self.book.set_selected(conversation_id) {
            return;
        }
        debug!("[ConvList] 选中会话: {}", conversation_id);
        self.threads.load_thread(conversation_id).await;
    }

    pub fn bump_on_send(&self, conversation: &ConversationSummary, message: &ChatMessage) {
        self.book.bump(conversation, message);
    }

    /// 打开与某个用户的会话：已存在则直接选中，否则远端创建后插入最前并选中
    pub async fn open_with_user(&self, other_user_id: &str) -> SyncResult<ConversationSummary> {
        if let Some(existing) = self.book.find_by_user(other_user_id) {
            self.select(&existing.conversation_id).await;
            return Ok(existing);
        }

        let opened = self
            .service
            .open_conversation(&self.session.user_id, other_user_id)
            .await
            .inspect_err(|e| warn!("[ConvList] 打开与 {} 的会话失败: {}", other_user_id, e))?;
        info!(
            "[ConvList] 已打开与 {} 的会话: {}",
            other_user_id, opened.conversation_id
        );
        self.book.upsert_front(opened.clone());
        self.select(&opened.conversation_id).await;
        Ok(opened)
    }

    /// 登出时清空本地状态
    pub fn reset(&self) {
        self.book.clear();
    }
}

#[async_trait]
impl SyncView for ConversationListManager {
    fn name(&self) -> &'static str {
        "conversation-list"
    }

    async fn resync(&self) {
        self.refresh().await;
    }
}
