//! 消息发送管道
//!
//! 每个会话同一时间只允许一次发送；成功后追加到线程、清空草稿、会话顶置，
//! 失败时保留草稿并记录会话级错误。

use crate::social::conversation::api::MessagingService;
use crate::social::conversation::models::ConversationSummary;
use crate::social::conversation::service::ConversationBook;
use crate::social::error::{SyncError, SyncResult};
use crate::social::message::models::{ChatMessage, SendMessagePayload};
use crate::social::message::service::ThreadLoader;
use crate::social::session::Session;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Default)]
struct ComposerState {
    drafts: HashMap<String, String>,
    errors: HashMap<String, SyncError>,
    sending: HashSet<String>,
}

pub struct Composer {
    session: Arc<Session>,
    service: Arc<dyn MessagingService>,
    threads: Arc<ThreadLoader>,
    book: ConversationBook,
    state: Arc<Mutex<ComposerState>>,
}

/// 发送结束（含 future 被丢弃）时释放会话的发送占用
struct SendingGuard {
    state: Arc<Mutex<ComposerState>>,
    conversation_id: String,
}

impl Drop for SendingGuard {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sending
            .remove(&self.conversation_id);
    }
}

impl Composer {
    pub fn new(
        session: Arc<Session>,
        service: Arc<dyn MessagingService>,
        threads: Arc<ThreadLoader>,
        book: ConversationBook,
    ) -> Self {
        Self {
            session,
            service,
            threads,
            book,
            state: Arc::new(Mutex::new(ComposerState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ComposerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_draft(&self, conversation_id: &str, body: impl Into<String>) {
        self.lock()
            .drafts
            .insert(conversation_id.to_string(), body.into());
    }

    pub fn draft(&self, conversation_id: &str) -> String {
        self.lock()
            .drafts
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 最近一次发送失败的错误
    pub fn error(&self, conversation_id: &str) -> Option<SyncError> {
        self.lock().errors.get(conversation_id).cloned()
    }

    pub fn is_sending(&self, conversation_id: &str) -> bool {
        self.lock().sending.contains(conversation_id)
    }

    /// 发送当前草稿
    pub async fn send_draft(&self, conversation: &ConversationSummary) -> SyncResult<ChatMessage> {
        let body = self.draft(&conversation.conversation_id);
        self.send(conversation, &body).await
    }

    pub async fn send(
        &self,
        conversation: &ConversationSummary,
        body: &str,
    ) -> SyncResult<ChatMessage> {
        let conversation_id = conversation.conversation_id.clone();
        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::validation("消息内容不能为空"));
        }

        let _guard = {
            let mut state = self.lock();
            if !state.sending.insert(conversation_id.clone()) {
                return Err(SyncError::validation("该会话有消息正在发送"));
            }
            state.errors.remove(&conversation_id);
            SendingGuard {
                state: self.state.clone(),
                conversation_id: conversation_id.clone(),
            }
        };

        let payload = SendMessagePayload::new(
            Some(conversation_id.clone()),
            conversation.other_user_id.clone(),
            body,
        );
        match self.service.send(&self.session.user_id, &payload).await {
            Ok(sent) => {
                info!("[Composer] ✅ 消息 {} 已发送到会话 {}", sent.id, conversation_id);
                self.threads.append(&conversation_id, sent.clone());
                self.lock().drafts.remove(&conversation_id);
                self.book.bump(conversation, &sent);
                Ok(sent)
            }
            Err(e) => {
                warn!("[Composer] 会话 {} 发送失败，保留草稿: {}", conversation_id, e);
                self.lock().errors.insert(conversation_id, e.clone());
                Err(e)
            }
        }
    }
}
