//! 消息线程加载器
//!
//! 按会话缓存消息历史。加载成功后替换缓存（保留尚未被远端列表包含的本地追加消息），
//! 随后本地标记已读并在后台通知远端。同一会话的重叠加载只有最新一次能写入。

use crate::social::conversation::api::MessagingService;
use crate::social::conversation::service::ConversationBook;
use crate::social::error::SyncError;
use crate::social::message::models::ChatMessage;
use crate::social::session::Session;
use crate::social::tasks::TaskSet;
use crate::social::types::ReadOutcome;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ThreadState {
    messages: Vec<ChatMessage>,
    /// 正在进行的加载代号
    loading: Option<u64>,
    loaded: bool,
    error: Option<SyncError>,
    /// 本地追加、远端结果中尚未出现的消息
    local_only: HashSet<String>,
}

/// 某个会话消息线程的只读快照
#[derive(Debug, Clone, Default)]
pub struct ThreadView {
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
    pub loaded: bool,
    pub error: Option<SyncError>,
}

pub struct ThreadLoader {
    session: Arc<Session>,
    service: Arc<dyn MessagingService>,
    book: ConversationBook,
    threads: Mutex<HashMap<String, ThreadState>>,
    generation: AtomicU64,
    tasks: TaskSet,
}

/// 按发送时间插入，时间相同时排在已有消息之后
fn insert_ordered(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    let idx = messages.partition_point(|m| m.sent_at <= message.sent_at);
    messages.insert(idx, message);
}

impl ThreadLoader {
    pub fn new(
        session: Arc<Session>,
        service: Arc<dyn MessagingService>,
        book: ConversationBook,
    ) -> Self {
        Self {
            session,
            service,
            book,
            threads: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            tasks: TaskSet::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ThreadState>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn thread(&self, conversation_id: &str) -> ThreadView {
        self.lock()
            .get(conversation_id)
            .map(|t| ThreadView {
                messages: t.messages.clone(),
                loading: t.loading.is_some(),
                loaded: t.loaded,
                error: t.error.clone(),
            })
            .unwrap_or_default()
    }

    pub fn is_loading(&self, conversation_id: &str) -> bool {
        self.lock()
            .get(conversation_id)
            .is_some_and(|t| t.loading.is_some())
    }

    /// 加载会话消息；失败时保留原有内容，错误记录在线程上并旁路返回
    pub async fn load_thread(&self, conversation_id: &str) -> ReadOutcome<Vec<ChatMessage>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock()
            .entry(conversation_id.to_string())
            .or_default()
            .loading = Some(generation);
        debug!("[Thread] 加载会话 {} 的消息（第 {} 次）", conversation_id, generation);

        let result = self
            .service
            .thread(&self.session.user_id, conversation_id)
            .await;

        let fetched = {
            let mut threads = self.lock();
            let state = threads.entry(conversation_id.to_string()).or_default();
            if state.loading != Some(generation) {
                debug!("[Thread] 会话 {} 的加载已被更新的请求取代", conversation_id);
                return match result {
                    Ok(_) => ReadOutcome::ok(state.messages.clone()),
                    Err(e) => ReadOutcome::degraded(state.messages.clone(), e),
                };
            }
            state.loading = None;

            match result {
                Ok(mut fetched) => {
                    fetched.sort_by_key(|m| m.sent_at);
                    // 已回填过的已读时间沿用旧值，重复加载结果一致
                    let known_reads: HashMap<&str, DateTime<Utc>> = state
                        .messages
                        .iter()
                        .filter_map(|m| m.read_at.map(|at| (m.id.as_str(), at)))
                        .collect();
                    let now = Utc::now();
                    for message in fetched.iter_mut() {
                        if message.read_at.is_none() && !message.is_from(&self.session.user_id) {
                            let read_at = known_reads.get(message.id.as_str()).copied();
                            message.read_at = Some(read_at.unwrap_or(now));
                        }
                    }
                    drop(known_reads);

                    let remote_ids: HashSet<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
                    let carried: Vec<ChatMessage> = state
                        .messages
                        .iter()
                        .filter(|m| {
                            state.local_only.contains(&m.id) && !remote_ids.contains(m.id.as_str())
                        })
                        .cloned()
                        .collect();
                    state.local_only = carried.iter().map(|m| m.id.clone()).collect();
                    for message in carried {
                        insert_ordered(&mut fetched, message);
                    }

                    state.messages = fetched;
                    state.loaded = true;
                    state.error = None;
                    state.messages.clone()
                }
                Err(e) => {
                    warn!("[Thread] 加载会话 {} 的消息失败: {}", conversation_id, e);
                    state.error = Some(e.clone());
                    return ReadOutcome::degraded(state.messages.clone(), e);
                }
            }
        };

        info!(
            "[Thread] ✅ 会话 {} 消息已加载，消息数: {}",
            conversation_id,
            fetched.len()
        );
        self.book
            .mark_read(conversation_id, fetched.last().map(|m| m.sent_at));
        self.mark_read_remote(conversation_id);
        ReadOutcome::ok(fetched)
    }

    /// 后台通知远端已读，失败只记日志
    fn mark_read_remote(&self, conversation_id: &str) {
        let service = self.service.clone();
        let user_id = self.session.user_id.clone();
        let conversation_id = conversation_id.to_string();
        self.tasks.spawn(async move {
            if let Err(e) = service.mark_read(&user_id, &conversation_id).await {
                warn!("[Thread] 标记会话 {} 已读失败: {}", conversation_id, e);
            }
        });
    }

    /// 追加一条消息（按发送时间保持有序），重复的 id 忽略；返回是否追加
    pub fn append(&self, conversation_id: &str, message: ChatMessage) -> bool {
        let mut threads = self.lock();
        let state = threads.entry(conversation_id.to_string()).or_default();
        if state.messages.iter().any(|m| m.id == message.id) {
            debug!("[Thread] 忽略重复消息 {}", message.id);
            return false;
        }
        state.local_only.insert(message.id.clone());
        insert_ordered(&mut state.messages, message);
        true
    }

    /// 后台已读任务数
    pub fn pending_tasks(&self) -> usize {
        self.tasks.active()
    }

    pub fn reset(&self) {
        self.tasks.abort_all();
        self.lock().clear();
    }

    pub fn dispose(&self) {
        self.tasks.abort_all();
    }
}
