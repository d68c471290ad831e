//! 客户端入口
//!
//! 一个 `SocialClient` 对应一个客户端上下文（一个标签页）：
//! 持有当前会话、连接状态引擎、用户列表、会话列表、消息线程与发送管道，
//! 并负责跨上下文变更的监听、焦点恢复时的重新同步和销毁。

use crate::social::config::ClientConfig;
use crate::social::connection::{
    ConnectionApi, ConnectionListener, ConnectionService, ConnectionStatusEngine, EngineConfig,
    FeedLoader, StatusStore,
};
use crate::social::conversation::{
    ConversationBook, ConversationListManager, MessagingApi, MessagingService,
};
use crate::social::error::SyncResult;
use crate::social::message::{Composer, ThreadLoader};
use crate::social::notifier::{run_signal_listener, CrossTabNotifier, SyncView};
use crate::social::session::{Session, SessionStore};
use crate::social::storage::SharedStorage;
use crate::social::tasks::TaskSet;
use crate::social::types::build_http_client;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SocialClient {
    config: ClientConfig,
    session: Arc<Session>,
    storage: Arc<dyn SharedStorage>,
    notifier: Arc<CrossTabNotifier>,
    store: StatusStore,
    connection_service: Arc<dyn ConnectionService>,
    engine: Arc<ConnectionStatusEngine>,
    feed: FeedLoader,
    conversations: Arc<ConversationListManager>,
    threads: Arc<ThreadLoader>,
    composer: Composer,
    tasks: TaskSet,
}

impl SocialClient {
    /// 从共享存储加载当前用户，使用 HTTP 服务启动客户端
    pub async fn start(config: ClientConfig, storage: Arc<dyn SharedStorage>) -> SyncResult<Self> {
        let session = SessionStore::new(storage.clone()).require().await?;
        let http = build_http_client(&session.token)?;
        let connection_service: Arc<dyn ConnectionService> = Arc::new(ConnectionApi::new(
            http.clone(),
            config.api_base_url.clone(),
            config.feed_limit,
        ));
        let messaging: Arc<dyn MessagingService> =
            Arc::new(MessagingApi::new(http, config.api_base_url.clone()));
        Ok(Self::with_services(
            config,
            session,
            storage,
            connection_service,
            messaging,
        ))
    }

    /// 使用给定的远端服务组装客户端，必须在 tokio 运行时中调用
    pub fn with_services(
        config: ClientConfig,
        session: Session,
        storage: Arc<dyn SharedStorage>,
        connection_service: Arc<dyn ConnectionService>,
        messaging: Arc<dyn MessagingService>,
    ) -> Self {
        info!(
            "[Client] 🚀 启动客户端，用户: {}, API: {}",
            session.user_id, config.api_base_url
        );
        let session = Arc::new(session);
        let notifier = Arc::new(CrossTabNotifier::new(storage.clone()));
        let store = StatusStore::new();

        let engine = Arc::new(
            ConnectionStatusEngine::with_store(
                session.clone(),
                connection_service.clone(),
                store.clone(),
                EngineConfig::from(&config),
            )
            .with_notifier(notifier.clone()),
        );
        let feed = FeedLoader::new(session.clone(), connection_service.clone())
            .with_engine(engine.clone());

        let book = ConversationBook::new();
        let threads = Arc::new(ThreadLoader::new(
            session.clone(),
            messaging.clone(),
            book.clone(),
        ));
        let conversations = Arc::new(ConversationListManager::new(
            session.clone(),
            messaging.clone(),
            book.clone(),
            threads.clone(),
        ));
        let composer = Composer::new(session.clone(), messaging, threads.clone(), book);

        let tasks = TaskSet::new();
        let views: Vec<Arc<dyn SyncView>> = vec![
            engine.clone() as Arc<dyn SyncView>,
            conversations.clone() as Arc<dyn SyncView>,
        ];
        tasks.spawn(run_signal_listener(notifier.subscribe(), views));

        Self {
            config,
            session,
            storage,
            notifier,
            store,
            connection_service,
            engine,
            feed,
            conversations,
            threads,
            composer,
            tasks,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<CrossTabNotifier> {
        &self.notifier
    }

    /// 本上下文的主连接状态引擎
    pub fn engine(&self) -> &Arc<ConnectionStatusEngine> {
        &self.engine
    }

    /// 为某个组件（卡片、弹窗）创建引擎，与主引擎共享状态缓存
    pub fn status_engine(&self, listener: Arc<dyn ConnectionListener>) -> ConnectionStatusEngine {
        ConnectionStatusEngine::with_store(
            self.session.clone(),
            self.connection_service.clone(),
            self.store.clone(),
            EngineConfig::from(&self.config),
        )
        .with_notifier(self.notifier.clone())
        .with_listener(listener)
    }

    pub fn feed(&self) -> &FeedLoader {
        &self.feed
    }

    pub fn conversations(&self) -> &Arc<ConversationListManager> {
        &self.conversations
    }

    pub fn threads(&self) -> &Arc<ThreadLoader> {
        &self.threads
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// 重新获得焦点：其他上下文有过变更时重新同步所有视图
    ///
    /// 返回是否执行了同步；后台期间的多次变更只同步一次
    pub async fn on_focus_regained(&self) -> SyncResult<bool> {
        if !self.notifier.take_dirty().await? {
            debug!("[Client] 焦点恢复，没有待同步的变更");
            return Ok(false);
        }
        info!("[Client] 🔄 焦点恢复，检测到变更，重新同步");
        self.engine.resync().await;
        self.conversations.resync().await;
        Ok(true)
    }

    /// 取消所有后台任务
    pub fn dispose(&self) {
        debug!("[Client] 销毁客户端上下文");
        self.tasks.abort_all();
        self.engine.dispose();
        self.threads.dispose();
    }

    /// 登出：销毁本上下文并清除共享存储中的当前用户
    pub async fn logout(self) -> SyncResult<()> {
        self.dispose();
        self.threads.reset();
        self.conversations.reset();
        SessionStore::new(self.storage.clone()).clear().await?;
        info!("[Client] 👋 用户 {} 已登出", self.session.user_id);
        Ok(())
    }
}

impl Drop for SocialClient {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::connection::{ConnectionStatus, EmptyConnectionListener};
    use crate::social::error::SyncError;
    use crate::social::notifier::ChangeKind;
    use crate::social::storage::MemoryStorage;
    use crate::social::testing::{
        conversation, init_test_logger, message_at, FakeConnectionService, FakeMessagingService,
    };
    use std::time::Duration;

    fn tab(
        storage: &MemoryStorage,
        connections: &Arc<FakeConnectionService>,
        messaging: &Arc<FakeMessagingService>,
    ) -> SocialClient {
        init_test_logger();
        SocialClient::with_services(
            ClientConfig::default(),
            Session::new("me"),
            Arc::new(storage.clone()),
            connections.clone(),
            messaging.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn background_tab_converges_after_focus() {
        let storage = MemoryStorage::new();
        let connections = Arc::new(FakeConnectionService::new());
        let messaging = Arc::new(FakeMessagingService::new());
        let tab_a = tab(&storage, &connections, &messaging);
        let tab_b = tab(&storage, &connections, &messaging);

        assert_eq!(
            tab_b.engine().get_status("bob").await.value,
            ConnectionStatus::Connect
        );

        let ticket = tab_a
            .engine()
            .request_connect("bob", "hi")
            .unwrap()
            .into_ticket()
            .unwrap();
        ticket.outcome().await.unwrap().unwrap();

        // B 仍然显示旧值，直到重新获得焦点
        assert_eq!(
            tab_b.engine().cached_status("bob"),
            Some(ConnectionStatus::Connect)
        );
        assert!(tab_b.on_focus_regained().await.unwrap());
        assert_eq!(
            tab_b.engine().cached_status("bob"),
            Some(ConnectionStatus::Pending)
        );
        assert!(!tab_b.on_focus_regained().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn widgets_in_one_tab_share_status() {
        let storage = MemoryStorage::new();
        let connections = Arc::new(FakeConnectionService::new());
        let messaging = Arc::new(FakeMessagingService::new());
        let client = tab(&storage, &connections, &messaging);
        let card = client.status_engine(Arc::new(EmptyConnectionListener));
        let popup = client.status_engine(Arc::new(EmptyConnectionListener));

        assert!(popup.request_connect("bob", "hello").unwrap().is_submitted());
        assert_eq!(card.cached_status("bob"), Some(ConnectionStatus::Pending));
        assert_eq!(
            client.engine().cached_status("bob"),
            Some(ConnectionStatus::Pending)
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(connections.request_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn own_change_signal_resyncs_views_in_same_tab() {
        let storage = MemoryStorage::new();
        let connections = Arc::new(FakeConnectionService::new());
        let messaging = Arc::new(FakeMessagingService::new());
        messaging.set_conversations(vec![conversation("c1", "alice", 10)]);
        let client = tab(&storage, &connections, &messaging);
        client.engine().get_status("bob").await;
        assert_eq!(connections.status_calls(), 1);

        connections.set_status("me", "bob", ConnectionStatus::Friends);
        client
            .notifier()
            .publish(ChangeKind::RequestAccepted, Some("bob"))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(messaging.list_calls(), 1);
        assert_eq!(connections.status_calls(), 2);
        assert_eq!(
            client.engine().cached_status("bob"),
            Some(ConnectionStatus::Friends)
        );
        assert_eq!(client.conversations().conversations().len(), 1);
        // 后台同步不自动选中会话
        assert_eq!(client.conversations().selected(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_signal_listener_and_read_receipts() {
        let storage = MemoryStorage::new();
        let connections = Arc::new(FakeConnectionService::new());
        let messaging = Arc::new(FakeMessagingService::new());
        messaging.set_thread("c1", vec![message_at("m1", "c1", "alice", "me", "hey", 10)]);
        let client = tab(&storage, &connections, &messaging);

        messaging.set_latency(Duration::from_millis(50));
        client.threads().load_thread("c1").await;
        assert_eq!(client.threads().pending_tasks(), 1);

        client.dispose();
        client
            .notifier()
            .publish(ChangeKind::ConnectRequested, Some("bob"))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(messaging.list_calls(), 0);
        assert_eq!(messaging.mark_read_calls(), 0);
        assert_eq!(client.threads().pending_tasks(), 0);
        // 脏标记照常写入，其他标签页仍能感知
        assert!(client.notifier().is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn send_bumps_conversation_and_appends_message() {
        let storage = MemoryStorage::new();
        let connections = Arc::new(FakeConnectionService::new());
        let messaging = Arc::new(FakeMessagingService::new());
        messaging.set_conversations(vec![
            conversation("c1", "alice", 10),
            conversation("c2", "bob", 20),
        ]);
        let client = tab(&storage, &connections, &messaging);

        client.conversations().list().await;
        let c1 = client.conversations().book().get("c1").unwrap();
        client.composer().send(&c1, "hello").await.unwrap();

        let first = &client.conversations().conversations()[0];
        assert_eq!(first.conversation_id, "c1");
        assert_eq!(first.last_message_preview.as_deref(), Some("hello"));
        assert!(!first.has_unread);
        let thread = client.threads().thread("c1");
        assert_eq!(thread.messages.last().unwrap().body, "hello");
    }

    #[tokio::test]
    async fn start_requires_a_signed_in_user() {
        let storage = MemoryStorage::new();
        let result = SocialClient::start(ClientConfig::default(), Arc::new(storage.clone())).await;
        assert!(matches!(result, Err(SyncError::MissingSession)));

        let mut session = Session::new("me");
        session.token = "t0k3n".into();
        SessionStore::new(Arc::new(storage.clone()))
            .save(&session)
            .await
            .unwrap();
        let client = SocialClient::start(ClientConfig::default(), Arc::new(storage))
            .await
            .unwrap();
        assert_eq!(client.session().user_id, "me");
        assert_eq!(client.session().token, "t0k3n");
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let storage = MemoryStorage::new();
        let store = SessionStore::new(Arc::new(storage.clone()));
        store.save(&Session::new("me")).await.unwrap();
        let connections = Arc::new(FakeConnectionService::new());
        let messaging = Arc::new(FakeMessagingService::new());
        let client = tab(&storage, &connections, &messaging);

        client.logout().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
