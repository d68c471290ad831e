//! 连接状态引擎
//!
//! 按 (self, other) 维护 CONNECT / PENDING / FRIENDS 状态：
//! - 读取：命中未过期缓存直接返回，否则查询远端；失败时降级为 CONNECT，错误旁路返回
//! - 发起申请：同步地乐观写入 PENDING，后台发送请求，延迟后清除乐观标记并对账
//! - 乐观标记置位期间，任何对账读取都不能覆盖缓存值

use crate::social::config::{ClientConfig, ReconcilePolicy};
use crate::social::connection::api::ConnectionService;
use crate::social::connection::listener::{ConnectionListener, EmptyConnectionListener};
use crate::social::connection::models::{ConnectionRequest, ConnectionStatus, StatusEntry};
use crate::social::error::{SyncError, SyncResult};
use crate::social::notifier::{ChangeKind, CrossTabNotifier, SyncView};
use crate::social::session::Session;
use crate::social::types::ReadOutcome;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type PairKey = (String, String);

/// 按 (self, other) 索引的状态缓存
///
/// 克隆共享同一份数据：同一上下文内的多个引擎实例共用一个 store 时，
/// 同一对用户只有一份乐观状态；各自新建 store 则互相隔离。
#[derive(Clone, Default)]
pub struct StatusStore {
    entries: Arc<Mutex<HashMap<PairKey, StatusEntry>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PairKey, StatusEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, self_id: &str, other_id: &str) -> Option<StatusEntry> {
        self.lock()
            .get(&(self_id.to_string(), other_id.to_string()))
            .cloned()
    }

    /// 当前用户已缓存的所有对方用户
    pub fn cached_others(&self, self_id: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(s, _)| s == self_id)
            .map(|(_, o)| o.clone())
            .collect()
    }

    fn epoch(&self, key: &PairKey) -> u64 {
        self.lock().get(key).map(|e| e.epoch).unwrap_or(0)
    }

    /// 写入远端读取结果，返回写入后缓存中的值
    ///
    /// 条目处于乐观状态，或读取期间发生过乐观写入/强制覆盖（epoch 变化）时放弃写入
    fn apply_remote(
        &self,
        key: &PairKey,
        remote: ConnectionStatus,
        epoch_seen: u64,
    ) -> (ConnectionStatus, bool) {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            None => {
                entries.insert(key.clone(), StatusEntry::confirmed(remote));
                (remote, true)
            }
            Some(entry) if entry.optimistic || entry.epoch != epoch_seen => {
                debug!(
                    "[ConnEngine] 丢弃对账结果 {} -> {}: 条目处于乐观状态或已被覆盖",
                    key.1, remote
                );
                (entry.status, false)
            }
            Some(entry) => {
                let changed = entry.status != remote;
                if changed && !entry.status.can_transition_to(remote) {
                    warn!(
                        "[ConnEngine] 远端状态跳变 {} -> {}（对方: {}），以远端为准",
                        entry.status, remote, key.1
                    );
                }
                entry.status = remote;
                entry.fetched_at = Some(Instant::now());
                (remote, changed)
            }
        }
    }

    /// 读取失败：没有缓存时写入 CONNECT（标记为过期，下次读取会重试），有缓存时保持不变
    fn apply_read_failure(&self, key: &PairKey) -> ConnectionStatus {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| StatusEntry {
            fetched_at: None,
            ..StatusEntry::confirmed(ConnectionStatus::Connect)
        });
        entry.status
    }

    /// 对账开始前清除乐观标记；epoch 已变化说明被强制覆盖过，返回 false
    fn clear_optimistic(&self, key: &PairKey, epoch: u64) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.epoch == epoch => {
                entry.optimistic = false;
                entry.in_flight = false;
                true
            }
            _ => false,
        }
    }

    fn set_error(&self, key: &PairKey, epoch: u64, error: SyncError) {
        if let Some(entry) = self.lock().get_mut(key) {
            if entry.epoch == epoch {
                entry.last_error = Some(error);
            }
        }
    }

    /// 对账读取失败时的兜底：申请已失败则回到 CONNECT，否则保持并标记过期
    fn settle_unconfirmed(
        &self,
        key: &PairKey,
        epoch: u64,
        request_failed: bool,
    ) -> Option<ConnectionStatus> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        if entry.epoch != epoch {
            return None;
        }
        entry.fetched_at = None;
        if request_failed {
            entry.status = ConnectionStatus::Connect;
            return Some(ConnectionStatus::Connect);
        }
        None
    }
}

/// 引擎参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reconcile_delay: Duration,
    pub stale_after: Duration,
    pub policy: ReconcilePolicy,
}

impl From<&ClientConfig> for EngineConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconcile_delay: config.reconcile_delay,
            stale_after: config.status_stale_after,
            policy: config.reconcile_policy,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// `request_connect` 的结果
#[derive(Debug)]
pub enum ConnectAttempt {
    /// 已乐观写入 PENDING，后台请求进行中
    Submitted(ConnectTicket),
    /// 同一对用户已有申请在进行，本次调用不做任何事
    AlreadyInFlight,
    /// 当前状态不是 CONNECT，不能发起申请
    NotConnectable(ConnectionStatus),
}

impl ConnectAttempt {
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted(_))
    }

    pub fn into_ticket(self) -> Option<ConnectTicket> {
        match self {
            Self::Submitted(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// 后台申请任务的句柄，等待它可以拿到远端请求的结果
#[derive(Debug)]
pub struct ConnectTicket {
    handle: JoinHandle<SyncResult<ConnectionRequest>>,
}

impl ConnectTicket {
    /// 等待请求与对账结束；任务被取消时返回 `None`
    pub async fn outcome(self) -> Option<SyncResult<ConnectionRequest>> {
        self.handle.await.ok()
    }
}

/// 连接状态引擎
pub struct ConnectionStatusEngine {
    session: Arc<Session>,
    service: Arc<dyn ConnectionService>,
    store: StatusStore,
    notifier: Option<Arc<CrossTabNotifier>>,
    listener: Arc<dyn ConnectionListener>,
    config: EngineConfig,
    /// 本实例发起的对账任务：对方用户 → (任务, epoch)
    pending: Mutex<HashMap<String, (AbortHandle, u64)>>,
}

impl ConnectionStatusEngine {
    /// 创建引擎（使用独立 store、默认空监听器、不广播变更）
    pub fn new(session: Arc<Session>, service: Arc<dyn ConnectionService>) -> Self {
        Self::with_store(session, service, StatusStore::new(), EngineConfig::default())
    }

    /// 创建引擎（使用给定 store，可与其他实例共享）
    pub fn with_store(
        session: Arc<Session>,
        service: Arc<dyn ConnectionService>,
        store: StatusStore,
        config: EngineConfig,
    ) -> Self {
        info!(
            "[ConnEngine] 创建连接状态引擎，用户ID: {}, 对账延迟: {:?}, 策略: {:?}",
            session.user_id, config.reconcile_delay, config.policy
        );
        Self {
            session,
            service,
            store,
            notifier: None,
            listener: Arc::new(EmptyConnectionListener),
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<CrossTabNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    fn key(&self, other_id: &str) -> PairKey {
        (self.session.user_id.clone(), other_id.to_string())
    }

    fn is_fresh(&self, entry: &StatusEntry) -> bool {
        entry
            .fetched_at
            .map(|at| at.elapsed() < self.config.stale_after)
            .unwrap_or(false)
    }

    /// 同步读取缓存值（不触发网络）
    pub fn cached_status(&self, other_id: &str) -> Option<ConnectionStatus> {
        self.store
            .get(&self.session.user_id, other_id)
            .map(|e| e.status)
    }

    pub fn entry(&self, other_id: &str) -> Option<StatusEntry> {
        self.store.get(&self.session.user_id, other_id)
    }

    /// 最近一次申请失败的内联错误
    pub fn inline_error(&self, other_id: &str) -> Option<SyncError> {
        self.entry(other_id).and_then(|e| e.last_error)
    }

    /// 查询连接状态，永不失败
    pub async fn get_status(&self, other_id: &str) -> ReadOutcome<ConnectionStatus> {
        if let Some(entry) = self.entry(other_id) {
            if entry.optimistic || self.is_fresh(&entry) {
                return ReadOutcome::ok(entry.status);
            }
        }
        self.fetch_and_apply(other_id).await
    }

    /// 强制重新查询（乐观状态下仍返回缓存值）
    pub async fn refresh(&self, other_id: &str) -> ReadOutcome<ConnectionStatus> {
        if let Some(entry) = self.entry(other_id) {
            if entry.optimistic {
                debug!("[ConnEngine] {} 处于乐观状态，跳过刷新", other_id);
                return ReadOutcome::ok(entry.status);
            }
        }
        self.fetch_and_apply(other_id).await
    }

    async fn fetch_and_apply(&self, other_id: &str) -> ReadOutcome<ConnectionStatus> {
        let key = self.key(other_id);
        let epoch_seen = self.store.epoch(&key);

        match self.service.status(&self.session.user_id, other_id).await {
            Ok(remote) => {
                let (status, changed) = self.store.apply_remote(&key, remote, epoch_seen);
                if changed {
                    self.listener
                        .on_status_changed(other_id, status, false)
                        .await;
                }
                ReadOutcome::ok(status)
            }
            Err(e) => {
                warn!("[ConnEngine] 查询连接状态失败（对方: {}）: {}", other_id, e);
                let status = self.store.apply_read_failure(&key);
                ReadOutcome::degraded(status, e)
            }
        }
    }

    /// 使缓存过期，下次读取会重新查询
    pub fn invalidate(&self, other_id: &str) {
        let key = self.key(other_id);
        if let Some(entry) = self.store.lock().get_mut(&key) {
            entry.fetched_at = None;
        }
    }

    /// 发起好友申请
    ///
    /// 在返回前同步写入乐观 PENDING，网络请求与对账在后台任务中进行。
    /// 必须在 tokio 运行时中调用。
    pub fn request_connect(&self, other_id: &str, message: &str) -> SyncResult<ConnectAttempt> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SyncError::validation("申请留言不能为空"));
        }
        if other_id.trim().is_empty() {
            return Err(SyncError::validation("对方用户 ID 不能为空"));
        }
        if other_id == self.session.user_id {
            return Err(SyncError::validation("不能向自己发送好友申请"));
        }

        let key = self.key(other_id);
        let deadline = Instant::now() + self.config.reconcile_delay;
        let epoch = {
            let mut entries = self.store.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| StatusEntry {
                fetched_at: None,
                ..StatusEntry::confirmed(ConnectionStatus::Connect)
            });
            if entry.in_flight {
                debug!("[ConnEngine] {} 已有申请在进行，忽略重复提交", other_id);
                return Ok(ConnectAttempt::AlreadyInFlight);
            }
            if entry.status != ConnectionStatus::Connect {
                return Ok(ConnectAttempt::NotConnectable(entry.status));
            }
            entry.status = ConnectionStatus::Pending;
            entry.optimistic = true;
            entry.in_flight = true;
            entry.epoch += 1;
            entry.last_error = None;
            entry.epoch
        };
        info!(
            "[ConnEngine] 🤝 乐观写入 PENDING（对方: {}），{:?} 后对账",
            other_id, self.config.reconcile_delay
        );

        let task = ReconcileTask {
            session: self.session.clone(),
            service: self.service.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            listener: self.listener.clone(),
            policy: self.config.policy,
            key,
            epoch,
            deadline,
            message: message.to_string(),
        };
        let handle = tokio::spawn(task.run());

        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|_, (h, _)| !h.is_finished());
            pending.insert(other_id.to_string(), (handle.abort_handle(), epoch));
        }

        Ok(ConnectAttempt::Submitted(ConnectTicket { handle }))
    }

    /// 接受好友申请；成功后由调用方负责刷新相关状态和待处理列表
    pub async fn accept_request(&self, request_id: &str) -> SyncResult<ConnectionRequest> {
        let accepted = self
            .service
            .accept(request_id, &self.session.user_id)
            .await
            .inspect_err(|e| warn!("[ConnEngine] 接受好友申请 {} 失败: {}", request_id, e))?;
        info!("[ConnEngine] ✅ 已接受好友申请 {}", request_id);
        if let Some(notifier) = &self.notifier {
            notifier
                .publish(ChangeKind::RequestAccepted, Some(&accepted.from_user_id))
                .await;
        }
        Ok(accepted)
    }

    /// 拒绝好友申请；成功后由调用方负责刷新相关状态和待处理列表
    pub async fn reject_request(&self, request_id: &str) -> SyncResult<ConnectionRequest> {
        let rejected = self
            .service
            .reject(request_id, &self.session.user_id)
            .await
            .inspect_err(|e| warn!("[ConnEngine] 拒绝好友申请 {} 失败: {}", request_id, e))?;
        info!("[ConnEngine] 已拒绝好友申请 {}", request_id);
        if let Some(notifier) = &self.notifier {
            notifier
                .publish(ChangeKind::RequestRejected, Some(&rejected.from_user_id))
                .await;
        }
        Ok(rejected)
    }

    /// 待处理的好友申请，失败时降级为空列表
    pub async fn pending_requests(&self) -> ReadOutcome<Vec<ConnectionRequest>> {
        match self.service.pending_requests(&self.session.user_id).await {
            Ok(requests) => ReadOutcome::ok(requests),
            Err(e) => {
                warn!("[ConnEngine] 获取待处理好友申请失败: {}", e);
                ReadOutcome::degraded(Vec::new(), e)
            }
        }
    }

    /// 外部信号：已知双方是好友，绕过状态机直接写入 FRIENDS
    pub async fn force_friends(&self, other_id: &str) {
        let key = self.key(other_id);
        let previous = {
            let mut entries = self.store.lock();
            let entry = entries
                .entry(key)
                .or_insert_with(|| StatusEntry::confirmed(ConnectionStatus::Friends));
            let previous = entry.status;
            entry.status = ConnectionStatus::Friends;
            entry.optimistic = false;
            entry.in_flight = false;
            entry.epoch += 1;
            entry.fetched_at = Some(Instant::now());
            entry.last_error = None;
            previous
        };
        if let Ok(mut pending) = self.pending.lock() {
            if let Some((handle, _)) = pending.remove(other_id) {
                handle.abort();
            }
        }
        if previous != ConnectionStatus::Friends {
            debug!("[ConnEngine] 强制写入 FRIENDS（对方: {}）", other_id);
            self.listener
                .on_status_changed(other_id, ConnectionStatus::Friends, false)
                .await;
        }
    }

    /// 批量标记好友（例如好友列表加载完成后）
    pub async fn seed_friends<I, S>(&self, other_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in other_ids {
            self.force_friends(id.as_ref()).await;
        }
    }

    /// 重新查询所有已缓存的用户
    pub async fn refresh_all(&self) {
        let others = self.store.cached_others(&self.session.user_id);
        debug!("[ConnEngine] 重新同步 {} 个连接状态", others.len());
        for other in others {
            self.refresh(&other).await;
        }
    }

    /// 本实例仍在进行中的对账任务数
    pub fn pending_reconciliations(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.values().filter(|(h, _)| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// 销毁：取消本实例的对账任务，释放它们持有的乐观标记
    pub fn dispose(&self) {
        let drained: Vec<(String, (AbortHandle, u64))> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return,
        };
        for (other, (handle, epoch)) in drained {
            if handle.is_finished() {
                continue;
            }
            handle.abort();
            let key = self.key(&other);
            if self.store.clear_optimistic(&key, epoch) {
                // 请求可能已经发出，标记过期让下次读取以远端为准
                self.invalidate(&other);
            }
            debug!("[ConnEngine] 已取消 {} 的对账任务", other);
        }
    }
}

impl Drop for ConnectionStatusEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[async_trait]
impl SyncView for ConnectionStatusEngine {
    fn name(&self) -> &'static str {
        "connection-status"
    }

    async fn resync(&self) {
        self.refresh_all().await;
    }
}

/// 后台任务：发送申请，等待对账时间点，清除乐观标记后重新查询
struct ReconcileTask {
    session: Arc<Session>,
    service: Arc<dyn ConnectionService>,
    store: StatusStore,
    notifier: Option<Arc<CrossTabNotifier>>,
    listener: Arc<dyn ConnectionListener>,
    policy: ReconcilePolicy,
    key: PairKey,
    epoch: u64,
    deadline: Instant,
    message: String,
}

impl ReconcileTask {
    async fn run(self) -> SyncResult<ConnectionRequest> {
        let other_id = self.key.1.as_str();
        self.listener
            .on_status_changed(other_id, ConnectionStatus::Pending, true)
            .await;

        let result = self
            .service
            .request(&self.session.user_id, other_id, &self.message)
            .await;

        match &result {
            Ok(created) => {
                info!(
                    "[ConnEngine] ✅ 好友申请已送达（对方: {}，申请ID: {}）",
                    other_id, created.id
                );
                if let Some(notifier) = &self.notifier {
                    notifier
                        .publish(ChangeKind::ConnectRequested, Some(other_id))
                        .await;
                }
            }
            Err(e) => {
                warn!("[ConnEngine] 好友申请发送失败（对方: {}）: {}", other_id, e);
                self.store.set_error(&self.key, self.epoch, e.clone());
                self.listener.on_connect_failed(other_id, e).await;
            }
        }

        let reconcile_now = self.policy == ReconcilePolicy::AwaitAck && result.is_err();
        if !reconcile_now {
            tokio::time::sleep_until(self.deadline).await;
        }

        if !self.store.clear_optimistic(&self.key, self.epoch) {
            debug!("[ConnEngine] {} 的乐观状态已被覆盖，跳过对账", other_id);
            return result;
        }

        match self.service.status(&self.session.user_id, other_id).await {
            Ok(remote) => {
                let (status, _) = self.store.apply_remote(&self.key, remote, self.epoch);
                debug!("[ConnEngine] 对账完成（对方: {}）: {}", other_id, status);
                self.listener.on_status_changed(other_id, status, false).await;
            }
            Err(e) => {
                warn!("[ConnEngine] 对账查询失败（对方: {}）: {}", other_id, e);
                let reverted = self
                    .store
                    .settle_unconfirmed(&self.key, self.epoch, result.is_err());
                let status = reverted.unwrap_or(ConnectionStatus::Pending);
                self.listener.on_status_changed(other_id, status, false).await;
            }
        }

        result
    }
}
