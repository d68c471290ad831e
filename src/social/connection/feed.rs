//! 用户列表加载（推荐 / 好友 / 最近 / 同城）
//!
//! 各列表并行读取，单个失败降级为空列表；只有全部失败时才给出横幅提示。
//! 好友列表加载成功后直接把这些用户标记为 FRIENDS，不再逐个查询状态。

use crate::social::connection::api::ConnectionService;
use crate::social::connection::models::{FeedKind, UserSummary};
use crate::social::connection::service::ConnectionStatusEngine;
use crate::social::error::SyncError;
use crate::social::session::Session;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const FEED_FAILURE_BANNER: &str = "加载用户失败，请刷新页面重试";

#[derive(Debug, Default)]
pub struct FeedSnapshot {
    pub lists: HashMap<FeedKind, Vec<UserSummary>>,
    pub errors: HashMap<FeedKind, SyncError>,
    pub banner: Option<String>,
}

impl FeedSnapshot {
    pub fn users(&self, kind: FeedKind) -> &[UserSummary] {
        self.lists.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct FeedLoader {
    session: Arc<Session>,
    service: Arc<dyn ConnectionService>,
    engine: Option<Arc<ConnectionStatusEngine>>,
}

impl FeedLoader {
    pub fn new(session: Arc<Session>, service: Arc<dyn ConnectionService>) -> Self {
        Self {
            session,
            service,
            engine: None,
        }
    }

    /// 好友列表会写入该引擎
    pub fn with_engine(mut self, engine: Arc<ConnectionStatusEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// 首页：推荐 + 好友
    pub async fn load_home(&self) -> FeedSnapshot {
        self.load(&[FeedKind::Suggested, FeedKind::Friends]).await
    }

    pub async fn load(&self, kinds: &[FeedKind]) -> FeedSnapshot {
        let user_id = self.session.user_id.as_str();
        let reads = kinds.iter().map(|&kind| async move {
            (kind, self.service.feed(kind, user_id).await)
        });
        let results = join_all(reads).await;

        let mut snapshot = FeedSnapshot::default();
        for (kind, result) in results {
            match result {
                Ok(users) => {
                    snapshot.lists.insert(kind, users);
                }
                Err(e) => {
                    warn!("[Feed] 加载 {} 列表失败: {}", kind.as_str(), e);
                    snapshot.lists.insert(kind, Vec::new());
                    snapshot.errors.insert(kind, e);
                }
            }
        }

        if !kinds.is_empty() && snapshot.errors.len() == kinds.len() {
            snapshot.banner = Some(FEED_FAILURE_BANNER.to_string());
        }

        if let (Some(engine), Some(friends)) =
            (&self.engine, snapshot.lists.get(&FeedKind::Friends))
        {
            engine
                .seed_friends(friends.iter().map(|u| u.user_id.as_str()))
                .await;
        }

        info!(
            "[Feed] ✅ 用户列表加载完成，成功 {} / {}",
            kinds.len() - snapshot.errors.len(),
            kinds.len()
        );
        snapshot
    }
}
