//! 当前用户会话
//!
//! 身份由认证模块写入共享存储，本核心只在启动时读取一次，之后以显式的
//! `Session` 值注入各个组件，登出时清除。

use crate::social::error::{SyncError, SyncResult};
use crate::social::storage::{SharedStorage, AUTH_TOKEN_KEY, SESSION_KEY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 当前登录用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// 认证 token，缺失时请求不带 Authorization 头
    #[serde(default, skip_serializing)]
    pub token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            first_name: String::new(),
            last_name: String::new(),
            token: String::new(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// 会话读写：身份在 [`SESSION_KEY`]，token 在 [`AUTH_TOKEN_KEY`]
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn SharedStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SharedStorage>) -> Self {
        Self { storage }
    }

    /// 启动时加载；存储内容损坏视为未登录
    ///
    /// token 优先取 [`AUTH_TOKEN_KEY`]，没有时才用用户 JSON 中的 `token` 字段
    pub async fn load(&self) -> SyncResult<Option<Session>> {
        let Some(raw) = self.storage.get(SESSION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(mut session) if !session.user_id.trim().is_empty() => {
                if let Some(token) = self.storage.get(AUTH_TOKEN_KEY).await? {
                    if !token.trim().is_empty() {
                        session.token = token.trim().to_string();
                    }
                }
                if session.token.is_empty() {
                    warn!("[Session] 当前用户没有认证 token，请求将不带 Authorization 头");
                }
                info!("[Session] 已加载当前用户: {}", session.user_id);
                Ok(Some(session))
            }
            Ok(_) => {
                warn!("[Session] 存储中的用户 ID 为空，视为未登录");
                Ok(None)
            }
            Err(e) => {
                warn!("[Session] 解析存储中的用户失败，视为未登录: {}", e);
                Ok(None)
            }
        }
    }

    /// 加载会话，不存在时返回 `MissingSession`
    pub async fn require(&self) -> SyncResult<Session> {
        self.load().await?.ok_or(SyncError::MissingSession)
    }

    /// 由认证模块（或测试）写入当前用户和 token
    pub async fn save(&self, session: &Session) -> SyncResult<()> {
        let raw = serde_json::to_string(session)
            .map_err(|e| SyncError::Storage(format!("序列化会话失败: {}", e)))?;
        self.storage.set(SESSION_KEY, &raw).await?;
        if session.token.is_empty() {
            self.storage.remove(AUTH_TOKEN_KEY).await
        } else {
            self.storage.set(AUTH_TOKEN_KEY, &session.token).await
        }
    }

    /// 登出时清除
    pub async fn clear(&self) -> SyncResult<()> {
        info!("[Session] 清除当前用户");
        self.storage.remove(SESSION_KEY).await?;
        self.storage.remove(AUTH_TOKEN_KEY).await
    }
}
