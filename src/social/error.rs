//! 同步核心的错误分类
//!
//! - `Validation`：本地校验失败，请求不会发往网络
//! - `Network`：请求没有到达服务端
//! - `Server`：服务端返回失败（含响应体结构不合法）
//!
//! 所有错误都可通过重试或切换页面恢复，不会中断会话。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// 输入不合法（空消息、重复提交等）
    #[error("校验失败: {0}")]
    Validation(String),

    /// 网络层失败，请求未到达服务端
    #[error("网络错误: {0}")]
    Network(String),

    /// 服务端返回错误状态或无法解析的响应
    #[error("服务器错误 {status}: {message}")]
    Server { status: u16, message: String },

    /// 本地共享存储读写失败
    #[error("本地存储错误: {0}")]
    Storage(String),

    /// 共享存储中没有当前用户
    #[error("当前没有登录用户")]
    MissingSession,
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn server(status: u16, msg: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: msg.into(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::server(status.as_u16(), e.to_string()),
            None if e.is_decode() => Self::server(200, format!("反序列化响应失败: {}", e)),
            None => Self::Network(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
