//! 社交同步核心
//!
//! 连接状态、会话列表、消息线程与发送管道在多个组件、多个客户端上下文之间的同步

pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod db;
pub mod error;
pub mod message;
pub mod notifier;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
