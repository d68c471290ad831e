//! 消息模块
//!
//! 消息线程的加载与缓存、消息发送管道

pub mod composer;
pub mod models;
pub mod service;

// 重新导出主要类型
pub use composer::Composer;
pub use models::{ChatMessage, SendMessagePayload};
pub use service::{ThreadLoader, ThreadView};
