//! 会话模块
//!
//! 会话列表的拉取、合并、选中与顶置

pub mod api;
pub mod models;
pub mod service;

// 重新导出主要类型
pub use api::{MessagingApi, MessagingService};
pub use models::ConversationSummary;
pub use service::{ConversationBook, ConversationListManager};
