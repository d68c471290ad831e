//! 连接（好友关系）模块
//!
//! 连接状态的查询、乐观更新与对账，好友申请处理，用户列表加载

pub mod api;
pub mod feed;
pub mod listener;
pub mod models;
pub mod service;

// 重新导出主要类型
pub use api::{ConnectionApi, ConnectionService};
pub use feed::{FeedLoader, FeedSnapshot};
pub use listener::{ConnectionListener, EmptyConnectionListener};
pub use models::{ConnectionRequest, ConnectionStatus, FeedKind, RequestState, UserSummary};
pub use service::{
    ConnectAttempt, ConnectTicket, ConnectionStatusEngine, EngineConfig, StatusStore,
};
