pub mod logging;
pub mod social;

// 重新导出常用类型，方便外部使用
pub use social::{
    client::SocialClient,
    config::{ClientConfig, ReconcilePolicy},
    connection::{ConnectAttempt, ConnectionStatus, ConnectionStatusEngine, FeedKind},
    conversation::ConversationSummary,
    error::{SyncError, SyncResult},
    message::ChatMessage,
    session::{Session, SessionStore},
    storage::{MemoryStorage, SharedStorage, SqliteStorage},
};
