//! 会话模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 会话列表中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    #[serde(alias = "otherMessengerId")]
    pub other_user_id: String,
    #[serde(default)]
    pub other_user_name: String,
    #[serde(default)]
    pub other_user_photo_url: Option<String>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    /// 新建的空会话可能没有时间
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_unread: bool,
}

impl ConversationSummary {
    /// 按最近消息时间倒序；没有时间的排在最后
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        match (self.last_message_at, other.last_message_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}
