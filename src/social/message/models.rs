//! 消息模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话中的一条消息
///
/// 线程内只追加，唯一允许回填的字段是 `read_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    #[serde(alias = "senderMessengerId")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_profile_pic_url: Option<String>,
    #[serde(alias = "recipientMessengerId")]
    pub recipient_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// 发送消息请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub recipient_id: String,
    pub body: String,
}

impl SendMessagePayload {
    pub fn new(
        conversation_id: Option<String>,
        recipient_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            recipient_id: recipient_id.into(),
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_with_messenger_aliases() {
        let json = r#"{
            "id": "m1",
            "conversationId": "c1",
            "senderMessengerId": "alice",
            "senderName": "Alice",
            "recipientMessengerId": "bob",
            "body": "hi",
            "sentAt": "2024-01-15T10:00:00Z",
            "readAt": null
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sender_id, "alice");
        assert_eq!(msg.recipient_id, "bob");
        assert!(msg.is_from("alice"));
        assert!(!msg.is_read());
    }

    #[test]
    fn payload_omits_missing_conversation_id() {
        let payload = SendMessagePayload::new(None, "bob", "hello");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({"recipientId": "bob", "body": "hello"}));
    }

    #[test]
    fn message_without_body_is_rejected() {
        let json = r#"{"id":"m1","conversationId":"c1","senderId":"a","recipientId":"b","sentAt":"2024-01-15T10:00:00Z"}"#;
        assert!(serde_json::from_str::<ChatMessage>(json).is_err());
    }
}
