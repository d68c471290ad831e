//! 连接（好友关系）模型定义

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// 两个用户之间的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connect,
    Pending,
    Friends,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Pending => "PENDING",
            Self::Friends => "FRIENDS",
        }
    }

    /// 状态机允许的迁移：CONNECT → PENDING → {FRIENDS, CONNECT}
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        matches!(
            (*self, next),
            (Self::Connect, Self::Pending)
                | (Self::Pending, Self::Friends)
                | (Self::Pending, Self::Connect)
        ) || *self == next
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    /// 服务端返回纯文本 `FRIENDS` 或 JSON 字符串 `"FRIENDS"`，两种都接受
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('"').to_ascii_uppercase().as_str() {
            "CONNECT" => Ok(Self::Connect),
            "PENDING" => Ok(Self::Pending),
            "FRIENDS" => Ok(Self::Friends),
            other => Err(format!("未知的连接状态: {}", other)),
        }
    }
}

/// 好友申请的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Pending,
    Accepted,
    Rejected,
}

/// 好友申请
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub message: String,
    pub status: RequestState,
    /// 服务端为不带时区的本地时间
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJob {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub companies_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePhoto {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileInfo {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub location: UserLocation,
    #[serde(default)]
    pub job: UserJob,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub profile_photo: ProfilePhoto,
}

/// 推荐/好友/最近列表中的用户摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile: UserProfileInfo,
}

impl UserSummary {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.profile
            .profile_photo
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
    }
}

/// 用户列表的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Suggested,
    Friends,
    Recent,
    SameCity,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suggested => "suggested",
            Self::Friends => "friends",
            Self::Recent => "recent",
            Self::SameCity => "sameCity",
        }
    }
}

/// 缓存中的单个连接状态
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ConnectionStatus,
    /// 乐观标记：置位期间对账读取不得覆盖 `status`
    pub optimistic: bool,
    /// 每次乐观写入或强制覆盖都会递增，过期的对账任务据此放弃写入
    pub epoch: u64,
    /// 最近一次远端确认的时间
    pub fetched_at: Option<Instant>,
    /// 是否有申请正在进行（防重复提交）
    pub in_flight: bool,
    /// 最近一次写操作的内联错误
    pub last_error: Option<crate::social::error::SyncError>,
}

impl StatusEntry {
    pub fn confirmed(status: ConnectionStatus) -> Self {
        Self {
            status,
            optimistic: false,
            epoch: 0,
            fetched_at: Some(Instant::now()),
            in_flight: false,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_plain_and_quoted_bodies() {
        assert_eq!("FRIENDS".parse::<ConnectionStatus>(), Ok(ConnectionStatus::Friends));
        assert_eq!("\"PENDING\"\n".parse::<ConnectionStatus>(), Ok(ConnectionStatus::Pending));
        assert!("BLOCKED".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn state_machine_has_no_direct_connect_to_friends() {
        use ConnectionStatus::*;
        assert!(Connect.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Friends));
        assert!(Pending.can_transition_to(Connect));
        assert!(!Connect.can_transition_to(Friends));
        assert!(!Friends.can_transition_to(Pending));
        assert!(!Friends.can_transition_to(Connect));
    }

    #[test]
    fn user_summary_decodes_backend_profile() {
        let json = r#"{
            "userId": "u2",
            "firstName": "Grace",
            "lastName": "Hopper",
            "email": "grace@example.com",
            "profile": {
                "gender": null,
                "age": 30,
                "location": {"city": "Arlington", "state": "VA", "country": "US"},
                "job": {"title": "Admiral", "companiesName": "Navy"},
                "interests": ["compilers", "sailing"],
                "profilePhoto": {"url": "https://cdn.example.com/g.png"}
            },
            "createdAt": "2024-05-01T10:00:00"
        }"#;
        let user: UserSummary = serde_json::from_str(json).unwrap();
        assert_eq!(user.display_name(), "Grace Hopper");
        assert_eq!(user.photo_url(), Some("https://cdn.example.com/g.png"));
        assert_eq!(user.profile.location.city, "Arlington");
    }

    #[test]
    fn connection_request_decodes_local_timestamps() {
        let json = r#"{"id":"r1","fromUserId":"a","toUserId":"b","message":"hi","status":"PENDING","createdAt":"2024-05-01T10:00:00.123"}"#;
        let req: ConnectionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.status, RequestState::Pending);
        assert!(req.created_at.is_some());
        assert!(req.updated_at.is_none());
    }

    #[test]
    fn connection_request_rejects_unknown_state() {
        let json = r#"{"id":"r1","fromUserId":"a","toUserId":"b","message":"hi","status":"MAYBE"}"#;
        assert!(serde_json::from_str::<ConnectionRequest>(json).is_err());
    }
}
