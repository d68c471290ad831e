//! 客户端配置

use std::time::Duration;

/// 乐观状态 → 确认状态的切换策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// 等待服务端确认：成功后延迟对账，失败立即清除乐观标记并对账
    AwaitAck,
    /// 固定延迟：无论远端成功与否，延迟结束后才清除乐观标记并对账
    FixedDelay,
}

impl std::str::FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ack" | "await-ack" | "await_ack" => Ok(Self::AwaitAck),
            "fixed" | "fixed-delay" | "fixed_delay" => Ok(Self::FixedDelay),
            other => Err(format!("未知的对账策略: {}", other)),
        }
    }
}

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 同源共享存储的 SQLite URL
    ///
    /// 例如：`sqlite://social.db?mode=rwc`
    pub storage_url: String,
    /// 发起好友申请后，多久清除乐观标记并重新查询状态
    pub reconcile_delay: Duration,
    /// 连接状态缓存的有效期
    pub status_stale_after: Duration,
    pub reconcile_policy: ReconcilePolicy,
    /// 推荐/最近用户列表的条数上限
    pub feed_limit: u32,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            storage_url: "sqlite://social.db?mode=rwc".to_string(),
            reconcile_delay: Duration::from_secs(2),
            status_stale_after: Duration::from_secs(60),
            reconcile_policy: ReconcilePolicy::AwaitAck,
            feed_limit: 10000,
        }
    }

    /// 从环境变量覆盖默认值，未设置或无法解析的变量保持默认
    ///
    /// - `SOCIAL_API_BASE_URL`
    /// - `SOCIAL_STORAGE_URL`
    /// - `SOCIAL_RECONCILE_DELAY_MS`
    /// - `SOCIAL_STATUS_STALE_SECS`
    /// - `SOCIAL_RECONCILE_POLICY`（`ack` / `fixed`）
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SOCIAL_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("SOCIAL_STORAGE_URL") {
            config.storage_url = url;
        }
        if let Some(ms) = env_parse::<u64>("SOCIAL_RECONCILE_DELAY_MS") {
            config.reconcile_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("SOCIAL_STATUS_STALE_SECS") {
            config.status_stale_after = Duration::from_secs(secs);
        }
        if let Some(policy) = env_parse::<ReconcilePolicy>("SOCIAL_RECONCILE_POLICY") {
            config.reconcile_policy = policy;
        }
        config
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080/api")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
