//! 同源共享存储
//!
//! 同一来源下所有上下文（多个窗口/进程）都能看到的键值存储。
//! 当前用户身份和跨上下文的"连接已变更"脏标记都保存在这里。

use crate::social::db::create_sqlite_pool_with_migration;
use crate::social::error::{SyncError, SyncResult};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 当前用户身份的存储键（由认证模块写入）
pub const SESSION_KEY: &str = "user";
/// 认证 token 的存储键（由认证模块写入，原始字符串）
pub const AUTH_TOKEN_KEY: &str = "authToken";
/// 跨上下文脏标记的存储键
pub const CONNECTION_CHANGED_KEY: &str = "connectionChanged";

#[async_trait]
pub trait SharedStorage: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> SyncResult<()>;

    async fn remove(&self, key: &str) -> SyncResult<()>;

    /// 原子地读取并删除，多个消费者并发调用时只有一个能拿到值
    async fn take(&self, key: &str) -> SyncResult<Option<String>>;
}

/// 进程内存储，克隆后共享同一份数据
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Storage("内存存储锁已中毒".to_string()))
    }
}

#[async_trait]
impl SharedStorage for MemoryStorage {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.lock()?.remove(key))
    }
}

/// 基于 SQLite 文件的共享存储，多个进程打开同一文件即可互相可见
#[derive(Clone)]
pub struct SqliteStorage {
    db: Pool<Sqlite>,
}

impl SqliteStorage {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 连接数据库并执行迁移
    pub async fn connect(db_url: &str) -> anyhow::Result<Self> {
        let db = create_sqlite_pool_with_migration(db_url).await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl SharedStorage for SqliteStorage {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let sql = r#"
            INSERT INTO local_kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
        "#;
        sqlx::query(sql)
            .bind(key)
            .bind(value)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.db)
            .await?;
        debug!("[Storage] 写入键: {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM local_kv WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> SyncResult<Option<String>> {
        // DELETE ... RETURNING 保证只有一个消费者拿到值
        let row = sqlx::query("DELETE FROM local_kv WHERE key = ? RETURNING value")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_take_is_consumed_once() {
        let storage = MemoryStorage::new();
        let other_context = storage.clone();
        storage.set(CONNECTION_CHANGED_KEY, "true").await.unwrap();

        assert_eq!(
            other_context.take(CONNECTION_CHANGED_KEY).await.unwrap(),
            Some("true".to_string())
        );
        assert_eq!(storage.take(CONNECTION_CHANGED_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_storage_shares_state_between_pools() {
        let path = std::env::temp_dir().join(format!("social-kv-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());

        let first = SqliteStorage::connect(&url).await.unwrap();
        let second = SqliteStorage::connect(&url).await.unwrap();

        first.set(SESSION_KEY, r#"{"userId":"u1"}"#).await.unwrap();
        assert_eq!(
            second.get(SESSION_KEY).await.unwrap().as_deref(),
            Some(r#"{"userId":"u1"}"#)
        );

        first.set(CONNECTION_CHANGED_KEY, "true").await.unwrap();
        assert!(second.take(CONNECTION_CHANGED_KEY).await.unwrap().is_some());
        assert!(first.take(CONNECTION_CHANGED_KEY).await.unwrap().is_none());

        second.remove(SESSION_KEY).await.unwrap();
        assert!(first.get(SESSION_KEY).await.unwrap().is_none());

        let _ = std::fs::remove_file(path);
    }
}
