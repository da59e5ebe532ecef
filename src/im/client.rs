//! 社交核心入口
//!
//! 负责按配置创建数据库、用户目录、事件总线和各领域服务，并把它们装配在一起。

use crate::im::conversation::{AccessGate, ConversationDao, ConversationStore};
use crate::im::db::{create_memory_pool, create_sqlite_pool_with_migration};
use crate::im::directory::{HttpUserDirectory, LocalUserDirectory, UserDirectory, UserProfile};
use crate::im::events::EventBus;
use crate::im::friend::{FriendDao, FriendService};
use crate::im::message::service::{DEFAULT_EDIT_WINDOW_SECS, DEFAULT_TOMBSTONE_TEXT};
use crate::im::message::{MessageDao, MessageLedger};
use crate::im::notification::{NotificationDao, NotificationFanout};
use crate::im::sync::{ServiceSnapshotSource, Session, SnapshotSource};
use crate::im::unread::{UnreadDao, UnreadTracker};
use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::info;

/// 社交核心配置
#[derive(Clone, Debug)]
pub struct SocialConfig {
    /// SQLite 数据库 URL，例如 `sqlite://social.db?mode=rwc`
    pub db_url: String,
    pub max_connections: u32,
    /// 消息可编辑时长（秒）
    pub edit_window_secs: i64,
    /// 对所有人删除后的占位文本
    pub tombstone_text: String,
    /// 事件总线缓冲区大小
    pub event_capacity: usize,
    /// 推送网关监听地址
    pub gateway_addr: String,
    /// 压缩方式，例如 "gzip" 或空字符串表示不压缩
    pub compression: String,
    /// 远程用户目录地址；为空时使用本地 `users` 表
    pub directory_api_url: Option<String>,
}

impl SocialConfig {
    /// 创建默认配置
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            max_connections: 5,
            edit_window_secs: DEFAULT_EDIT_WINDOW_SECS,
            tombstone_text: DEFAULT_TOMBSTONE_TEXT.to_string(),
            event_capacity: 1024,
            gateway_addr: "127.0.0.1:10003".to_string(),
            compression: "gzip".to_string(),
            directory_api_url: None,
        }
    }

    /// 内存数据库配置（测试与演示）
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_url.contains(":memory:")
    }
}

/// 装配好的社交核心
#[derive(Clone)]
pub struct SocialCore {
    pub config: SocialConfig,
    pub pool: Pool<Sqlite>,
    pub events: EventBus,
    pub directory: Arc<dyn UserDirectory>,
    /// 使用本地目录时可用于注册用户
    pub local_directory: Option<LocalUserDirectory>,
    pub friends: FriendService,
    pub gate: AccessGate,
    pub conversations: ConversationStore,
    pub ledger: MessageLedger,
    pub unread: UnreadTracker,
    pub fanout: NotificationFanout,
}

impl SocialCore {
    /// 按配置打开数据库并装配
    pub async fn open(config: SocialConfig) -> Result<Self> {
        let pool = if config.is_in_memory() {
            create_memory_pool().await?
        } else {
            create_sqlite_pool_with_migration(&config.db_url, config.max_connections).await?
        };
        Self::with_pool(config, pool)
    }

    /// 使用已迁移好的连接池装配
    pub fn with_pool(config: SocialConfig, pool: Pool<Sqlite>) -> Result<Self> {
        let (directory, local_directory): (Arc<dyn UserDirectory>, Option<LocalUserDirectory>) =
            match &config.directory_api_url {
                Some(url) => {
                    let remote = HttpUserDirectory::with_base_url(url.clone())
                        .context("创建远程用户目录失败")?;
                    info!("[Core] 使用远程用户目录: {}", url);
                    (Arc::new(remote), None)
                }
                None => {
                    let local = LocalUserDirectory::new(pool.clone());
                    (Arc::new(local.clone()), Some(local))
                }
            };

        let events = EventBus::new(config.event_capacity);
        let fanout = NotificationFanout::new(
            NotificationDao::new(pool.clone()),
            directory.clone(),
            events.clone(),
        );
        let friends = FriendService::new(
            FriendDao::new(pool.clone()),
            directory.clone(),
            fanout.clone(),
            events.clone(),
        );
        let conversation_dao = ConversationDao::new(pool.clone());
        let unread_dao = UnreadDao::new(pool.clone());
        let gate = AccessGate::new(
            conversation_dao.clone(),
            friends.clone(),
            directory.clone(),
            fanout.clone(),
            events.clone(),
        );
        let conversations = ConversationStore::new(
            conversation_dao.clone(),
            unread_dao.clone(),
            fanout.clone(),
            events.clone(),
        );
        let ledger = MessageLedger::new(MessageDao::new(pool.clone()), conversation_dao, events.clone())
            .with_edit_window_secs(config.edit_window_secs)
            .with_tombstone_text(config.tombstone_text.clone());
        let unread = UnreadTracker::new(unread_dao, ledger.clone(), events.clone());

        info!("[Core] ✅ 社交核心已装配: {}", config.db_url);
        Ok(Self {
            config,
            pool,
            events,
            directory,
            local_directory,
            friends,
            gate,
            conversations,
            ledger,
            unread,
            fanout,
        })
    }

    /// 在本地目录中注册用户
    pub async fn register_user(&self, profile: &UserProfile) -> Result<()> {
        let local = self
            .local_directory
            .as_ref()
            .context("当前使用远程用户目录，不能在本地注册用户")?;
        local.register_user(profile).await
    }

    pub fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        Arc::new(ServiceSnapshotSource::new(
            self.conversations.clone(),
            self.ledger.clone(),
            self.fanout.clone(),
            self.friends.clone(),
        ))
    }

    /// 为用户创建并启动推送会话
    pub fn session(&self, user_id: &str) -> Session {
        let mut session = Session::new(user_id, self.snapshot_source(), self.events.clone());
        session.start();
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SocialConfig::new("sqlite://social.db?mode=rwc");
        assert_eq!(config.edit_window_secs, 3600);
        assert_eq!(config.tombstone_text, "This message was deleted");
        assert_eq!(config.gateway_addr, "127.0.0.1:10003");
        assert_eq!(config.compression, "gzip");
        assert!(!config.is_in_memory());
        assert!(SocialConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn open_in_memory_uses_local_directory() -> anyhow::Result<()> {
        let core = SocialCore::open(SocialConfig::in_memory()).await?;
        core.register_user(&UserProfile {
            id: "alice".into(),
            display_name: "Alice".into(),
            email: "alice@example.com".into(),
            handle: "alice".into(),
        })
        .await?;
        let resolved = core.directory.resolve("ALICE@example.com").await?;
        assert_eq!(resolved.map(|p| p.id), Some("alice".to_string()));
        Ok(())
    }
}
