//! 会话服务层（成员、管理员、删除与查询）

use crate::im::conversation::dao::ConversationDao;
use crate::im::conversation::models::{
    Conversation, ConversationEntry, ConversationKind, DeleteScope, GroupPrivacy, HiddenIndex,
};
use crate::im::error::{SocialError, SocialResult};
use crate::im::events::{DomainEvent, EventBus};
use crate::im::notification::{NotificationFanout, NotificationPayload};
use crate::im::types::now_millis;
use crate::im::unread::UnreadDao;
use tracing::{info, warn};

/// 读取会话，不存在时返回 `NotFound`
pub(crate) async fn require_conversation(
    dao: &ConversationDao,
    conversation_id: &str,
) -> SocialResult<Conversation> {
    dao.get(conversation_id)
        .await?
        .ok_or_else(|| SocialError::not_found("会话", conversation_id))
}

/// 群资料更新（未提供的字段保持不变）
#[derive(Debug, Clone, Default)]
pub struct GroupProfileUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub privacy: Option<GroupPrivacy>,
}

#[derive(Clone)]
pub struct ConversationStore {
    dao: ConversationDao,
    unread: UnreadDao,
    fanout: NotificationFanout,
    events: EventBus,
}

impl ConversationStore {
    pub fn new(
        dao: ConversationDao,
        unread: UnreadDao,
        fanout: NotificationFanout,
        events: EventBus,
    ) -> Self {
        Self {
            dao,
            unread,
            fanout,
            events,
        }
    }

    /// 读取群聊并校验操作者是管理员
    async fn require_group_admin(
        &self,
        admin: &str,
        conversation_id: &str,
    ) -> SocialResult<Conversation> {
        let conversation = require_conversation(&self.dao, conversation_id).await?;
        if !conversation.is_group() {
            return Err(SocialError::PreconditionFailed("不是群聊".into()));
        }
        if !conversation.is_admin(admin) {
            return Err(SocialError::unauthorized("只有群管理员可以执行该操作"));
        }
        Ok(conversation)
    }

    /// 管理员移除成员
    pub async fn remove_member(
        &self,
        admin: &str,
        conversation_id: &str,
        target: &str,
    ) -> SocialResult<Conversation> {
        let conversation = self.require_group_admin(admin, conversation_id).await?;
        if target == admin {
            return Err(SocialError::SelfReference);
        }
        if !conversation.is_member(target) {
            return Err(SocialError::not_found("群成员", target));
        }

        self.dao.remove_member(conversation_id, target).await?;
        info!(
            "[ConvStore] {} 将 {} 移出群 {}",
            admin, target, conversation_id
        );

        self.fanout
            .notify(
                target,
                NotificationPayload::GroupRemoved {
                    group_id: conversation.id.clone(),
                    group_name: conversation.group_name().unwrap_or_default().to_string(),
                    from_user: admin.to_string(),
                },
            )
            .await;

        let updated = require_conversation(&self.dao, conversation_id).await?;
        self.events.publish(DomainEvent::GroupRemoved {
            conversation: updated.clone(),
            removed: target.to_string(),
        });
        Ok(updated)
    }

    /// 提升为管理员（幂等）
    pub async fn promote(
        &self,
        admin: &str,
        conversation_id: &str,
        target: &str,
    ) -> SocialResult<Conversation> {
        self.change_role(admin, conversation_id, target, true).await
    }

    /// 取消管理员；允许让群里不再有管理员
    pub async fn demote(
        &self,
        admin: &str,
        conversation_id: &str,
        target: &str,
    ) -> SocialResult<Conversation> {
        self.change_role(admin, conversation_id, target, false).await
    }

    async fn change_role(
        &self,
        admin: &str,
        conversation_id: &str,
        target: &str,
        promote: bool,
    ) -> SocialResult<Conversation> {
        let conversation = self.require_group_admin(admin, conversation_id).await?;
        if !conversation.is_member(target) {
            return Err(SocialError::not_found("群成员", target));
        }

        if !self.dao.set_admin(conversation_id, target, promote).await? {
            return Ok(conversation);
        }

        let updated = require_conversation(&self.dao, conversation_id).await?;
        info!(
            "[ConvStore] {} {} {} 的管理员身份（群 {}）",
            admin,
            if promote { "授予" } else { "取消" },
            target,
            conversation_id
        );
        if updated.admins().is_empty() {
            warn!("[ConvStore] ⚠️ 群 {} 已没有任何管理员", conversation_id);
        }
        self.events.publish(DomainEvent::GroupUpdated {
            conversation: updated.clone(),
        });
        Ok(updated)
    }

    /// 管理员修改群资料；privacy 仅作描述
    pub async fn update_group_profile(
        &self,
        admin: &str,
        conversation_id: &str,
        update: GroupProfileUpdate,
    ) -> SocialResult<Conversation> {
        let conversation = self.require_group_admin(admin, conversation_id).await?;
        let (name, description, privacy) = match conversation.kind {
            ConversationKind::Group {
                name,
                description,
                privacy,
                ..
            } => (name, description, privacy),
            ConversationKind::Private => {
                return Err(SocialError::PreconditionFailed("不是群聊".into()))
            }
        };

        let name = match update.name {
            Some(n) if n.trim().is_empty() => {
                return Err(SocialError::Validation("群名称不能为空".into()))
            }
            Some(n) => n.trim().to_string(),
            None => name,
        };
        let description = update.description.unwrap_or(description);
        let privacy = update.privacy.unwrap_or(privacy);

        self.dao
            .update_profile(conversation_id, &name, &description, privacy)
            .await?;
        let updated = require_conversation(&self.dao, conversation_id).await?;
        self.events.publish(DomainEvent::GroupUpdated {
            conversation: updated.clone(),
        });
        Ok(updated)
    }

    /// 删除会话
    ///
    /// `ForMe` 只加入操作者的隐藏索引；`ForEveryone` 是终态，私聊任一成员、
    /// 群聊仅管理员可执行，并通知其余成员。
    pub async fn delete_conversation(
        &self,
        actor: &str,
        conversation_id: &str,
        scope: DeleteScope,
    ) -> SocialResult<()> {
        let conversation = require_conversation(&self.dao, conversation_id).await?;
        if !conversation.is_member(actor) {
            return Err(SocialError::unauthorized("不是该会话成员"));
        }

        match scope {
            DeleteScope::ForMe => {
                self.dao
                    .hide_for_user(actor, conversation_id, now_millis())
                    .await?;
                info!("[ConvStore] {} 隐藏了会话 {}", actor, conversation_id);
                self.events.publish(DomainEvent::ConversationHidden {
                    conversation_id: conversation_id.to_string(),
                    user_id: actor.to_string(),
                });
            }
            DeleteScope::ForEveryone => {
                if conversation.is_group() && !conversation.is_admin(actor) {
                    return Err(SocialError::unauthorized("只有群管理员可以解散群聊"));
                }
                if conversation.deleted_for_everyone {
                    return Err(SocialError::PreconditionFailed("会话已被删除".into()));
                }
                if self.dao.mark_deleted(conversation_id, actor).await?.is_none() {
                    return Err(SocialError::PreconditionFailed("会话已被删除".into()));
                }
                info!("[ConvStore] {} 对所有人删除了会话 {}", actor, conversation_id);

                self.fanout
                    .notify_all(&conversation.others(actor), || {
                        NotificationPayload::ChatDeleted {
                            conversation_id: conversation_id.to_string(),
                            from_user: actor.to_string(),
                        }
                    })
                    .await;
                let updated = require_conversation(&self.dao, conversation_id).await?;
                self.events
                    .publish(DomainEvent::ConversationDeleted { conversation: updated });
            }
        }
        Ok(())
    }

    /// 成员读取会话详情
    pub async fn get_conversation(
        &self,
        viewer: &str,
        conversation_id: &str,
    ) -> SocialResult<Conversation> {
        let conversation = require_conversation(&self.dao, conversation_id).await?;
        if !conversation.is_member(viewer) {
            return Err(SocialError::unauthorized("不是该会话成员"));
        }
        Ok(conversation)
    }

    /// 用户的会话列表（不含已隐藏），附带各自的未读数
    pub async fn conversations_for_user(&self, user_id: &str) -> SocialResult<Vec<ConversationEntry>> {
        let counts = self.unread.counts_for_user(user_id).await?;
        let entries = self
            .dao
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|conversation| {
                let unread_count = counts.get(&conversation.id).copied().unwrap_or(0);
                ConversationEntry {
                    conversation,
                    unread_count,
                }
            })
            .collect();
        Ok(entries)
    }

    /// 未删除会话的未读总数
    pub async fn total_unread(&self, user_id: &str) -> SocialResult<i64> {
        Ok(self.unread.total_for_user(user_id).await?)
    }

    pub async fn hidden_index(&self, user_id: &str) -> SocialResult<HiddenIndex> {
        Ok(self.dao.hidden_index(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::create_memory_pool;
    use crate::im::directory::{LocalUserDirectory, UserDirectory};
    use crate::im::error::ErrorKind;
    use crate::im::notification::{NotificationDao, NotificationKind};
    use std::sync::Arc;

    struct Fixture {
        store: ConversationStore,
        dao: ConversationDao,
        fanout: NotificationFanout,
    }

    async fn setup() -> anyhow::Result<Fixture> {
        let pool = create_memory_pool().await?;
        let directory: Arc<dyn UserDirectory> = Arc::new(LocalUserDirectory::new(pool.clone()));
        let events = EventBus::new(64);
        let fanout = NotificationFanout::new(NotificationDao::new(pool.clone()), directory, events.clone());
        let dao = ConversationDao::new(pool.clone());
        let store = ConversationStore::new(dao.clone(), UnreadDao::new(pool), fanout.clone(), events);
        Ok(Fixture { store, dao, fanout })
    }

    async fn seed_group(dao: &ConversationDao) -> anyhow::Result<Conversation> {
        let group = Conversation {
            id: "g1".into(),
            kind: ConversationKind::Group {
                name: "Film club".into(),
                description: String::new(),
                privacy: GroupPrivacy::Private,
                admins: ["alice".to_string()].into_iter().collect(),
            },
            members: ["alice", "bob", "carol"].iter().map(|s| s.to_string()).collect(),
            created_by: "alice".into(),
            created_at: 1,
            last_seq: 0,
            deleted_for_everyone: false,
            deleted_by: None,
            deleted_at: None,
        };
        dao.insert_conversation(&group).await?;
        Ok(group)
    }

    async fn seed_private(dao: &ConversationDao) -> anyhow::Result<Conversation> {
        let chat = Conversation {
            id: "c1".into(),
            kind: ConversationKind::Private,
            members: ["alice", "bob"].iter().map(|s| s.to_string()).collect(),
            created_by: "alice".into(),
            created_at: 1,
            last_seq: 0,
            deleted_for_everyone: false,
            deleted_by: None,
            deleted_at: None,
        };
        dao.insert_conversation(&chat).await?;
        Ok(chat)
    }

    #[tokio::test]
    async fn remove_member_is_admin_only() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_group(&fx.dao).await?;

        let err = fx.store.remove_member("bob", "g1", "carol").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = fx.store.remove_member("alice", "g1", "alice").await.unwrap_err();
        assert!(matches!(err, SocialError::SelfReference));

        let updated = fx.store.remove_member("alice", "g1", "carol").await?;
        assert!(!updated.is_member("carol"));
        let inbox = fx.fanout.notifications_for("carol").await?;
        assert_eq!(inbox[0].kind(), NotificationKind::GroupRemoved);

        let err = fx.store.remove_member("alice", "g1", "carol").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn removed_admin_loses_role() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_group(&fx.dao).await?;
        fx.store.promote("alice", "g1", "bob").await?;
        let updated = fx.store.remove_member("alice", "g1", "bob").await?;
        assert!(!updated.is_admin("bob"));
        Ok(())
    }

    #[tokio::test]
    async fn promote_is_idempotent_and_demote_may_empty_admins() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_group(&fx.dao).await?;

        let once = fx.store.promote("alice", "g1", "bob").await?;
        let twice = fx.store.promote("alice", "g1", "bob").await?;
        assert_eq!(once, twice);
        assert_eq!(twice.admins().len(), 2);

        // 被提升的管理员同样可以操作
        fx.store.demote("bob", "g1", "alice").await?;
        let last = fx.store.demote("bob", "g1", "bob").await?;
        assert!(last.admins().is_empty());

        let err = fx.store.promote("bob", "g1", "carol").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        Ok(())
    }

    #[tokio::test]
    async fn update_profile_keeps_missing_fields() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_group(&fx.dao).await?;

        let updated = fx
            .store
            .update_group_profile(
                "alice",
                "g1",
                GroupProfileUpdate {
                    description: Some("Fridays".into()),
                    privacy: Some(GroupPrivacy::Public),
                    ..Default::default()
                },
            )
            .await?;
        match updated.kind {
            ConversationKind::Group {
                name,
                description,
                privacy,
                ..
            } => {
                assert_eq!(name, "Film club");
                assert_eq!(description, "Fridays");
                assert_eq!(privacy, GroupPrivacy::Public);
            }
            ConversationKind::Private => panic!("expected a group"),
        }

        let err = fx
            .store
            .update_group_profile(
                "alice",
                "g1",
                GroupProfileUpdate {
                    name: Some("   ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        Ok(())
    }

    #[tokio::test]
    async fn delete_for_everyone_is_terminal() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_private(&fx.dao).await?;

        let err = fx
            .store
            .delete_conversation("mallory", "c1", DeleteScope::ForEveryone)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.store
            .delete_conversation("bob", "c1", DeleteScope::ForEveryone)
            .await?;
        let chat = fx.store.get_conversation("alice", "c1").await?;
        assert!(chat.deleted_for_everyone);
        assert_eq!(chat.deleted_by.as_deref(), Some("bob"));

        let inbox = fx.fanout.notifications_for("alice").await?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind(), NotificationKind::ChatDeleted);
        assert!(fx.fanout.notifications_for("bob").await?.is_empty());

        let err = fx
            .store
            .delete_conversation("alice", "c1", DeleteScope::ForEveryone)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn group_delete_for_everyone_needs_admin() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_group(&fx.dao).await?;
        let err = fx
            .store
            .delete_conversation("bob", "g1", DeleteScope::ForEveryone)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.store
            .delete_conversation("alice", "g1", DeleteScope::ForEveryone)
            .await?;
        assert_eq!(fx.fanout.unread_count("bob").await?, 1);
        assert_eq!(fx.fanout.unread_count("carol").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_for_me_only_hides_for_actor() -> anyhow::Result<()> {
        let fx = setup().await?;
        seed_private(&fx.dao).await?;

        fx.store
            .delete_conversation("alice", "c1", DeleteScope::ForMe)
            .await?;
        assert!(fx.store.conversations_for_user("alice").await?.is_empty());
        assert_eq!(fx.store.conversations_for_user("bob").await?.len(), 1);
        assert_eq!(fx.store.hidden_index("alice").await?.conversations, vec!["c1"]);
        assert!(!fx.store.get_conversation("bob", "c1").await?.deleted_for_everyone);
        Ok(())
    }
}
