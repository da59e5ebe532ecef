//! 会话准入（AccessGate）
//!
//! 私聊与建群只在好友之间进行，好友关系是唯一的能力校验。
//! 建群、邀请这类批量操作会收集全部违规标识符后一次性报错。

use crate::im::conversation::dao::ConversationDao;
use crate::im::conversation::models::{Conversation, ConversationKind, GroupPrivacy};
use crate::im::conversation::service::require_conversation;
use crate::im::directory::UserDirectory;
use crate::im::error::{BatchViolation, SocialError, SocialResult, ViolationReason};
use crate::im::events::{DomainEvent, EventBus};
use crate::im::friend::FriendService;
use crate::im::notification::{NotificationFanout, NotificationPayload};
use crate::im::serialization::generate_id;
use crate::im::types::now_millis;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AccessGate {
    dao: ConversationDao,
    friends: FriendService,
    directory: Arc<dyn UserDirectory>,
    fanout: NotificationFanout,
    events: EventBus,
}

impl AccessGate {
    pub fn new(
        dao: ConversationDao,
        friends: FriendService,
        directory: Arc<dyn UserDirectory>,
        fanout: NotificationFanout,
        events: EventBus,
    ) -> Self {
        Self {
            dao,
            friends,
            directory,
            fanout,
            events,
        }
    }

    /// 创建私聊；已有未删除的私聊时直接返回它
    pub async fn create_private_chat(
        &self,
        requester: &str,
        identifier: &str,
    ) -> SocialResult<Conversation> {
        let target = self
            .directory
            .resolve(identifier)
            .await?
            .ok_or_else(|| SocialError::not_found("用户", identifier))?;
        if target.id == requester {
            return Err(SocialError::SelfChat);
        }
        if !self.friends.are_friends(requester, &target.id).await? {
            return Err(SocialError::NotFriends(identifier.to_string()));
        }

        if let Some(existing) = self.dao.find_active_private(requester, &target.id).await? {
            debug!(
                "[AccessGate] {} 与 {} 已有私聊 {}",
                requester, target.id, existing.id
            );
            return Ok(existing);
        }

        let conversation = Conversation {
            id: generate_id("conv"),
            kind: ConversationKind::Private,
            members: [requester.to_string(), target.id.clone()]
                .into_iter()
                .collect(),
            created_by: requester.to_string(),
            created_at: now_millis(),
            last_seq: 0,
            deleted_for_everyone: false,
            deleted_by: None,
            deleted_at: None,
        };

        if !self.dao.insert_conversation(&conversation).await? {
            // 并发创建时另一方抢先写入
            return self
                .dao
                .find_active_private(requester, &target.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("私聊唯一约束冲突但记录不存在").into());
        }
        info!(
            "[AccessGate] ✅ {} 创建了与 {} 的私聊 {}",
            requester, target.id, conversation.id
        );

        self.fanout
            .notify(
                &target.id,
                NotificationPayload::NewChat {
                    conversation_id: conversation.id.clone(),
                    from_user: requester.to_string(),
                },
            )
            .await;
        self.events.publish(DomainEvent::ChatCreated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// 解析一批标识符，返回需要加入的用户；任意违规项都会进入组合错误
    async fn resolve_friends(
        &self,
        requester: &str,
        identifiers: &[String],
    ) -> SocialResult<Vec<String>> {
        let mut resolved = Vec::new();
        let mut seen = BTreeSet::new();
        let mut violations = Vec::new();

        for identifier in identifiers {
            let reason = match self.directory.resolve(identifier).await? {
                None => Some(ViolationReason::Unresolved),
                Some(p) if p.id == requester => Some(ViolationReason::SelfReference),
                Some(p) => {
                    if self.friends.are_friends(requester, &p.id).await? {
                        if seen.insert(p.id.clone()) {
                            resolved.push(p.id);
                        }
                        None
                    } else {
                        Some(ViolationReason::NotFriends)
                    }
                }
            };
            if let Some(reason) = reason {
                violations.push(BatchViolation {
                    identifier: identifier.clone(),
                    reason,
                });
            }
        }

        if !violations.is_empty() {
            info!(
                "[AccessGate] {} 的批量请求有 {} 个违规标识符",
                requester,
                violations.len()
            );
            return Err(SocialError::Batch(violations));
        }
        Ok(resolved)
    }

    /// 创建群聊，创建者为唯一管理员
    pub async fn create_group(
        &self,
        requester: &str,
        name: &str,
        identifiers: &[String],
    ) -> SocialResult<Conversation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SocialError::Validation("群名称不能为空".into()));
        }
        if identifiers.is_empty() {
            return Err(SocialError::Validation("至少需要邀请一名好友".into()));
        }

        let invited = self.resolve_friends(requester, identifiers).await?;

        let mut members: BTreeSet<String> = invited.iter().cloned().collect();
        members.insert(requester.to_string());
        let conversation = Conversation {
            id: generate_id("grp"),
            kind: ConversationKind::Group {
                name: name.to_string(),
                description: String::new(),
                privacy: GroupPrivacy::default(),
                admins: [requester.to_string()].into_iter().collect(),
            },
            members,
            created_by: requester.to_string(),
            created_at: now_millis(),
            last_seq: 0,
            deleted_for_everyone: false,
            deleted_by: None,
            deleted_at: None,
        };
        self.dao.insert_conversation(&conversation).await?;
        info!(
            "[AccessGate] ✅ {} 创建群聊 {} ({}), 邀请 {} 人",
            requester,
            name,
            conversation.id,
            invited.len()
        );

        self.announce_invites(requester, &conversation, invited).await;
        Ok(conversation)
    }

    /// 邀请好友进群；任何成员都可以邀请，已在群内的标识符被忽略
    pub async fn invite_to_group(
        &self,
        actor: &str,
        conversation_id: &str,
        identifiers: &[String],
    ) -> SocialResult<Vec<String>> {
        let conversation = require_conversation(&self.dao, conversation_id).await?;
        if !conversation.is_group() {
            return Err(SocialError::PreconditionFailed("只能邀请进群聊".into()));
        }
        if conversation.deleted_for_everyone {
            return Err(SocialError::PreconditionFailed("群聊已被删除".into()));
        }
        if !conversation.is_member(actor) {
            return Err(SocialError::unauthorized("不是该群成员"));
        }

        // 已在群内的用户不参与好友校验
        let mut pending = Vec::new();
        for identifier in identifiers {
            match self.directory.resolve(identifier).await? {
                Some(p) if conversation.is_member(&p.id) => {
                    debug!("[AccessGate] {} 已在群 {} 中，跳过", p.id, conversation_id)
                }
                _ => pending.push(identifier.clone()),
            }
        }
        let candidates = self.resolve_friends(actor, &pending).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let added = self
            .dao
            .add_members(conversation_id, &candidates, now_millis())
            .await?;
        if added.is_empty() {
            return Ok(added);
        }
        info!(
            "[AccessGate] {} 邀请 {:?} 进入群 {}",
            actor, added, conversation_id
        );

        let updated = require_conversation(&self.dao, conversation_id).await?;
        self.announce_invites(actor, &updated, added.clone()).await;
        Ok(added)
    }

    async fn announce_invites(&self, actor: &str, conversation: &Conversation, invited: Vec<String>) {
        let group_name = conversation.group_name().unwrap_or_default().to_string();
        self.fanout
            .notify_all(&invited, || NotificationPayload::GroupInvite {
                group_id: conversation.id.clone(),
                group_name: group_name.clone(),
                from_user: actor.to_string(),
            })
            .await;
        self.events.publish(DomainEvent::GroupInvite {
            conversation: conversation.clone(),
            invited,
        });
    }
}
