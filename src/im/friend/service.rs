//! 好友关系服务层（社交图）
//!
//! 好友请求创建后只会被接受（pending → accepted）或删除（拒绝、撤回、解除好友），
//! 不会有其他更新。`are_friends` 是私聊和建群的唯一能力校验。

use crate::im::directory::UserDirectory;
use crate::im::error::{ConflictKind, SocialError, SocialResult};
use crate::im::events::{DomainEvent, EventBus};
use crate::im::friend::dao::FriendDao;
use crate::im::friend::models::{
    FriendEntry, Friendship, FriendshipOverview, FriendshipStatus, RelationStatus,
};
use crate::im::notification::{NotificationFanout, NotificationPayload};
use crate::im::serialization::generate_id;
use crate::im::types::now_millis;
use std::sync::Arc;
use tracing::{debug, info};

/// 删除一条待处理请求的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestParty {
    /// 接收方拒绝
    Recipient,
    /// 发送方撤回
    Sender,
}

#[derive(Clone)]
pub struct FriendService {
    dao: FriendDao,
    directory: Arc<dyn UserDirectory>,
    fanout: NotificationFanout,
    events: EventBus,
}

impl FriendService {
    pub fn new(
        dao: FriendDao,
        directory: Arc<dyn UserDirectory>,
        fanout: NotificationFanout,
        events: EventBus,
    ) -> Self {
        Self {
            dao,
            directory,
            fanout,
            events,
        }
    }

    fn conflict_for(existing: &Friendship, from: &str) -> ConflictKind {
        match existing.status {
            FriendshipStatus::Accepted => ConflictKind::AlreadyFriends,
            FriendshipStatus::Pending if existing.from_user == from => {
                ConflictKind::RequestAlreadySent
            }
            FriendshipStatus::Pending => ConflictKind::RequestAlreadyReceived,
        }
    }

    /// 发送好友请求
    pub async fn send_request(&self, from: &str, to: &str) -> SocialResult<Friendship> {
        if from == to {
            return Err(SocialError::SelfReference);
        }
        if self.directory.profile(to).await?.is_none() {
            return Err(SocialError::not_found("用户", to));
        }

        if let Some(existing) = self.dao.find_by_pair(from, to).await? {
            return Err(SocialError::Conflict(Self::conflict_for(&existing, from)));
        }

        let friendship = Friendship {
            id: generate_id("fr"),
            from_user: from.to_string(),
            to_user: to.to_string(),
            status: FriendshipStatus::Pending,
            created_at: now_millis(),
            accepted_at: None,
        };

        if !self.dao.insert_friendship(&friendship).await? {
            // 并发请求抢先写入，按已存在的记录给出冲突原因
            let existing = self
                .dao
                .find_by_pair(from, to)
                .await?
                .ok_or_else(|| anyhow::anyhow!("好友关系唯一约束冲突但记录不存在"))?;
            return Err(SocialError::Conflict(Self::conflict_for(&existing, from)));
        }
        info!("[FriendSvc] {} -> {} 发送好友请求 {}", from, to, friendship.id);

        self.fanout
            .notify(
                to,
                NotificationPayload::FriendRequest {
                    request_id: friendship.id.clone(),
                    from_user: from.to_string(),
                },
            )
            .await;
        self.events.publish(DomainEvent::RequestSent {
            friendship: friendship.clone(),
        });
        Ok(friendship)
    }

    /// 接受好友请求（仅接收方）
    pub async fn accept(&self, request_id: &str, user: &str) -> SocialResult<Friendship> {
        let request = self
            .dao
            .get(request_id)
            .await?
            .ok_or_else(|| SocialError::not_found("好友请求", request_id))?;
        if request.to_user != user {
            return Err(SocialError::unauthorized("只有请求接收方可以接受"));
        }
        if request.status == FriendshipStatus::Accepted {
            return Err(SocialError::PreconditionFailed("好友请求已被接受".into()));
        }

        let accepted = self
            .dao
            .mark_accepted(request_id, now_millis())
            .await?
            .ok_or_else(|| SocialError::PreconditionFailed("好友请求已被处理".into()))?;
        info!(
            "[FriendSvc] ✅ {} 接受了 {} 的好友请求",
            user, accepted.from_user
        );

        self.fanout
            .notify(
                &accepted.from_user,
                NotificationPayload::FriendAccepted {
                    request_id: accepted.id.clone(),
                    from_user: user.to_string(),
                },
            )
            .await;
        self.events.publish(DomainEvent::RequestAccepted {
            friendship: accepted.clone(),
        });
        Ok(accepted)
    }

    /// 拒绝好友请求（仅接收方），通知发送方
    pub async fn reject(&self, request_id: &str, user: &str) -> SocialResult<()> {
        self.remove_pending(request_id, user, RequestParty::Recipient)
            .await
    }

    /// 撤回好友请求（仅发送方），不产生通知
    pub async fn cancel(&self, request_id: &str, user: &str) -> SocialResult<()> {
        self.remove_pending(request_id, user, RequestParty::Sender)
            .await
    }

    async fn remove_pending(
        &self,
        request_id: &str,
        user: &str,
        party: RequestParty,
    ) -> SocialResult<()> {
        let request = self
            .dao
            .get(request_id)
            .await?
            .ok_or_else(|| SocialError::not_found("好友请求", request_id))?;

        let allowed = match party {
            RequestParty::Recipient => request.to_user == user,
            RequestParty::Sender => request.from_user == user,
        };
        if !allowed {
            return Err(SocialError::unauthorized(match party {
                RequestParty::Recipient => "只有请求接收方可以拒绝",
                RequestParty::Sender => "只有请求发送方可以撤回",
            }));
        }
        if request.status != FriendshipStatus::Pending {
            return Err(SocialError::PreconditionFailed("好友请求已被接受".into()));
        }
        if !self.dao.delete(request_id, FriendshipStatus::Pending).await? {
            return Err(SocialError::PreconditionFailed("好友请求已被处理".into()));
        }

        match party {
            RequestParty::Recipient => {
                info!("[FriendSvc] {} 拒绝了 {} 的好友请求", user, request.from_user);
                self.fanout
                    .notify(
                        &request.from_user,
                        NotificationPayload::FriendRejected {
                            request_id: request.id.clone(),
                            from_user: user.to_string(),
                        },
                    )
                    .await;
                self.events
                    .publish(DomainEvent::RequestRejected { friendship: request });
            }
            RequestParty::Sender => {
                info!("[FriendSvc] {} 撤回了发给 {} 的好友请求", user, request.to_user);
                self.events
                    .publish(DomainEvent::RequestCancelled { friendship: request });
            }
        }
        Ok(())
    }

    /// 解除好友（任意一方）
    pub async fn remove_friend(&self, friendship_id: &str, user: &str) -> SocialResult<()> {
        let friendship = self
            .dao
            .get(friendship_id)
            .await?
            .ok_or_else(|| SocialError::not_found("好友关系", friendship_id))?;
        if !friendship.involves(user) {
            return Err(SocialError::unauthorized("不是该好友关系的成员"));
        }
        if friendship.status != FriendshipStatus::Accepted {
            return Err(SocialError::PreconditionFailed("尚未成为好友".into()));
        }
        if !self
            .dao
            .delete(friendship_id, FriendshipStatus::Accepted)
            .await?
        {
            return Err(SocialError::PreconditionFailed("好友关系已被解除".into()));
        }

        info!(
            "[FriendSvc] {} 解除了与 {} 的好友关系",
            user,
            friendship.other(user)
        );
        self.events.publish(DomainEvent::FriendRemoved { friendship });
        Ok(())
    }

    /// 双方是否为好友；自己和自己永远不是好友
    pub async fn are_friends(&self, a: &str, b: &str) -> SocialResult<bool> {
        if a == b {
            return Ok(false);
        }
        Ok(self.dao.are_friends(a, b).await?)
    }

    /// 从 `viewer` 视角看与 `other` 的关系
    pub async fn friendship_status(&self, viewer: &str, other: &str) -> SocialResult<RelationStatus> {
        if viewer == other {
            return Ok(RelationStatus::None);
        }
        let status = match self.dao.find_by_pair(viewer, other).await? {
            None => RelationStatus::None,
            Some(f) if f.status == FriendshipStatus::Accepted => RelationStatus::Friends,
            Some(f) if f.from_user == viewer => RelationStatus::RequestSent,
            Some(_) => RelationStatus::RequestReceived,
        };
        debug!("[FriendSvc] {} 与 {} 的关系: {:?}", viewer, other, status);
        Ok(status)
    }

    /// 好友关系总览
    pub async fn overview(&self, user: &str) -> SocialResult<FriendshipOverview> {
        let mut overview = FriendshipOverview::default();
        for f in self.dao.list_for_user(user).await? {
            match f.status {
                FriendshipStatus::Accepted => overview.friends.push(f),
                FriendshipStatus::Pending if f.to_user == user => overview.incoming.push(f),
                FriendshipStatus::Pending => overview.outgoing.push(f),
            }
        }
        Ok(overview)
    }

    /// 好友列表（附带展示资料）
    pub async fn list_friends(&self, user: &str) -> SocialResult<Vec<FriendEntry>> {
        let mut entries = Vec::new();
        for f in self.overview(user).await?.friends {
            let other = f.other(user).to_string();
            let profile = self.directory.profile(&other).await?;
            entries.push(FriendEntry {
                friendship_id: f.id.clone(),
                user_id: other,
                profile,
                since: f.accepted_at.unwrap_or(f.created_at),
            });
        }
        Ok(entries)
    }

    /// 收到的待处理请求
    pub async fn incoming_requests(&self, user: &str) -> SocialResult<Vec<Friendship>> {
        Ok(self.overview(user).await?.incoming)
    }

    /// 发出的待处理请求
    pub async fn outgoing_requests(&self, user: &str) -> SocialResult<Vec<Friendship>> {
        Ok(self.overview(user).await?.outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::create_memory_pool;
    use crate::im::directory::{LocalUserDirectory, UserProfile};
    use crate::im::error::ErrorKind;
    use crate::im::notification::{NotificationDao, NotificationKind};

    struct Fixture {
        friends: FriendService,
        fanout: NotificationFanout,
    }

    async fn setup() -> anyhow::Result<Fixture> {
        let pool = create_memory_pool().await?;
        let directory = LocalUserDirectory::new(pool.clone());
        for id in ["alice", "bob", "carol"] {
            directory
                .register_user(&UserProfile {
                    id: id.into(),
                    display_name: id.into(),
                    email: format!("{}@example.com", id),
                    handle: id.into(),
                })
                .await?;
        }
        let directory: Arc<dyn UserDirectory> = Arc::new(directory);
        let events = EventBus::new(64);
        let fanout = NotificationFanout::new(
            NotificationDao::new(pool.clone()),
            directory.clone(),
            events.clone(),
        );
        let friends = FriendService::new(FriendDao::new(pool), directory, fanout.clone(), events);
        Ok(Fixture { friends, fanout })
    }

    #[tokio::test]
    async fn self_request_is_rejected() -> anyhow::Result<()> {
        let fx = setup().await?;
        let err = fx.friends.send_request("alice", "alice").await.unwrap_err();
        assert!(matches!(err, SocialError::SelfReference));
        assert!(!fx.friends.are_friends("alice", "alice").await?);
        Ok(())
    }

    #[tokio::test]
    async fn request_to_unknown_user_is_not_found() -> anyhow::Result<()> {
        let fx = setup().await?;
        let err = fx.friends.send_request("alice", "ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_requests_report_conflict_subkind() -> anyhow::Result<()> {
        let fx = setup().await?;
        let req = fx.friends.send_request("alice", "bob").await?;

        let err = fx.friends.send_request("alice", "bob").await.unwrap_err();
        assert!(matches!(
            err,
            SocialError::Conflict(ConflictKind::RequestAlreadySent)
        ));
        let err = fx.friends.send_request("bob", "alice").await.unwrap_err();
        assert!(matches!(
            err,
            SocialError::Conflict(ConflictKind::RequestAlreadyReceived)
        ));

        fx.friends.accept(&req.id, "bob").await?;
        let err = fx.friends.send_request("bob", "alice").await.unwrap_err();
        assert!(matches!(
            err,
            SocialError::Conflict(ConflictKind::AlreadyFriends)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn accept_makes_friendship_symmetric() -> anyhow::Result<()> {
        let fx = setup().await?;
        let req = fx.friends.send_request("alice", "bob").await?;
        assert_eq!(
            fx.friends.friendship_status("alice", "bob").await?,
            RelationStatus::RequestSent
        );
        assert_eq!(
            fx.friends.friendship_status("bob", "alice").await?,
            RelationStatus::RequestReceived
        );

        let err = fx.friends.accept(&req.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let accepted = fx.friends.accept(&req.id, "bob").await?;
        assert_eq!(accepted.status, FriendshipStatus::Accepted);
        assert!(accepted.accepted_at.is_some());
        assert!(fx.friends.are_friends("alice", "bob").await?);
        assert!(fx.friends.are_friends("bob", "alice").await?);
        assert_eq!(fx.friends.overview("alice").await?.friends.len(), 1);
        assert_eq!(fx.friends.overview("bob").await?.friends.len(), 1);

        let inbox = fx.fanout.notifications_for("alice").await?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind(), NotificationKind::FriendAccepted);

        let err = fx.friends.accept(&req.id, "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn reject_deletes_and_allows_new_request() -> anyhow::Result<()> {
        let fx = setup().await?;
        let req = fx.friends.send_request("alice", "bob").await?;

        let err = fx.friends.reject(&req.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.friends.reject(&req.id, "bob").await?;
        assert_eq!(
            fx.friends.friendship_status("alice", "bob").await?,
            RelationStatus::None
        );
        let inbox = fx.fanout.notifications_for("alice").await?;
        assert_eq!(inbox[0].kind(), NotificationKind::FriendRejected);

        fx.friends.send_request("alice", "bob").await?;
        Ok(())
    }

    #[tokio::test]
    async fn cancel_is_sender_only_and_silent() -> anyhow::Result<()> {
        let fx = setup().await?;
        let req = fx.friends.send_request("alice", "carol").await?;

        let err = fx.friends.cancel(&req.id, "carol").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.friends.cancel(&req.id, "alice").await?;
        assert!(fx.friends.outgoing_requests("alice").await?.is_empty());
        assert!(fx.friends.incoming_requests("carol").await?.is_empty());
        // carol 只收到过最初的好友请求通知
        assert_eq!(fx.fanout.unread_count("carol").await?, 1);
        assert_eq!(fx.fanout.unread_count("alice").await?, 0);

        let err = fx.friends.cancel(&req.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn remove_friend_by_either_side() -> anyhow::Result<()> {
        let fx = setup().await?;
        let req = fx.friends.send_request("alice", "bob").await?;

        let err = fx.friends.remove_friend(&req.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        fx.friends.accept(&req.id, "bob").await?;
        let err = fx.friends.remove_friend(&req.id, "carol").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.friends.remove_friend(&req.id, "bob").await?;
        assert!(!fx.friends.are_friends("alice", "bob").await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_friends_carries_profiles() -> anyhow::Result<()> {
        let fx = setup().await?;
        let req = fx.friends.send_request("carol", "alice").await?;
        fx.friends.accept(&req.id, "alice").await?;

        let list = fx.friends.list_friends("carol").await?;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].user_id, "alice");
        assert_eq!(
            list[0].profile.as_ref().map(|p| p.email.as_str()),
            Some("alice@example.com")
        );
        Ok(())
    }
}
