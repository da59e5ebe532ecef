//! 订阅主题与快照
//!
//! 每次投递都是该主题当前的完整结果集，客户端应整体替换，不做增量合并。

use crate::im::conversation::models::{ConversationEntry, HiddenIndex};
use crate::im::events::DomainEvent;
use crate::im::friend::models::FriendshipOverview;
use crate::im::message::models::Message;
use crate::im::notification::models::Notification;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Topic {
    /// 用户的会话列表（含未读数）
    Conversations { user: String },
    /// 某查看者视角下的会话消息
    Messages {
        conversation_id: String,
        viewer: String,
    },
    /// 未读通知
    Notifications { user: String },
    HiddenIndex { user: String },
    Friendships { user: String },
}

impl Topic {
    /// 用户登录后默认持有的订阅
    pub fn standing(user: &str) -> Vec<Topic> {
        vec![
            Topic::Conversations { user: user.into() },
            Topic::Notifications { user: user.into() },
            Topic::HiddenIndex { user: user.into() },
            Topic::Friendships { user: user.into() },
        ]
    }

    /// 事件是否会改变该主题的结果集
    pub fn is_affected_by(&self, event: &DomainEvent) -> bool {
        match self {
            Topic::Conversations { user } => match event {
                DomainEvent::ChatCreated { conversation }
                | DomainEvent::GroupUpdated { conversation }
                | DomainEvent::ConversationDeleted { conversation } => conversation.is_member(user),
                DomainEvent::GroupInvite { conversation, .. } => conversation.is_member(user),
                DomainEvent::GroupRemoved {
                    conversation,
                    removed,
                } => removed == user || conversation.is_member(user),
                DomainEvent::MessageSent { members, .. } => members.iter().any(|m| m == user),
                DomainEvent::ConversationHidden { user_id, .. }
                | DomainEvent::ConversationOpened { user_id, .. } => user_id == user,
                _ => false,
            },
            Topic::Messages {
                conversation_id,
                viewer,
            } => match event {
                DomainEvent::MessageSent { message, .. }
                | DomainEvent::MessageChanged { message, .. } => {
                    &message.conversation_id == conversation_id
                }
                DomainEvent::MessageHidden {
                    conversation_id: c,
                    user_id,
                    ..
                } => c == conversation_id && user_id == viewer,
                _ => false,
            },
            Topic::Notifications { user } => match event {
                DomainEvent::NotificationCreated { notification } => {
                    &notification.recipient_id == user
                }
                DomainEvent::NotificationsRead { recipient_id } => recipient_id == user,
                _ => false,
            },
            Topic::HiddenIndex { user } => match event {
                DomainEvent::ConversationHidden { user_id, .. }
                | DomainEvent::MessageHidden { user_id, .. } => user_id == user,
                _ => false,
            },
            Topic::Friendships { user } => event.friendship().is_some_and(|f| f.involves(user)),
        }
    }
}

/// 某个主题的完整结果集
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Snapshot {
    Conversations(Vec<ConversationEntry>),
    Messages(Vec<Message>),
    Notifications(Vec<Notification>),
    HiddenIndex(HiddenIndex),
    Friendships(FriendshipOverview),
}

/// 一次投递
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub subscription_id: u64,
    pub topic: Topic,
    pub snapshot: Snapshot,
}
