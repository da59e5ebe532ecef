//! 领域事件
//!
//! 每个命令在状态变更成功后发布一条 [`DomainEvent`]。
//! 核心只负责发布，订阅方（推送层、网关）通过 channel 自行消费，
//! 核心从不直接回调 UI 代码。

use crate::im::conversation::models::Conversation;
use crate::im::friend::models::Friendship;
use crate::im::message::models::Message;
use crate::im::notification::models::Notification;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    RequestSent {
        friendship: Friendship,
    },
    RequestAccepted {
        friendship: Friendship,
    },
    RequestRejected {
        friendship: Friendship,
    },
    RequestCancelled {
        friendship: Friendship,
    },
    FriendRemoved {
        friendship: Friendship,
    },
    ChatCreated {
        conversation: Conversation,
    },
    GroupInvite {
        conversation: Conversation,
        invited: Vec<String>,
    },
    GroupRemoved {
        conversation: Conversation,
        removed: String,
    },
    /// 角色或群资料变更
    GroupUpdated {
        conversation: Conversation,
    },
    ConversationDeleted {
        conversation: Conversation,
    },
    ConversationHidden {
        conversation_id: String,
        user_id: String,
    },
    MessageSent {
        message: Message,
        members: Vec<String>,
    },
    /// 编辑、对所有人删除、表情回应
    MessageChanged {
        message: Message,
        members: Vec<String>,
    },
    MessageHidden {
        conversation_id: String,
        message_id: String,
        user_id: String,
    },
    ConversationOpened {
        conversation_id: String,
        user_id: String,
    },
    NotificationCreated {
        notification: Notification,
    },
    NotificationsRead {
        recipient_id: String,
    },
}

impl DomainEvent {
    /// 事件名（日志用）
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::RequestSent { .. } => "request_sent",
            DomainEvent::RequestAccepted { .. } => "request_accepted",
            DomainEvent::RequestRejected { .. } => "request_rejected",
            DomainEvent::RequestCancelled { .. } => "request_cancelled",
            DomainEvent::FriendRemoved { .. } => "friend_removed",
            DomainEvent::ChatCreated { .. } => "chat_created",
            DomainEvent::GroupInvite { .. } => "group_invite",
            DomainEvent::GroupRemoved { .. } => "group_removed",
            DomainEvent::GroupUpdated { .. } => "group_updated",
            DomainEvent::ConversationDeleted { .. } => "conversation_deleted",
            DomainEvent::ConversationHidden { .. } => "conversation_hidden",
            DomainEvent::MessageSent { .. } => "message_sent",
            DomainEvent::MessageChanged { .. } => "message_changed",
            DomainEvent::MessageHidden { .. } => "message_hidden",
            DomainEvent::ConversationOpened { .. } => "conversation_opened",
            DomainEvent::NotificationCreated { .. } => "notification_created",
            DomainEvent::NotificationsRead { .. } => "notifications_read",
        }
    }

    /// 事件涉及的会话
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            DomainEvent::ChatCreated { conversation }
            | DomainEvent::GroupInvite { conversation, .. }
            | DomainEvent::GroupRemoved { conversation, .. }
            | DomainEvent::GroupUpdated { conversation }
            | DomainEvent::ConversationDeleted { conversation } => Some(&conversation.id),
            DomainEvent::ConversationHidden {
                conversation_id, ..
            }
            | DomainEvent::MessageHidden {
                conversation_id, ..
            }
            | DomainEvent::ConversationOpened {
                conversation_id, ..
            } => Some(conversation_id),
            DomainEvent::MessageSent { message, .. }
            | DomainEvent::MessageChanged { message, .. } => Some(&message.conversation_id),
            _ => None,
        }
    }

    /// 涉及的好友关系
    pub fn friendship(&self) -> Option<&Friendship> {
        match self {
            DomainEvent::RequestSent { friendship }
            | DomainEvent::RequestAccepted { friendship }
            | DomainEvent::RequestRejected { friendship }
            | DomainEvent::RequestCancelled { friendship }
            | DomainEvent::FriendRemoved { friendship } => Some(friendship),
            _ => None,
        }
    }
}

/// 进程内事件总线（tokio broadcast）
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件；没有订阅者时直接丢弃
    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => trace!("[EventBus] 发布 {} -> {} 个订阅者", name, n),
            Err(_) => trace!("[EventBus] 发布 {}，当前无订阅者", name),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}
