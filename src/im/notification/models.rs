//! 系统通知模型定义
//!
//! 每种通知是一个带标签的变体，只携带自己需要的字段。

use serde::{Deserialize, Serialize};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewChat,
    ChatDeleted,
    FriendRequest,
    FriendAccepted,
    FriendRejected,
    GroupInvite,
    GroupRemoved,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewChat => "new_chat",
            NotificationKind::ChatDeleted => "chat_deleted",
            NotificationKind::FriendRequest => "friend_request",
            NotificationKind::FriendAccepted => "friend_accepted",
            NotificationKind::FriendRejected => "friend_rejected",
            NotificationKind::GroupInvite => "group_invite",
            NotificationKind::GroupRemoved => "group_removed",
        }
    }
}

/// 通知负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    NewChat {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    ChatDeleted {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    FriendRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    FriendAccepted {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    FriendRejected {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    GroupInvite {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "groupName")]
        group_name: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
    GroupRemoved {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "groupName")]
        group_name: String,
        #[serde(rename = "fromUser")]
        from_user: String,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::NewChat { .. } => NotificationKind::NewChat,
            NotificationPayload::ChatDeleted { .. } => NotificationKind::ChatDeleted,
            NotificationPayload::FriendRequest { .. } => NotificationKind::FriendRequest,
            NotificationPayload::FriendAccepted { .. } => NotificationKind::FriendAccepted,
            NotificationPayload::FriendRejected { .. } => NotificationKind::FriendRejected,
            NotificationPayload::GroupInvite { .. } => NotificationKind::GroupInvite,
            NotificationPayload::GroupRemoved { .. } => NotificationKind::GroupRemoved,
        }
    }

    /// 触发该通知的用户
    pub fn from_user(&self) -> &str {
        match self {
            NotificationPayload::NewChat { from_user, .. }
            | NotificationPayload::ChatDeleted { from_user, .. }
            | NotificationPayload::FriendRequest { from_user, .. }
            | NotificationPayload::FriendAccepted { from_user, .. }
            | NotificationPayload::FriendRejected { from_user, .. }
            | NotificationPayload::GroupInvite { from_user, .. }
            | NotificationPayload::GroupRemoved { from_user, .. } => from_user,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationPayload::NewChat { .. } => "New Chat",
            NotificationPayload::ChatDeleted { .. } => "Chat Deleted",
            NotificationPayload::FriendRequest { .. } => "Friend Request",
            NotificationPayload::FriendAccepted { .. } => "Friend Request Accepted",
            NotificationPayload::FriendRejected { .. } => "Friend Request Rejected",
            NotificationPayload::GroupInvite { .. } => "Group Invite",
            NotificationPayload::GroupRemoved { .. } => "Removed From Group",
        }
    }

    /// 展示文案，`actor` 为触发者的展示名
    pub fn message(&self, actor: &str) -> String {
        match self {
            NotificationPayload::NewChat { .. } => format!("{} started a chat with you", actor),
            NotificationPayload::ChatDeleted { .. } => {
                format!("{} deleted your private chat", actor)
            }
            NotificationPayload::FriendRequest { .. } => {
                format!("{} sent you a friend request", actor)
            }
            NotificationPayload::FriendAccepted { .. } => {
                format!("{} accepted your friend request", actor)
            }
            NotificationPayload::FriendRejected { .. } => {
                format!("{} rejected your friend request", actor)
            }
            NotificationPayload::GroupInvite { group_name, .. } => {
                format!("{} added you to {}", actor, group_name)
            }
            NotificationPayload::GroupRemoved { group_name, .. } => {
                format!("{} removed you from {}", actor, group_name)
            }
        }
    }
}

/// 通知记录，创建后只允许翻转已读标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub payload: NotificationPayload,
    pub title: String,
    pub message: String,
    pub created_at: i64,
    pub read: bool,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        self.payload.kind()
    }
}
