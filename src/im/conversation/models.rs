//! 会话模型定义
//!
//! 私聊与群聊用带标签的变体区分，群聊特有字段（名称、简介、管理员）
//! 只存在于 `Group` 变体中。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 群聊可见性，仅作为描述信息，不参与任何权限判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupPrivacy {
    Public,
    #[default]
    Private,
}

impl GroupPrivacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupPrivacy::Public => "public",
            GroupPrivacy::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "public" => GroupPrivacy::Public,
            _ => GroupPrivacy::Private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Group {
        name: String,
        description: String,
        privacy: GroupPrivacy,
        admins: BTreeSet<String>,
    },
}

/// 会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(flatten)]
    pub kind: ConversationKind,
    pub members: BTreeSet<String>,
    pub created_by: String,
    pub created_at: i64,
    /// 最近分配的消息序列号
    pub last_seq: i64,
    pub deleted_for_everyone: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<i64>,
}

impl Conversation {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group { .. })
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        match &self.kind {
            ConversationKind::Group { admins, .. } => admins.contains(user_id),
            ConversationKind::Private => false,
        }
    }

    pub fn admins(&self) -> BTreeSet<String> {
        match &self.kind {
            ConversationKind::Group { admins, .. } => admins.clone(),
            ConversationKind::Private => BTreeSet::new(),
        }
    }

    pub fn group_name(&self) -> Option<&str> {
        match &self.kind {
            ConversationKind::Group { name, .. } => Some(name),
            ConversationKind::Private => None,
        }
    }

    /// 除 `user_id` 以外的成员
    pub fn others(&self, user_id: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.as_str() != user_id)
            .cloned()
            .collect()
    }
}

/// 删除范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// 仅对自己隐藏
    ForMe,
    /// 对所有人生效（终态）
    ForEveryone,
}

/// 某个用户看到的会话列表项
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
}

/// 被隐藏的消息引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenMessageRef {
    pub conversation_id: String,
    pub message_id: String,
}

/// 某个用户的隐藏索引（只增不减）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenIndex {
    pub conversations: Vec<String>,
    pub messages: Vec<HiddenMessageRef>,
}
