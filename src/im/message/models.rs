//! 消息模型定义

use serde::{Deserialize, Serialize};

/// 消息表情回应（不去重，同一用户可多次回应）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub value: String,
    pub created_at: i64,
}

/// 消息状态：Active ⇄ Edited → DeletedForEveryone（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Active,
    Edited,
    DeletedForEveryone,
}

/// 附件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    File,
}

/// 消息内容
///
/// 附件本身由外部存储上传，这里只记录下载地址和文件名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { body: String },
    Image { url: String, name: String },
    File { url: String, name: String },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        MessageContent::Text { body: body.into() }
    }

    pub fn attachment(kind: AttachmentKind, url: impl Into<String>, name: impl Into<String>) -> Self {
        let (url, name) = (url.into(), name.into());
        match kind {
            AttachmentKind::Image => MessageContent::Image { url, name },
            AttachmentKind::File => MessageContent::File { url, name },
        }
    }

    /// 存储用的类型标记
    pub fn kind_str(&self) -> &'static str {
        match self {
            MessageContent::Text { .. } => "text",
            MessageContent::Image { .. } => "image",
            MessageContent::File { .. } => "file",
        }
    }

    /// 文本正文；附件消息没有正文
    pub fn body(&self) -> Option<&str> {
        match self {
            MessageContent::Text { body } => Some(body),
            _ => None,
        }
    }

    /// 用于日志与列表展示的一行摘要
    pub fn summary(&self) -> String {
        match self {
            MessageContent::Text { body } => body.clone(),
            MessageContent::Image { name, .. } => format!("[图片] {}", name),
            MessageContent::File { name, .. } => format!("[文件] {}", name),
        }
    }

    /// 从存储列还原；未知类型按文本处理
    pub(crate) fn from_columns(
        kind: &str,
        body: String,
        url: Option<String>,
        name: Option<String>,
    ) -> Self {
        match (kind, url) {
            ("image", Some(url)) => MessageContent::Image {
                url,
                name: name.unwrap_or_default(),
            },
            ("file", Some(url)) => MessageContent::File {
                url,
                name: name.unwrap_or_default(),
            },
            _ => MessageContent::Text { body },
        }
    }
}

/// 消息记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(flatten)]
    pub content: MessageContent,
    pub created_at: i64,
    /// 会话内单调递增的序列号
    pub seq: i64,
    pub edited: bool,
    pub edited_at: Option<i64>,
    pub deleted_for_everyone: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<i64>,
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn state(&self) -> MessageState {
        if self.deleted_for_everyone {
            MessageState::DeletedForEveryone
        } else if self.edited {
            MessageState::Edited
        } else {
            MessageState::Active
        }
    }

    /// 文本正文，附件消息返回空串
    pub fn body(&self) -> &str {
        self.content.body().unwrap_or_default()
    }
}
