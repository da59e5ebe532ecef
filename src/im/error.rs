//! 社交核心错误类型
//!
//! DAO 层沿用 `anyhow::Result`，服务层统一返回 [`SocialResult`]，
//! 调用方通过 [`SocialError::kind`] 拿到粗粒度的错误类别。

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 错误大类（对应 UI 层需要区分的五类错误，外加内部错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Conflict,
    PreconditionFailed,
    Internal,
}

/// 好友请求冲突的具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    AlreadyFriends,
    RequestAlreadySent,
    RequestAlreadyReceived,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::AlreadyFriends => write!(f, "已经是好友"),
            ConflictKind::RequestAlreadySent => write!(f, "已发送过好友请求"),
            ConflictKind::RequestAlreadyReceived => write!(f, "对方已向你发送好友请求"),
        }
    }
}

/// 批量操作中单个标识符失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    Unresolved,
    NotFriends,
    SelfReference,
}

/// 批量操作中的单个违规项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchViolation {
    pub identifier: String,
    pub reason: ViolationReason,
}

fn describe_violations(violations: &[BatchViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}({:?})", v.identifier, v.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum SocialError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("不能对自己执行该操作")]
    SelfReference,

    #[error("不能和自己创建私聊")]
    SelfChat,

    #[error("对方不是你的好友: {0}")]
    NotFriends(String),

    #[error("无权操作: {0}")]
    Unauthorized(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("冲突: {0}")]
    Conflict(ConflictKind),

    #[error("前置条件不满足: {0}")]
    PreconditionFailed(String),

    #[error("批量操作失败，违规项: {}", describe_violations(.0))]
    Batch(Vec<BatchViolation>),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SocialError {
    /// 错误大类
    pub fn kind(&self) -> ErrorKind {
        match self {
            SocialError::Validation(_) | SocialError::Batch(_) => ErrorKind::Validation,
            SocialError::SelfReference
            | SocialError::SelfChat
            | SocialError::NotFriends(_)
            | SocialError::Unauthorized(_) => ErrorKind::Authorization,
            SocialError::NotFound(_) => ErrorKind::NotFound,
            SocialError::Conflict(_) => ErrorKind::Conflict,
            SocialError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            SocialError::Database(_) | SocialError::Serde(_) | SocialError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn not_found(what: &str, id: &str) -> Self {
        SocialError::NotFound(format!("{} {}", what, id))
    }

    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        SocialError::Unauthorized(reason.into())
    }
}

pub type SocialResult<T> = Result<T, SocialError>;
