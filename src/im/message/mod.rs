//! 消息模块
//!
//! 只追加的消息账本：文本与附件消息的发送、编辑、删除与表情回应

pub mod dao;
pub mod models;
pub mod service;

pub use dao::{AppendOutcome, MessageDao};
pub use models::{AttachmentKind, Message, MessageContent, MessageState, Reaction};
pub use service::MessageLedger;
