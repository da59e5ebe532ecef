//! 会话模块
//!
//! 私聊/群聊的创建准入、成员与管理员维护、删除与查询

pub mod dao;
pub mod gate;
pub mod models;
pub mod service;

pub use dao::ConversationDao;
pub use gate::AccessGate;
pub use models::{
    Conversation, ConversationEntry, ConversationKind, DeleteScope, GroupPrivacy, HiddenIndex,
    HiddenMessageRef,
};
pub use service::{ConversationStore, GroupProfileUpdate};
