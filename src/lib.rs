pub mod im;

// 重新导出常用类型，方便外部使用
pub use im::{
    client::{SocialConfig, SocialCore},
    conversation::{AccessGate, ConversationStore, DeleteScope},
    error::{ErrorKind, SocialError, SocialResult},
    friend::FriendService,
    gateway::PushGateway,
    message::MessageLedger,
    notification::NotificationFanout,
    sync::{Session, Topic},
    unread::UnreadTracker,
};
