pub mod client;
pub mod conversation;
pub mod db;
pub mod directory;
pub mod error;
pub mod events;
pub mod friend;
pub mod gateway;
pub mod message;
pub mod notification;
pub mod serialization;
pub mod sync;
pub mod types;
pub mod unread;

// 重新导出错误类型
pub use error::{ErrorKind, SocialError, SocialResult};
