//! 联系人（好友）模块
//!
//! 好友请求、接受/拒绝/撤回以及好友关系查询

pub mod dao;
pub mod models;
pub mod service;

pub use dao::FriendDao;
pub use models::{FriendEntry, Friendship, FriendshipOverview, FriendshipStatus, RelationStatus};
pub use service::FriendService;
