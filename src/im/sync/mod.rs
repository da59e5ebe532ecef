//! 推送同步层
//!
//! 客户端持有常驻订阅；任何相关状态变更都会重新投递该订阅的完整结果集。
//! 不同订阅之间不保证顺序。

pub mod manager;
pub mod session;
pub mod source;
pub mod topic;

pub use manager::{SubscriptionId, SubscriptionManager};
pub use session::Session;
pub use source::{ServiceSnapshotSource, SnapshotSource};
pub use topic::{Delivery, Snapshot, Topic};
