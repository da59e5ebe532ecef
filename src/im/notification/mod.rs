//! 系统通知模块
//!
//! 领域事件触发的通知扇出（尽力而为），以及已读标记维护

pub mod dao;
pub mod models;
pub mod service;

pub use dao::NotificationDao;
pub use models::{Notification, NotificationKind, NotificationPayload};
pub use service::NotificationFanout;
