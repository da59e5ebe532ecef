//! 未读计数模块

pub mod dao;
pub mod service;

pub use dao::UnreadDao;
pub use service::UnreadTracker;
