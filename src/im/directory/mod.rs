//! 用户目录模块
//!
//! 社交核心不保存用户资料，只通过 [`UserDirectory`] 把用户输入的标识符
//! （用户 ID、邮箱或用户名）解析为用户 ID，并获取展示用资料。

pub mod api;
pub mod dao;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;

pub use api::HttpUserDirectory;
pub use dao::LocalUserDirectory;
pub use models::UserProfile;

/// 用户目录接口
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 解析标识符，未找到时返回 `Ok(None)`
    async fn resolve(&self, identifier: &str) -> Result<Option<UserProfile>>;

    /// 按用户 ID 获取资料
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

/// 获取展示名，目录不可用或用户不存在时退回用户 ID
pub async fn display_name_or_id(directory: &dyn UserDirectory, user_id: &str) -> String {
    match directory.profile(user_id).await {
        Ok(Some(p)) if !p.display_name.is_empty() => p.display_name,
        Ok(Some(p)) if !p.email.is_empty() => p.email,
        _ => user_id.to_string(),
    }
}
