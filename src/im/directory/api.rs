//! 远程用户目录 HTTP 客户端
//!
//! 负责通过用户服务的 HTTP 接口解析标识符和查询资料

use crate::im::directory::models::UserProfile;
use crate::im::directory::UserDirectory;
use crate::im::types::{deserialize_vec_or_null, handle_http_response};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct UsersData {
    #[serde(rename = "usersInfo", deserialize_with = "deserialize_vec_or_null")]
    users_info: Vec<UserProfile>,
}

/// 基于 HTTP 的用户目录
pub struct HttpUserDirectory {
    client: reqwest::Client,
    api_base_url: String,
}

impl HttpUserDirectory {
    /// `client` 应该已经在外部配置好认证信息
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// 使用超时配置创建默认客户端
    pub fn with_base_url(api_base_url: String) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self::new(client, api_base_url))
    }

    async fn query_users(&self, path: &str, body: serde_json::Value) -> Result<Vec<UserProfile>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.api_base_url, path);
        debug!("[UserDirAPI] 请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<UsersData>(response, "查询用户").await?;
        Ok(api_resp.data.map(|d| d.users_info).unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn resolve(&self, identifier: &str) -> Result<Option<UserProfile>> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(None);
        }
        info!("[UserDirAPI] 📡 解析标识符: {}", identifier);
        let users = self
            .query_users(
                "/user/search_users",
                serde_json::json!({ "keyword": identifier, "exact": true }),
            )
            .await?;
        Ok(users.into_iter().next())
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let users = self
            .query_users(
                "/user/get_users_info",
                serde_json::json!({ "userIDs": [user_id] }),
            )
            .await?;
        Ok(users.into_iter().find(|u| u.id == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_payload_accepts_null_list() {
        let data: UsersData = serde_json::from_str(r#"{"usersInfo": null}"#).unwrap();
        assert!(data.users_info.is_empty());

        let data: UsersData = serde_json::from_str(
            r#"{"usersInfo": [{"userID": "u1", "displayName": "Ann", "email": "ann@example.com"}]}"#,
        )
        .unwrap();
        assert_eq!(data.users_info[0].id, "u1");
        assert_eq!(data.users_info[0].handle, "");
    }

    #[test]
    fn base_url_is_normalised() {
        let dir = HttpUserDirectory::with_base_url("http://localhost:10002/".into()).unwrap();
        assert_eq!(dir.api_base_url, "http://localhost:10002");
    }
}
