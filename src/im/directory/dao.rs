//! 本地用户目录（基于 sqlx / SQLite 的 `users` 表）

use crate::im::directory::models::UserProfile;
use crate::im::directory::UserDirectory;
use crate::im::types::now_millis;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::{debug, info};

/// 本地用户目录
#[derive(Clone)]
pub struct LocalUserDirectory {
    db: Pool<Sqlite>,
}

impl LocalUserDirectory {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 注册或更新用户
    pub async fn register_user(&self, profile: &UserProfile) -> Result<()> {
        let sql = r#"
            INSERT INTO users (id, display_name, email, handle, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                handle = excluded.handle
        "#;
        sqlx::query(sql)
            .bind(&profile.id)
            .bind(&profile.display_name)
            .bind(&profile.email)
            .bind(&profile.handle)
            .bind(now_millis())
            .execute(&self.db)
            .await
            .context(format!("注册用户失败: {}", profile.id))?;
        info!("[UserDir] 注册用户: {}", profile.id);
        Ok(())
    }

    fn row_to_profile(row: SqliteRow) -> UserProfile {
        UserProfile {
            id: row.get("id"),
            display_name: row.get("display_name"),
            email: row.get("email"),
            handle: row.get("handle"),
        }
    }
}

#[async_trait]
impl UserDirectory for LocalUserDirectory {
    async fn resolve(&self, identifier: &str) -> Result<Option<UserProfile>> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            r#"
            SELECT id, display_name, email, handle
            FROM users
            WHERE id = ?1
               OR (email != '' AND lower(email) = lower(?1))
               OR (handle != '' AND handle = ?1)
            ORDER BY CASE WHEN id = ?1 THEN 0 ELSE 1 END
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.db)
        .await
        .context("解析用户标识符失败")?;

        debug!(
            "[UserDir] 解析标识符 {} -> {:?}",
            identifier,
            row.as_ref().map(|r| r.get::<String, _>("id"))
        );
        Ok(row.map(Self::row_to_profile))
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT id, display_name, email, handle FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .context("查询用户资料失败")?;
        Ok(row.map(Self::row_to_profile))
    }
}
