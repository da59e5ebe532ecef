//! 好友数据访问层（DAO）
//!
//! 负责所有好友关系相关的数据库操作，将数据访问逻辑与业务逻辑分离。

use crate::im::friend::models::{Friendship, FriendshipStatus};
use crate::im::types::pair_key;
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::debug;

const SELECT_FRIENDSHIP: &str = r#"
    SELECT id, from_user, to_user, status, created_at, accepted_at
    FROM friendships
"#;

/// 好友 DAO（基于 sqlx）
#[derive(Clone)]
pub struct FriendDao {
    db: Pool<Sqlite>,
}

impl FriendDao {
    /// 创建新的好友 DAO
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    fn row_to_friendship(row: SqliteRow) -> Result<Friendship> {
        let status: String = row.get("status");
        Ok(Friendship {
            id: row.get("id"),
            from_user: row.get("from_user"),
            to_user: row.get("to_user"),
            status: FriendshipStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("未知的好友关系状态: {}", status))?,
            created_at: row.get("created_at"),
            accepted_at: row.get("accepted_at"),
        })
    }

    /// 插入好友请求；若该用户对已存在记录（唯一索引冲突）返回 `false`
    pub async fn insert_friendship(&self, f: &Friendship) -> Result<bool> {
        let sql = r#"
            INSERT INTO friendships (id, from_user, to_user, pair_key, status, created_at, accepted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;
        let res = sqlx::query(sql)
            .bind(&f.id)
            .bind(&f.from_user)
            .bind(&f.to_user)
            .bind(pair_key(&f.from_user, &f.to_user))
            .bind(f.status.as_str())
            .bind(f.created_at)
            .bind(f.accepted_at)
            .execute(&self.db)
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!(
                    "[FriendDAO] 用户对 {} <-> {} 已存在好友关系记录",
                    f.from_user, f.to_user
                );
                Ok(false)
            }
            Err(e) => Err(e).context("插入好友请求失败"),
        }
    }

    /// 按 ID 查询
    pub async fn get(&self, id: &str) -> Result<Option<Friendship>> {
        let sql = format!("{} WHERE id = ?", SELECT_FRIENDSHIP);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("查询好友关系失败")?;
        row.map(Self::row_to_friendship).transpose()
    }

    /// 查询无序用户对之间的记录（任意状态）
    pub async fn find_by_pair(&self, a: &str, b: &str) -> Result<Option<Friendship>> {
        let sql = format!("{} WHERE pair_key = ?", SELECT_FRIENDSHIP);
        let row = sqlx::query(&sql)
            .bind(pair_key(a, b))
            .fetch_optional(&self.db)
            .await
            .context("按用户对查询好友关系失败")?;
        row.map(Self::row_to_friendship).transpose()
    }

    /// 将待处理请求标记为已接受；请求已不是 pending 时返回 `None`
    pub async fn mark_accepted(&self, id: &str, accepted_at: i64) -> Result<Option<Friendship>> {
        let res = sqlx::query(
            "UPDATE friendships SET status = 'accepted', accepted_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(accepted_at)
        .bind(id)
        .execute(&self.db)
        .await
        .context("接受好友请求失败")?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// 删除记录（拒绝、撤回、解除好友共用）
    pub async fn delete(&self, id: &str, expected_status: FriendshipStatus) -> Result<bool> {
        let res = sqlx::query("DELETE FROM friendships WHERE id = ? AND status = ?")
            .bind(id)
            .bind(expected_status.as_str())
            .execute(&self.db)
            .await
            .context("删除好友关系失败")?;
        Ok(res.rows_affected() > 0)
    }

    /// 双方是否为好友（对称，走 pair_key 唯一索引）
    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM friendships WHERE pair_key = ? AND status = 'accepted'",
        )
        .bind(pair_key(a, b))
        .fetch_optional(&self.db)
        .await
        .context("查询好友状态失败")?;
        Ok(row.is_some())
    }

    /// 与某用户相关的全部记录，按创建时间倒序
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Friendship>> {
        let sql = format!(
            "{} WHERE from_user = ?1 OR to_user = ?1 ORDER BY created_at DESC, id",
            SELECT_FRIENDSHIP
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.db)
            .await
            .context("查询好友列表失败")?;

        let list = rows
            .into_iter()
            .map(Self::row_to_friendship)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "[FriendDAO] 用户 {} 共有 {} 条好友关系记录",
            user_id,
            list.len()
        );
        Ok(list)
    }
}
