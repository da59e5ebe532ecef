//! 未读计数数据访问层
//!
//! 计数只通过原子的 `count = count + 1` / 置零更新，不做读后写。

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Clone)]
pub struct UnreadDao {
    db: Pool<Sqlite>,
}

impl UnreadDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 在调用方的事务内为每个用户的计数 +1
    pub async fn increment_in(
        conn: &mut SqliteConnection,
        conversation_id: &str,
        users: &[String],
    ) -> Result<()> {
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO unread_counters (conversation_id, user_id, count)
                VALUES (?, ?, 1)
                ON CONFLICT(conversation_id, user_id) DO UPDATE SET count = count + 1
                "#,
            )
            .bind(conversation_id)
            .bind(user)
            .execute(&mut *conn)
            .await
            .context("累加未读计数失败")?;
        }
        Ok(())
    }

    /// 整个会话的计数归零
    pub async fn reset(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO unread_counters (conversation_id, user_id, count)
            VALUES (?, ?, 0)
            ON CONFLICT(conversation_id, user_id) DO UPDATE SET count = 0
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.db)
        .await
        .context("重置未读计数失败")?;
        debug!("[UnreadDAO] {} 在会话 {} 的未读已清零", user_id, conversation_id);
        Ok(())
    }

    pub async fn count(&self, conversation_id: &str, user_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT count FROM unread_counters WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("查询未读计数失败")?;
        Ok(row.map(|r| r.get("count")).unwrap_or(0))
    }

    /// 会话内所有成员的计数
    pub async fn counters(&self, conversation_id: &str) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT user_id, count FROM unread_counters WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .context("查询会话未读计数失败")?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("user_id"), r.get("count")))
            .collect())
    }

    /// 用户在各会话的计数
    pub async fn counts_for_user(&self, user_id: &str) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT conversation_id, count FROM unread_counters WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("查询用户未读计数失败")?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("conversation_id"), r.get("count")))
            .collect())
    }

    /// 用户仍是成员且未被删除的会话的未读总数
    pub async fn total_for_user(&self, user_id: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(u.count), 0) AS total
            FROM unread_counters u
            JOIN conversations c ON c.id = u.conversation_id
            JOIN conversation_members m
              ON m.conversation_id = u.conversation_id AND m.user_id = u.user_id
            WHERE u.user_id = ? AND c.deleted_for_everyone = 0
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .context("查询未读总数失败")?;
        Ok(row.get("total"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::create_memory_pool;

    #[tokio::test]
    async fn increment_and_reset() -> anyhow::Result<()> {
        let pool = create_memory_pool().await?;
        let dao = UnreadDao::new(pool.clone());
        let users = vec!["v1".to_string(), "v2".to_string()];

        for _ in 0..3 {
            let mut conn = pool.acquire().await?;
            UnreadDao::increment_in(&mut *conn, "c1", &users).await?;
        }
        assert_eq!(dao.count("c1", "v1").await?, 3);
        assert_eq!(dao.count("c1", "v2").await?, 3);

        dao.reset("c1", "v1").await?;
        let counters = dao.counters("c1").await?;
        assert_eq!(counters.get("v1"), Some(&0));
        assert_eq!(counters.get("v2"), Some(&3));
        assert_eq!(dao.count("c1", "nobody").await?, 0);
        Ok(())
    }
}
