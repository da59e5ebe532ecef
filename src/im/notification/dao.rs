//! 通知数据访问层（DAO）

use crate::im::notification::models::{Notification, NotificationPayload};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::debug;

/// 通知 DAO（基于 sqlx）
#[derive(Clone)]
pub struct NotificationDao {
    db: Pool<Sqlite>,
}

impl NotificationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    fn row_to_notification(row: SqliteRow) -> Result<Notification> {
        let payload: String = row.get("payload");
        let payload: NotificationPayload =
            serde_json::from_str(&payload).context("解析通知负载失败")?;
        let read: i64 = row.get("read");
        Ok(Notification {
            id: row.get("id"),
            recipient_id: row.get("recipient_id"),
            payload,
            title: row.get("title"),
            message: row.get("message"),
            created_at: row.get("created_at"),
            read: read != 0,
        })
    }

    pub async fn insert(&self, n: &Notification) -> Result<()> {
        let payload = serde_json::to_string(&n.payload).context("序列化通知负载失败")?;
        sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_id, kind, payload, title, message, created_at, read)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&n.id)
        .bind(&n.recipient_id)
        .bind(n.kind().as_str())
        .bind(payload)
        .bind(&n.title)
        .bind(&n.message)
        .bind(n.created_at)
        .bind(if n.read { 1 } else { 0 })
        .execute(&self.db)
        .await
        .context("写入通知失败")?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Notification>> {
        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("查询通知失败")?;
        row.map(Self::row_to_notification).transpose()
    }

    /// 某个接收者的未读通知，最新的在前
    pub async fn unread_for(&self, recipient_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = ? AND read = 0
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(recipient_id)
        .fetch_all(&self.db)
        .await
        .context("查询未读通知失败")?;

        rows.into_iter().map(Self::row_to_notification).collect()
    }

    /// 某个接收者的全部通知（含已读），最新的在前
    pub async fn all_for(&self, recipient_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE recipient_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(recipient_id)
        .fetch_all(&self.db)
        .await
        .context("查询通知列表失败")?;

        rows.into_iter().map(Self::row_to_notification).collect()
    }

    pub async fn mark_read(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND read = 0")
            .bind(id)
            .execute(&self.db)
            .await
            .context("标记通知已读失败")?;
        Ok(res.rows_affected() > 0)
    }

    /// 在一个事务内把接收者的全部未读通知标记为已读：要么全部成功，要么全部不变
    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let res = sqlx::query("UPDATE notifications SET read = 1 WHERE recipient_id = ? AND read = 0")
            .bind(recipient_id)
            .execute(&mut *tx)
            .await
            .context("批量标记通知已读失败")?;
        tx.commit().await.context("提交事务失败")?;

        debug!(
            "[NotifyDAO] 用户 {} 批量已读 {} 条通知",
            recipient_id,
            res.rows_affected()
        );
        Ok(res.rows_affected())
    }
}
