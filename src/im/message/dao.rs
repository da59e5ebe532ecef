//! 消息数据访问层（DAO）
//!
//! 消息只追加；编辑改写正文，对所有人删除只打标记并替换为占位文本。

use crate::im::conversation::models::HiddenMessageRef;
use crate::im::message::models::{Message, MessageContent, Reaction};
use crate::im::types::now_millis;
use crate::im::unread::UnreadDao;
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::collections::HashMap;
use tracing::debug;

const SELECT_MESSAGE: &str = r#"
    SELECT id, conversation_id, sender_id, kind, body, url, file_name, created_at, seq, edited,
           edited_at, deleted_for_everyone, deleted_by, deleted_at
    FROM messages
"#;

/// 追加消息的结果：写入成功时带上本次 +1 的接收者
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { recipients: Vec<String> },
    ConversationMissing,
    ConversationDeleted,
    NotMember,
}

#[derive(Clone)]
pub struct MessageDao {
    db: Pool<Sqlite>,
}

impl MessageDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    fn row_to_message(row: &SqliteRow) -> Message {
        let kind: String = row.get("kind");
        Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            content: MessageContent::from_columns(
                &kind,
                row.get("body"),
                row.get("url"),
                row.get("file_name"),
            ),
            created_at: row.get("created_at"),
            seq: row.get("seq"),
            edited: row.get("edited"),
            edited_at: row.get("edited_at"),
            deleted_for_everyone: row.get("deleted_for_everyone"),
            deleted_by: row.get("deleted_by"),
            deleted_at: row.get("deleted_at"),
            reactions: Vec::new(),
        }
    }

    /// 在一个事务里校验发送条件、分配序列号、写入消息并累加其他成员的未读计数
    ///
    /// 会话未删除且发送者仍是成员这两个条件与序列号分配是同一条语句，
    /// 并发的删除或移除成员要么先提交使本次写入被拒绝，要么排在本次写入之后。
    /// 写入成功后 `msg.seq` 与 `msg.created_at` 由事务内赋值。
    pub async fn append(&self, msg: &mut Message) -> Result<AppendOutcome> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;

        let seq: Option<i64> = sqlx::query(
            r#"
            UPDATE conversations SET last_seq = last_seq + 1
            WHERE id = ?1 AND deleted_for_everyone = 0
              AND EXISTS (SELECT 1 FROM conversation_members
                          WHERE conversation_id = ?1 AND user_id = ?2)
            RETURNING last_seq
            "#,
        )
        .bind(&msg.conversation_id)
        .bind(&msg.sender_id)
        .fetch_optional(&mut *tx)
        .await
        .context("分配消息序列号失败")?
        .map(|row| row.get("last_seq"));

        let Some(seq) = seq else {
            let state = sqlx::query(
                r#"
                SELECT deleted_for_everyone,
                       EXISTS (SELECT 1 FROM conversation_members
                               WHERE conversation_id = ?1 AND user_id = ?2) AS is_member
                FROM conversations WHERE id = ?1
                "#,
            )
            .bind(&msg.conversation_id)
            .bind(&msg.sender_id)
            .fetch_optional(&mut *tx)
            .await
            .context("查询会话状态失败")?;
            tx.rollback().await.context("回滚事务失败")?;

            let outcome = match state {
                None => AppendOutcome::ConversationMissing,
                Some(row) if row.get::<bool, _>("deleted_for_everyone") => {
                    AppendOutcome::ConversationDeleted
                }
                Some(_) => AppendOutcome::NotMember,
            };
            debug!(
                "[MsgDAO] 会话 {} 拒绝 {} 的消息: {:?}",
                msg.conversation_id, msg.sender_id, outcome
            );
            return Ok(outcome);
        };
        msg.seq = seq;
        msg.created_at = now_millis();

        let (url, file_name) = match &msg.content {
            MessageContent::Text { .. } => (None, None),
            MessageContent::Image { url, name } | MessageContent::File { url, name } => {
                (Some(url.as_str()), Some(name.as_str()))
            }
        };
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, kind, body, url, file_name, created_at, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(&msg.sender_id)
        .bind(msg.content.kind_str())
        .bind(msg.content.body().unwrap_or_default())
        .bind(url)
        .bind(file_name)
        .bind(msg.created_at)
        .bind(msg.seq)
        .execute(&mut *tx)
        .await
        .context("插入消息失败")?;

        let recipients: Vec<String> = sqlx::query(
            r#"
            SELECT user_id FROM conversation_members
            WHERE conversation_id = ? AND user_id != ?
            ORDER BY user_id
            "#,
        )
        .bind(&msg.conversation_id)
        .bind(&msg.sender_id)
        .fetch_all(&mut *tx)
        .await
        .context("查询消息接收者失败")?
        .iter()
        .map(|row| row.get("user_id"))
        .collect();

        UnreadDao::increment_in(&mut *tx, &msg.conversation_id, &recipients).await?;

        tx.commit().await.context("提交事务失败")?;
        debug!(
            "[MsgDAO] 消息 {} 写入会话 {}，seq={}",
            msg.id, msg.conversation_id, msg.seq
        );
        Ok(AppendOutcome::Appended { recipients })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Message>> {
        let sql = format!("{} WHERE id = ?", SELECT_MESSAGE);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("查询消息失败")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut msg = Self::row_to_message(&row);
        msg.reactions = self.reactions(id).await?;
        Ok(Some(msg))
    }

    /// 改写文本正文
    ///
    /// 仅当消息是未删除的文本消息、会话未被删除且发送者仍是成员时生效，否则返回 `false`。
    pub async fn update_body(&self, id: &str, body: &str, edited_at: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE messages SET body = ?1, edited = 1, edited_at = ?2
            WHERE id = ?3 AND deleted_for_everyone = 0 AND kind = 'text'
              AND EXISTS (SELECT 1 FROM conversations c
                          WHERE c.id = messages.conversation_id AND c.deleted_for_everyone = 0)
              AND EXISTS (SELECT 1 FROM conversation_members m
                          WHERE m.conversation_id = messages.conversation_id
                            AND m.user_id = messages.sender_id)
            "#,
        )
        .bind(body)
        .bind(edited_at)
        .bind(id)
        .execute(&self.db)
        .await
        .context("编辑消息失败")?;
        Ok(res.rows_affected() > 0)
    }

    /// 对所有人删除：替换正文并清空表情回应；已删除时返回 `false`
    pub async fn tombstone(&self, id: &str, text: &str, by: &str, at: i64) -> Result<bool> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let res = sqlx::query(
            r#"
            UPDATE messages
            SET kind = 'text', body = ?, url = NULL, file_name = NULL,
                deleted_for_everyone = 1, deleted_by = ?, deleted_at = ?
            WHERE id = ? AND deleted_for_everyone = 0
            "#,
        )
        .bind(text)
        .bind(by)
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("删除消息失败")?;
        if res.rows_affected() == 0 {
            tx.rollback().await.context("回滚事务失败")?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM message_reactions WHERE message_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("清空表情回应失败")?;
        tx.commit().await.context("提交事务失败")?;
        Ok(true)
    }

    /// 加入查看者的隐藏消息索引（幂等）
    pub async fn hide_for_viewer(&self, viewer: &str, hidden: &HiddenMessageRef, at: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO hidden_messages (user_id, conversation_id, message_id, hidden_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(viewer)
        .bind(&hidden.conversation_id)
        .bind(&hidden.message_id)
        .bind(at)
        .execute(&self.db)
        .await
        .context("隐藏消息失败")?;
        Ok(())
    }

    /// 追加表情回应（不去重）
    pub async fn add_reaction(&self, message_id: &str, reaction: &Reaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, value, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(&reaction.user_id)
        .bind(&reaction.value)
        .bind(reaction.created_at)
        .execute(&self.db)
        .await
        .context("添加表情回应失败")?;
        Ok(())
    }

    pub async fn reactions(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let rows = sqlx::query(
            "SELECT user_id, value, created_at FROM message_reactions WHERE message_id = ? ORDER BY id",
        )
        .bind(message_id)
        .fetch_all(&self.db)
        .await
        .context("查询表情回应失败")?;
        Ok(rows
            .into_iter()
            .map(|r| Reaction {
                user_id: r.get("user_id"),
                value: r.get("value"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// 查看者可见的会话消息，按 (created_at, seq) 升序
    ///
    /// 被对所有人删除的消息不受隐藏索引影响，始终以占位文本出现。
    pub async fn list_for_viewer(&self, conversation_id: &str, viewer: &str) -> Result<Vec<Message>> {
        let sql = format!(
            r#"{} WHERE conversation_id = ?1
                 AND (deleted_for_everyone = 1
                      OR id NOT IN (SELECT message_id FROM hidden_messages WHERE user_id = ?2))
               ORDER BY created_at ASC, seq ASC"#,
            SELECT_MESSAGE
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .bind(viewer)
            .fetch_all(&self.db)
            .await
            .context("查询会话消息失败")?;

        let reaction_rows = sqlx::query(
            r#"
            SELECT r.message_id, r.user_id, r.value, r.created_at
            FROM message_reactions r
            JOIN messages m ON m.id = r.message_id
            WHERE m.conversation_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .context("查询会话表情回应失败")?;

        let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
        for r in reaction_rows {
            reactions
                .entry(r.get("message_id"))
                .or_default()
                .push(Reaction {
                    user_id: r.get("user_id"),
                    value: r.get("value"),
                    created_at: r.get("created_at"),
                });
        }

        let list: Vec<Message> = rows
            .iter()
            .map(|row| {
                let mut msg = Self::row_to_message(row);
                msg.reactions = reactions.remove(&msg.id).unwrap_or_default();
                msg
            })
            .collect();
        debug!(
            "[MsgDAO] 会话 {} 对 {} 可见消息 {} 条",
            conversation_id,
            viewer,
            list.len()
        );
        Ok(list)
    }
}
