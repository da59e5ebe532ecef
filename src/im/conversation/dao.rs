//! 会话数据访问层（DAO）
//!
//! 会话只做标记删除，从不物理删除；成员与管理员保存在 `conversation_members`。

use crate::im::conversation::models::{
    Conversation, ConversationKind, GroupPrivacy, HiddenIndex, HiddenMessageRef,
};
use crate::im::types::{now_millis, pair_key};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::collections::BTreeSet;
use tracing::debug;

const SELECT_CONVERSATION: &str = r#"
    SELECT id, kind, name, description, privacy, created_by, created_at,
           last_seq, deleted_for_everyone, deleted_by, deleted_at
    FROM conversations
"#;

#[derive(Clone)]
pub struct ConversationDao {
    db: Pool<Sqlite>,
}

impl ConversationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 插入会话及其成员
    ///
    /// 私聊受 `idx_conversations_active_pair` 约束，同一用户对已存在未删除私聊时返回 `false`。
    pub async fn insert_conversation(&self, conv: &Conversation) -> Result<bool> {
        let (kind, key, name, description, privacy) = match &conv.kind {
            ConversationKind::Private => {
                let members: Vec<&String> = conv.members.iter().collect();
                if members.len() != 2 {
                    anyhow::bail!("私聊必须恰好有两名成员: {}", conv.id);
                }
                ("private", Some(pair_key(members[0], members[1])), None, None, None)
            }
            ConversationKind::Group {
                name,
                description,
                privacy,
                ..
            } => (
                "group",
                None,
                Some(name.as_str()),
                Some(description.as_str()),
                Some(privacy.as_str()),
            ),
        };

        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let res = sqlx::query(
            r#"
            INSERT INTO conversations (id, kind, pair_key, name, description, privacy,
                                       created_by, created_at, last_seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&conv.id)
        .bind(kind)
        .bind(key)
        .bind(name)
        .bind(description)
        .bind(privacy)
        .bind(&conv.created_by)
        .bind(conv.created_at)
        .execute(&mut *tx)
        .await;

        match res {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!("[ConvDAO] 用户对已存在有效私聊，放弃插入 {}", conv.id);
                tx.rollback().await.context("回滚事务失败")?;
                return Ok(false);
            }
            Err(e) => return Err(e).context("插入会话失败"),
        }

        let admins = conv.admins();
        for member in &conv.members {
            sqlx::query(
                "INSERT INTO conversation_members (conversation_id, user_id, is_admin, joined_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&conv.id)
            .bind(member)
            .bind(admins.contains(member))
            .bind(conv.created_at)
            .execute(&mut *tx)
            .await
            .context("插入会话成员失败")?;
        }

        tx.commit().await.context("提交事务失败")?;
        debug!(
            "[ConvDAO] 已插入会话 {} ({}), 成员 {} 人",
            conv.id,
            kind,
            conv.members.len()
        );
        Ok(true)
    }

    async fn assemble(&self, row: SqliteRow) -> Result<Conversation> {
        let id: String = row.get("id");
        let kind: String = row.get("kind");

        let member_rows = sqlx::query(
            "SELECT user_id, is_admin FROM conversation_members WHERE conversation_id = ? ORDER BY user_id",
        )
        .bind(&id)
        .fetch_all(&self.db)
        .await
        .context("查询会话成员失败")?;

        let mut members = BTreeSet::new();
        let mut admins = BTreeSet::new();
        for m in member_rows {
            let user: String = m.get("user_id");
            if m.get::<bool, _>("is_admin") {
                admins.insert(user.clone());
            }
            members.insert(user);
        }

        let kind = match kind.as_str() {
            "private" => ConversationKind::Private,
            "group" => ConversationKind::Group {
                name: row.get::<Option<String>, _>("name").unwrap_or_default(),
                description: row
                    .get::<Option<String>, _>("description")
                    .unwrap_or_default(),
                privacy: GroupPrivacy::parse(
                    &row.get::<Option<String>, _>("privacy").unwrap_or_default(),
                ),
                admins,
            },
            other => anyhow::bail!("未知的会话类型: {}", other),
        };

        Ok(Conversation {
            id,
            kind,
            members,
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
            last_seq: row.get("last_seq"),
            deleted_for_everyone: row.get("deleted_for_everyone"),
            deleted_by: row.get("deleted_by"),
            deleted_at: row.get("deleted_at"),
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let sql = format!("{} WHERE id = ?", SELECT_CONVERSATION);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("查询会话失败")?;
        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    /// 用户对之间未删除的私聊
    pub async fn find_active_private(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        let sql = format!(
            "{} WHERE kind = 'private' AND pair_key = ? AND deleted_for_everyone = 0",
            SELECT_CONVERSATION
        );
        let row = sqlx::query(&sql)
            .bind(pair_key(a, b))
            .fetch_optional(&self.db)
            .await
            .context("按用户对查询私聊失败")?;
        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    /// 添加成员，返回实际新加入的用户
    pub async fn add_members(
        &self,
        conversation_id: &str,
        users: &[String],
        joined_at: i64,
    ) -> Result<Vec<String>> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let mut added = Vec::new();
        for user in users {
            let res = sqlx::query(
                r#"
                INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, is_admin, joined_at)
                VALUES (?, ?, 0, ?)
                "#,
            )
            .bind(conversation_id)
            .bind(user)
            .bind(joined_at)
            .execute(&mut *tx)
            .await
            .context("添加会话成员失败")?;
            if res.rows_affected() > 0 {
                added.push(user.clone());
            }
        }
        tx.commit().await.context("提交事务失败")?;
        Ok(added)
    }

    /// 移除成员（同时失去管理员身份）
    pub async fn remove_member(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let res = sqlx::query(
            "DELETE FROM conversation_members WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.db)
        .await
        .context("移除会话成员失败")?;
        Ok(res.rows_affected() > 0)
    }

    /// 设置管理员标记，返回是否发生变化
    pub async fn set_admin(&self, conversation_id: &str, user_id: &str, admin: bool) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE conversation_members SET is_admin = ?
            WHERE conversation_id = ? AND user_id = ? AND is_admin != ?
            "#,
        )
        .bind(admin)
        .bind(conversation_id)
        .bind(user_id)
        .bind(admin)
        .execute(&self.db)
        .await
        .context("更新管理员失败")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn update_profile(
        &self,
        conversation_id: &str,
        name: &str,
        description: &str,
        privacy: GroupPrivacy,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET name = ?, description = ?, privacy = ? WHERE id = ? AND kind = 'group'",
        )
        .bind(name)
        .bind(description)
        .bind(privacy.as_str())
        .bind(conversation_id)
        .execute(&self.db)
        .await
        .context("更新群资料失败")?;
        Ok(())
    }

    /// 对所有人删除，返回删除时间；已删除时返回 `None`
    pub async fn mark_deleted(&self, conversation_id: &str, by: &str) -> Result<Option<i64>> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        let res = sqlx::query(
            r#"
            UPDATE conversations SET deleted_for_everyone = 1, deleted_by = ?
            WHERE id = ? AND deleted_for_everyone = 0
            "#,
        )
        .bind(by)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .context("标记会话删除失败")?;
        if res.rows_affected() == 0 {
            tx.rollback().await.context("回滚事务失败")?;
            return Ok(None);
        }

        // 已持有写锁，此后不会再有消息写入，删除时间晚于所有已提交消息
        let at = now_millis();
        sqlx::query("UPDATE conversations SET deleted_at = ? WHERE id = ?")
            .bind(at)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .context("写入会话删除时间失败")?;
        tx.commit().await.context("提交事务失败")?;
        Ok(Some(at))
    }

    /// 加入查看者的隐藏会话索引（幂等）
    pub async fn hide_for_user(&self, user_id: &str, conversation_id: &str, at: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO hidden_conversations (user_id, conversation_id, hidden_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(at)
        .execute(&self.db)
        .await
        .context("隐藏会话失败")?;
        Ok(())
    }

    /// 用户参与且未对其隐藏的会话，最新创建的在前
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let sql = format!(
            r#"{} WHERE id IN (SELECT conversation_id FROM conversation_members WHERE user_id = ?1)
                 AND id NOT IN (SELECT conversation_id FROM hidden_conversations WHERE user_id = ?1)
               ORDER BY created_at DESC, id"#,
            SELECT_CONVERSATION
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.db)
            .await
            .context("查询会话列表失败")?;

        let mut list = Vec::with_capacity(rows.len());
        for row in rows {
            list.push(self.assemble(row).await?);
        }
        debug!("[ConvDAO] 用户 {} 可见会话 {} 个", user_id, list.len());
        Ok(list)
    }

    /// 查看者的隐藏索引
    pub async fn hidden_index(&self, user_id: &str) -> Result<HiddenIndex> {
        let conversations = sqlx::query(
            "SELECT conversation_id FROM hidden_conversations WHERE user_id = ? ORDER BY hidden_at, conversation_id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("查询隐藏会话失败")?
        .into_iter()
        .map(|r| r.get("conversation_id"))
        .collect();

        let messages = sqlx::query(
            "SELECT conversation_id, message_id FROM hidden_messages WHERE user_id = ? ORDER BY hidden_at, message_id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("查询隐藏消息失败")?
        .into_iter()
        .map(|r| HiddenMessageRef {
            conversation_id: r.get("conversation_id"),
            message_id: r.get("message_id"),
        })
        .collect();

        Ok(HiddenIndex {
            conversations,
            messages,
        })
    }
}
