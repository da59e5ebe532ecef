//! 消息账本服务
//!
//! 状态机：Active ⇄ Edited（仅发送者，编辑窗口内）→ DeletedForEveryone（终态）。
//! 仅对自己删除是叠加在任意状态上的查看者视图，不改变消息本身。

use crate::im::conversation::dao::ConversationDao;
use crate::im::conversation::models::{Conversation, DeleteScope, HiddenMessageRef};
use crate::im::conversation::service::require_conversation;
use crate::im::error::{SocialError, SocialResult};
use crate::im::events::{DomainEvent, EventBus};
use crate::im::message::dao::{AppendOutcome, MessageDao};
use crate::im::message::models::{AttachmentKind, Message, MessageContent, Reaction};
use crate::im::serialization::generate_id;
use crate::im::types::now_millis;
use tracing::{debug, info};

pub const DEFAULT_EDIT_WINDOW_SECS: i64 = 3600;
pub const DEFAULT_TOMBSTONE_TEXT: &str = "This message was deleted";

#[derive(Clone)]
pub struct MessageLedger {
    dao: MessageDao,
    conversations: ConversationDao,
    events: EventBus,
    edit_window_ms: i64,
    tombstone_text: String,
}

impl MessageLedger {
    pub fn new(dao: MessageDao, conversations: ConversationDao, events: EventBus) -> Self {
        Self {
            dao,
            conversations,
            events,
            edit_window_ms: DEFAULT_EDIT_WINDOW_SECS * 1000,
            tombstone_text: DEFAULT_TOMBSTONE_TEXT.to_string(),
        }
    }

    pub fn with_edit_window_secs(mut self, secs: i64) -> Self {
        self.edit_window_ms = secs * 1000;
        self
    }

    pub fn with_tombstone_text(mut self, text: impl Into<String>) -> Self {
        self.tombstone_text = text.into();
        self
    }

    pub fn tombstone_text(&self) -> &str {
        &self.tombstone_text
    }

    async fn require_message(&self, message_id: &str) -> SocialResult<Message> {
        self.dao
            .get(message_id)
            .await?
            .ok_or_else(|| SocialError::not_found("消息", message_id))
    }

    async fn require_member(&self, conversation_id: &str, user: &str) -> SocialResult<Conversation> {
        let conversation = require_conversation(&self.conversations, conversation_id).await?;
        if !conversation.is_member(user) {
            return Err(SocialError::unauthorized("不是该会话成员"));
        }
        Ok(conversation)
    }

    fn publish_changed(&self, message: Message, conversation: &Conversation) {
        self.events.publish(DomainEvent::MessageChanged {
            message,
            members: conversation.members.iter().cloned().collect(),
        });
    }

    /// 发送文本消息
    ///
    /// 空白正文被拒绝；正文按原样保存，不做裁剪。
    pub async fn send(&self, conversation_id: &str, sender: &str, body: &str) -> SocialResult<Message> {
        if body.trim().is_empty() {
            return Err(SocialError::Validation("消息内容不能为空".into()));
        }
        self.append(conversation_id, sender, MessageContent::text(body))
            .await
    }

    /// 发送图片或文件消息，`url` 为外部存储返回的下载地址
    pub async fn send_attachment(
        &self,
        conversation_id: &str,
        sender: &str,
        kind: AttachmentKind,
        url: &str,
        name: &str,
    ) -> SocialResult<Message> {
        if url.trim().is_empty() {
            return Err(SocialError::Validation("附件地址不能为空".into()));
        }
        if name.trim().is_empty() {
            return Err(SocialError::Validation("附件名称不能为空".into()));
        }
        self.append(
            conversation_id,
            sender,
            MessageContent::attachment(kind, url, name),
        )
        .await
    }

    /// 序列号分配、发送条件校验、写入消息和其他成员的未读 +1 在同一事务内完成
    async fn append(
        &self,
        conversation_id: &str,
        sender: &str,
        content: MessageContent,
    ) -> SocialResult<Message> {
        let mut message = Message {
            id: generate_id("msg"),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.to_string(),
            content,
            created_at: 0,
            seq: 0,
            edited: false,
            edited_at: None,
            deleted_for_everyone: false,
            deleted_by: None,
            deleted_at: None,
            reactions: Vec::new(),
        };
        let recipients = match self.dao.append(&mut message).await? {
            AppendOutcome::Appended { recipients } => recipients,
            AppendOutcome::ConversationMissing => {
                return Err(SocialError::not_found("会话", conversation_id))
            }
            AppendOutcome::ConversationDeleted => {
                return Err(SocialError::PreconditionFailed("会话已被删除".into()))
            }
            AppendOutcome::NotMember => return Err(SocialError::unauthorized("不是该会话成员")),
        };
        debug!(
            "[Ledger] {} -> {} seq={} {} ({} 个接收者)",
            sender,
            conversation_id,
            message.seq,
            message.content.kind_str(),
            recipients.len()
        );

        let mut members = recipients;
        members.push(sender.to_string());
        self.events.publish(DomainEvent::MessageSent {
            message: message.clone(),
            members,
        });
        Ok(message)
    }

    /// 编辑文本消息（仅仍在会话中的发送者，编辑窗口内）
    pub async fn edit(&self, message_id: &str, actor: &str, new_body: &str) -> SocialResult<Message> {
        if new_body.trim().is_empty() {
            return Err(SocialError::Validation("消息内容不能为空".into()));
        }
        let message = self.require_message(message_id).await?;
        if message.sender_id != actor {
            return Err(SocialError::unauthorized("只能编辑自己发送的消息"));
        }
        let conversation = self.require_member(&message.conversation_id, actor).await?;
        if conversation.deleted_for_everyone {
            return Err(SocialError::PreconditionFailed("会话已被删除".into()));
        }
        if message.deleted_for_everyone {
            return Err(SocialError::PreconditionFailed("消息已被删除".into()));
        }
        if message.content.body().is_none() {
            return Err(SocialError::PreconditionFailed("附件消息不能编辑".into()));
        }
        let now = now_millis();
        if now - message.created_at > self.edit_window_ms {
            return Err(SocialError::PreconditionFailed("已超过可编辑时间".into()));
        }

        if !self.dao.update_body(message_id, new_body, now).await? {
            return Err(SocialError::PreconditionFailed("消息或会话已被删除".into()));
        }
        info!("[Ledger] {} 编辑了消息 {}", actor, message_id);

        let updated = self.require_message(message_id).await?;
        self.publish_changed(updated.clone(), &conversation);
        Ok(updated)
    }

    /// 删除消息
    ///
    /// `ForMe` 只写入操作者的隐藏索引；`ForEveryone` 仅发送者可执行，为终态。
    pub async fn delete(&self, message_id: &str, actor: &str, scope: DeleteScope) -> SocialResult<()> {
        let message = self.require_message(message_id).await?;
        let conversation = self.require_member(&message.conversation_id, actor).await?;

        match scope {
            DeleteScope::ForMe => {
                let hidden = HiddenMessageRef {
                    conversation_id: message.conversation_id.clone(),
                    message_id: message.id.clone(),
                };
                self.dao.hide_for_viewer(actor, &hidden, now_millis()).await?;
                debug!("[Ledger] {} 隐藏了消息 {}", actor, message_id);
                self.events.publish(DomainEvent::MessageHidden {
                    conversation_id: hidden.conversation_id,
                    message_id: hidden.message_id,
                    user_id: actor.to_string(),
                });
            }
            DeleteScope::ForEveryone => {
                if message.sender_id != actor {
                    return Err(SocialError::unauthorized("只能对所有人删除自己发送的消息"));
                }
                if message.deleted_for_everyone {
                    return Err(SocialError::PreconditionFailed("消息已被删除".into()));
                }
                if !self
                    .dao
                    .tombstone(message_id, &self.tombstone_text, actor, now_millis())
                    .await?
                {
                    return Err(SocialError::PreconditionFailed("消息已被删除".into()));
                }
                info!("[Ledger] {} 对所有人删除了消息 {}", actor, message_id);
                let updated = self.require_message(message_id).await?;
                self.publish_changed(updated, &conversation);
            }
        }
        Ok(())
    }

    /// 添加表情回应（成员，可重复）
    pub async fn react(&self, message_id: &str, actor: &str, value: &str) -> SocialResult<Message> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SocialError::Validation("表情不能为空".into()));
        }
        let message = self.require_message(message_id).await?;
        let conversation = self.require_member(&message.conversation_id, actor).await?;
        if message.deleted_for_everyone {
            return Err(SocialError::PreconditionFailed("消息已被删除".into()));
        }

        let reaction = Reaction {
            user_id: actor.to_string(),
            value: value.to_string(),
            created_at: now_millis(),
        };
        self.dao.add_reaction(message_id, &reaction).await?;

        let updated = self.require_message(message_id).await?;
        self.publish_changed(updated.clone(), &conversation);
        Ok(updated)
    }

    /// 消息的表情回应；被对所有人删除的消息没有回应
    pub async fn reactions(&self, message_id: &str) -> SocialResult<Vec<Reaction>> {
        let message = self.require_message(message_id).await?;
        if message.deleted_for_everyone {
            return Ok(Vec::new());
        }
        Ok(message.reactions)
    }

    pub async fn get(&self, message_id: &str, viewer: &str) -> SocialResult<Message> {
        let message = self.require_message(message_id).await?;
        self.require_member(&message.conversation_id, viewer).await?;
        Ok(message)
    }

    /// 查看者视角的有序消息列表（已去除其隐藏的消息）
    pub async fn messages_for_viewer(
        &self,
        conversation_id: &str,
        viewer: &str,
    ) -> SocialResult<Vec<Message>> {
        self.require_member(conversation_id, viewer).await?;
        Ok(self.dao.list_for_viewer(conversation_id, viewer).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::models::ConversationKind;
    use crate::im::db::{create_memory_pool, create_sqlite_pool_with_migration};
    use crate::im::error::ErrorKind;
    use crate::im::message::models::MessageState;
    use crate::im::unread::UnreadDao;
    use sqlx::{Pool, Sqlite};

    struct Fixture {
        ledger: MessageLedger,
        unread: UnreadDao,
        conversations: ConversationDao,
        pool: Pool<Sqlite>,
    }

    async fn setup() -> anyhow::Result<Fixture> {
        setup_with(create_memory_pool().await?).await
    }

    /// 多连接的文件库，事务之间会真正并发
    async fn setup_file_backed(dir: &tempfile::TempDir) -> anyhow::Result<Fixture> {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
        setup_with(create_sqlite_pool_with_migration(&url, 8).await?).await
    }

    /// s 为管理员、v1 v2 为成员的三人群
    fn trio(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            kind: ConversationKind::Group {
                name: "trio".into(),
                description: String::new(),
                privacy: Default::default(),
                admins: ["s".to_string()].into_iter().collect(),
            },
            members: ["s", "v1", "v2"].iter().map(|s| s.to_string()).collect(),
            created_by: "s".into(),
            created_at: 1,
            last_seq: 0,
            deleted_for_everyone: false,
            deleted_by: None,
            deleted_at: None,
        }
    }

    async fn setup_with(pool: Pool<Sqlite>) -> anyhow::Result<Fixture> {
        let conversations = ConversationDao::new(pool.clone());
        conversations.insert_conversation(&trio("c1")).await?;
        let ledger = MessageLedger::new(
            MessageDao::new(pool.clone()),
            conversations.clone(),
            EventBus::new(64),
        );
        Ok(Fixture {
            ledger,
            unread: UnreadDao::new(pool.clone()),
            conversations,
            pool,
        })
    }

    #[tokio::test]
    async fn send_assigns_sequence_and_counts_unread() -> anyhow::Result<()> {
        let fx = setup().await?;
        for i in 1..=4 {
            let msg = fx.ledger.send("c1", "s", &format!("hello {}", i)).await?;
            assert_eq!(msg.seq, i);
        }
        assert_eq!(fx.unread.count("c1", "v1").await?, 4);
        assert_eq!(fx.unread.count("c1", "v2").await?, 4);
        assert_eq!(fx.unread.count("c1", "s").await?, 0);

        let listed = fx.ledger.messages_for_viewer("c1", "v1").await?;
        let seqs: Vec<i64> = listed.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[tokio::test]
    async fn send_rejects_blank_body_and_outsiders() -> anyhow::Result<()> {
        let fx = setup().await?;
        let err = fx.ledger.send("c1", "s", "  \n ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = fx.ledger.send("c1", "mallory", "hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = fx.ledger.send("missing", "s", "hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        fx.conversations.mark_deleted("c1", "s").await?;
        let err = fx.ledger.send("c1", "s", "hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn edit_only_by_sender_within_window() -> anyhow::Result<()> {
        let fx = setup().await?;
        let msg = fx.ledger.send("c1", "s", "draft").await?;

        let err = fx.ledger.edit(&msg.id, "v1", "hijack").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let edited = fx.ledger.edit(&msg.id, "s", "final").await?;
        assert_eq!(edited.body(), "final");
        assert_eq!(edited.state(), MessageState::Edited);

        // 把发送时间推到两小时前
        sqlx::query("UPDATE messages SET created_at = created_at - 7200000 WHERE id = ?")
            .bind(&msg.id)
            .execute(&fx.pool)
            .await?;
        let err = fx.ledger.edit(&msg.id, "s", "too late").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn delete_for_everyone_tombstones_for_all_readers() -> anyhow::Result<()> {
        let fx = setup().await?;
        let msg = fx.ledger.send("c1", "s", "secret").await?;
        fx.ledger.react(&msg.id, "v1", "👍").await?;
        fx.ledger.react(&msg.id, "v1", "👍").await?;
        assert_eq!(fx.ledger.reactions(&msg.id).await?.len(), 2);

        // v2 先对自己隐藏，再由发送者对所有人删除
        fx.ledger.delete(&msg.id, "v2", DeleteScope::ForMe).await?;
        let err = fx
            .ledger
            .delete(&msg.id, "v1", DeleteScope::ForEveryone)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        fx.ledger.delete(&msg.id, "s", DeleteScope::ForEveryone).await?;

        for viewer in ["s", "v1", "v2"] {
            let listed = fx.ledger.messages_for_viewer("c1", viewer).await?;
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].body(), DEFAULT_TOMBSTONE_TEXT);
            assert_eq!(listed[0].state(), MessageState::DeletedForEveryone);
            assert!(listed[0].reactions.is_empty());
        }
        assert!(fx.ledger.reactions(&msg.id).await?.is_empty());

        let err = fx
            .ledger
            .delete(&msg.id, "s", DeleteScope::ForEveryone)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        let err = fx.ledger.edit(&msg.id, "s", "revive").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        let err = fx.ledger.react(&msg.id, "v1", "😮").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn delete_for_me_hides_only_for_viewer_and_keeps_unread() -> anyhow::Result<()> {
        let fx = setup().await?;
        let first = fx.ledger.send("c1", "s", "one").await?;
        fx.ledger.send("c1", "s", "two").await?;

        fx.ledger.delete(&first.id, "v1", DeleteScope::ForMe).await?;
        assert_eq!(fx.ledger.messages_for_viewer("c1", "v1").await?.len(), 1);
        assert_eq!(fx.ledger.messages_for_viewer("c1", "v2").await?.len(), 2);
        assert_eq!(fx.unread.count("c1", "v1").await?, 2);

        let err = fx
            .ledger
            .delete(&first.id, "mallory", DeleteScope::ForMe)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_never_lose_counts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fx = setup_file_backed(&dir).await?;
        let mut handles = Vec::new();
        for i in 0..40 {
            let ledger = fx.ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.send("c1", "s", &format!("burst {}", i)).await
            }));
        }
        for h in handles {
            h.await??;
        }
        assert_eq!(fx.unread.count("c1", "v1").await?, 40);
        assert_eq!(fx.unread.count("c1", "v2").await?, 40);

        let seqs: Vec<i64> = fx
            .ledger
            .messages_for_viewer("c1", "v2")
            .await?
            .iter()
            .map(|m| m.seq)
            .collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, (1..=40).collect::<Vec<i64>>());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_message_lands_after_conversation_deleted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fx = setup_file_backed(&dir).await?;

        for round in 0..30 {
            let id = format!("race{}", round);
            fx.conversations.insert_conversation(&trio(&id)).await?;

            let mut sends = Vec::new();
            for i in 0..5 {
                let ledger = fx.ledger.clone();
                let id = id.clone();
                sends.push(tokio::spawn(async move {
                    ledger.send(&id, "v1", &format!("m{}", i)).await
                }));
            }
            let dao = fx.conversations.clone();
            let deleter = {
                let id = id.clone();
                tokio::spawn(async move { dao.mark_deleted(&id, "s").await })
            };

            let mut appended: i64 = 0;
            for h in sends {
                match h.await? {
                    Ok(_) => appended += 1,
                    Err(e) => assert_eq!(e.kind(), ErrorKind::PreconditionFailed),
                }
            }
            let deleted_at = deleter.await??.ok_or_else(|| anyhow::anyhow!("未能删除会话"))?;

            let late: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND created_at > ?",
            )
            .bind(&id)
            .bind(deleted_at)
            .fetch_one(&fx.pool)
            .await?;
            assert_eq!(late, 0, "round {}", round);

            // 计数与实际写入的消息一致
            assert_eq!(fx.unread.count(&id, "s").await?, appended);
            assert_eq!(fx.unread.count(&id, "v1").await?, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn removed_member_can_neither_send_nor_edit() -> anyhow::Result<()> {
        let fx = setup().await?;
        let msg = fx.ledger.send("c1", "v1", "before").await?;
        fx.conversations.remove_member("c1", "v1").await?;

        let err = fx.ledger.send("c1", "v1", "after").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = fx.ledger.edit(&msg.id, "v1", "rewrite").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        // 被移出者不再累加未读
        fx.ledger.send("c1", "s", "after removal").await?;
        assert_eq!(fx.unread.count("c1", "v1").await?, 0);
        assert_eq!(fx.unread.count("c1", "v2").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn edit_rejected_once_conversation_deleted() -> anyhow::Result<()> {
        let fx = setup().await?;
        let msg = fx.ledger.send("c1", "s", "draft").await?;
        fx.conversations.mark_deleted("c1", "v2").await?;

        let err = fx.ledger.edit(&msg.id, "s", "final").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(fx.ledger.get(&msg.id, "s").await?.body(), "draft");
        Ok(())
    }

    #[tokio::test]
    async fn body_is_stored_verbatim() -> anyhow::Result<()> {
        let fx = setup().await?;
        let raw = "    fn main() {}\n";
        let msg = fx.ledger.send("c1", "s", raw).await?;
        assert_eq!(fx.ledger.get(&msg.id, "v1").await?.body(), raw);

        let edited = fx.ledger.edit(&msg.id, "s", "  indented\n\n").await?;
        assert_eq!(edited.body(), "  indented\n\n");
        let err = fx.ledger.edit(&msg.id, "s", " \t ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        Ok(())
    }

    #[tokio::test]
    async fn attachments_share_sequence_and_unread() -> anyhow::Result<()> {
        let fx = setup().await?;
        fx.ledger.send("c1", "s", "look").await?;
        let image = fx
            .ledger
            .send_attachment("c1", "s", AttachmentKind::Image, "https://files/c1/cat.png", "cat.png")
            .await?;
        let file = fx
            .ledger
            .send_attachment("c1", "v1", AttachmentKind::File, "https://files/c1/notes.pdf", "notes.pdf")
            .await?;
        assert_eq!((image.seq, file.seq), (2, 3));
        assert_eq!(fx.unread.count("c1", "v2").await?, 3);
        assert_eq!(fx.unread.count("c1", "s").await?, 1);

        let listed = fx.ledger.messages_for_viewer("c1", "v2").await?;
        assert_eq!(
            listed[1].content,
            MessageContent::Image {
                url: "https://files/c1/cat.png".into(),
                name: "cat.png".into(),
            }
        );
        assert!(matches!(listed[2].content, MessageContent::File { ref name, .. } if name == "notes.pdf"));

        let err = fx
            .ledger
            .send_attachment("c1", "s", AttachmentKind::File, " ", "x.txt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = fx
            .ledger
            .send_attachment("c1", "mallory", AttachmentKind::Image, "https://x", "x.png")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        // 附件不能编辑，对所有人删除后变成占位文本
        let err = fx.ledger.edit(&image.id, "s", "caption").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        fx.ledger.delete(&image.id, "s", DeleteScope::ForEveryone).await?;
        let tombstoned = fx.ledger.get(&image.id, "v1").await?;
        assert_eq!(tombstoned.content, MessageContent::text(DEFAULT_TOMBSTONE_TEXT));
        Ok(())
    }
}
