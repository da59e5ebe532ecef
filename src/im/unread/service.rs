//! 未读计数服务
//!
//! 计数在发送消息的事务里累加（见 `MessageDao::append`），
//! 打开会话时整体清零，不按单条消息递减。

use crate::im::error::SocialResult;
use crate::im::events::{DomainEvent, EventBus};
use crate::im::message::models::Message;
use crate::im::message::MessageLedger;
use crate::im::unread::dao::UnreadDao;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct UnreadTracker {
    dao: UnreadDao,
    ledger: MessageLedger,
    events: EventBus,
}

impl UnreadTracker {
    pub fn new(dao: UnreadDao, ledger: MessageLedger, events: EventBus) -> Self {
        Self { dao, ledger, events }
    }

    /// 打开会话：返回查看者可见的消息并清零其未读
    pub async fn open_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> SocialResult<Vec<Message>> {
        let messages = self.ledger.messages_for_viewer(conversation_id, user_id).await?;
        self.dao.reset(conversation_id, user_id).await?;
        debug!(
            "[Unread] {} 打开会话 {}，可见消息 {} 条",
            user_id,
            conversation_id,
            messages.len()
        );
        self.events.publish(DomainEvent::ConversationOpened {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(messages)
    }

    pub async fn unread_count(&self, conversation_id: &str, user_id: &str) -> SocialResult<i64> {
        Ok(self.dao.count(conversation_id, user_id).await?)
    }

    /// 会话内每个成员的计数
    pub async fn counters(&self, conversation_id: &str) -> SocialResult<BTreeMap<String, i64>> {
        Ok(self.dao.counters(conversation_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::dao::ConversationDao;
    use crate::im::conversation::models::{Conversation, ConversationKind};
    use crate::im::db::create_memory_pool;
    use crate::im::error::ErrorKind;
    use crate::im::message::MessageDao;

    async fn setup() -> anyhow::Result<(UnreadTracker, MessageLedger)> {
        let pool = create_memory_pool().await?;
        let conversations = ConversationDao::new(pool.clone());
        conversations
            .insert_conversation(&Conversation {
                id: "c".into(),
                kind: ConversationKind::Group {
                    name: "c".into(),
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
            })
            .await?;
        let events = EventBus::new(64);
        let ledger = MessageLedger::new(MessageDao::new(pool.clone()), conversations, events.clone());
        let tracker = UnreadTracker::new(UnreadDao::new(pool), ledger.clone(), events);
        Ok((tracker, ledger))
    }

    #[tokio::test]
    async fn opening_resets_only_the_viewer() -> anyhow::Result<()> {
        let (tracker, ledger) = setup().await?;
        for _ in 0..3 {
            ledger.send("c", "s", "ping").await?;
        }
        assert_eq!(tracker.unread_count("c", "v1").await?, 3);

        let messages = tracker.open_conversation("c", "v1").await?;
        assert_eq!(messages.len(), 3);

        let counters = tracker.counters("c").await?;
        assert_eq!(counters.get("v1"), Some(&0));
        assert_eq!(counters.get("v2"), Some(&3));

        ledger.send("c", "s", "again").await?;
        assert_eq!(tracker.unread_count("c", "v1").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn outsiders_cannot_open() -> anyhow::Result<()> {
        let (tracker, _) = setup().await?;
        let err = tracker.open_conversation("c", "mallory").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(tracker.counters("c").await?.get("mallory").is_none());
        Ok(())
    }
}
