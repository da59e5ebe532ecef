//! 快照数据源

use crate::im::conversation::ConversationStore;
use crate::im::error::SocialResult;
use crate::im::friend::FriendService;
use crate::im::message::MessageLedger;
use crate::im::notification::NotificationFanout;
use crate::im::sync::topic::{Snapshot, Topic};
use async_trait::async_trait;

/// 按主题计算当前完整结果集
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, topic: &Topic) -> SocialResult<Snapshot>;
}

/// 基于各领域服务的快照源
#[derive(Clone)]
pub struct ServiceSnapshotSource {
    conversations: ConversationStore,
    ledger: MessageLedger,
    fanout: NotificationFanout,
    friends: FriendService,
}

impl ServiceSnapshotSource {
    pub fn new(
        conversations: ConversationStore,
        ledger: MessageLedger,
        fanout: NotificationFanout,
        friends: FriendService,
    ) -> Self {
        Self {
            conversations,
            ledger,
            fanout,
            friends,
        }
    }
}

#[async_trait]
impl SnapshotSource for ServiceSnapshotSource {
    async fn snapshot(&self, topic: &Topic) -> SocialResult<Snapshot> {
        Ok(match topic {
            Topic::Conversations { user } => {
                Snapshot::Conversations(self.conversations.conversations_for_user(user).await?)
            }
            Topic::Messages {
                conversation_id,
                viewer,
            } => Snapshot::Messages(self.ledger.messages_for_viewer(conversation_id, viewer).await?),
            Topic::Notifications { user } => {
                Snapshot::Notifications(self.fanout.notifications_for(user).await?)
            }
            Topic::HiddenIndex { user } => {
                Snapshot::HiddenIndex(self.conversations.hidden_index(user).await?)
            }
            Topic::Friendships { user } => Snapshot::Friendships(self.friends.overview(user).await?),
        })
    }
}
