//! 通知扇出服务
//!
//! 由触发操作同步调用。写入失败只记录日志，绝不让触发操作失败或回滚；
//! 投递语义为至少一次，不做去重。

use crate::im::directory::{display_name_or_id, UserDirectory};
use crate::im::error::{SocialError, SocialResult};
use crate::im::events::{DomainEvent, EventBus};
use crate::im::notification::dao::NotificationDao;
use crate::im::notification::models::{Notification, NotificationPayload};
use crate::im::serialization::generate_id;
use crate::im::types::now_millis;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct NotificationFanout {
    dao: NotificationDao,
    directory: Arc<dyn UserDirectory>,
    events: EventBus,
}

impl NotificationFanout {
    pub fn new(dao: NotificationDao, directory: Arc<dyn UserDirectory>, events: EventBus) -> Self {
        Self {
            dao,
            directory,
            events,
        }
    }

    /// 尽力而为地写入一条通知，返回写入成功的记录
    pub async fn notify(
        &self,
        recipient_id: &str,
        payload: NotificationPayload,
    ) -> Option<Notification> {
        let actor = display_name_or_id(self.directory.as_ref(), payload.from_user()).await;
        let notification = Notification {
            id: generate_id("ntf"),
            recipient_id: recipient_id.to_string(),
            title: payload.title().to_string(),
            message: payload.message(&actor),
            payload,
            created_at: now_millis(),
            read: false,
        };

        match self.dao.insert(&notification).await {
            Ok(()) => {
                debug!(
                    "[Fanout] 通知已写入: {} -> {} ({})",
                    notification.kind().as_str(),
                    recipient_id,
                    notification.id
                );
                self.events.publish(DomainEvent::NotificationCreated {
                    notification: notification.clone(),
                });
                Some(notification)
            }
            Err(e) => {
                warn!(
                    "[Fanout] ⚠️ 通知写入失败（忽略，不影响触发操作）: {} -> {}: {:?}",
                    notification.kind().as_str(),
                    recipient_id,
                    e
                );
                None
            }
        }
    }

    /// 向多个接收者扇出同一类通知
    pub async fn notify_all<F>(&self, recipients: &[String], make_payload: F) -> usize
    where
        F: Fn() -> NotificationPayload,
    {
        let mut delivered = 0;
        for recipient in recipients {
            if self.notify(recipient, make_payload()).await.is_some() {
                delivered += 1;
            }
        }
        delivered
    }

    /// 接收者的未读通知（最新在前）
    pub async fn notifications_for(&self, recipient_id: &str) -> SocialResult<Vec<Notification>> {
        Ok(self.dao.unread_for(recipient_id).await?)
    }

    /// 接收者的全部通知（含已读）
    pub async fn history_for(&self, recipient_id: &str) -> SocialResult<Vec<Notification>> {
        Ok(self.dao.all_for(recipient_id).await?)
    }

    pub async fn unread_count(&self, recipient_id: &str) -> SocialResult<usize> {
        Ok(self.dao.unread_for(recipient_id).await?.len())
    }

    /// 标记单条通知已读（仅接收者本人）
    pub async fn mark_read(&self, notification_id: &str, actor: &str) -> SocialResult<()> {
        let notification = self
            .dao
            .get(notification_id)
            .await?
            .ok_or_else(|| SocialError::not_found("通知", notification_id))?;
        if notification.recipient_id != actor {
            return Err(SocialError::unauthorized("只能标记自己的通知"));
        }

        if self.dao.mark_read(notification_id).await? {
            self.events.publish(DomainEvent::NotificationsRead {
                recipient_id: actor.to_string(),
            });
        }
        Ok(())
    }

    /// 原子地把接收者的全部未读通知标记为已读
    pub async fn mark_all_read(&self, recipient_id: &str) -> SocialResult<u64> {
        let count = self.dao.mark_all_read(recipient_id).await?;
        info!("[Fanout] 用户 {} 全部已读，共 {} 条", recipient_id, count);
        if count > 0 {
            self.events.publish(DomainEvent::NotificationsRead {
                recipient_id: recipient_id.to_string(),
            });
        }
        Ok(count)
    }
}
