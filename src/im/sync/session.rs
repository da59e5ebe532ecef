//! 推送会话：持有订阅管理器，负责把领域事件转成快照投递

use crate::im::error::SocialResult;
use crate::im::events::EventBus;
use crate::im::sync::manager::{SubscriptionId, SubscriptionManager};
use crate::im::sync::source::SnapshotSource;
use crate::im::sync::topic::{Delivery, Topic};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Session {
    user_id: String,
    events: EventBus,
    manager: Arc<SubscriptionManager>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    pump: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, source: Arc<dyn SnapshotSource>, events: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            user_id: user_id.into(),
            events,
            manager: Arc::new(SubscriptionManager::new(source, tx)),
            deliveries: rx,
            pump: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_running(&self) -> bool {
        self.pump.is_some()
    }

    /// 开始消费事件总线（重复调用无副作用）
    pub fn start(&mut self) {
        if self.pump.is_some() {
            return;
        }
        // 先订阅总线再返回，start 之后发布的事件都不会丢
        let mut rx = self.events.subscribe();
        let manager = self.manager.clone();
        let user_id = self.user_id.clone();

        self.pump = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        manager.dispatch(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "[Session] ⚠️ {} 的事件流落后 {} 条，执行完整重同步",
                            user_id, skipped
                        );
                        manager.resync_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("[Session] 事件总线已关闭，{} 的推送结束", user_id);
                        break;
                    }
                }
            }
        }));
        info!("[Session] ✅ {} 的推送会话已启动", self.user_id);
    }

    /// 停止推送并清空所有订阅
    pub fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.manager.clear();
        info!("[Session] {} 的推送会话已停止", self.user_id);
    }

    pub async fn subscribe(&self, topic: Topic) -> SocialResult<SubscriptionId> {
        self.manager.subscribe(topic).await
    }

    /// 订阅会话列表、通知、隐藏索引与好友关系
    pub async fn subscribe_standing(&self) -> SocialResult<Vec<SubscriptionId>> {
        let mut ids = Vec::new();
        for topic in Topic::standing(&self.user_id) {
            ids.push(self.manager.subscribe(topic).await?);
        }
        Ok(ids)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.manager.unsubscribe(id)
    }

    pub fn subscriptions(&self) -> Vec<(SubscriptionId, Topic)> {
        self.manager.topics()
    }

    /// 等待下一次投递；已取消订阅在排队中的快照会被丢弃
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            let delivery = self.deliveries.recv().await?;
            if self.manager.is_active(delivery.subscription_id) {
                return Some(delivery);
            }
        }
    }

    /// 非阻塞地取出当前已排队的投递
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(delivery) = self.deliveries.try_recv() {
            if self.manager.is_active(delivery.subscription_id) {
                out.push(delivery);
            }
        }
        out
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
