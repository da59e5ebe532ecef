//! 订阅管理器
//!
//! 由会话对象持有，不是进程级单例。投递全部串行化：同一时刻只有一个快照
//! 在计算和发送，保证同一订阅收到的快照顺序与状态变更顺序一致。

use crate::im::error::SocialResult;
use crate::im::events::DomainEvent;
use crate::im::sync::source::SnapshotSource;
use crate::im::sync::topic::{Delivery, Topic};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type SubscriptionId = u64;

pub struct SubscriptionManager {
    source: Arc<dyn SnapshotSource>,
    registry: Mutex<BTreeMap<SubscriptionId, Topic>>,
    next_id: AtomicU64,
    outbox: mpsc::UnboundedSender<Delivery>,
    delivery_gate: tokio::sync::Mutex<()>,
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn SnapshotSource>, outbox: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            source,
            registry: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            outbox,
            delivery_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<SubscriptionId, Topic>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册订阅并立即投递一次初始快照
    pub async fn subscribe(&self, topic: Topic) -> SocialResult<SubscriptionId> {
        let _gate = self.delivery_gate.lock().await;
        let snapshot = self.source.snapshot(&topic).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry();
        registry.insert(id, topic.clone());
        debug!("[SubMgr] 📡 新订阅 #{} {:?}", id, topic);
        let _ = self.outbox.send(Delivery {
            subscription_id: id,
            topic,
            snapshot,
        });
        Ok(id)
    }

    /// 取消订阅；返回后该订阅不会再有任何投递
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            debug!("[SubMgr] 取消订阅 #{}", id);
        }
        removed
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.registry().contains_key(&id)
    }

    pub fn topics(&self) -> Vec<(SubscriptionId, Topic)> {
        self.registry()
            .iter()
            .map(|(id, t)| (*id, t.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.registry().clear();
    }

    /// 重新投递受事件影响的订阅
    pub async fn dispatch(&self, event: &DomainEvent) -> usize {
        let _gate = self.delivery_gate.lock().await;
        let affected: Vec<_> = self
            .topics()
            .into_iter()
            .filter(|(_, t)| t.is_affected_by(event))
            .collect();
        let mut delivered = 0;
        for (id, topic) in affected {
            if self.deliver(id, topic).await {
                delivered += 1;
            }
        }
        if delivered > 0 {
            debug!("[SubMgr] 事件 {} 触发 {} 次投递", event.name(), delivered);
        }
        delivered
    }

    /// 事件流落后时对全部订阅做一次完整重同步
    pub async fn resync_all(&self) -> usize {
        let _gate = self.delivery_gate.lock().await;
        let mut delivered = 0;
        for (id, topic) in self.topics() {
            if self.deliver(id, topic).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn deliver(&self, id: SubscriptionId, topic: Topic) -> bool {
        let snapshot = match self.source.snapshot(&topic).await {
            Ok(s) => s,
            Err(e) => {
                warn!("[SubMgr] ⚠️ 订阅 #{} 快照计算失败，跳过: {}", id, e);
                return false;
            }
        };

        // 持锁检查并发送，防止与取消交错
        let registry = self.registry();
        if !registry.contains_key(&id) {
            return false;
        }
        self.outbox
            .send(Delivery {
                subscription_id: id,
                topic,
                snapshot,
            })
            .is_ok()
    }
}
