//! 事件发布器
//!
//! 将生命周期事件交给传输层，按交易 id 设置消息键以保证分区亲和。
//! 发布对触发它的业务操作而言是 fire-and-forget：传输不可用不会使
//! 已经成功的主写入失败或回滚，而是作为显式的 [`PublishOutcome`]
//! 返回并上报给注入的观察者。由此留下的双写间隙（聚合已落库、创建
//! 事件丢失）由交易服务的对账扫描兜底。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::events::TransactionEvent;
use crate::kafka::{KafkaProducer, topics};

// ---------------------------------------------------------------------------
// PublishOutcome — 发布结果
// ---------------------------------------------------------------------------

/// 一次发布的显式结果
///
/// 区分"已投递"与"传输不可用"，而不是把失败吞进日志。
/// 调用方按各自语义处理：主写入路径只记录，消费侧把不可用转成可重试错误。
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Delivered { partition: i32, offset: i64 },
    TransportUnavailable { reason: String },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

// ---------------------------------------------------------------------------
// DeliveryObserver — 发布结果观察者
// ---------------------------------------------------------------------------

/// 发布结果的观察通道
///
/// 由组合根注入，发布失败只会到达这里，绝不向业务调用方抛出。
pub trait DeliveryObserver: Send + Sync {
    fn on_outcome(&self, kind: &str, key: &str, outcome: &PublishOutcome);
}

/// 默认观察者：把结果写入结构化日志
pub struct TracingDeliveryObserver;

impl DeliveryObserver for TracingDeliveryObserver {
    fn on_outcome(&self, kind: &str, key: &str, outcome: &PublishOutcome) {
        match outcome {
            PublishOutcome::Delivered { partition, offset } => {
                debug!(kind, key, partition, offset, "事件已投递");
            }
            PublishOutcome::TransportUnavailable { reason } => {
                warn!(kind, key, reason, "事件发布失败，传输不可用");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventPublisher trait 与 Kafka 实现
// ---------------------------------------------------------------------------

/// 事件发布抽象
///
/// 以 trait 作为接缝，业务代码持有 `Arc<dyn EventPublisher>`，
/// 测试中可换成内存实现（见 test_utils）。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布一个生命周期事件，永不向调用方返回错误
    async fn publish(&self, event: &TransactionEvent) -> PublishOutcome;
}

/// 基于 Kafka 的事件发布器
pub struct KafkaEventPublisher {
    producer: KafkaProducer,
    topic: String,
    observer: Arc<dyn DeliveryObserver>,
}

impl KafkaEventPublisher {
    /// 创建发布器，默认发往交易生命周期 topic
    pub fn new(producer: KafkaProducer, observer: Arc<dyn DeliveryObserver>) -> Self {
        Self {
            producer,
            topic: topics::TRANSACTION_LIFECYCLE.to_string(),
            observer,
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &TransactionEvent) -> PublishOutcome {
        let key = event.key();

        let outcome = match event.encode() {
            Ok(payload) => match self.producer.send(&self.topic, &key, &payload).await {
                Ok((partition, offset)) => PublishOutcome::Delivered { partition, offset },
                Err(e) => PublishOutcome::TransportUnavailable {
                    reason: e.to_string(),
                },
            },
            // 编码失败同样以结果形式上报，不向调用方抛出
            Err(e) => PublishOutcome::TransportUnavailable {
                reason: e.to_string(),
            },
        };

        self.observer.on_outcome(event.kind(), &key, &outcome);
        outcome
    }
}
