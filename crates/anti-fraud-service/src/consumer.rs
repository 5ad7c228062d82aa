//! 审核事件消费者
//!
//! 订阅交易生命周期 topic，对每条 transaction-created 执行审核规则，
//! 把结论包装为 transaction-status-updated、沿同一分区键发回 topic。
//! 本服务自己发布的状态更新事件会在共享 topic 上回流，显式忽略。
//!
//! 同一条创建事件重复投递是安全的：审核是纯函数，重跑产生相同结论、
//! 重发相同状态，交易侧的状态机会把多余的那份吸收为空操作。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use txn_shared::config::AppConfig;
use txn_shared::dlq::DlqProducer;
use txn_shared::error::TxnError;
use txn_shared::events::{TransactionCreated, TransactionEvent, TransactionStatusUpdated};
use txn_shared::kafka::{ConsumerMessage, ConsumerPhase, ConsumerSupervisor, topics};
use txn_shared::publisher::{EventPublisher, PublishOutcome};

use crate::decision::decide;
use crate::error::FraudError;

/// 反欺诈侧生命周期消费者
pub struct FraudConsumer {
    supervisor: ConsumerSupervisor,
    publisher: Arc<dyn EventPublisher>,
    dlq: DlqProducer,
}

impl FraudConsumer {
    pub fn new(config: &AppConfig, publisher: Arc<dyn EventPublisher>, dlq: DlqProducer) -> Self {
        let supervisor =
            ConsumerSupervisor::new(&config.kafka, None, &[topics::TRANSACTION_LIFECYCLE]);
        Self {
            supervisor,
            publisher,
            dlq,
        }
    }

    /// 当前消费阶段（connecting/subscribed/running/degraded）
    pub fn phase(&self) -> watch::Receiver<ConsumerPhase> {
        self.supervisor.phase()
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(topic = topics::TRANSACTION_LIFECYCLE, "反欺诈消费者启动");

        let publisher = self.publisher;
        let dlq = self.dlq;

        self.supervisor
            .run(shutdown, move |msg| {
                let publisher = publisher.clone();
                let dlq = dlq.clone();
                async move {
                    if let Err(e) = handle_message(publisher.as_ref(), &msg).await {
                        route_failure(&dlq, &msg, &e).await;
                    }
                    Ok(())
                }
            })
            .await;

        info!("反欺诈消费者已停止");
    }
}

/// 处理单条生命周期消息
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的 Consumer。
pub async fn handle_message(
    publisher: &dyn EventPublisher,
    msg: &ConsumerMessage,
) -> Result<(), FraudError> {
    let event = msg.decode_event()?;

    match event {
        TransactionEvent::TransactionStatusUpdated(payload) => {
            // 自己发布的结论事件回流，无需处理
            debug!(transaction_id = %payload.id, "忽略状态更新事件回流");
            Ok(())
        }
        TransactionEvent::TransactionCreated(payload) => {
            review_transaction(publisher, &payload).await
        }
    }
}

/// 审核一笔新建交易并发布结论
pub async fn review_transaction(
    publisher: &dyn EventPublisher,
    payload: &TransactionCreated,
) -> Result<(), FraudError> {
    info!(
        transaction_id = %payload.id,
        amount = payload.amount,
        "收到待审核交易"
    );

    let verdict = decide(payload.amount);

    let update = TransactionEvent::TransactionStatusUpdated(TransactionStatusUpdated {
        id: payload.id,
        status: verdict,
        updated_at: Utc::now(),
    });

    match publisher.publish(&update).await {
        PublishOutcome::Delivered { .. } => {
            info!(
                transaction_id = %payload.id,
                status = %verdict,
                "审核结论已发布"
            );
            Ok(())
        }
        PublishOutcome::TransportUnavailable { reason } => {
            Err(FraudError::StatusPublishFailed { reason })
        }
    }
}

/// 按错误性质分流失败消息
async fn route_failure(dlq: &DlqProducer, msg: &ConsumerMessage, error: &FraudError) {
    match error {
        FraudError::Shared(TxnError::MalformedEvent(reason)) => {
            warn!(
                reason,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "事件无法解析，丢弃"
            );
        }
        e if e.is_retryable() => {
            error!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "处理失败，送入死信队列重投"
            );
            if let Err(dlq_err) = dlq.send_message_to_dlq(msg, &e.to_string()).await {
                error!(error = %dlq_err, "发送到死信队列失败，消息可能丢失");
            }
        }
        e => {
            error!(
                error = %e,
                topic = %msg.topic,
                offset = msg.offset,
                "处理失败且不可重试"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
