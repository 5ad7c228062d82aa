//! 生命周期事件消费者
//!
//! 订阅交易生命周期 topic，把 transaction-status-updated 事件经状态机
//! 校验后落到聚合上。本服务自己发布的 transaction-created 会在共享
//! topic 上回流，属于已识别但无需处理的事件，显式忽略。
//!
//! 错误分流：
//! - 无法解析的消息：丢弃并记录，重投不会让它变好
//! - 存储瞬时故障：先就地短退避重试，仍失败再送入死信队列
//! - 聚合尚不可见：送入死信队列，按退避重投
//! - 非法状态迁移：不是错误，是重复投递下的幂等空操作

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use txn_shared::config::AppConfig;
use txn_shared::dlq::DlqProducer;
use txn_shared::error::TxnError;
use txn_shared::events::{TransactionEvent, TransactionStatusUpdated};
use txn_shared::kafka::{ConsumerMessage, ConsumerPhase, ConsumerSupervisor, topics};
use txn_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::TransactionError;
use crate::model::transition;
use crate::repository::TransactionRepository;

/// 交易侧生命周期消费者
///
/// 组合消费监督器（连接与降级重连）、仓储（状态应用）与 DLQ 生产者
/// （可重试失败的去处），形成完整的消费管道。
pub struct LifecycleConsumer {
    supervisor: ConsumerSupervisor,
    repository: Arc<dyn TransactionRepository>,
    dlq: DlqProducer,
}

impl LifecycleConsumer {
    pub fn new(
        config: &AppConfig,
        repository: Arc<dyn TransactionRepository>,
        dlq: DlqProducer,
    ) -> Self {
        let supervisor =
            ConsumerSupervisor::new(&config.kafka, None, &[topics::TRANSACTION_LIFECYCLE]);
        Self {
            supervisor,
            repository,
            dlq,
        }
    }

    /// 当前消费阶段（connecting/subscribed/running/degraded）
    pub fn phase(&self) -> watch::Receiver<ConsumerPhase> {
        self.supervisor.phase()
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(topic = topics::TRANSACTION_LIFECYCLE, "交易侧消费者启动");

        let repository = self.repository;
        let dlq = self.dlq;

        self.supervisor
            .run(shutdown, move |msg| {
                let repository = repository.clone();
                let dlq = dlq.clone();
                async move {
                    if let Err(e) = handle_message(repository.as_ref(), &msg).await {
                        route_failure(&dlq, &msg, &e).await;
                    }
                    Ok(())
                }
            })
            .await;

        info!("交易侧消费者已停止");
    }
}

/// 处理单条生命周期消息
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的 Consumer。
pub async fn handle_message(
    repository: &dyn TransactionRepository,
    msg: &ConsumerMessage,
) -> Result<(), TransactionError> {
    let event = msg.decode_event()?;

    match event {
        TransactionEvent::TransactionCreated(payload) => {
            // 自己发布的创建事件回流，无需处理
            debug!(transaction_id = %payload.id, "忽略创建事件回流");
            Ok(())
        }
        TransactionEvent::TransactionStatusUpdated(payload) => {
            apply_status_update(repository, &payload).await
        }
    }
}

/// 存储访问的就地重试策略
///
/// 瞬时故障（连接池满、网络抖动）先短退避快速重试，仍失败的才交给
/// DLQ 按长退避重投，一次抖动不至于把消息打进死信队列。
fn store_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
    }
}

/// 把审核结论应用到本地聚合
///
/// 流程：查找聚合 -> 状态机校验 -> 带护栏的条件写入。
/// 两次存储访问都套就地重试；聚合不存在返回 AggregateMissing
/// （乱序投递或双写间隙，重投后收敛）；状态机拒绝（重复投递落在
/// 终态上）按幂等空操作返回成功。
pub async fn apply_status_update(
    repository: &dyn TransactionRepository,
    payload: &TransactionStatusUpdated,
) -> Result<(), TransactionError> {
    let policy = store_retry_policy();

    let existing = retry_with_policy(&policy, "find_by_id", TxnError::is_retryable, || {
        repository.find_by_id(payload.id)
    })
    .await?;

    let Some(existing) = existing else {
        return Err(TransactionError::AggregateMissing {
            id: payload.id.to_string(),
        });
    };

    let target = match transition(existing.status, payload.status) {
        Ok(target) => target,
        Err(invalid) => {
            info!(
                transaction_id = %payload.id,
                current = %invalid.from,
                requested = %invalid.to,
                "状态迁移不允许，按幂等空操作处理"
            );
            return Ok(());
        }
    };

    let updated = retry_with_policy(&policy, "update_status", TxnError::is_retryable, || {
        repository.update_status(payload.id, existing.status, target, Utc::now())
    })
    .await?;

    match updated {
        Some(transaction) => {
            info!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "交易状态已更新"
            );
        }
        None => {
            // 查找与写入之间有并发迁移命中了护栏，同样是幂等空操作
            info!(
                transaction_id = %payload.id,
                "条件更新未命中，状态已被并发迁移"
            );
        }
    }

    Ok(())
}

/// 按错误性质分流失败消息
async fn route_failure(dlq: &DlqProducer, msg: &ConsumerMessage, error: &TransactionError) {
    match error {
        TransactionError::Shared(TxnError::MalformedEvent(reason)) => {
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
