//! 死信队列处理
//!
//! 消费侧遇到可重试的失败（聚合尚未可见、存储瞬时故障、下游发布不可用）
//! 时，消息被送入死信队列而非原地阻塞分区。DLQ 消费者按退避策略把到期的
//! 消息发回原始 topic 重投，超过上限后记录日志等待人工介入。
//! 无法解析的消息不进入 DLQ——重投多少次都不会解析成功。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::TxnError;
use crate::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// DeadLetterMessage — 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因、重试次数等元数据，
/// 便于在死信队列消费时决定是否重试或永久归档。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息键（交易 id）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容（JSON 序列化的字符串）
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 已重试次数
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// 首次失败时间
    pub first_failed_at: DateTime<Utc>,
    /// 最近失败时间
    pub last_failed_at: DateTime<Utc>,
    /// 下次重试时间（None 表示不再重试）
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 创建新的死信消息
    ///
    /// 首次进入 DLQ 时 retry_count 为 0，next_retry_at 立即设置为当前时间，
    /// 让 DLQ 消费者在首轮扫描时即可尝试重新投递。
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        max_retries: u32,
        source_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count: 0,
            max_retries,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: Some(now),
            source_service: source_service.into(),
        }
    }

    /// 是否应继续重试
    ///
    /// 只要已重试次数尚未达到上限，就允许继续尝试
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 增加重试计数并更新元数据
    ///
    /// 每次重试失败后调用，更新错误信息和时间戳，
    /// 并根据退避策略计算下一次重试时间。
    /// 如果已达上限则 next_retry_at 置为 None，表示不再重试。
    pub fn increment_retry(&mut self, error: &str, retry_policy: &RetryPolicy) {
        self.retry_count += 1;
        self.error = error.to_string();
        self.last_failed_at = Utc::now();

        if self.should_retry() {
            let delay = retry_policy.delay_for_attempt(self.retry_count);
            self.next_retry_at =
                Some(self.last_failed_at + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            // 已耗尽重试机会，不再安排重试
            self.next_retry_at = None;
        }
    }

    /// 判定当前时刻应如何处置这条死信
    ///
    /// 耗尽判定优先于到期判定：重试次数用完的消息即使带着过期的
    /// next_retry_at 也不会再被重投。
    pub fn disposition(&self, now: DateTime<Utc>) -> DlqDisposition {
        if !self.should_retry() {
            return DlqDisposition::Exhausted;
        }

        match self.next_retry_at {
            Some(due) if now >= due => DlqDisposition::Redeliver,
            _ => DlqDisposition::NotDueYet,
        }
    }
}

/// 一条死信在某一时刻的处置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqDisposition {
    /// 重投时间已到，发回原始 topic
    Redeliver,
    /// 重投时间未到，留待下轮消费再判定
    NotDueYet,
    /// 已耗尽重试次数，等待人工介入
    Exhausted,
}

// ---------------------------------------------------------------------------
// DlqProducer — 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
///
/// 消费侧在事件处理失败后调用此组件将消息写入死信队列，
/// 而非直接丢弃。保证消息最终会被重试或人工处理。
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
    retry_policy: RetryPolicy,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str, retry_policy: RetryPolicy) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
            retry_policy,
        }
    }

    /// 将失败消息发送到死信队列
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
    ) -> Result<(), TxnError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            self.retry_policy.max_retries,
            &self.source_service,
        );

        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, message_id, &dlq_msg)
            .await?;

        warn!(message_id, source_topic, error, "消息已发送到死信队列");

        Ok(())
    }

    /// 从消费到的原始消息构造死信并发送
    ///
    /// 便捷方法：沿用消息键作为 message_id，负载原样透传。
    /// 负载非 UTF-8 时放弃入队（生命周期事件均为 JSON 文本）。
    pub async fn send_message_to_dlq(
        &self,
        msg: &ConsumerMessage,
        error: &str,
    ) -> Result<(), TxnError> {
        let payload = msg.payload_str()?;
        let message_id = msg.key.as_deref().unwrap_or("unknown");

        self.send_to_dlq(message_id, &msg.topic, payload, error).await
    }
}

// ---------------------------------------------------------------------------
// DlqConsumer — 处理死信队列消息
// ---------------------------------------------------------------------------

/// DLQ 消费者
///
/// 持续消费死信队列，对尚有重试机会且已到达重试时间的消息重新投递到原始 topic。
/// 超过重试上限的消息记录日志以便人工介入。
pub struct DlqConsumer {
    consumer: KafkaConsumer,
    /// 将待重试的消息发回原始 topic
    retry_producer: KafkaProducer,
}

impl DlqConsumer {
    /// 创建 DLQ 消费者
    ///
    /// 使用 `.dlq` 后缀作为独立消费组，与业务消费者互不干扰
    pub fn new(config: &AppConfig, retry_producer: KafkaProducer) -> Result<Self, TxnError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dlq"))?;
        consumer.subscribe(&[topics::DEAD_LETTER_QUEUE])?;

        info!(
            "DLQ 消费者已创建，订阅 topic: {}",
            topics::DEAD_LETTER_QUEUE
        );

        Ok(Self {
            consumer,
            retry_producer,
        })
    }

    /// 启动 DLQ 消费循环
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let retry_producer = self.retry_producer.clone();

        self.consumer
            .start(shutdown, move |msg| {
                let producer = retry_producer.clone();
                async move { handle_dlq_message(&msg, &producer).await.map(|_| ()) }
            })
            .await;

        info!("DLQ 消费循环已退出");
    }
}

/// 处理单条死信消息
///
/// 解码信封后按当前时刻判定处置方式：到期的发回原始 topic 重投，
/// 未到期的留待下轮，已耗尽的记错误日志等待人工介入。
/// 返回处置结果，便于测试直接断言决策分支。
async fn handle_dlq_message(
    msg: &ConsumerMessage,
    retry_producer: &KafkaProducer,
) -> Result<DlqDisposition, TxnError> {
    let dlq_msg: DeadLetterMessage = msg.deserialize_payload()?;

    let disposition = dlq_msg.disposition(Utc::now());
    match disposition {
        DlqDisposition::Redeliver => {
            info!(
                message_id = %dlq_msg.message_id,
                source_topic = %dlq_msg.source_topic,
                retry_count = dlq_msg.retry_count,
                max_retries = dlq_msg.max_retries,
                "重试死信消息，发回原始 topic"
            );

            retry_producer
                .send(
                    &dlq_msg.source_topic,
                    &dlq_msg.message_id,
                    dlq_msg.payload.as_bytes(),
                )
                .await?;
        }
        DlqDisposition::NotDueYet => {
            info!(
                message_id = %dlq_msg.message_id,
                next_retry_at = ?dlq_msg.next_retry_at,
                "死信消息重试时间未到，跳过"
            );
        }
        DlqDisposition::Exhausted => {
            error!(
                message_id = %dlq_msg.message_id,
                source_topic = %dlq_msg.source_topic,
                source_service = %dlq_msg.source_service,
                retry_count = dlq_msg.retry_count,
                max_retries = dlq_msg.max_retries,
                first_failed_at = %dlq_msg.first_failed_at,
                last_failed_at = %dlq_msg.last_failed_at,
                error = %dlq_msg.error,
                "死信消息已耗尽重试次数，需人工介入"
            );
        }
    }

    Ok(disposition)
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
