//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和优雅关闭语义。消费侧另提供带降级与
//! 自动重连的监督器：传输不可达时服务其余部分继续运行，事件传播
//! 暂停，按退避策略周期性尝试重连。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::TxnError;
use crate::events::TransactionEvent;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理所有 Kafka topic 名称，防止字符串散落在各服务中导致拼写不一致
pub mod topics {
    /// 交易生命周期事件：创建与状态更新共用一个 topic，按交易 id 分区
    pub const TRANSACTION_LIFECYCLE: &str = "txn.transaction.lifecycle";
    pub const DEAD_LETTER_QUEUE: &str = "txn.dlq";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str, TxnError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| TxnError::Kafka(format!("负载非 UTF-8 编码: {e}")))
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, TxnError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| TxnError::Kafka(format!("负载反序列化失败: {e}")))
    }

    /// 将负载解码为交易生命周期事件信封
    ///
    /// 解码失败返回 [`TxnError::MalformedEvent`]，消费侧据此走丢弃路径而非重投
    pub fn decode_event(&self) -> Result<TransactionEvent, TxnError> {
        TransactionEvent::decode(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// 设置 `message.timeout.ms` 为 5 秒——若 5 秒内仍无法投递，应由上层
    /// 按"传输不可用"处理（对账补发或死信重投），而非无限等待。
    pub fn new(config: &KafkaConfig) -> Result<Self, TxnError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| TxnError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), TxnError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| TxnError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化与网络发送拆分为两步，便于独立定位故障原因。
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), TxnError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| TxnError::Kafka(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义，
/// 确保进程退出时不会丢失正在处理的消息。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组，
    /// 例如 "transaction-service.dlq" 与业务消费组互不干扰。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, TxnError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| TxnError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), TxnError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| TxnError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时调用 handler 处理；handler 返回错误只记录日志而不中断循环，
    ///   避免单条坏消息导致整个消费者停止。消息在循环内逐条处理，
    ///   同一分区的消息天然串行。
    /// - 关闭信号变为 `true` 时退出循环，确保正在执行的 handler 能自然完成。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), TxnError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );

                            if let Err(e) = handler(msg).await {
                                error!(error = %e, "处理 Kafka 消息失败");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ConsumerSupervisor — 带降级与重连的消费监督器
// ---------------------------------------------------------------------------

/// 消费循环所处的阶段
///
/// `Degraded` 表示传输不可达：服务其余部分照常运行，事件传播暂停，
/// 退避等待后回到 `Connecting` 重新尝试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPhase {
    Connecting,
    Subscribed,
    Running,
    Degraded,
}

impl std::fmt::Display for ConsumerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Running => "running",
            Self::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

/// 消费监督器
///
/// 驱动 connecting -> subscribed -> running 的生命周期；创建、订阅或
/// 消息流本身失败时进入 degraded，按 [`RetryPolicy`] 退避后重连。
/// 重连不设次数上限——契约只要求"最终会重试"，退避间隔由 max_delay 封顶。
/// 当前阶段通过 watch channel 对外可见，便于健康检查与测试观察。
pub struct ConsumerSupervisor {
    config: KafkaConfig,
    group_id_suffix: Option<String>,
    topics: Vec<String>,
    reconnect_policy: RetryPolicy,
    phase_tx: watch::Sender<ConsumerPhase>,
}

impl ConsumerSupervisor {
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>, topics: &[&str]) -> Self {
        let (phase_tx, _) = watch::channel(ConsumerPhase::Connecting);
        Self {
            config: config.clone(),
            group_id_suffix: group_id_suffix.map(String::from),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            reconnect_policy: RetryPolicy::default(),
            phase_tx,
        }
    }

    /// 覆盖重连退避策略
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// 订阅当前阶段
    pub fn phase(&self) -> watch::Receiver<ConsumerPhase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: ConsumerPhase) {
        debug!(%phase, "消费监督器阶段变更");
        self.phase_tx.send_replace(phase);
    }

    /// 运行监督循环，直到收到 shutdown 信号
    pub async fn run<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut + Clone,
        Fut: std::future::Future<Output = Result<(), TxnError>>,
    {
        // 连续降级轮次，连接成功后归零
        let mut degraded_rounds: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_phase(ConsumerPhase::Connecting);

            let consumer = match KafkaConsumer::new(&self.config, self.group_id_suffix.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    self.enter_degraded(&mut degraded_rounds, &mut shutdown, &e)
                        .await;
                    continue;
                }
            };

            let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            if let Err(e) = consumer.subscribe(&topic_refs) {
                self.enter_degraded(&mut degraded_rounds, &mut shutdown, &e)
                    .await;
                continue;
            }
            self.set_phase(ConsumerPhase::Subscribed);

            degraded_rounds = 0;
            self.set_phase(ConsumerPhase::Running);
            consumer.start(shutdown.clone(), handler.clone()).await;

            if *shutdown.borrow() {
                break;
            }

            // start 非关闭退出意味着消息流中断，降级后重连
            let stream_err = TxnError::Kafka("消息流中断".to_string());
            self.enter_degraded(&mut degraded_rounds, &mut shutdown, &stream_err)
                .await;
        }

        info!("消费监督循环已退出");
    }

    /// 进入降级阶段并退避等待
    ///
    /// 等待期间仍响应关闭信号，避免退避拖慢进程退出。
    async fn enter_degraded(
        &self,
        rounds: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
        cause: &TxnError,
    ) {
        self.set_phase(ConsumerPhase::Degraded);

        let delay = self.reconnect_policy.delay_for_attempt(*rounds);
        *rounds = rounds.saturating_add(1);

        warn!(
            error = %cause,
            round = *rounds,
            delay_ms = delay.as_millis() as u64,
            "Kafka 不可达，消费降级运行，退避后重连"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
