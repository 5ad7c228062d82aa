//! 待审核交易对账扫描
//!
//! 落库与发布创建事件是两次独立写入，中间崩溃或传输不可用会留下
//! "聚合已是 pending、创建事件从未送达"的间隙。对账扫描周期性找出
//! 超过宽限期仍为 pending 的聚合，补发 transaction-created。
//! 下游对重复的创建事件天然幂等（审核是纯函数，状态写入有护栏），
//! 补发多一次无害。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use txn_shared::error::TxnError;
use txn_shared::publisher::{EventPublisher, PublishOutcome};

use crate::repository::TransactionRepository;

/// 两次扫描的间隔
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// 创建后多久仍为 pending 才视为可疑；小于此宽限期的聚合可能只是还在审核中
const DEFAULT_PENDING_GRACE: Duration = Duration::from_secs(120);

/// 对账扫描器
pub struct PendingReconciler {
    repository: Arc<dyn TransactionRepository>,
    publisher: Arc<dyn EventPublisher>,
    sweep_interval: Duration,
    pending_grace: Duration,
}

impl PendingReconciler {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            publisher,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            pending_grace: DEFAULT_PENDING_GRACE,
        }
    }

    /// 覆盖扫描间隔与宽限期（测试用短间隔）
    pub fn with_timing(mut self, sweep_interval: Duration, pending_grace: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self.pending_grace = pending_grace;
        self
    }

    /// 周期性扫描，直到收到 shutdown 信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sweep_interval);

        info!(
            interval_secs = self.sweep_interval.as_secs(),
            grace_secs = self.pending_grace.as_secs(),
            "对账扫描已启动"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，对账扫描退出");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "对账扫描失败，下轮重试");
                    }
                }
            }
        }
    }

    /// 执行一轮扫描，返回补发的事件数
    ///
    /// 传输仍不可用时本轮提前结束：剩余聚合留给下一轮，
    /// 避免对不可达的 broker 连续发送。
    pub async fn sweep_once(&self) -> Result<usize, TxnError> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(self.pending_grace).unwrap_or_default();
        let stale = self.repository.list_stale_pending(cutoff).await?;

        if stale.is_empty() {
            return Ok(0);
        }

        info!(count = stale.len(), "发现超期 pending 交易，补发创建事件");

        let mut republished = 0;
        for transaction in &stale {
            match self.publisher.publish(&transaction.created_event()).await {
                PublishOutcome::Delivered { .. } => {
                    info!(transaction_id = %transaction.id, "创建事件已补发");
                    republished += 1;
                }
                PublishOutcome::TransportUnavailable { reason } => {
                    warn!(
                        transaction_id = %transaction.id,
                        reason,
                        "补发失败，传输仍不可用，本轮结束"
                    );
                    break;
                }
            }
        }

        Ok(republished)
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
