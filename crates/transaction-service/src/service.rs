//! 交易用例层
//!
//! 对外（请求侧协作方）暴露"创建交易"与"查询交易"两个入口。
//! 创建路径先落库、再发布 transaction-created 事件：发布是
//! fire-and-forget，传输不可用不会使已成功的落库失败或回滚，
//! 结果只进入观察通道，遗留的双写间隙由对账扫描补发。

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use txn_shared::error::TxnError;
use txn_shared::publisher::{EventPublisher, PublishOutcome};

use crate::model::Transaction;
use crate::repository::TransactionRepository;

/// 创建交易请求
///
/// 验证在进入事件管道之前同步完成：非法输入直接拒绝，
/// 不会产生聚合，也不会产生事件。
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    #[validate(length(min = 1, message = "借方账户不能为空"))]
    pub debit_account_id: String,

    #[validate(length(min = 1, message = "贷方账户不能为空"))]
    pub credit_account_id: String,

    pub transfer_type_id: i32,

    /// 金额不允许为负；恰好为零是合法输入，由审核规则裁决
    #[validate(range(min = 0.0, message = "金额不能为负"))]
    pub amount: f64,
}

/// 交易用例服务
pub struct TransactionService {
    repository: Arc<dyn TransactionRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl TransactionService {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    /// 创建交易
    ///
    /// 聚合以 pending 状态落库后发布创建事件。发布结果不影响返回值：
    /// 调用方拿到的是已持久化的聚合，事件管道的可用性不牵制主写入路径。
    pub async fn create(&self, request: CreateTransactionRequest) -> Result<Transaction, TxnError> {
        request
            .validate()
            .map_err(|e| TxnError::Validation(e.to_string()))?;

        let transaction = Transaction::new(
            request.debit_account_id,
            request.credit_account_id,
            request.transfer_type_id,
            request.amount,
        );

        let saved = self.repository.save(&transaction).await?;

        info!(
            transaction_id = %saved.id,
            amount = saved.amount,
            "交易已创建，等待审核"
        );

        match self.publisher.publish(&saved.created_event()).await {
            PublishOutcome::Delivered { partition, offset } => {
                debug!(
                    transaction_id = %saved.id,
                    partition,
                    offset,
                    "创建事件已发布"
                );
            }
            PublishOutcome::TransportUnavailable { reason } => {
                warn!(
                    transaction_id = %saved.id,
                    reason,
                    "创建事件发布失败，等待对账扫描补发"
                );
            }
        }

        Ok(saved)
    }

    /// 按 id 查询交易
    pub async fn get(&self, id: Uuid) -> Result<Transaction, TxnError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| TxnError::NotFound {
                entity: "Transaction".to_string(),
                id: id.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
