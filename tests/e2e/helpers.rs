//! 链路测试辅助
//!
//! 把两个服务的真实 handler 与内存基础设施组装成一条进程内管道。
//! 真实部署中事件经由共享 topic 流转；这里由测试代码把一侧发布器
//! 记录的事件手工搬运给另一侧的 handler，顺序与分区语义由测试
//! 自己控制，从而可以构造乱序与重复投递场景。

use std::sync::Arc;

use anti_fraud_service::error::FraudError;
use transaction_service::error::TransactionError;
use transaction_service::model::Transaction;
use transaction_service::repository::TransactionRepository;
use transaction_service::service::{CreateTransactionRequest, TransactionService};
use transaction_service::test_utils::MemoryTransactionRepository;
use txn_shared::events::TransactionEvent;
use txn_shared::test_utils::{MemoryEventPublisher, consumer_message_for};

/// 进程内编排管道
pub struct Pipeline {
    pub repository: Arc<MemoryTransactionRepository>,
    /// 交易侧发布器，承接创建事件与对账补发
    pub txn_publisher: Arc<MemoryEventPublisher>,
    /// 反欺诈侧发布器，承接审核结论事件
    pub fraud_publisher: Arc<MemoryEventPublisher>,
    pub service: TransactionService,
}

impl Pipeline {
    pub fn new() -> Self {
        let repository = Arc::new(MemoryTransactionRepository::new());
        let txn_publisher = Arc::new(MemoryEventPublisher::new());
        let fraud_publisher = Arc::new(MemoryEventPublisher::new());
        let service = TransactionService::new(repository.clone(), txn_publisher.clone());

        Self {
            repository,
            txn_publisher,
            fraud_publisher,
            service,
        }
    }

    pub fn request(amount: f64) -> CreateTransactionRequest {
        CreateTransactionRequest {
            debit_account_id: "acc-debit-001".to_string(),
            credit_account_id: "acc-credit-001".to_string(),
            transfer_type_id: 1,
            amount,
        }
    }

    /// 反欺诈侧消费一个事件
    pub async fn fraud_consume(&self, event: &TransactionEvent) -> Result<(), FraudError> {
        anti_fraud_service::consumer::handle_message(
            self.fraud_publisher.as_ref(),
            &consumer_message_for(event),
        )
        .await
    }

    /// 交易侧消费一个事件
    pub async fn txn_consume(&self, event: &TransactionEvent) -> Result<(), TransactionError> {
        transaction_service::consumer::handle_message(
            self.repository.as_ref(),
            &consumer_message_for(event),
        )
        .await
    }

    /// 读取落库后的聚合
    pub async fn stored(&self, id: uuid::Uuid) -> Transaction {
        self.repository
            .find_by_id(id)
            .await
            .expect("仓储读取失败")
            .expect("聚合不存在")
    }

    /// 完整走一遍创建 -> 审核 -> 状态落库
    ///
    /// 返回收敛后的聚合与审核结论事件（供重复投递场景复用）
    pub async fn run_full_flow(&self, amount: f64) -> (Transaction, TransactionEvent) {
        let created = self
            .service
            .create(Self::request(amount))
            .await
            .expect("创建交易失败");

        let created_events = self.txn_publisher.take_published().await;
        assert_eq!(created_events.len(), 1, "创建应发布恰好一个事件");

        self.fraud_consume(&created_events[0])
            .await
            .expect("审核消费失败");

        let mut verdicts = self.fraud_publisher.take_published().await;
        assert_eq!(verdicts.len(), 1, "审核应发布恰好一个结论");
        let verdict = verdicts.remove(0);

        self.txn_consume(&verdict).await.expect("状态应用失败");

        (self.stored(created.id).await, verdict)
    }
}
