//! 交易仓储
//!
//! 提供交易聚合的数据访问。状态更新采用带护栏的条件写入
//! （WHERE id = $1 AND status = $2）：两条重复投递的状态事件并发到达时，
//! 只有一条能命中护栏，另一条落空为无操作，终态聚合不会被改写两次。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use txn_shared::error::Result;
use txn_shared::events::TransactionStatus;

use crate::model::Transaction;

/// 交易仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// 持久化新聚合，返回落库后的快照
    async fn save(&self, transaction: &Transaction) -> Result<Transaction>;

    /// 按 id 查找聚合
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// 带状态护栏的条件更新
    ///
    /// 仅当当前状态仍等于 expected 时写入 target 并刷新 updated_at。
    /// 返回 None 表示没有行命中护栏：聚合不存在，或状态已被并发迁移——
    /// 调用方据 find 的结果区分两者。
    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        target: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>>;

    /// 创建时间早于 cutoff 且仍为 pending 的聚合，供对账扫描补发创建事件
    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>>;
}

/// PostgreSQL 交易仓储
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> Result<Transaction> {
        let saved = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions
                (id, debit_account_id, credit_account_id, transfer_type_id,
                 amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, debit_account_id, credit_account_id, transfer_type_id,
                      amount, status, created_at, updated_at
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.debit_account_id)
        .bind(&transaction.credit_account_id)
        .bind(transaction.transfer_type_id)
        .bind(transaction.amount)
        .bind(transaction.status)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, debit_account_id, credit_account_id, transfer_type_id,
                   amount, status, created_at, updated_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        target: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let updated = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING id, debit_account_id, credit_account_id, transfer_type_id,
                      amount, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(target)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let stale = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, debit_account_id, credit_account_id, transfer_type_id,
                   amount, status, created_at, updated_at
            FROM transactions
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at
            "#,
        )
        .bind(TransactionStatus::Pending)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(stale)
    }
}
