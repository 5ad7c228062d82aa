//! 测试工具模块
//!
//! 内存版交易仓储，链路测试用它替代 PostgreSQL，
//! 语义与 PgTransactionRepository 对齐（含条件更新护栏）。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use txn_shared::error::Result;
use txn_shared::events::TransactionStatus;

use crate::model::Transaction;
use crate::repository::TransactionRepository;

/// 内存交易仓储
#[derive(Default)]
pub struct MemoryTransactionRepository {
    rows: RwLock<HashMap<Uuid, Transaction>>,
}

impl MemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存储的聚合数
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> Result<Transaction> {
        let mut rows = self.rows.write().await;
        rows.insert(transaction.id, transaction.clone());
        Ok(transaction.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        target: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let mut rows = self.rows.write().await;

        // 与 SQL 护栏一致：id 命中且状态仍为 expected 时才写入
        match rows.get_mut(&id) {
            Some(row) if row.status == expected => {
                row.status = target;
                row.updated_at = at;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut stale: Vec<Transaction> = rows
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.created_at);
        Ok(stale)
    }
}
