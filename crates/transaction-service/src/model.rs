//! 交易聚合与状态机
//!
//! 聚合的状态只能由此处的状态机推进：pending 可以迁移到 approved 或
//! rejected，终态之后不再接受任何迁移。非法迁移是一个值层面的结果而非
//! 异常——重复投递的状态事件落在已终态的聚合上时，调用方把它当作幂等
//! 空操作处理，这正是消费侧在至少一次投递下保持幂等的边界。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use txn_shared::events::{TransactionCreated, TransactionEvent, TransactionStatus};

// ---------------------------------------------------------------------------
// 状态机
// ---------------------------------------------------------------------------

/// 非法状态迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("状态迁移不允许: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

/// 校验一次状态迁移
///
/// 允许的迁移只有 pending -> approved 与 pending -> rejected。
/// current 已是终态、target 为 pending、或原地迁移，一律返回
/// [`InvalidTransition`]。
pub fn transition(
    current: TransactionStatus,
    target: TransactionStatus,
) -> Result<TransactionStatus, InvalidTransition> {
    match (current, target) {
        (TransactionStatus::Pending, TransactionStatus::Approved)
        | (TransactionStatus::Pending, TransactionStatus::Rejected) => Ok(target),
        _ => Err(InvalidTransition {
            from: current,
            to: target,
        }),
    }
}

// ---------------------------------------------------------------------------
// Transaction — 交易聚合
// ---------------------------------------------------------------------------

/// 交易聚合
///
/// id、账户、转账类型、金额与创建时间在创建后不可变；
/// status 与 updated_at 只通过 [`Transaction::apply_status`] 变更。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub debit_account_id: String,
    pub credit_account_id: String,
    pub transfer_type_id: i32,
    pub amount: f64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// 创建新的待审核交易
    ///
    /// id 在此生成，先于聚合对存储或消息层可见——所有关于这笔交易的
    /// 事件都以该 id 作为分区键。
    pub fn new(
        debit_account_id: impl Into<String>,
        credit_account_id: impl Into<String>,
        transfer_type_id: i32,
        amount: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            debit_account_id: debit_account_id.into(),
            credit_account_id: credit_account_id.into(),
            transfer_type_id,
            amount,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 应用一次状态迁移
    ///
    /// 成功时把 updated_at 刷新为应用时刻；失败时聚合保持原样，
    /// updated_at 不被触碰。
    pub fn apply_status(
        &mut self,
        target: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.status = transition(self.status, target)?;
        self.updated_at = at;
        Ok(())
    }

    /// 构造本聚合的 transaction-created 事件
    ///
    /// 创建路径与对账补发共用此快照
    pub fn created_event(&self) -> TransactionEvent {
        TransactionEvent::TransactionCreated(TransactionCreated {
            id: self.id,
            debit_account_id: self.debit_account_id.clone(),
            credit_account_id: self.credit_account_id.clone(),
            transfer_type_id: self.transfer_type_id,
            amount: self.amount,
            status: self.status,
            created_at: self.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
