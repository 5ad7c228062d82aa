//! 事件信封与编解码
//!
//! 定义交易生命周期事件的统一信封格式。信封由 `kind` 判别字段与 `data`
//! 载荷组成，消息键恒为交易 id，保证同一笔交易的全部事件落在同一分区、
//! 按序投递。事件类型建模为封闭枚举，路由时穷尽匹配——新增事件种类是
//! 编译期检查的改动，而不是散落在各处的字符串比较。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TxnError;

// ---------------------------------------------------------------------------
// TransactionStatus — 交易状态
// ---------------------------------------------------------------------------

/// 交易状态
///
/// `pending` 为初始态，`approved` 与 `rejected` 为终态。
/// 状态只会从初始态变更一次到某个终态，此后不再变化；
/// 迁移合法性的裁决在交易服务的状态机中完成。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    /// 终态不允许任何后续迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 与 serde 的 lowercase 序列化保持一致，便于日志与线上排查时直接对照
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// 事件载荷
// ---------------------------------------------------------------------------

/// 交易创建事件载荷
///
/// 携带创建时刻聚合的完整快照，反欺诈侧仅凭此载荷即可做出判定，
/// 无需回查交易服务。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreated {
    pub id: Uuid,
    pub debit_account_id: String,
    pub credit_account_id: String,
    pub transfer_type_id: i32,
    pub amount: f64,
    /// 创建事件中恒为 pending
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// 交易状态更新事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusUpdated {
    pub id: Uuid,
    /// 审核结论，只会是 approved 或 rejected
    pub status: TransactionStatus,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TransactionEvent — 事件信封
// ---------------------------------------------------------------------------

/// 交易生命周期事件信封
///
/// 线上格式为 `{ "kind": "...", "data": {...} }`，载荷字段使用 camelCase。
/// 编码对所有合法事件必然成功；解码失败（JSON 损坏或 kind 不被识别）
/// 映射为 [`TxnError::MalformedEvent`]，由消费侧丢弃并记录，
/// 单条坏消息不会中断分区消费。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum TransactionEvent {
    TransactionCreated(TransactionCreated),
    TransactionStatusUpdated(TransactionStatusUpdated),
}

impl TransactionEvent {
    /// 事件种类判别值，与线上 `kind` 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransactionCreated(_) => "transaction-created",
            Self::TransactionStatusUpdated(_) => "transaction-status-updated",
        }
    }

    /// 消息分区键，恒为交易 id
    ///
    /// 同一笔交易的创建与状态更新共用此键，单一分区串行化该交易的全部事件，
    /// 这是"created 先于 status-updated"顺序假设成立的前提。
    pub fn key(&self) -> String {
        match self {
            Self::TransactionCreated(p) => p.id.to_string(),
            Self::TransactionStatusUpdated(p) => p.id.to_string(),
        }
    }

    /// 编码为传输字节
    pub fn encode(&self) -> Result<Vec<u8>, TxnError> {
        serde_json::to_vec(self).map_err(|e| TxnError::Internal(format!("事件序列化失败: {e}")))
    }

    /// 从传输字节解码
    pub fn decode(payload: &[u8]) -> Result<Self, TxnError> {
        serde_json::from_slice(payload).map_err(|e| TxnError::MalformedEvent(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
