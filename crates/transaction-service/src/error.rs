//! 交易服务专用错误类型
//!
//! 在共享库 TxnError 基础上定义本服务特有的错误变体。

use txn_shared::error::TxnError;

/// 交易事件处理错误
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// 状态更新事件先于本地聚合到达（乱序投递或双写间隙），
    /// 属于瞬时未找到：交给 DLQ 重投，聚合可见后即可收敛。
    /// 绝不凭空应用一个不存在聚合的状态。
    #[error("聚合不存在，等待重试: {id}")]
    AggregateMissing { id: String },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] TxnError),
}

impl TransactionError {
    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AggregateMissing { .. } => true,
            Self::Shared(e) => e.is_retryable(),
        }
    }
}
