//! 反欺诈服务专用错误类型

use txn_shared::error::TxnError;

/// 反欺诈事件处理错误
#[derive(Debug, thiserror::Error)]
pub enum FraudError {
    /// 审核结论发布失败（传输不可用）。结论事件是消费创建事件的唯一
    /// 产出，丢掉它链路就无法收敛，因此交给 DLQ 重投原始消息，
    /// 重新审核会得到相同结论。
    #[error("审核结论发布失败: {reason}")]
    StatusPublishFailed { reason: String },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] TxnError),
}

impl FraudError {
    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StatusPublishFailed { .. } => true,
            Self::Shared(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FraudError::StatusPublishFailed {
            reason: "broker 不可达".to_string(),
        };
        assert_eq!(err.to_string(), "审核结论发布失败: broker 不可达");

        let err = FraudError::Shared(TxnError::MalformedEvent("bad json".to_string()));
        assert_eq!(err.to_string(), "事件无法解析: bad json");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            FraudError::StatusPublishFailed {
                reason: "超时".to_string()
            }
            .is_retryable()
        );

        assert!(!FraudError::Shared(TxnError::MalformedEvent("x".to_string())).is_retryable());
    }
}
