//! 统一错误处理模块
//!
//! 定义两个服务共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 消息层故障（Kafka、无法解析的事件）与主写入路径的错误在此明确区分：
//! 前者只进入日志与重试通道，绝不向发起写入的调用方传播。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum TxnError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    /// 信封无法解析或事件类型不被识别，消费侧按"丢弃并记录"处理，不会重试
    #[error("事件无法解析: {0}")]
    MalformedEvent(String),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, TxnError>;

impl TxnError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 数据库与 Kafka 故障视为瞬时，可交给重投/退避机制；
    /// 无法解析的事件重试多少次都不会变好，不可重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Kafka(_))
    }
}
