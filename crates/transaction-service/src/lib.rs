//! 交易服务
//!
//! 维护交易聚合：创建时落库为 pending 并发布 transaction-created 事件，
//! 消费 transaction-status-updated 事件，经状态机校验后把交易推进到终态。
//! 另带对账扫描兜底"落库成功但创建事件丢失"的双写间隙。

pub mod consumer;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod repository;
pub mod service;
pub mod test_utils;
