//! 反欺诈服务
//!
//! 消费 transaction-created 事件，对交易金额执行审核规则，
//! 并通过本服务自己的发布器发出 transaction-status-updated 结论。
//! 审核是纯函数，同一笔交易重复投递得到相同结论，天然幂等。

pub mod consumer;
pub mod decision;
pub mod error;
