//! 端到端链路测试
//!
//! 在进程内用内存仓储与内存发布器驱动真实的消费处理函数，
//! 覆盖创建 -> 审核 -> 状态收敛的完整事件编排，包括：
//! - 正向链路（小额通过 / 大额拒绝）
//! - 重复投递下的幂等收敛
//! - 乱序投递与最终收敛
//! - 坏消息韧性
//! - 发布降级与对账补发

mod choreography;
mod helpers;
