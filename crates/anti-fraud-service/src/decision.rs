//! 欺诈审核规则
//!
//! 单一阈值判定：金额严格大于 1000 拒绝，否则通过。边界值 1000 本身
//! 落在通过一侧。规则是无状态纯函数，除一条结构化日志外没有副作用，
//! 因此对同一笔交易重复执行必然得到相同结论。

use tracing::info;

use txn_shared::events::TransactionStatus;

/// 拒绝阈值，不区分币种单位
pub const FRAUD_AMOUNT_LIMIT: f64 = 1000.0;

/// 对交易金额做出审核结论
///
/// 返回值只会是 Approved 或 Rejected。零与负数金额按通过处理——
/// 负数金额属于非法输入，由创建侧的验证边界拦截，不在审核规则内改写。
pub fn decide(amount: f64) -> TransactionStatus {
    if amount > FRAUD_AMOUNT_LIMIT {
        info!(amount, limit = FRAUD_AMOUNT_LIMIT, "金额超限，审核拒绝");
        TransactionStatus::Rejected
    } else {
        info!(amount, "审核通过");
        TransactionStatus::Approved
    }
}
