//! 反欺诈服务
//!
//! 消费交易创建事件，执行审核规则并发布结论。

use tracing::info;
use txn_shared::config::AppConfig;
use txn_shared::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("anti-fraud-service")?;
    init_tracing(&config.observability)?;

    info!(environment = %config.environment, "Starting anti-fraud-service...");
    Ok(())
}
