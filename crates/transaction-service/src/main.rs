//! 交易服务
//!
//! 维护交易聚合，消费状态更新事件，把交易从 pending 推进到终态。

use tracing::info;
use txn_shared::config::AppConfig;
use txn_shared::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("transaction-service")?;
    init_tracing(&config.observability)?;

    info!(environment = %config.environment, "Starting transaction-service...");
    Ok(())
}
