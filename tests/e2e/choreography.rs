//! 编排链路场景

use std::time::Duration;

use transaction_service::error::TransactionError;
use transaction_service::reconciler::PendingReconciler;
use txn_shared::error::TxnError;
use txn_shared::events::{TransactionEvent, TransactionStatus, TransactionStatusUpdated};
use txn_shared::test_utils::raw_consumer_message;

use crate::helpers::Pipeline;

/// 场景 A：小额交易创建 -> 审核通过 -> 状态收敛为 approved
#[tokio::test]
async fn small_amount_converges_to_approved() {
    let pipeline = Pipeline::new();

    let (settled, verdict) = pipeline.run_full_flow(500.0).await;

    assert_eq!(settled.status, TransactionStatus::Approved);
    assert_eq!(verdict.kind(), "transaction-status-updated");
    // 结论事件与聚合共用分区键
    assert_eq!(verdict.key(), settled.id.to_string());
}

/// 场景 B：大额交易被拒绝
#[tokio::test]
async fn large_amount_converges_to_rejected() {
    let pipeline = Pipeline::new();

    let (settled, _) = pipeline.run_full_flow(1500.0).await;

    assert_eq!(settled.status, TransactionStatus::Rejected);
}

/// 阈值边界：恰好 1000 落在通过一侧
#[tokio::test]
async fn limit_boundary_is_approved() {
    let pipeline = Pipeline::new();

    let (settled, _) = pipeline.run_full_flow(1000.0).await;

    assert_eq!(settled.status, TransactionStatus::Approved);
}

/// 场景 C：结论事件重复投递是幂等空操作
///
/// 第二次投递不报错、状态不变，updated_at 保持首次应用的值。
#[tokio::test]
async fn redelivered_verdict_is_noop() {
    let pipeline = Pipeline::new();

    let (settled, verdict) = pipeline.run_full_flow(500.0).await;
    assert_eq!(settled.status, TransactionStatus::Approved);

    pipeline
        .txn_consume(&verdict)
        .await
        .expect("重复投递不应报错");

    let after_redelivery = pipeline.stored(settled.id).await;
    assert_eq!(after_redelivery.status, TransactionStatus::Approved);
    assert_eq!(after_redelivery.updated_at, settled.updated_at);
}

/// 终态不变量：收敛后的聚合不再被任何状态事件改写
#[tokio::test]
async fn terminal_aggregate_survives_conflicting_updates() {
    let pipeline = Pipeline::new();

    let (settled, _) = pipeline.run_full_flow(500.0).await;
    assert_eq!(settled.status, TransactionStatus::Approved);

    // 构造一条相反结论的状态事件，状态机应拒绝并按空操作吸收
    let conflicting = TransactionEvent::TransactionStatusUpdated(TransactionStatusUpdated {
        id: settled.id,
        status: TransactionStatus::Rejected,
        updated_at: chrono::Utc::now(),
    });

    pipeline.txn_consume(&conflicting).await.unwrap();

    let after = pipeline.stored(settled.id).await;
    assert_eq!(after.status, TransactionStatus::Approved);
    assert_eq!(after.updated_at, settled.updated_at);
}

/// 乱序投递：结论先于聚合可见时按可重试处理，聚合出现后收敛
#[tokio::test]
async fn out_of_order_delivery_eventually_converges() {
    let pipeline = Pipeline::new();

    // 先手工构造一条"尚不存在聚合"的结论事件
    let phantom_id = uuid::Uuid::new_v4();
    let verdict = TransactionEvent::TransactionStatusUpdated(TransactionStatusUpdated {
        id: phantom_id,
        status: TransactionStatus::Approved,
        updated_at: chrono::Utc::now(),
    });

    // 聚合不可见：瞬时未找到，可重试，绝不凭空落库
    let result = pipeline.txn_consume(&verdict).await;
    match result {
        Err(TransactionError::AggregateMissing { id }) => {
            assert_eq!(id, phantom_id.to_string());
        }
        other => panic!("应返回 AggregateMissing，实际: {other:?}"),
    }
    assert!(pipeline.repository.is_empty().await);

    // 聚合落库后重投同一条结论（DLQ 重投语义），链路收敛
    let mut aggregate = transaction_service::model::Transaction::new(
        "acc-debit-001",
        "acc-credit-001",
        1,
        500.0,
    );
    aggregate.id = phantom_id;
    use transaction_service::repository::TransactionRepository;
    pipeline.repository.save(&aggregate).await.unwrap();

    pipeline.txn_consume(&verdict).await.unwrap();
    assert_eq!(
        pipeline.stored(phantom_id).await.status,
        TransactionStatus::Approved
    );
}

/// 坏消息韧性：一条损坏信封不影响同管道后续消息
#[tokio::test]
async fn malformed_envelope_does_not_stall_the_pipeline() {
    let pipeline = Pipeline::new();

    // 两侧各喂一条坏消息
    let junk = raw_consumer_message(br#"{"kind":"transaction-exploded","data":{}}"#, Some("k"));

    let fraud_result =
        anti_fraud_service::consumer::handle_message(pipeline.fraud_publisher.as_ref(), &junk)
            .await;
    assert!(matches!(
        fraud_result,
        Err(anti_fraud_service::error::FraudError::Shared(
            TxnError::MalformedEvent(_)
        ))
    ));

    let txn_result =
        transaction_service::consumer::handle_message(pipeline.repository.as_ref(), &junk).await;
    assert!(matches!(
        txn_result,
        Err(TransactionError::Shared(TxnError::MalformedEvent(_)))
    ));

    // 坏消息之后完整链路照常收敛
    let (settled, _) = pipeline.run_full_flow(200.0).await;
    assert_eq!(settled.status, TransactionStatus::Approved);
}

/// 发布降级 + 对账补发：创建事件丢失后由扫描找回，链路最终收敛
#[tokio::test]
async fn degraded_publish_recovers_via_reconciler() {
    let pipeline = Pipeline::new();

    // 传输不可用：创建成功但没有事件发出
    pipeline.txn_publisher.set_transport_down(true);
    let created = pipeline
        .service
        .create(Pipeline::request(500.0))
        .await
        .expect("传输不可用不应影响创建");
    assert!(pipeline.txn_publisher.published().await.is_empty());
    assert_eq!(
        pipeline.stored(created.id).await.status,
        TransactionStatus::Pending
    );

    // 传输恢复后对账扫描补发创建事件（宽限期置零让刚创建的聚合立即可见）
    pipeline.txn_publisher.set_transport_down(false);
    let reconciler = PendingReconciler::new(
        pipeline.repository.clone(),
        pipeline.txn_publisher.clone(),
    )
    .with_timing(Duration::from_millis(10), Duration::ZERO);

    let republished = reconciler.sweep_once().await.unwrap();
    assert_eq!(republished, 1);

    // 补发的事件继续走完审核与状态应用
    let created_events = pipeline.txn_publisher.take_published().await;
    assert_eq!(created_events.len(), 1);
    pipeline.fraud_consume(&created_events[0]).await.unwrap();

    let verdicts = pipeline.fraud_publisher.take_published().await;
    assert_eq!(verdicts.len(), 1);
    pipeline.txn_consume(&verdicts[0]).await.unwrap();

    assert_eq!(
        pipeline.stored(created.id).await.status,
        TransactionStatus::Approved
    );
}

/// 反欺诈侧发布降级：结论发不出去时按可重试失败处理，重投后收敛
#[tokio::test]
async fn fraud_publish_outage_retries_to_convergence() {
    let pipeline = Pipeline::new();

    let created = pipeline
        .service
        .create(Pipeline::request(1500.0))
        .await
        .unwrap();
    let created_events = pipeline.txn_publisher.take_published().await;

    // 结论发布失败：handler 返回可重试错误（真实部署中走 DLQ 重投）
    pipeline.fraud_publisher.set_transport_down(true);
    let result = pipeline.fraud_consume(&created_events[0]).await;
    assert!(matches!(
        result,
        Err(anti_fraud_service::error::FraudError::StatusPublishFailed { .. })
    ));

    // 重投同一条创建事件：纯函数审核得到相同结论，链路收敛
    pipeline.fraud_publisher.set_transport_down(false);
    pipeline.fraud_consume(&created_events[0]).await.unwrap();

    let verdicts = pipeline.fraud_publisher.take_published().await;
    assert_eq!(verdicts.len(), 1);
    pipeline.txn_consume(&verdicts[0]).await.unwrap();

    assert_eq!(
        pipeline.stored(created.id).await.status,
        TransactionStatus::Rejected
    );
}
