use lead_sync::models::log::{LogAction, OperationLog};
use lead_sync::models::task::{DirectTask, TaskStatus};
use lead_sync::AppError;

use super::test_helpers::{eventually, memory_store, open_as};

#[tokio::test]
async fn send_and_complete_task() {
    let store = memory_store().await;
    let gaston = open_as(&store, "Gaston").await;
    let diego = open_as(&store, "Diego").await;

    let task = gaston
        .send_task("Diego", "call Acme Bar")
        .await
        .expect("send");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.from_user, "Gaston");

    eventually::<DirectTask, _>(&diego, |tasks| tasks.len() == 1).await;
    let done = diego.complete_task(&task.id).await.expect("complete");
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());

    let logs = store.list::<OperationLog>().await.expect("logs");
    let actions: Vec<LogAction> = logs.iter().map(|l| l.action).collect();
    assert_eq!(actions, [LogAction::TaskCreate, LogAction::TaskComplete]);
}

#[tokio::test]
async fn only_recipient_completes_once() {
    let store = memory_store().await;
    let gaston = open_as(&store, "Gaston").await;
    let diego = open_as(&store, "Diego").await;
    let task = gaston.send_task("Diego", "follow up").await.expect("send");

    let err = gaston.complete_task(&task.id).await.expect_err("sender");
    assert!(matches!(err, AppError::Unauthorized(_)));

    diego.complete_task(&task.id).await.expect("complete");
    let err = diego.complete_task(&task.id).await.expect_err("twice");
    assert!(matches!(err, AppError::AlreadyResolved(_)));

    let err = diego.complete_task("missing").await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn blank_task_is_invalid() {
    let store = memory_store().await;
    let gaston = open_as(&store, "Gaston").await;

    let err = gaston.send_task("Diego", "  ").await.expect_err("blank");
    assert!(matches!(err, AppError::Invalid(_)));
    let err = gaston.send_task("", "hello").await.expect_err("no recipient");
    assert!(matches!(err, AppError::Invalid(_)));
    assert!(store.list::<DirectTask>().await.expect("tasks").is_empty());
}
