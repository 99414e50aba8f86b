//! Budget ceiling behavior through the full runner: warning at 70 %,
//! halt at 100 %, and release of the in-flight task.

mod common;

use ainulindale::board::{AgentEntity, BoardModel, Entity, ToolEntity};
use ainulindale::budget::BudgetLimits;
use ainulindale::config::EngineConfig;
use ainulindale::plugins::tasklist::{TaskPriority, TaskStatus};
use ainulindale::runner::BoardRunner;
use ainulindale::store::MemoryStore;
use common::{tool_call_response, wait_until, EventRecorder, ScriptedProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_budget_exceeded_halts_the_board_and_releases_the_task() {
    let mut board = BoardModel::new("budget-board", "Budget", 2);
    board
        .place_entity(
            "0,0",
            Entity::Agent(AgentEntity::new("agent-1", "Spender").with_provider("mock", "m")),
        )
        .unwrap();
    board
        .place_entity(
            "1,0",
            Entity::Tool(ToolEntity::new("tl-1", "Tasks", "tasklist").with_range(1)),
        )
        .unwrap();

    // Every response keeps the tool loop going; costs 0.40 + 0.40 + 0.30
    // cross the warning threshold on the second call and the 1.00 ceiling
    // on the third.
    let spin = || tool_call_response("tasklist_list_tasks", json!({}), 0.30);
    let provider = Arc::new(
        ScriptedProvider::new("mock")
            .then(tool_call_response("tasklist_list_tasks", json!({}), 0.40))
            .then(tool_call_response("tasklist_list_tasks", json!({}), 0.40))
            .with_fallback(spin()),
    );

    let mut config = EngineConfig::default();
    config.max_tool_steps = 100_000;
    let runner = BoardRunner::builder(board, Arc::new(MemoryStore::new()))
        .with_provider(provider)
        .with_budget(BudgetLimits {
            max_dollars: 1.00,
            max_tokens: 0,
        })
        .with_config(config)
        .build()
        .unwrap();

    let recorder = EventRecorder::new();
    runner.bus().subscribe_all("recorder", recorder.clone());
    runner.start().await.unwrap();

    let store = runner.tasklist_store_at("1,0").unwrap();
    let task = store.add("Burn money", None, TaskPriority::Normal).await;

    assert!(
        wait_until(|| recorder.has("budget.exceeded"), Duration::from_secs(5)).await,
        "budget.exceeded never fired; events: {:?}",
        recorder.kinds()
    );
    // The runner initiates its own stop.
    assert!(
        wait_until(|| !runner.is_running(), Duration::from_secs(5)).await,
        "runner did not stop itself"
    );
    assert!(
        wait_until(
            || store.get(&task.id).map(|t| t.status == TaskStatus::Pending).unwrap_or(false),
            Duration::from_secs(5),
        )
        .await,
        "task was not released"
    );

    // Warning fired before the halt, and the task never completed.
    let warning = recorder.first_index("budget.warning").unwrap();
    let exceeded = recorder.first_index("budget.exceeded").unwrap();
    assert!(warning < exceeded);
    assert_eq!(recorder.count("budget.warning"), 1);
    assert_eq!(recorder.count("task.completed"), 0);
    assert!(recorder.has("task.released"));

    let snapshot = runner.budget().snapshot();
    assert!((snapshot.total_dollars - 1.10).abs() < 1e-9);
    assert!(snapshot.total_tokens > 0);
}

#[tokio::test]
async fn test_run_metrics_reset_on_restart_but_totals_persist() {
    let mut board = BoardModel::new("budget-board-2", "Budget", 2);
    board
        .place_entity(
            "1,0",
            Entity::Tool(ToolEntity::new("tl-1", "Tasks", "tasklist").with_range(1)),
        )
        .unwrap();
    let runner = BoardRunner::builder(board, Arc::new(MemoryStore::new()))
        .build()
        .unwrap();

    runner.start().await.unwrap();
    runner.budget().record(500, 0.25);
    runner.stop().await;

    let before = runner.budget().snapshot();
    assert_eq!(before.run_tokens, 500);

    runner.start().await.unwrap();
    let after = runner.budget().snapshot();
    assert_eq!(after.run_tokens, 0);
    assert_eq!(after.total_tokens, 500);
    assert!((after.total_dollars - 0.25).abs() < 1e-9);
    runner.stop().await;
}
