//! Tasklist Plugin
//!
//! Each tasklist entity on the board owns an ordered store of tasks.
//! Agents within reach claim tasks from it, work them, and report
//! completion; the store announces every change on the event bus so
//! nearby agent actors can react.
//!
//! Claiming picks the highest-priority pending task
//! (`critical > high > normal > low`), with ties broken by insertion
//! order. A claim is atomic within the engine's single logical execution
//! context: once claimed, the task is invisible to later claim attempts
//! until it is released.
//!
//! LLM-facing operations are `add_task` (write), `list_tasks` and
//! `get_task` (read). The engine-side lifecycle calls — `claim`,
//! `complete`, `fail`, `release` — are invoked directly on the
//! [`TaskStore`] by agent actors.

use crate::ainulindale::event_bus::{EngineEvent, EventBus, EventPayload};
use crate::ainulindale::plugin::{
    ExecutionContext, ToolDef, ToolError, ToolParameter, ToolParameterType, ToolPlugin,
    ToolResult,
};
use crate::ainulindale::rbac::Permission;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Claim-ordering priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    fn rank(&self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }

    /// Parse a priority name, defaulting unknown values to `normal`.
    pub fn parse(value: &str) -> TaskPriority {
        match value {
            "low" => TaskPriority::Low,
            "high" => TaskPriority::High,
            "critical" => TaskPriority::Critical,
            _ => TaskPriority::Normal,
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
}

/// A tasklist-owned unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Errors from guarded task transitions.
#[derive(Debug, Clone)]
pub enum TaskError {
    UnknownTask(String),
    InvalidTransition {
        id: String,
        from: TaskStatus,
        attempted: &'static str,
    },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::UnknownTask(id) => write!(f, "Unknown task: {}", id),
            TaskError::InvalidTransition {
                id,
                from,
                attempted,
            } => write!(f, "Task {} cannot {} from status '{:?}'", id, attempted, from),
        }
    }
}

impl Error for TaskError {}

/// The ordered task store owned by one tasklist hex.
pub struct TaskStore {
    board_id: String,
    hex_key: String,
    bus: Arc<EventBus>,
    tasks: Mutex<Vec<Task>>,
}

impl TaskStore {
    pub fn new(board_id: impl Into<String>, hex_key: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            board_id: board_id.into(),
            hex_key: hex_key.into(),
            bus,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn hex_key(&self) -> &str {
        &self.hex_key
    }

    async fn emit(&self, payload: EventPayload) {
        self.bus
            .publish(EngineEvent::new(
                self.board_id.clone(),
                Some(self.hex_key.clone()),
                payload,
            ))
            .await;
    }

    /// Append a task and announce pending work.
    pub async fn add(
        &self,
        title: impl Into<String>,
        description: Option<String>,
        priority: TaskPriority,
    ) -> Task {
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description,
            priority,
            status: TaskStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };
        let pending = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(task.clone());
            tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count()
        };
        self.emit(EventPayload::TasksAvailable { pending }).await;
        task
    }

    /// Re-announce pending work without adding anything. Used at board
    /// start when the store was seeded before any agents were listening.
    pub async fn announce(&self) {
        let pending = self.pending_count();
        if pending > 0 {
            self.emit(EventPayload::TasksAvailable { pending }).await;
        }
    }

    /// Claim the highest-priority pending task for an agent.
    ///
    /// Returns `None` when nothing is pending (e.g. another agent claimed
    /// first). Ties are broken by insertion order.
    pub async fn claim(&self, agent_id: &str) -> Option<Task> {
        let claimed = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            let mut best: Option<usize> = None;
            for (index, task) in tasks.iter().enumerate() {
                if task.status != TaskStatus::Pending {
                    continue;
                }
                match best {
                    Some(current) if tasks[current].priority.rank() >= task.priority.rank() => {}
                    _ => best = Some(index),
                }
            }
            let index = best?;
            let task = &mut tasks[index];
            task.status = TaskStatus::Processing;
            task.claimed_by = Some(agent_id.to_string());
            task.claimed_at = Some(Utc::now());
            task.clone()
        };
        self.emit(EventPayload::TaskClaimed {
            task_id: claimed.id.clone(),
            agent_id: agent_id.to_string(),
        })
        .await;
        Some(claimed)
    }

    /// Terminal `processing → completed` transition with a result.
    pub async fn complete(
        &self,
        task_id: &str,
        result: impl Into<String>,
    ) -> Result<Task, TaskError> {
        let result = result.into();
        let task = self.transition(task_id, "complete", |task| {
            if task.status != TaskStatus::Processing {
                return false;
            }
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.result = Some(result.clone());
            true
        })?;
        self.emit(EventPayload::TaskCompleted {
            task_id: task.id.clone(),
            success: true,
        })
        .await;
        Ok(task)
    }

    /// Terminal `processing → completed` transition with an error.
    pub async fn fail(&self, task_id: &str, error: impl Into<String>) -> Result<Task, TaskError> {
        let error = error.into();
        let task = self.transition(task_id, "fail", |task| {
            if task.status != TaskStatus::Processing {
                return false;
            }
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.error = Some(error.clone());
            true
        })?;
        self.emit(EventPayload::TaskCompleted {
            task_id: task.id.clone(),
            success: false,
        })
        .await;
        Ok(task)
    }

    /// Return a claimed task to `pending`. Used on agent cancellation.
    pub async fn release(&self, task_id: &str) -> Result<Task, TaskError> {
        let task = self.transition(task_id, "release", |task| {
            if task.status != TaskStatus::Processing {
                return false;
            }
            task.status = TaskStatus::Pending;
            task.claimed_by = None;
            task.claimed_at = None;
            true
        })?;
        self.emit(EventPayload::TaskReleased {
            task_id: task.id.clone(),
        })
        .await;
        Ok(task)
    }

    /// Tasks matching an optional status filter, in insertion order.
    pub fn list(&self, filter: Option<TaskStatus>) -> Vec<Task> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .iter()
            .filter(|t| filter.map(|f| t.status == f).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Look up one task.
    pub fn get(&self, task_id: &str) -> Option<Task> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Number of pending tasks.
    pub fn pending_count(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    fn transition<F>(
        &self,
        task_id: &str,
        attempted: &'static str,
        apply: F,
    ) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task) -> bool,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))?;
        let from = task.status;
        if apply(task) {
            Ok(task.clone())
        } else {
            Err(TaskError::InvalidTransition {
                id: task_id.to_string(),
                from,
                attempted,
            })
        }
    }
}

/// Tasklist tool plugin. Holds one [`TaskStore`] per tasklist hex.
#[derive(Default)]
pub struct TasklistPlugin {
    stores: Mutex<HashMap<String, Arc<TaskStore>>>,
}

impl TasklistPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for a tasklist hex, created on first use.
    pub fn store_for(
        &self,
        board_id: &str,
        hex_key: &str,
        bus: Arc<EventBus>,
    ) -> Arc<TaskStore> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        stores
            .entry(hex_key.to_string())
            .or_insert_with(|| Arc::new(TaskStore::new(board_id, hex_key, bus)))
            .clone()
    }

    /// The store for a hex, if one has been created.
    pub fn store_at(&self, hex_key: &str) -> Option<Arc<TaskStore>> {
        let stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        stores.get(hex_key).cloned()
    }
}

#[async_trait]
impl ToolPlugin for TasklistPlugin {
    fn id(&self) -> &str {
        "tasklist"
    }

    fn name(&self) -> &str {
        "Tasklist"
    }

    fn description(&self) -> &str {
        "Ordered task queue that nearby agents claim work from"
    }

    fn category(&self) -> &str {
        "coordination"
    }

    fn icon(&self) -> &str {
        "list"
    }

    fn tools(&self) -> Vec<ToolDef> {
        vec![
            ToolDef::new("add_task", "Add a task to the list", Permission::Write)
                .with_parameter(
                    ToolParameter::new("title", ToolParameterType::String)
                        .with_description("Short task title")
                        .required(),
                )
                .with_parameter(
                    ToolParameter::new("description", ToolParameterType::String)
                        .with_description("Longer task body"),
                )
                .with_parameter(
                    ToolParameter::new("priority", ToolParameterType::String)
                        .with_description("low | normal | high | critical")
                        .with_default(json!("normal")),
                ),
            ToolDef::new("list_tasks", "List tasks", Permission::Read).with_parameter(
                ToolParameter::new("status", ToolParameterType::String)
                    .with_description("Filter: pending | processing | completed"),
            ),
            ToolDef::new("get_task", "Fetch one task by id", Permission::Read).with_parameter(
                ToolParameter::new("task_id", ToolParameterType::String)
                    .with_description("Task id")
                    .required(),
            ),
        ]
    }

    async fn execute(
        &self,
        tool_name: &str,
        params: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let store = self.store_for(&ctx.board_id, &ctx.hex_key, ctx.bus.clone());
        match tool_name {
            "add_task" => {
                let title = params
                    .get("title")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        ToolError::InvalidParams("'title' must be a string".to_string())
                    })?;
                let description = params
                    .get("description")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                let priority = params
                    .get("priority")
                    .and_then(JsonValue::as_str)
                    .map(TaskPriority::parse)
                    .unwrap_or(TaskPriority::Normal);
                let task = store.add(title, description, priority).await;
                Ok(ToolResult::success(
                    serde_json::to_value(&task).unwrap_or(JsonValue::Null),
                ))
            }
            "list_tasks" => {
                let filter = params.get("status").and_then(JsonValue::as_str).and_then(
                    |status| match status {
                        "pending" => Some(TaskStatus::Pending),
                        "processing" => Some(TaskStatus::Processing),
                        "completed" => Some(TaskStatus::Completed),
                        _ => None,
                    },
                );
                let tasks = store.list(filter);
                Ok(ToolResult::success(json!({
                    "count": tasks.len(),
                    "tasks": tasks,
                })))
            }
            "get_task" => {
                let task_id = params
                    .get("task_id")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        ToolError::InvalidParams("'task_id' must be a string".to_string())
                    })?;
                match store.get(task_id) {
                    Some(task) => Ok(ToolResult::success(
                        serde_json::to_value(&task).unwrap_or(JsonValue::Null),
                    )),
                    None => Err(ToolError::ExecutionFailed(format!(
                        "Unknown task: {}",
                        task_id
                    ))),
                }
            }
            other => Err(ToolError::NotFound(format!(
                "tasklist has no operation '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaskStore {
        TaskStore::new("b", "1,0", Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_priority_claim_order() {
        let store = store();
        store.add("T1", None, TaskPriority::Normal).await;
        store.add("T2", None, TaskPriority::High).await;
        store.add("T3", None, TaskPriority::Critical).await;

        let first = store.claim("agent-a").await.unwrap();
        assert_eq!(first.title, "T3");
        let second = store.claim("agent-b").await.unwrap();
        assert_eq!(second.title, "T2");
        let third = store.claim("agent-a").await.unwrap();
        assert_eq!(third.title, "T1");
        assert!(store.claim("agent-b").await.is_none());
    }

    #[tokio::test]
    async fn test_equal_priority_ties_break_by_insertion() {
        let store = store();
        store.add("first", None, TaskPriority::Normal).await;
        store.add("second", None, TaskPriority::Normal).await;
        assert_eq!(store.claim("a").await.unwrap().title, "first");
        assert_eq!(store.claim("a").await.unwrap().title, "second");
    }

    #[tokio::test]
    async fn test_claimed_task_is_invisible_to_later_claims() {
        let store = store();
        store.add("only", None, TaskPriority::Normal).await;
        let claimed = store.claim("agent-a").await.unwrap();
        assert_eq!(claimed.claimed_by.as_deref(), Some("agent-a"));
        assert!(store.claim("agent-b").await.is_none());
    }

    #[tokio::test]
    async fn test_claim_then_release_restores_pre_claim_state() {
        let store = store();
        let added = store.add("t", Some("body".to_string()), TaskPriority::High).await;
        let claimed = store.claim("agent-a").await.unwrap();
        let released = store.release(&claimed.id).await.unwrap();

        assert_eq!(released.status, TaskStatus::Pending);
        assert!(released.claimed_by.is_none());
        assert!(released.claimed_at.is_none());
        assert_eq!(released.title, added.title);
        assert_eq!(released.description, added.description);
        // Released tasks are claimable again.
        assert!(store.claim("agent-b").await.is_some());
    }

    #[tokio::test]
    async fn test_complete_and_fail_are_terminal() {
        let store = store();
        store.add("a", None, TaskPriority::Normal).await;
        store.add("b", None, TaskPriority::Normal).await;

        let a = store.claim("agent").await.unwrap();
        let done = store.complete(&a.id, "done").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("done"));
        assert!(store.complete(&a.id, "again").await.is_err());
        assert!(store.release(&a.id).await.is_err());

        let b = store.claim("agent").await.unwrap();
        let failed = store.fail(&b.id, "broke").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Completed);
        assert_eq!(failed.error.as_deref(), Some("broke"));
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let store = store();
        let task = store.add("t", None, TaskPriority::Normal).await;
        let err = store.complete(&task.id, "r").await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert!(store.complete("missing", "r").await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = store();
        store.add("a", None, TaskPriority::Normal).await;
        store.add("b", None, TaskPriority::Normal).await;
        store.claim("agent").await.unwrap();

        assert_eq!(store.list(None).len(), 2);
        assert_eq!(store.list(Some(TaskStatus::Pending)).len(), 1);
        assert_eq!(store.list(Some(TaskStatus::Processing)).len(), 1);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_plugin_ops_round_trip() {
        let plugin = TasklistPlugin::new();
        let ctx = ExecutionContext {
            board_id: "b".to_string(),
            hex_key: "1,0".to_string(),
            entity_id: "tl".to_string(),
            agent_id: None,
            bus: Arc::new(EventBus::new()),
        };

        let added = plugin
            .execute(
                "add_task",
                json!({"title": "Ship it", "priority": "critical"}),
                &ctx,
            )
            .await
            .unwrap();
        let task_id = added.output["id"].as_str().unwrap().to_string();

        let listed = plugin
            .execute("list_tasks", json!({"status": "pending"}), &ctx)
            .await
            .unwrap();
        assert_eq!(listed.output["count"], 1);

        let fetched = plugin
            .execute("get_task", json!({"task_id": task_id}), &ctx)
            .await
            .unwrap();
        assert_eq!(fetched.output["title"], "Ship it");

        let missing = plugin
            .execute("get_task", json!({"task_id": "nope"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), "tool.execution_failed");
    }
}
