//! Work Queue
//!
//! Work items are the units of scheduled work routed between actors. The
//! queue keeps a per-actor FIFO plus a status-guarded lifecycle:
//!
//! ```text
//! pending ─claim→ claimed ─start→ processing ─┬─complete→ completed
//!                                             └─fail→ failed
//! ```
//!
//! Because the runtime is single-threaded cooperative, atomicity is
//! logical: every transition checks its status precondition and a
//! violating transition is an error, never a silent no-op. Terminal items
//! are moved to an archive and stay inspectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Claimed,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Claimed => "claimed",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A unit of work routed between actors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub board_id: String,
    /// Hex that emitted the work.
    pub source_hex_id: String,
    /// Hex whose queue currently holds the item.
    pub current_hex_id: String,
    pub status: WorkStatus,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Errors from guarded work-item transitions.
#[derive(Debug, Clone)]
pub enum WorkError {
    UnknownItem(String),
    /// The item was not in the status the transition requires.
    InvalidTransition {
        id: String,
        from: WorkStatus,
        attempted: &'static str,
    },
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkError::UnknownItem(id) => write!(f, "Unknown work item: {}", id),
            WorkError::InvalidTransition {
                id,
                from,
                attempted,
            } => write!(
                f,
                "Work item {} cannot {} from status '{}'",
                id, attempted, from
            ),
        }
    }
}

impl Error for WorkError {}

#[derive(Default)]
struct QueueState {
    items: HashMap<String, WorkItem>,
    /// Per-actor FIFO of item ids.
    queues: HashMap<String, VecDeque<String>>,
    archive: Vec<WorkItem>,
}

/// Board-scoped collection of work items with per-actor FIFOs.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a pending work item.
    pub fn create(
        &self,
        board_id: impl Into<String>,
        source_hex_id: impl Into<String>,
        current_hex_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> WorkItem {
        let item = WorkItem {
            id: uuid::Uuid::new_v4().to_string(),
            board_id: board_id.into(),
            source_hex_id: source_hex_id.into(),
            current_hex_id: current_hex_id.into(),
            status: WorkStatus::Pending,
            payload,
            claimed_by: None,
            claimed_at: None,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.items.insert(item.id.clone(), item.clone());
        item
    }

    /// Append an item to an actor's FIFO and move it to that hex.
    pub fn enqueue(&self, hex_id: &str, item_id: &str) -> Result<(), WorkError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| WorkError::UnknownItem(item_id.to_string()))?;
        item.current_hex_id = hex_id.to_string();
        state
            .queues
            .entry(hex_id.to_string())
            .or_insert_with(VecDeque::new)
            .push_back(item_id.to_string());
        Ok(())
    }

    /// Pop the oldest queued item for an actor, if any.
    pub fn dequeue(&self, hex_id: &str) -> Option<WorkItem> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let id = state.queues.get_mut(hex_id)?.pop_front()?;
            // Ids whose items were archived while queued are skipped.
            if let Some(item) = state.items.get(&id) {
                return Some(item.clone());
            }
        }
    }

    /// Atomic `pending → claimed` transition.
    pub fn claim(&self, item_id: &str, entity_id: &str) -> Result<WorkItem, WorkError> {
        self.transition(item_id, "claim", |item| {
            if item.status != WorkStatus::Pending {
                return false;
            }
            item.status = WorkStatus::Claimed;
            item.claimed_by = Some(entity_id.to_string());
            item.claimed_at = Some(Utc::now());
            true
        })
    }

    /// `claimed → processing` transition.
    pub fn start_processing(&self, item_id: &str) -> Result<WorkItem, WorkError> {
        self.transition(item_id, "start processing", |item| {
            if item.status != WorkStatus::Claimed {
                return false;
            }
            item.status = WorkStatus::Processing;
            true
        })
    }

    /// Terminal `processing → completed` transition. Archives the item.
    pub fn complete(
        &self,
        item_id: &str,
        result: serde_json::Value,
    ) -> Result<WorkItem, WorkError> {
        let item = self.transition(item_id, "complete", |item| {
            if item.status != WorkStatus::Processing {
                return false;
            }
            item.status = WorkStatus::Completed;
            item.completed_at = Some(Utc::now());
            item.result = Some(result.clone());
            true
        })?;
        self.archive(item_id);
        Ok(item)
    }

    /// Terminal `claimed|processing → failed` transition. Archives the item.
    pub fn fail(&self, item_id: &str, error: impl Into<String>) -> Result<WorkItem, WorkError> {
        let message = error.into();
        let item = self.transition(item_id, "fail", |item| {
            if !matches!(item.status, WorkStatus::Claimed | WorkStatus::Processing) {
                return false;
            }
            item.status = WorkStatus::Failed;
            item.completed_at = Some(Utc::now());
            item.error = Some(message.clone());
            true
        })?;
        self.archive(item_id);
        Ok(item)
    }

    /// Pending items currently routed to a hex.
    pub fn pending_for(&self, hex_id: &str) -> Vec<WorkItem> {
        self.filtered(hex_id, WorkStatus::Pending)
    }

    /// Processing items currently routed to a hex.
    pub fn processing_for(&self, hex_id: &str) -> Vec<WorkItem> {
        self.filtered(hex_id, WorkStatus::Processing)
    }

    /// Look up a live (non-archived) item.
    pub fn get(&self, item_id: &str) -> Option<WorkItem> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.items.get(item_id).cloned()
    }

    /// Terminal items, oldest first.
    pub fn archived(&self) -> Vec<WorkItem> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.archive.clone()
    }

    fn filtered(&self, hex_id: &str, status: WorkStatus) -> Vec<WorkItem> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<WorkItem> = state
            .items
            .values()
            .filter(|i| i.current_hex_id == hex_id && i.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    fn transition<F>(
        &self,
        item_id: &str,
        attempted: &'static str,
        apply: F,
    ) -> Result<WorkItem, WorkError>
    where
        F: FnOnce(&mut WorkItem) -> bool,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| WorkError::UnknownItem(item_id.to_string()))?;
        let from = item.status;
        if apply(item) {
            Ok(item.clone())
        } else {
            Err(WorkError::InvalidTransition {
                id: item_id.to_string(),
                from,
                attempted,
            })
        }
    }

    fn archive(&self, item_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = state.items.remove(item_id) {
            state.archive.push(item);
        }
    }
}
