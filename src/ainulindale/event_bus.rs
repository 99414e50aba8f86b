//! Engine Event Bus
//!
//! A single-process, in-order pub/sub channel for [`EngineEvent`]s.
//! Actors, the budget tracker, and external observers subscribe by event
//! kind (e.g. `"tasks.available"`) or with a wildcard; publishing
//! dispatches to each matching subscriber in registration order.
//!
//! # Contracts
//!
//! - Delivery order for a single publisher is the publish order.
//! - Subscriber failures are caught, logged, and isolated; they never
//!   propagate into the publisher.
//! - Unsubscribe is O(1) and safe to call during dispatch; it takes
//!   effect at the next publish.
//!
//! # Example
//!
//! ```rust,no_run
//! use ainulindale::event_bus::{EngineEvent, EventBus, EventPayload, EventSubscriber};
//! use async_trait::async_trait;
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventSubscriber for Printer {
//!     async fn on_event(&self, event: &EngineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
//!         println!("{}: {:?}", event.kind(), event.payload);
//!         Ok(())
//!     }
//! }
//!
//! # async {
//! let bus = EventBus::new();
//! bus.subscribe_all("printer", Arc::new(Printer));
//! bus.publish(EngineEvent::new("board-1", None, EventPayload::BoardStarted)).await;
//! # };
//! ```

use crate::ainulindale::board::EntityStatus;
use crate::ainulindale::llm::TokenUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Typed payload of an engine event. The variant determines the event
/// kind string used for subscription filtering.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// An actor changed lifecycle state.
    HexStatus {
        entity_id: String,
        status: EntityStatus,
    },
    /// Free-form progress note from an actor.
    HexProgress { message: String },
    /// A work item arrived at an actor's queue.
    WorkReceived { work_id: String },
    /// A work item reached a terminal state.
    WorkCompleted { work_id: String, success: bool },
    /// Work is flowing between an agent and a tool.
    WorkFlowing {
        from_hex: String,
        to_hex: String,
        tool_name: String,
    },
    /// An LLM round-trip is starting.
    LlmRequest {
        agent_id: String,
        model: String,
        iteration: u32,
    },
    /// An LLM round-trip finished; carries billing data.
    LlmResponse {
        agent_id: String,
        usage: TokenUsage,
        cost: f64,
    },
    /// A filesystem tool mutated the workspace.
    FilesystemChanged { path: String },
    /// A tasklist has pending work for nearby agents.
    TasksAvailable { pending: usize },
    /// A task moved to `processing` under an agent.
    TaskClaimed { task_id: String, agent_id: String },
    /// A claimed task went back to `pending`.
    TaskReleased { task_id: String },
    /// A task reached a terminal state.
    TaskCompleted { task_id: String, success: bool },
    /// The board runner finished starting.
    BoardStarted,
    /// The board runner finished stopping.
    BoardStopped,
    /// An entity's persisted state changed.
    EntityUpdated { entity_id: String },
    /// Budget crossed the warning threshold.
    BudgetWarning {
        dollars: f64,
        tokens: u64,
        dollar_fraction: f64,
        token_fraction: f64,
    },
    /// Budget reached its ceiling; the runner will stop the board.
    BudgetExceeded { dollars: f64, tokens: u64 },
}

impl EventPayload {
    /// The dotted kind string for subscription filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::HexStatus { .. } => "hex.status",
            EventPayload::HexProgress { .. } => "hex.progress",
            EventPayload::WorkReceived { .. } => "work.received",
            EventPayload::WorkCompleted { .. } => "work.completed",
            EventPayload::WorkFlowing { .. } => "work.flowing",
            EventPayload::LlmRequest { .. } => "llm.request",
            EventPayload::LlmResponse { .. } => "llm.response",
            EventPayload::FilesystemChanged { .. } => "filesystem.changed",
            EventPayload::TasksAvailable { .. } => "tasks.available",
            EventPayload::TaskClaimed { .. } => "task.claimed",
            EventPayload::TaskReleased { .. } => "task.released",
            EventPayload::TaskCompleted { .. } => "task.completed",
            EventPayload::BoardStarted => "board.started",
            EventPayload::BoardStopped => "board.stopped",
            EventPayload::EntityUpdated { .. } => "entity.updated",
            EventPayload::BudgetWarning { .. } => "budget.warning",
            EventPayload::BudgetExceeded { .. } => "budget.exceeded",
        }
    }
}

/// An event envelope: origin board, optional origin hex, wall-clock time.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub board_id: String,
    pub hex_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EngineEvent {
    /// Stamp a new event with the current time.
    pub fn new(board_id: impl Into<String>, hex_id: Option<String>, payload: EventPayload) -> Self {
        Self {
            board_id: board_id.into(),
            hex_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The dotted kind string of the payload.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Receives events from the bus.
///
/// Implementations must be cheap to call; long-running reactions should
/// be spawned. Returning an error does not disturb other subscribers —
/// the bus logs it and moves on.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_event(&self, event: &EngineEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Handle returned by `subscribe`; pass to [`EventBus::unsubscribe`].
pub type SubscriptionId = u64;

struct Registration {
    id: SubscriptionId,
    name: String,
    /// `None` subscribes to every kind.
    filter: Option<String>,
    handler: Arc<dyn EventSubscriber>,
}

#[derive(Default)]
struct BusState {
    registrations: Vec<Registration>,
    /// Tombstones: ids unsubscribed since the last publish.
    removed: HashSet<SubscriptionId>,
}

/// The board-scoped event bus.
pub struct EventBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `handler` to one event kind.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        kind: impl Into<String>,
        handler: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        self.register(name.into(), Some(kind.into()), handler)
    }

    /// Subscribe `handler` to every event kind.
    pub fn subscribe_all(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        self.register(name.into(), None, handler)
    }

    fn register(
        &self,
        name: String,
        filter: Option<String>,
        handler: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.registrations.push(Registration {
            id,
            name,
            filter,
            handler,
        });
        id
    }

    /// Drop a subscription. O(1); the registration is skipped starting
    /// with the next publish.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.removed.insert(id);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .registrations
            .iter()
            .filter(|r| !state.removed.contains(&r.id))
            .count()
    }

    /// Publish an event to every matching subscriber, in registration
    /// order. Subscriber errors are logged and isolated.
    pub async fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        let targets: Vec<(String, Arc<dyn EventSubscriber>)> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.removed.is_empty() {
                let removed = std::mem::take(&mut state.removed);
                state.registrations.retain(|r| !removed.contains(&r.id));
            }
            state
                .registrations
                .iter()
                .filter(|r| r.filter.as_deref().map(|f| f == kind).unwrap_or(true))
                .map(|r| (r.name.clone(), Arc::clone(&r.handler)))
                .collect()
        };

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "bus: {} -> {} subscriber(s) (board {})",
                kind,
                targets.len(),
                event.board_id
            );
        }

        for (name, handler) in targets {
            if let Err(e) = handler.on_event(&event).await {
                log::warn!("bus: subscriber '{}' failed on {}: {}", name, kind, e);
            }
        }
    }
}
