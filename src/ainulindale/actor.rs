//! Actor Runtime
//!
//! The board runner spawns one actor per occupied hex: a [`ToolActor`]
//! for tool entities, an [`crate::agent_actor::AgentActor`] for agents.
//! Actors share a [`RuntimeContext`] (bus, board, registry, queue,
//! cancellation) and move through a small state machine:
//!
//! ```text
//!        ┌────── error ──────┐
//!        ▼                   │
//!     idle ─start→ active ─work→ busy ─done/fail→ active
//!        ▲                          │
//!        └────────── stop ──────────┘
//! ```
//!
//! Every transition is mirrored onto the board entity's status and
//! announced as `hex.status`. A `busy` actor refuses new work; the
//! runtime never invokes an actor re-entrantly. A task failure takes the
//! `error` edge: the actor parks in `error`, claims nothing further, and
//! only `stop` returns it to `idle`. Entities authored as `disabled` get
//! no actor at all, and a tool whose plugin fails its health probe is
//! flagged `warning` on the board while still serving calls.

use crate::ainulindale::board::{BoardModel, EntityStatus};
use crate::ainulindale::cancel::CancelToken;
use crate::ainulindale::config::EngineConfig;
use crate::ainulindale::error::EngineError;
use crate::ainulindale::event_bus::{EngineEvent, EventBus, EventPayload};
use crate::ainulindale::llm::LLMProvider;
use crate::ainulindale::plugin::PluginRegistry;
use crate::ainulindale::plugins::tasklist::{TaskStore, TasklistPlugin};
use crate::ainulindale::rulefile::Rulefile;
use crate::ainulindale::store::DebouncedSaver;
use crate::ainulindale::truncation::OutputStore;
use crate::ainulindale::work_queue::WorkQueue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};

/// Lifecycle state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Idle,
    Active,
    Busy,
    Error,
}

impl ActorState {
    /// The entity status mirrored onto the board for this state.
    pub fn entity_status(&self) -> EntityStatus {
        match self {
            ActorState::Idle => EntityStatus::Idle,
            ActorState::Active => EntityStatus::Active,
            ActorState::Busy => EntityStatus::Busy,
            ActorState::Error => EntityStatus::Error,
        }
    }
}

/// Severity of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-visible message, delivered on a stream separate from the
/// event bus.
#[derive(Debug, Clone)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub hex_id: Option<String>,
}

/// Everything an actor needs to operate, shared across the board run.
#[derive(Clone)]
pub struct RuntimeContext {
    pub board_id: String,
    pub board: Arc<RwLock<BoardModel>>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<PluginRegistry>,
    pub tasklists: Arc<TasklistPlugin>,
    pub work_queue: Arc<WorkQueue>,
    pub outputs: Arc<OutputStore>,
    pub providers: Arc<HashMap<String, Arc<dyn LLMProvider>>>,
    pub rulefiles: Arc<HashMap<String, Rulefile>>,
    pub saver: Arc<DebouncedSaver>,
    pub cancel: CancelToken,
    pub config: EngineConfig,
    pub notifications: mpsc::UnboundedSender<Notification>,
}

impl RuntimeContext {
    /// Publish an event attributed to a hex.
    pub async fn emit(&self, hex_key: &str, payload: EventPayload) {
        self.bus
            .publish(EngineEvent::new(
                self.board_id.clone(),
                Some(hex_key.to_string()),
                payload,
            ))
            .await;
    }

    /// Push a user-visible notification. Best-effort: a dropped receiver
    /// is not an error.
    pub fn notify(&self, severity: Severity, hex_id: Option<String>, message: impl Into<String>) {
        let _ = self.notifications.send(Notification {
            severity,
            message: message.into(),
            hex_id,
        });
    }

    /// Mirror an actor state onto the board entity, schedule its save,
    /// and announce `hex.status`.
    pub async fn sync_status(&self, hex_key: &str, entity_id: &str, state: ActorState) {
        self.sync_entity_status(hex_key, entity_id, state.entity_status())
            .await;
    }

    /// Set an entity status directly (e.g. `warning`, which has no actor
    /// state), schedule its save, and announce `hex.status`.
    pub async fn sync_entity_status(
        &self,
        hex_key: &str,
        entity_id: &str,
        status: EntityStatus,
    ) {
        {
            let mut board = self.board.write().await;
            if board.set_entity_status(entity_id, status).is_ok() {
                if let Some(entity) = board.entity(entity_id) {
                    self.saver.mark_dirty(hex_key, entity.clone());
                }
            }
        }
        self.emit(
            hex_key,
            EventPayload::HexStatus {
                entity_id: entity_id.to_string(),
                status,
            },
        )
        .await;
    }
}

/// One actor bound to one occupied hex.
#[async_trait]
pub trait Actor: Send + Sync {
    fn hex_key(&self) -> &str;

    fn entity_id(&self) -> &str;

    fn state(&self) -> ActorState;

    /// `idle → active`: subscribe to the bus and become ready for work.
    async fn start(&self) -> Result<(), EngineError>;

    /// `* → idle`: unsubscribe and go quiet. Must be idempotent.
    async fn stop(&self);
}

/// Actor wrapping a tool entity. Owns the plugin's per-hex state — for a
/// tasklist, that is the [`TaskStore`] agents claim from.
pub struct ToolActor {
    ctx: RuntimeContext,
    hex_key: String,
    entity_id: String,
    tool_type: String,
    state: Mutex<ActorState>,
    task_store: Option<Arc<TaskStore>>,
}

impl ToolActor {
    pub fn new(
        ctx: RuntimeContext,
        hex_key: impl Into<String>,
        entity_id: impl Into<String>,
        tool_type: impl Into<String>,
    ) -> Self {
        let hex_key = hex_key.into();
        let tool_type = tool_type.into();
        let task_store = if tool_type == "tasklist" {
            Some(
                ctx.tasklists
                    .store_for(&ctx.board_id, &hex_key, ctx.bus.clone()),
            )
        } else {
            None
        };
        Self {
            ctx,
            hex_key,
            entity_id: entity_id.into(),
            tool_type,
            state: Mutex::new(ActorState::Idle),
            task_store,
        }
    }

    pub fn tool_type(&self) -> &str {
        &self.tool_type
    }

    /// The tasklist store this actor owns, when it wraps a tasklist.
    pub fn task_store(&self) -> Option<Arc<TaskStore>> {
        self.task_store.clone()
    }

    fn set_state(&self, state: ActorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

#[async_trait]
impl Actor for ToolActor {
    fn hex_key(&self) -> &str {
        &self.hex_key
    }

    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn state(&self) -> ActorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.set_state(ActorState::Active);
        // An unhealthy plugin still serves, but the board shows warning.
        let healthy = match self.ctx.registry.get(&self.tool_type) {
            Some(plugin) => plugin.health_check().await,
            None => true,
        };
        if healthy {
            self.ctx
                .sync_status(&self.hex_key, &self.entity_id, ActorState::Active)
                .await;
        } else {
            log::warn!(
                "actor: tool '{}' ({}) failed its health probe",
                self.entity_id,
                self.tool_type
            );
            self.ctx
                .sync_entity_status(&self.hex_key, &self.entity_id, EntityStatus::Warning)
                .await;
        }
        log::debug!(
            "actor: tool '{}' ({}) active at {}",
            self.entity_id,
            self.tool_type,
            self.hex_key
        );
        Ok(())
    }

    async fn stop(&self) {
        if self.state() == ActorState::Idle {
            return;
        }
        self.set_state(ActorState::Idle);
        self.ctx
            .sync_status(&self.hex_key, &self.entity_id, ActorState::Idle)
            .await;
    }
}
