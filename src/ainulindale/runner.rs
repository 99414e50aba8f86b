//! Board Runner
//!
//! Top-level lifecycle for one board: `start` validates the board, spins
//! up an actor per occupied hex, initializes tool plugins, wires the
//! budget tracker to the bus, and announces seeded tasklists; `stop`
//! signals cancellation, lets in-flight loops wind down, releases any
//! still-claimed tasks, disposes plugins, and flushes pending saves.
//!
//! The runner holds no main loop of its own — after `start` returns,
//! actors operate purely event-driven off the bus. A `budget.exceeded`
//! event initiates a stop automatically.
//!
//! # Example
//!
//! ```rust,no_run
//! use ainulindale::board::{AgentEntity, BoardModel, Entity, ToolEntity};
//! use ainulindale::runner::BoardRunner;
//! use ainulindale::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async {
//! let mut board = BoardModel::new("b1", "Demo", 3);
//! board.place_entity("0,0", Entity::Agent(
//!     AgentEntity::new("a1", "Worker").with_provider("mock", "mock-model"),
//! )).unwrap();
//! board.place_entity("1,0", Entity::Tool(
//!     ToolEntity::new("tl", "Tasks", "tasklist").with_range(1),
//! )).unwrap();
//!
//! let runner = BoardRunner::builder(board, Arc::new(MemoryStore::new()))
//!     .build()
//!     .unwrap();
//! runner.start().await.unwrap();
//! // ... agents claim and work tasks ...
//! runner.stop().await;
//! # };
//! ```

use crate::ainulindale::actor::{Actor, ActorState, Notification, RuntimeContext};
use crate::ainulindale::agent_actor::AgentActor;
use crate::ainulindale::board::{BoardModel, Entity, EntityStatus};
use crate::ainulindale::budget::{BudgetLimits, BudgetTracker};
use crate::ainulindale::cancel::CancelToken;
use crate::ainulindale::config::EngineConfig;
use crate::ainulindale::error::EngineError;
use crate::ainulindale::event_bus::{
    EngineEvent, EventBus, EventPayload, EventSubscriber, SubscriptionId,
};
use crate::ainulindale::llm::LLMProvider;
use crate::ainulindale::plugin::{PluginRegistry, ToolPlugin};
use crate::ainulindale::plugins::tasklist::{TaskStatus, TaskStore, TasklistPlugin};
use crate::ainulindale::plugins::{FilesystemPlugin, ShellPlugin};
use crate::ainulindale::rulefile::Rulefile;
use crate::ainulindale::store::{BoardStore, DebouncedSaver};
use crate::ainulindale::truncation::OutputStore;
use crate::ainulindale::work_queue::WorkQueue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Builder for a [`BoardRunner`].
pub struct BoardRunnerBuilder {
    board: BoardModel,
    store: Arc<dyn BoardStore>,
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    rulefiles: Vec<Rulefile>,
    budget: BudgetLimits,
    config: EngineConfig,
    extra_plugins: Vec<Arc<dyn ToolPlugin>>,
    workspace_root: PathBuf,
}

impl BoardRunnerBuilder {
    /// Register an LLM provider under its own name.
    pub fn with_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    /// Make a rulefile available to agents, overriding any stored
    /// rulefile with the same id.
    pub fn with_rulefile(mut self, rulefile: Rulefile) -> Self {
        self.rulefiles.push(rulefile);
        self
    }

    /// Set the budget ceilings (zero disables a dimension).
    pub fn with_budget(mut self, budget: BudgetLimits) -> Self {
        self.budget = budget;
        self
    }

    /// Override the engine tunables.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a user plugin alongside the built-ins.
    pub fn with_plugin(mut self, plugin: Arc<dyn ToolPlugin>) -> Self {
        self.extra_plugins.push(plugin);
        self
    }

    /// Default workspace root for the filesystem plugin.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Assemble the runner. Registers the built-in plugins (filesystem,
    /// shell, tasklist) plus any user plugins; duplicate ids fail here.
    pub fn build(self) -> Result<Arc<BoardRunner>, EngineError> {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(PluginRegistry::new());
        let tasklists = Arc::new(TasklistPlugin::new());

        registry
            .register(Arc::new(FilesystemPlugin::new(self.workspace_root)))
            .map_err(|e| EngineError::InvalidBoard(e.to_string()))?;
        registry
            .register(Arc::new(ShellPlugin::new()))
            .map_err(|e| EngineError::InvalidBoard(e.to_string()))?;
        registry
            .register(tasklists.clone())
            .map_err(|e| EngineError::InvalidBoard(e.to_string()))?;
        for plugin in self.extra_plugins {
            registry
                .register(plugin)
                .map_err(|e| EngineError::InvalidBoard(e.to_string()))?;
        }

        let budget = Arc::new(BudgetTracker::new(self.budget, Arc::downgrade(&bus)));
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let board_id = self.board.id().to_string();

        Ok(Arc::new(BoardRunner {
            board_id,
            board: Arc::new(RwLock::new(self.board)),
            bus,
            registry,
            tasklists,
            work_queue: Arc::new(WorkQueue::new()),
            outputs: Arc::new(OutputStore::new()),
            store: self.store,
            budget,
            providers: Arc::new(self.providers),
            extra_rulefiles: self.rulefiles,
            config: self.config,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancelToken::new()),
            actors: RwLock::new(Vec::new()),
            tasklist_stores: Mutex::new(Vec::new()),
            active_plugins: Mutex::new(Vec::new()),
            saver: Mutex::new(None),
            bus_subscriptions: Mutex::new(Vec::new()),
            notifications_tx,
            notifications_rx: Mutex::new(Some(notifications_rx)),
        }))
    }
}

/// The per-board engine entry point.
pub struct BoardRunner {
    board_id: String,
    board: Arc<RwLock<BoardModel>>,
    bus: Arc<EventBus>,
    registry: Arc<PluginRegistry>,
    tasklists: Arc<TasklistPlugin>,
    work_queue: Arc<WorkQueue>,
    outputs: Arc<OutputStore>,
    store: Arc<dyn BoardStore>,
    budget: Arc<BudgetTracker>,
    providers: Arc<HashMap<String, Arc<dyn LLMProvider>>>,
    extra_rulefiles: Vec<Rulefile>,
    config: EngineConfig,
    running: AtomicBool,
    cancel: Mutex<CancelToken>,
    actors: RwLock<Vec<Arc<dyn Actor>>>,
    tasklist_stores: Mutex<Vec<Arc<TaskStore>>>,
    active_plugins: Mutex<Vec<String>>,
    saver: Mutex<Option<Arc<DebouncedSaver>>>,
    bus_subscriptions: Mutex<Vec<SubscriptionId>>,
    notifications_tx: mpsc::UnboundedSender<Notification>,
    notifications_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl BoardRunner {
    /// Start building a runner for a board.
    pub fn builder(board: BoardModel, store: Arc<dyn BoardStore>) -> BoardRunnerBuilder {
        BoardRunnerBuilder {
            board,
            store,
            providers: HashMap::new(),
            rulefiles: Vec::new(),
            budget: BudgetLimits::default(),
            config: EngineConfig::default(),
            extra_plugins: Vec::new(),
            workspace_root: PathBuf::from("workspace"),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn board(&self) -> Arc<RwLock<BoardModel>> {
        self.board.clone()
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    pub fn work_queue(&self) -> Arc<WorkQueue> {
        self.work_queue.clone()
    }

    pub fn outputs(&self) -> Arc<OutputStore> {
        self.outputs.clone()
    }

    pub fn budget(&self) -> Arc<BudgetTracker> {
        self.budget.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The task store of the tasklist at a hex, once actors exist.
    pub fn tasklist_store_at(&self, hex_key: &str) -> Option<Arc<TaskStore>> {
        self.tasklists.store_at(hex_key)
    }

    /// Take the user-notification stream. Yields `None` after the first
    /// call.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn current_cancel(&self) -> CancelToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Validate the board, construct actors, initialize plugins, wire the
    /// bus, and emit `board.started`.
    ///
    /// Any failure rolls back partial initialization and is fatal.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::InvalidBoard(
                "board is already running".to_string(),
            ));
        }
        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("runner: start failed, rolling back: {}", e);
                self.rollback().await;
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start_inner(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let board = self.board.read().await;
            board
                .validate()
                .map_err(|e| EngineError::InvalidBoard(e.to_string()))?;
        }

        // Rulefile library: stored first, builder-provided overrides.
        let mut rulefiles: HashMap<String, Rulefile> = HashMap::new();
        match self.store.load_rulefiles().await {
            Ok(stored) => {
                for rulefile in stored {
                    rulefiles.insert(rulefile.id.clone(), rulefile);
                }
            }
            Err(e) => log::warn!("runner: could not load rulefiles: {}", e),
        }
        for rulefile in &self.extra_rulefiles {
            rulefiles.insert(rulefile.id.clone(), rulefile.clone());
        }

        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = cancel.clone();
        let saver = Arc::new(DebouncedSaver::new(
            self.store.clone(),
            self.board_id.clone(),
            self.config.save_debounce,
        ));
        *self.saver.lock().unwrap_or_else(|e| e.into_inner()) = Some(saver.clone());

        let ctx = RuntimeContext {
            board_id: self.board_id.clone(),
            board: self.board.clone(),
            bus: self.bus.clone(),
            registry: self.registry.clone(),
            tasklists: self.tasklists.clone(),
            work_queue: self.work_queue.clone(),
            outputs: self.outputs.clone(),
            providers: self.providers.clone(),
            rulefiles: Arc::new(rulefiles),
            saver,
            cancel,
            config: self.config.clone(),
            notifications: self.notifications_tx.clone(),
        };

        // Disabled entities keep their placement but take no part in the
        // run: no plugin initialization, no actor.
        let placements: Vec<(String, Entity)> = {
            let board = self.board.read().await;
            let mut placements = Vec::new();
            for (hex_key, entity) in board.occupied() {
                if entity.status() == EntityStatus::Disabled {
                    log::info!(
                        "runner: entity '{}' at {} is disabled, skipping",
                        entity.id(),
                        hex_key
                    );
                    continue;
                }
                placements.push((hex_key, entity.clone()));
            }
            placements
        };

        // Validate configs and initialize each plugin once, in placement
        // order, with the first entity's config over the defaults.
        for (_, entity) in &placements {
            if let Entity::Tool(tool) = entity {
                let plugin = self.registry.get(&tool.tool_type).ok_or_else(|| {
                    EngineError::InvalidBoard(format!(
                        "tool '{}' uses unknown plugin '{}'",
                        tool.id, tool.tool_type
                    ))
                })?;
                if !plugin.is_available() {
                    return Err(EngineError::InvalidBoard(format!(
                        "plugin '{}' is not available on this host",
                        tool.tool_type
                    )));
                }
                plugin.validate_config(&tool.config).map_err(|e| {
                    EngineError::InvalidBoard(format!(
                        "tool '{}' has invalid config: {}",
                        tool.id, e
                    ))
                })?;
                let already = {
                    let active = self
                        .active_plugins
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    active.contains(&tool.tool_type)
                };
                if !already {
                    let mut config = plugin.default_config();
                    for (key, value) in &tool.config {
                        config.insert(key.clone(), value.clone());
                    }
                    plugin.initialize(&config).await.map_err(|e| {
                        EngineError::InvalidBoard(format!(
                            "plugin '{}' failed to initialize: {}",
                            tool.tool_type, e
                        ))
                    })?;
                    self.active_plugins
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(tool.tool_type.clone());
                }
            }
        }

        // Construct actors; agents must reference a registered provider.
        let mut agent_actors: Vec<Arc<dyn Actor>> = Vec::new();
        let mut tool_actors: Vec<Arc<dyn Actor>> = Vec::new();
        for (hex_key, entity) in &placements {
            match entity {
                Entity::Agent(agent) => {
                    if !self.providers.contains_key(&agent.provider) {
                        return Err(EngineError::InvalidBoard(format!(
                            "agent '{}' references unknown provider '{}'",
                            agent.id, agent.provider
                        )));
                    }
                    agent_actors
                        .push(AgentActor::new(ctx.clone(), hex_key.clone(), agent.id.clone()));
                }
                Entity::Tool(tool) => {
                    let actor = Arc::new(crate::ainulindale::actor::ToolActor::new(
                        ctx.clone(),
                        hex_key.clone(),
                        tool.id.clone(),
                        tool.tool_type.clone(),
                    ));
                    if let Some(store) = actor.task_store() {
                        self.tasklist_stores
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(store);
                    }
                    tool_actors.push(actor);
                }
            }
        }

        // Agents subscribe before tool actors announce anything. Each
        // actor is tracked as soon as it starts so a failure mid-loop
        // still rolls the earlier ones back.
        for actor in agent_actors.into_iter().chain(tool_actors.into_iter()) {
            actor.start().await?;
            self.actors.write().await.push(actor);
        }

        // Budget wiring: the tracker consumes llm.response; the stop
        // listener answers budget.exceeded.
        {
            let mut subs = self
                .bus_subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subs.push(self.bus.subscribe_all("budget-tracker", self.budget.clone()));
            subs.push(self.bus.subscribe(
                "budget-stop",
                "budget.exceeded",
                Arc::new(BudgetStopListener {
                    runner: Arc::downgrade(self),
                }),
            ));
        }

        self.budget.reset_run();
        self.bus
            .publish(EngineEvent::new(
                self.board_id.clone(),
                None,
                EventPayload::BoardStarted,
            ))
            .await;
        log::info!("runner: board '{}' started", self.board_id);

        // Seeded tasklists announce once the start call has returned, so
        // claims never run inside start().
        let stores: Vec<Arc<TaskStore>> = self
            .tasklist_stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        tokio::spawn(async move {
            for store in stores {
                store.announce().await;
            }
        });

        Ok(())
    }

    /// Signal cancellation, wind down in-flight work, release claims,
    /// dispose plugins, flush saves, and emit `board.stopped`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("runner: stopping board '{}'", self.board_id);
        self.current_cancel().cancel();

        // Give in-flight agent loops a chance to observe the token and
        // release their claims at an await point.
        for _ in 0..500u32 {
            let busy = {
                let actors = self.actors.read().await;
                actors.iter().any(|a| a.state() == ActorState::Busy)
            };
            if !busy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Safety sweep for claims whose owner never got to release.
        let stores: Vec<Arc<TaskStore>> = {
            let mut stores = self
                .tasklist_stores
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            stores.drain(..).collect()
        };
        for store in stores {
            for task in store.list(Some(TaskStatus::Processing)) {
                let _ = store.release(&task.id).await;
            }
        }

        self.rollback().await;

        let saver = self
            .saver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(saver) = saver {
            saver.flush().await;
        }
        let snapshot = {
            let board = self.board.read().await;
            board.snapshot()
        };
        if let Err(e) = self.store.save_board(&snapshot).await {
            log::error!("runner: final board save failed: {}", e);
        }

        self.bus
            .publish(EngineEvent::new(
                self.board_id.clone(),
                None,
                EventPayload::BoardStopped,
            ))
            .await;
        log::info!("runner: board '{}' stopped", self.board_id);
    }

    /// Tear down actors, plugin initializations, and bus subscriptions.
    async fn rollback(&self) {
        self.tasklist_stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let actors: Vec<Arc<dyn Actor>> = {
            let mut actors = self.actors.write().await;
            actors.drain(..).collect()
        };
        for actor in actors.iter().rev() {
            actor.stop().await;
        }
        let plugin_ids: Vec<String> = {
            let mut active = self
                .active_plugins
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            active.drain(..).collect()
        };
        for plugin_id in plugin_ids {
            if let Some(plugin) = self.registry.get(&plugin_id) {
                plugin.dispose().await;
            }
        }
        let subs: Vec<SubscriptionId> = {
            let mut subs = self
                .bus_subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subs.drain(..).collect()
        };
        for id in subs {
            self.bus.unsubscribe(id);
        }
    }

    /// Authoring-path entity mutation: updates the board, schedules the
    /// save, and announces `entity.updated`.
    pub async fn update_entity<F>(&self, entity_id: &str, mutate: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Entity),
    {
        {
            let mut board = self.board.write().await;
            board
                .update_entity(entity_id, mutate)
                .map_err(|e| EngineError::InvalidBoard(e.to_string()))?;
            let hex = board.hex_of_entity(entity_id).map(str::to_string);
            let saver = self
                .saver
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let (Some(hex), Some(saver)) = (hex, saver) {
                if let Some(entity) = board.entity(entity_id) {
                    saver.mark_dirty(&hex, entity.clone());
                }
            }
        }
        self.bus
            .publish(EngineEvent::new(
                self.board_id.clone(),
                None,
                EventPayload::EntityUpdated {
                    entity_id: entity_id.to_string(),
                },
            ))
            .await;
        Ok(())
    }
}

/// Answers `budget.exceeded` by initiating a graceful stop.
struct BudgetStopListener {
    runner: Weak<BoardRunner>,
}

#[async_trait]
impl EventSubscriber for BudgetStopListener {
    async fn on_event(&self, event: &EngineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let EventPayload::BudgetExceeded { dollars, tokens } = &event.payload {
            if let Some(runner) = self.runner.upgrade() {
                log::warn!(
                    "runner: budget exceeded (${:.2}, {} tokens), stopping board",
                    dollars,
                    tokens
                );
                // Cancel immediately so the publishing agent loop observes
                // it at its next checkpoint; the teardown runs detached.
                runner.current_cancel().cancel();
                tokio::spawn(async move { runner.stop().await });
            }
        }
        Ok(())
    }
}
