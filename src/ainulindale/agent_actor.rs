//! Agent Actor
//!
//! One agent actor runs per agent entity on the board. It listens for
//! `tasks.available` from tasklists it can reach under RBAC, claims one
//! task at a time, and works it through a bounded tool-call loop:
//!
//! 1. Build the context bundle (system prompt, user message, tool schemas).
//! 2. Ask the LLM; retry retryable provider failures with backoff.
//! 3. Dispatch each requested tool call through the RBAC check; denials
//!    and failures are injected back into the conversation as tool-result
//!    data, never surfaced as engine errors.
//! 4. Stop when the LLM emits no tool calls, signals task completion, or
//!    the step cap is reached; then complete or fail the task.
//!
//! Every await point observes the board cancellation token: on cancel the
//! claimed task is released back to `pending` and the loop exits without
//! completing or failing it. Failing a task takes the actor's `error`
//! edge: the agent parks in the error state and claims nothing further
//! until the board is stopped and restarted.

use crate::ainulindale::actor::{Actor, ActorState, RuntimeContext, Severity};
use crate::ainulindale::board::Entity;
use crate::ainulindale::error::EngineError;
use crate::ainulindale::event_bus::{
    EngineEvent, EventPayload, EventSubscriber, SubscriptionId,
};
use crate::ainulindale::llm::{
    chat_with_retry, ChatMessage, ChatRequest, LLMProvider, ToolCallRequest,
};
use crate::ainulindale::plugin::{ExecutionContext, ToolError};
use crate::ainulindale::plugins::tasklist::{Task, TaskStore};
use crate::ainulindale::prompt::{
    contains_completion_signal, reachable_tools, resolve_tool_name, tool_schemas,
    PromptComposer, ReachableTool,
};
use crate::ainulindale::rbac::{Permission, RbacEngine};
use crate::ainulindale::work_queue::WorkItem;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::sync::{Arc, Mutex, Weak};

/// How one worked task ended, deciding the actor's next state.
#[derive(Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Actor driving one agent entity's LLM loop.
pub struct AgentActor {
    ctx: RuntimeContext,
    hex_key: String,
    entity_id: String,
    state: Mutex<ActorState>,
    subscription: Mutex<Option<SubscriptionId>>,
    self_ref: Weak<AgentActor>,
}

impl AgentActor {
    pub fn new(
        ctx: RuntimeContext,
        hex_key: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Arc<Self> {
        let hex_key = hex_key.into();
        let entity_id = entity_id.into();
        Arc::new_cyclic(|self_ref| Self {
            ctx,
            hex_key,
            entity_id,
            state: Mutex::new(ActorState::Idle),
            subscription: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    fn set_state(&self, state: ActorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// `active → busy`, refusing re-entrant work.
    fn try_begin_work(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != ActorState::Active {
            return false;
        }
        *state = ActorState::Busy;
        true
    }

    /// React to a `tasks.available` announcement: decide inline whether
    /// this agent is eligible (reachable tasklist, not busy), then spawn
    /// the claim-and-work loop so bus dispatch is never blocked on it.
    async fn handle_tasks_available(&self, source_hex: &str) {
        let ctx = &self.ctx;
        if ctx.cancel.is_cancelled() {
            return;
        }

        // Only react to tasklists this agent may execute against.
        let tasklist_id = {
            let board = ctx.board.read().await;
            match board.entity_by_hex(source_hex).and_then(Entity::as_tool) {
                Some(tool) if tool.tool_type == "tasklist" => tool.id.clone(),
                _ => return,
            }
        };
        let decision = {
            let board = ctx.board.read().await;
            RbacEngine::check_permission(&board, &self.hex_key, &tasklist_id, Permission::Execute)
        };
        if !decision.allowed {
            log::debug!(
                "agent {}: ignoring tasks at {} ({})",
                self.entity_id,
                source_hex,
                decision.reason
            );
            return;
        }

        // The busy guard flips before dispatch returns, so a burst of
        // announcements cannot start the loop twice.
        if !self.try_begin_work() {
            return;
        }
        let this = match self.self_ref.upgrade() {
            Some(this) => this,
            None => return,
        };
        let source_hex = source_hex.to_string();
        tokio::spawn(async move {
            this.run_claimed_work(source_hex).await;
        });
    }

    /// One claim attempt against the announcing tasklist, then the full
    /// task loop if the claim won. Runs detached from bus dispatch.
    async fn run_claimed_work(self: Arc<Self>, source_hex: String) {
        let ctx = &self.ctx;
        ctx.sync_status(&self.hex_key, &self.entity_id, ActorState::Busy)
            .await;

        let store = ctx
            .tasklists
            .store_for(&ctx.board_id, &source_hex, ctx.bus.clone());
        let outcome = match store.claim(&self.entity_id).await {
            Some(task) => {
                log::info!(
                    "agent {}: claimed task '{}' from {}",
                    self.entity_id,
                    task.title,
                    source_hex
                );
                Some(self.work_task(&source_hex, &store, task).await)
            }
            // Another agent won the race within this tick.
            None => None,
        };

        // `busy → active` normally; a task failure takes the `error`
        // edge instead. stop() may have forced idle already.
        let next = match outcome {
            Some(TaskOutcome::Failed) => ActorState::Error,
            _ => ActorState::Active,
        };
        let moved = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == ActorState::Busy {
                *state = next;
                true
            } else {
                false
            }
        };
        if moved {
            if next == ActorState::Error {
                log::warn!(
                    "agent {}: parked in error after task failure",
                    self.entity_id
                );
            }
            ctx.sync_status(&self.hex_key, &self.entity_id, next).await;
        }

        if outcome == Some(TaskOutcome::Completed)
            && !ctx.cancel.is_cancelled()
            && store.pending_count() > 0
        {
            // Let the next pending task find an idle agent.
            store.announce().await;
        }
    }

    /// The claim-to-complete loop for one task.
    async fn work_task(
        &self,
        source_hex: &str,
        store: &Arc<TaskStore>,
        task: Task,
    ) -> TaskOutcome {
        let ctx = &self.ctx;
        let item = ctx.work_queue.create(
            &ctx.board_id,
            source_hex,
            &self.hex_key,
            json!({ "taskId": task.id, "title": task.title }),
        );
        let _ = ctx.work_queue.enqueue(&self.hex_key, &item.id);
        let _ = ctx.work_queue.claim(&item.id, &self.entity_id);
        let _ = ctx.work_queue.start_processing(&item.id);
        ctx.emit(
            &self.hex_key,
            EventPayload::WorkReceived {
                work_id: item.id.clone(),
            },
        )
        .await;
        ctx.emit(
            &self.hex_key,
            EventPayload::HexProgress {
                message: format!("Working on '{}'", task.title),
            },
        )
        .await;

        // Context bundle: prompt, permitted tools, schemas.
        let bundle = {
            let board = ctx.board.read().await;
            let agent = board
                .entity(&self.entity_id)
                .and_then(Entity::as_agent)
                .cloned();
            agent.map(|agent| {
                let system_prompt = PromptComposer::compose_system_prompt(
                    &agent,
                    &self.hex_key,
                    &board,
                    &ctx.registry,
                    &ctx.rulefiles,
                );
                let tools = reachable_tools(&board, &ctx.registry, &self.hex_key);
                let schemas = tool_schemas(&tools);
                (agent, system_prompt, tools, schemas)
            })
        };
        let (agent, system_prompt, tools, schemas) = match bundle {
            Some(bundle) => bundle,
            None => {
                self.fail_task(store, &task, &item, "Agent entity vanished from the board")
                    .await;
                return TaskOutcome::Failed;
            }
        };
        let provider: Arc<dyn LLMProvider> = match ctx.providers.get(&agent.provider) {
            Some(provider) => provider.clone(),
            None => {
                self.fail_task(
                    store,
                    &task,
                    &item,
                    format!("No provider named '{}' is registered", agent.provider),
                )
                .await;
                return TaskOutcome::Failed;
            }
        };

        let mut messages = vec![ChatMessage::User {
            content: PromptComposer::compose_user_message(&task),
        }];
        let mut total_tokens = 0u64;
        let mut total_dollars = 0f64;

        for step in 1..=ctx.config.max_tool_steps {
            if ctx.cancel.is_cancelled() {
                self.release_task(store, &task, &item).await;
                return TaskOutcome::Cancelled;
            }

            ctx.emit(
                &self.hex_key,
                EventPayload::LlmRequest {
                    agent_id: self.entity_id.clone(),
                    model: agent.model.clone(),
                    iteration: step,
                },
            )
            .await;

            let request = ChatRequest {
                model: agent.model.clone(),
                system: system_prompt.clone(),
                messages: messages.clone(),
                tools: schemas.clone(),
                temperature: agent.temperature,
                max_tokens: None,
                timeout: ctx.config.llm_timeout,
            };
            let response = tokio::select! {
                response = chat_with_retry(
                    provider.as_ref(),
                    &request,
                    ctx.config.llm_retry_attempts,
                    ctx.config.llm_retry_backoff,
                ) => response,
                _ = ctx.cancel.cancelled() => {
                    self.release_task(store, &task, &item).await;
                    return TaskOutcome::Cancelled;
                }
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    ctx.notify(
                        Severity::Error,
                        Some(self.hex_key.clone()),
                        format!("Agent '{}' failed task '{}': {}", agent.name, task.title, e),
                    );
                    self.fail_task(store, &task, &item, e.to_string()).await;
                    return TaskOutcome::Failed;
                }
            };

            total_tokens += response.usage.total_tokens;
            total_dollars += response.cost;
            ctx.emit(
                &self.hex_key,
                EventPayload::LlmResponse {
                    agent_id: self.entity_id.clone(),
                    usage: response.usage,
                    cost: response.cost,
                },
            )
            .await;

            let text = response.text.clone().unwrap_or_default();
            messages.push(ChatMessage::Assistant {
                content: response.text.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            if response.tool_calls.is_empty() || contains_completion_signal(&text) {
                let _ = store.complete(&task.id, text.clone()).await;
                let _ = ctx.work_queue.complete(&item.id, json!({ "result": text }));
                ctx.emit(
                    &self.hex_key,
                    EventPayload::WorkCompleted {
                        work_id: item.id.clone(),
                        success: true,
                    },
                )
                .await;
                self.record_metrics(total_tokens, total_dollars).await;
                return TaskOutcome::Completed;
            }

            for call in &response.tool_calls {
                if ctx.cancel.is_cancelled() {
                    self.release_task(store, &task, &item).await;
                    return TaskOutcome::Cancelled;
                }
                let content = self.dispatch_tool_call(&tools, call).await;
                messages.push(ChatMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content,
                });
            }
        }

        ctx.notify(
            Severity::Warning,
            Some(self.hex_key.clone()),
            format!(
                "Agent '{}' hit the {}-step tool cap on task '{}'",
                agent.name, ctx.config.max_tool_steps, task.title
            ),
        );
        self.fail_task(
            store,
            &task,
            &item,
            format!(
                "Tool loop reached the {}-step cap without completing",
                ctx.config.max_tool_steps
            ),
        )
        .await;
        TaskOutcome::Failed
    }

    /// Resolve, authorize, execute, and truncate one tool call. The
    /// returned string becomes the tool-result message — errors included,
    /// so the LLM can adapt.
    async fn dispatch_tool_call(&self, tools: &[ReachableTool], call: &ToolCallRequest) -> String {
        let ctx = &self.ctx;
        let (tool, def) = match resolve_tool_name(tools, &call.name) {
            Some(resolved) => resolved,
            None => {
                return error_payload(
                    "tool.not_found",
                    format!("No reachable tool matches '{}'", call.name),
                )
            }
        };

        let decision = {
            let board = ctx.board.read().await;
            RbacEngine::check_permission(&board, &self.hex_key, &tool.entity_id, def.permission)
        };
        if !decision.allowed {
            log::info!(
                "agent {}: '{}' denied by RBAC ({})",
                self.entity_id,
                call.name,
                decision.reason
            );
            return error_payload("tool.permission_denied", decision.reason);
        }

        // Merged config: tool-entity config under the call arguments;
        // call arguments win.
        let mut merged = tool.config.clone();
        if let Some(args) = call.arguments.as_object() {
            for (key, value) in args {
                merged.insert(key.clone(), value.clone());
            }
        }

        ctx.emit(
            &self.hex_key,
            EventPayload::WorkFlowing {
                from_hex: self.hex_key.clone(),
                to_hex: tool.hex_key.clone(),
                tool_name: call.name.clone(),
            },
        )
        .await;

        let exec_ctx = ExecutionContext {
            board_id: ctx.board_id.clone(),
            hex_key: tool.hex_key.clone(),
            entity_id: tool.entity_id.clone(),
            agent_id: Some(self.entity_id.clone()),
            bus: ctx.bus.clone(),
        };
        let outcome = match tokio::time::timeout(
            ctx.config.tool_timeout,
            ctx.registry
                .execute_tool(&tool.tool_type, &def.name, JsonValue::Object(merged), &exec_ctx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout(format!(
                "'{}' exceeded {:?}",
                call.name, ctx.config.tool_timeout
            ))),
        };

        match outcome {
            Ok(result) if result.success => {
                let raw = serde_json::to_string_pretty(&result.output)
                    .unwrap_or_else(|_| result.output.to_string());
                crate::ainulindale::truncation::process_tool_output(
                    &ctx.outputs,
                    &tool.tool_type,
                    &raw,
                )
                .llm_text()
            }
            Ok(result) => error_payload(
                "tool.execution_failed",
                result
                    .error
                    .unwrap_or_else(|| "Tool reported failure".to_string()),
            ),
            Err(e) => error_payload(e.kind(), e.to_string()),
        }
    }

    /// Cancellation path: the claim goes back to `pending`, the work item
    /// fails, and neither `complete` nor `fail` touches the task.
    async fn release_task(&self, store: &Arc<TaskStore>, task: &Task, item: &WorkItem) {
        log::info!(
            "agent {}: cancelled, releasing task '{}'",
            self.entity_id,
            task.title
        );
        let _ = store.release(&task.id).await;
        let _ = self.ctx.work_queue.fail(&item.id, "cancelled");
    }

    async fn fail_task(
        &self,
        store: &Arc<TaskStore>,
        task: &Task,
        item: &WorkItem,
        error: impl Into<String>,
    ) {
        let error = error.into();
        let _ = store.fail(&task.id, error.clone()).await;
        let _ = self.ctx.work_queue.fail(&item.id, error);
        self.ctx
            .emit(
                &self.hex_key,
                EventPayload::WorkCompleted {
                    work_id: item.id.clone(),
                    success: false,
                },
            )
            .await;
    }

    async fn record_metrics(&self, tokens: u64, dollars: f64) {
        let mut board = self.ctx.board.write().await;
        let updated = board.update_entity(&self.entity_id, |entity| {
            if let Entity::Agent(agent) = entity {
                let metrics = agent.metrics.get_or_insert_with(Default::default);
                metrics.tasks_completed += 1;
                metrics.tokens_used += tokens;
                metrics.dollars_spent += dollars;
            }
        });
        if updated.is_ok() {
            if let Some(entity) = board.entity(&self.entity_id) {
                self.ctx.saver.mark_dirty(&self.hex_key, entity.clone());
            }
        }
    }
}

fn error_payload(kind: &str, message: impl Into<String>) -> String {
    json!({ "error": message.into(), "kind": kind }).to_string()
}

#[async_trait]
impl EventSubscriber for AgentActor {
    async fn on_event(&self, event: &EngineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let EventPayload::TasksAvailable { .. } = event.payload {
            if let Some(source_hex) = event.hex_id.clone() {
                // One claim attempt per announcement; the busy guard drops
                // announcements that arrive mid-task.
                self.handle_tasks_available(&source_hex).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for AgentActor {
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
        let handler = self.self_ref.upgrade().ok_or_else(|| {
            EngineError::InvalidBoard(format!("agent actor {} was dropped", self.entity_id))
        })?;
        let id = self.ctx.bus.subscribe(
            format!("agent:{}", self.entity_id),
            "tasks.available",
            handler,
        );
        *self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(id);
        self.set_state(ActorState::Active);
        self.ctx
            .sync_status(&self.hex_key, &self.entity_id, ActorState::Active)
            .await;
        log::debug!(
            "actor: agent '{}' active at {}",
            self.entity_id,
            self.hex_key
        );
        Ok(())
    }

    async fn stop(&self) {
        if let Some(id) = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.ctx.bus.unsubscribe(id);
        }
        if self.state() == ActorState::Idle {
            return;
        }
        self.set_state(ActorState::Idle);
        self.ctx
            .sync_status(&self.hex_key, &self.entity_id, ActorState::Idle)
            .await;
    }
}
