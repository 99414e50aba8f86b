//! Prompt Composer
//!
//! Builds the per-task context an agent works with: the system prompt
//! (seven sections, in a fixed order) and the user message for a claimed
//! task. Everything is derived from topology — the tool inventory is the
//! set of reachable, RBAC-permitted operations, and the workspace/shell
//! environment is discovered by scanning those same tools.
//!
//! Section order:
//!
//! 1. Environment — identity, date, platform, workspace, shell
//! 2. Tools — reachable permitted operations, grouped by source hex
//! 3. Behavioral Guidelines — fixed baseline
//! 4. Role Guidelines — selected by the agent template
//! 5. Task Completion Protocol — the terminal signal contract
//! 6. Equipped Rulefiles — enabled rulefiles in equip order
//! 7. Custom Instructions — the agent's own prompt, verbatim
//!
//! Tool names follow the `{tool_type}_{operation}` convention; the agent
//! loop resolves them back to `(plugin, operation, source hex)` with
//! [`resolve_tool_name`].

use crate::ainulindale::board::{AgentEntity, AgentTemplate, BoardModel, EntityStatus};
use crate::ainulindale::llm::ToolSchema;
use crate::ainulindale::plugin::{PluginRegistry, ToolDef};
use crate::ainulindale::plugins::tasklist::Task;
use crate::ainulindale::rbac::{Permission, RbacEngine};
use crate::ainulindale::rulefile::Rulefile;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

/// The terminal signal an agent emits to mark a task done.
pub const TASK_COMPLETE_MARKER: &str = "[TASK_COMPLETE]";

/// Whether assistant text carries the task-complete signal.
pub fn contains_completion_signal(text: &str) -> bool {
    text.contains(TASK_COMPLETE_MARKER)
}

lazy_static! {
    static ref BEHAVIORAL_GUIDELINES: &'static str = "\
You are one agent in a swarm sharing a hexagonal board. Work only on the \
task you claimed; do not invent new objectives. Prefer tools over guesses: \
read before you write, verify before you report. Keep tool parameters \
minimal and exact. If a tool call is denied or fails, adapt — denial is \
information about your position on the board, not an error to fight. \
Report results concisely and factually.";
    static ref ROLE_GUIDELINES: HashMap<AgentTemplate, &'static str> = {
        let mut m = HashMap::new();
        m.insert(
            AgentTemplate::Planner,
            "You break objectives into small, independently completable tasks. \
Prefer adding well-scoped tasks to the tasklist over doing the work \
yourself. Each task title must be actionable on its own.",
        );
        m.insert(
            AgentTemplate::Coder,
            "You implement tasks by reading and writing files in the workspace. \
Make the smallest change that completes the task, keep the codebase \
consistent with what you read, and run commands to check your work when a \
shell is reachable.",
        );
        m.insert(
            AgentTemplate::Reviewer,
            "You inspect work produced by other agents. Read the relevant files, \
judge them against the task description, and report concrete findings with \
file references. Do not rewrite code unless the task says to.",
        );
        m.insert(
            AgentTemplate::Researcher,
            "You gather information: search the codebase, read files, and \
summarize what you find with precise references. Your output is knowledge \
for other agents, not changes.",
        );
        m.insert(
            AgentTemplate::Generalist,
            "You handle whatever the claimed task asks for, using any reachable \
tool. Bias toward finishing the task end to end.",
        );
        m
    };
}

/// One reachable tool entity with its RBAC-permitted operations.
#[derive(Clone)]
pub struct ReachableTool {
    pub hex_key: String,
    pub entity_id: String,
    pub tool_type: String,
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Only the operations the requester may actually invoke.
    pub operations: Vec<ToolDef>,
}

impl ReachableTool {
    /// Whether any permitted operation requires the given permission —
    /// i.e. the requester holds it on this tool.
    pub fn permits(&self, permission: Permission) -> bool {
        self.operations.iter().any(|def| def.permission == permission)
    }
}

/// Collect every tool the agent hex can use, with per-operation RBAC
/// filtering applied. Sorted by hex key so the listing is deterministic.
pub fn reachable_tools(
    board: &BoardModel,
    registry: &PluginRegistry,
    agent_hex: &str,
) -> Vec<ReachableTool> {
    let mut out = Vec::new();
    for (hex_key, entity) in board.occupied() {
        let tool = match entity.as_tool() {
            Some(tool) => tool,
            None => continue,
        };
        // Disabled tools are out of service: not listed, not dispatchable.
        if tool.status == EntityStatus::Disabled {
            continue;
        }
        let plugin = match registry.get(&tool.tool_type) {
            Some(plugin) if plugin.is_available() => plugin,
            _ => continue,
        };
        let operations: Vec<ToolDef> = plugin
            .tools()
            .into_iter()
            .filter(|def| {
                RbacEngine::check_permission(board, agent_hex, &tool.id, def.permission).allowed
            })
            .collect();
        if operations.is_empty() {
            continue;
        }
        out.push(ReachableTool {
            hex_key,
            entity_id: tool.id.clone(),
            tool_type: tool.tool_type.clone(),
            config: tool.config.clone(),
            operations,
        });
    }
    out
}

/// Provider-facing schemas for a reachable tool set. Duplicate namespaced
/// names (two tools of the same type) keep the first occurrence.
pub fn tool_schemas(tools: &[ReachableTool]) -> Vec<ToolSchema> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tool in tools {
        for def in &tool.operations {
            let name = format!("{}_{}", tool.tool_type, def.name);
            if seen.insert(name.clone()) {
                out.push(def.to_tool_schema(name));
            }
        }
    }
    out
}

/// Resolve a namespaced tool-call name back to the reachable tool and
/// operation it addresses. First match in hex-key order wins.
pub fn resolve_tool_name<'a>(
    tools: &'a [ReachableTool],
    name: &str,
) -> Option<(&'a ReachableTool, &'a ToolDef)> {
    for tool in tools {
        let prefix = format!("{}_", tool.tool_type);
        if let Some(operation) = name.strip_prefix(&prefix) {
            if let Some(def) = tool.operations.iter().find(|d| d.name == operation) {
                return Some((tool, def));
            }
        }
    }
    None
}

/// Stateless prompt assembly.
pub struct PromptComposer;

impl PromptComposer {
    /// Assemble the seven-section system prompt for one agent.
    pub fn compose_system_prompt(
        agent: &AgentEntity,
        agent_hex: &str,
        board: &BoardModel,
        registry: &PluginRegistry,
        rulefiles: &HashMap<String, Rulefile>,
    ) -> String {
        let tools = reachable_tools(board, registry, agent_hex);
        let mut sections = Vec::new();

        sections.push(Self::environment_section(agent, &tools));
        sections.push(Self::tools_section(&tools));
        sections.push(format!("# Behavioral Guidelines\n{}", *BEHAVIORAL_GUIDELINES));
        sections.push(format!(
            "# Role Guidelines\n{}",
            ROLE_GUIDELINES
                .get(&agent.template)
                .copied()
                .unwrap_or_default()
        ));
        sections.push(Self::completion_section());
        if let Some(rulefile_section) = Self::rulefiles_section(agent, rulefiles) {
            sections.push(rulefile_section);
        }
        if !agent.system_prompt.trim().is_empty() {
            sections.push(format!("# Custom Instructions\n{}", agent.system_prompt));
        }

        sections.join("\n\n")
    }

    /// The user message for a claimed task: title, then description.
    pub fn compose_user_message(task: &Task) -> String {
        match &task.description {
            Some(description) if !description.trim().is_empty() => {
                format!("{}\n\n{}", task.title, description)
            }
            _ => task.title.clone(),
        }
    }

    fn environment_section(agent: &AgentEntity, tools: &[ReachableTool]) -> String {
        // First write-capable filesystem tool defines the workspace; first
        // shell tool defines the shell kind. Both may be absent.
        let workspace = tools
            .iter()
            .find(|t| t.tool_type == "filesystem" && t.permits(Permission::Write))
            .map(|t| {
                t.config
                    .get("root")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("(not configured)")
                    .to_string()
            })
            .unwrap_or_else(|| "(none)".to_string());
        let shell = tools
            .iter()
            .find(|t| t.tool_type == "shell")
            .map(|t| {
                t.config
                    .get("shell")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("sh")
                    .to_string()
            })
            .unwrap_or_else(|| "(none)".to_string());

        format!(
            "# Environment\nAgent ID: {}\nAgent Name: {}\nDate: {}\nPlatform: {}\nWorkspace: {}\nShell: {}",
            agent.id,
            agent.name,
            chrono::Utc::now().format("%Y-%m-%d"),
            std::env::consts::OS,
            workspace,
            shell,
        )
    }

    fn tools_section(tools: &[ReachableTool]) -> String {
        let mut section = String::from("# Tools");
        if tools.is_empty() {
            section.push_str("\nNo tools are reachable from your position.");
            return section;
        }
        for tool in tools {
            section.push_str(&format!("\n## Hex {} — {}", tool.hex_key, tool.tool_type));
            for def in &tool.operations {
                section.push_str(&format!(
                    "\n- {}_{}: {}",
                    tool.tool_type, def.name, def.description
                ));
                for param in &def.parameters {
                    let required = if param.required { ", required" } else { "" };
                    section.push_str(&format!(
                        "\n    - {} ({:?}{}): {}",
                        param.name,
                        param.param_type,
                        required,
                        param.description.as_deref().unwrap_or("no description"),
                    ));
                }
            }
        }
        section
    }

    fn completion_section() -> String {
        format!(
            "# Task Completion Protocol\nWhen the claimed task is fully done, end your final \
message with a line containing {}. Until that marker appears you will keep \
being asked to continue. If the task cannot be completed, say why instead \
of emitting the marker — the orchestrator will record the failure.",
            TASK_COMPLETE_MARKER
        )
    }

    fn rulefiles_section(
        agent: &AgentEntity,
        rulefiles: &HashMap<String, Rulefile>,
    ) -> Option<String> {
        let mut bodies = Vec::new();
        for equipped in &agent.equipped_rulefiles {
            if !equipped.enabled {
                continue;
            }
            match rulefiles.get(&equipped.rulefile_id) {
                Some(rulefile) => {
                    bodies.push(format!(
                        "## {}\n{}",
                        rulefile.name,
                        rulefile.render(&equipped.overrides)
                    ));
                }
                None => {
                    log::warn!(
                        "prompt: agent {} equips unknown rulefile '{}'",
                        agent.id,
                        equipped.rulefile_id
                    );
                }
            }
        }
        if bodies.is_empty() {
            None
        } else {
            Some(format!("# Equipped Rulefiles\n{}", bodies.join("\n\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ainulindale::board::{Entity, ToolEntity};
    use crate::ainulindale::plugins::{FilesystemPlugin, ShellPlugin, TasklistPlugin};
    use crate::ainulindale::rbac::{RbacConfig, ZoneConfig};
    use crate::ainulindale::rulefile::{EquippedRulefile, Rule, Rulefile};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> PluginRegistry {
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(FilesystemPlugin::new("/tmp")))
            .unwrap();
        registry.register(Arc::new(ShellPlugin::new())).unwrap();
        registry.register(Arc::new(TasklistPlugin::new())).unwrap();
        registry
    }

    fn agent() -> AgentEntity {
        AgentEntity::new("agent-1", "Worker").with_template(AgentTemplate::Coder)
    }

    fn fs_tool(id: &str, root: &str) -> ToolEntity {
        ToolEntity::new(id, id, "filesystem")
            .with_range(1)
            .with_config("root", json!(root))
            .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_write_all()))
    }

    #[test]
    fn test_sections_appear_in_order() {
        let mut board = BoardModel::new("b", "B", 2);
        board
            .place_entity("0,0", Entity::Agent(agent().with_system_prompt("Be brief.")))
            .unwrap();
        board
            .place_entity("1,0", Entity::Tool(fs_tool("fs", "/ws")))
            .unwrap();

        let mut rulefiles = HashMap::new();
        rulefiles.insert(
            "style".to_string(),
            Rulefile::new("style", "Style").with_rule(Rule::new("r1", "R1", "Use tabs.", 1)),
        );
        let mut agent = agent().with_system_prompt("Be brief.");
        agent.equipped_rulefiles.push(EquippedRulefile::new("style"));

        let prompt = PromptComposer::compose_system_prompt(
            &agent,
            "0,0",
            &board,
            &registry(),
            &rulefiles,
        );

        let order = [
            "# Environment",
            "# Tools",
            "# Behavioral Guidelines",
            "# Role Guidelines",
            "# Task Completion Protocol",
            "# Equipped Rulefiles",
            "# Custom Instructions",
        ];
        let mut last = 0;
        for header in order.iter() {
            let at = prompt.find(header).unwrap_or_else(|| {
                panic!("missing section {} in:\n{}", header, prompt)
            });
            assert!(at >= last, "section {} out of order", header);
            last = at;
        }
        assert!(prompt.contains("Be brief."));
        assert!(prompt.contains("Use tabs."));
        assert!(prompt.contains(TASK_COMPLETE_MARKER));
    }

    #[test]
    fn test_workspace_picks_first_write_capable_filesystem() {
        let mut board = BoardModel::new("b", "B", 2);
        board.place_entity("0,0", Entity::Agent(agent())).unwrap();
        // Read-only filesystem at a lower hex key than the writable one.
        let read_only = ToolEntity::new("fs-ro", "fs-ro", "filesystem")
            .with_range(1)
            .with_config("root", json!("/read-only"))
            .with_rbac(RbacConfig::enabled().with_default_permissions([Permission::Read]));
        board.place_entity("-1,0", Entity::Tool(read_only)).unwrap();
        board
            .place_entity("1,0", Entity::Tool(fs_tool("fs-rw", "/writable")))
            .unwrap();

        let prompt = PromptComposer::compose_system_prompt(
            &agent(),
            "0,0",
            &board,
            &registry(),
            &HashMap::new(),
        );
        assert!(prompt.contains("Workspace: /writable"));
    }

    #[test]
    fn test_missing_workspace_and_shell_render_as_none() {
        let mut board = BoardModel::new("b", "B", 2);
        board.place_entity("0,0", Entity::Agent(agent())).unwrap();
        let prompt = PromptComposer::compose_system_prompt(
            &agent(),
            "0,0",
            &board,
            &registry(),
            &HashMap::new(),
        );
        assert!(prompt.contains("Workspace: (none)"));
        assert!(prompt.contains("Shell: (none)"));
        assert!(prompt.contains("No tools are reachable"));
    }

    #[test]
    fn test_denied_operations_are_not_listed() {
        let mut board = BoardModel::new("b", "B", 2);
        board.place_entity("0,0", Entity::Agent(agent())).unwrap();
        // Read-only: write_file must not appear in the prompt.
        let read_only = ToolEntity::new("fs", "fs", "filesystem")
            .with_range(1)
            .with_rbac(RbacConfig::enabled().with_default_permissions([Permission::Read]));
        board.place_entity("1,0", Entity::Tool(read_only)).unwrap();

        let prompt = PromptComposer::compose_system_prompt(
            &agent(),
            "0,0",
            &board,
            &registry(),
            &HashMap::new(),
        );
        assert!(prompt.contains("filesystem_read_file"));
        assert!(!prompt.contains("filesystem_write_file"));
    }

    #[test]
    fn test_disabled_tools_are_not_listed() {
        let mut board = BoardModel::new("b", "B", 2);
        board.place_entity("0,0", Entity::Agent(agent())).unwrap();
        let mut tool = fs_tool("fs", "/ws");
        tool.status = EntityStatus::Disabled;
        board.place_entity("1,0", Entity::Tool(tool)).unwrap();

        let registry = registry();
        assert!(reachable_tools(&board, &registry, "0,0").is_empty());
        let prompt = PromptComposer::compose_system_prompt(
            &agent(),
            "0,0",
            &board,
            &registry,
            &HashMap::new(),
        );
        assert!(prompt.contains("No tools are reachable"));
    }

    #[test]
    fn test_resolve_tool_name_round_trip() {
        let mut board = BoardModel::new("b", "B", 2);
        board.place_entity("0,0", Entity::Agent(agent())).unwrap();
        board
            .place_entity("1,0", Entity::Tool(fs_tool("fs", "/ws")))
            .unwrap();
        let registry = registry();
        let tools = reachable_tools(&board, &registry, "0,0");

        let (tool, def) = resolve_tool_name(&tools, "filesystem_read_file").unwrap();
        assert_eq!(tool.entity_id, "fs");
        assert_eq!(def.name, "read_file");
        assert!(resolve_tool_name(&tools, "filesystem_nope").is_none());
        assert!(resolve_tool_name(&tools, "shell_run_command").is_none());

        let schemas = tool_schemas(&tools);
        assert!(schemas.iter().any(|s| s.name == "filesystem_read_file"));
    }

    #[test]
    fn test_user_message_includes_description() {
        use crate::ainulindale::plugins::tasklist::{TaskPriority, TaskStatus};
        let task = Task {
            id: "t1".to_string(),
            title: "Fix the build".to_string(),
            description: Some("The CI job fails on step 3.".to_string()),
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };
        let message = PromptComposer::compose_user_message(&task);
        assert_eq!(message, "Fix the build\n\nThe CI job fails on step 3.");

        let bare = Task {
            description: None,
            ..task
        };
        assert_eq!(PromptComposer::compose_user_message(&bare), "Fix the build");
    }
}
