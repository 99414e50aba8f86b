//! Tool Plugin Abstraction Layer
//!
//! Tools on the board are backed by self-describing plugins. A plugin
//! declares its identity, its config schema, and its operations — each
//! with a typed parameter list, a derived JSON Schema, and the RBAC
//! permission the operation requires. The [`PluginRegistry`] aggregates
//! plugins, filters them by availability, and routes execution.
//!
//! # Key Components
//!
//! - **[`ToolPlugin`] trait**: how tools are described, validated, and executed
//! - **[`PluginRegistry`]**: registration (duplicate ids rejected) and dispatch
//! - **[`ToolDef`] / [`ToolParameter`]**: operation metadata; the JSON Schema
//!   is derived from the typed parameter list, not reflected at run time
//! - **[`ToolResult`]**: structured execution results
//! - **[`ExecutionContext`]**: per-call identity plus an event-bus handle
//!
//! Dispatch failures are data, not panics: every error is a [`ToolError`]
//! whose [`kind`](ToolError::kind) matches the engine's error taxonomy, and
//! the agent loop feeds it back to the LLM as a tool-result message.

use crate::ainulindale::event_bus::{EngineEvent, EventBus, EventPayload};
use crate::ainulindale::llm::ToolSchema;
use crate::ainulindale::rbac::Permission;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Structured result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution metadata (timing, truncation, handles).
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl ToolResult {
    /// Convenience constructor for successful execution.
    pub fn success(output: JsonValue) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for failed execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: JsonValue::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Type tag of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn json_tag(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// One parameter of a tool operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    /// Item type for array parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ToolParameterType>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            items: None,
        }
    }

    /// Add a description surfaced in generated schemas and prompts.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Provide a default used when the LLM omits the parameter.
    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Declare the item type of an array parameter.
    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(item_type);
        self
    }
}

/// One operation a plugin exposes, with its permission requirement.
#[derive(Debug, Clone)]
pub struct ToolDef {
    /// Operation name (e.g. `"read_file"`); exposed to the LLM as
    /// `{tool_type}_{operation}`.
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// The RBAC permission the requester must hold on the tool's hex.
    pub permission: Permission,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        permission: Permission,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            permission,
        }
    }

    /// Append a parameter definition.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// The JSON Schema object for this operation's parameters, derived
    /// from the typed parameter list.
    pub fn parameters_schema(&self) -> JsonValue {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_string(), json!(param.param_type.json_tag()));
            if let Some(description) = &param.description {
                prop.insert("description".to_string(), json!(description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".to_string(), default.clone());
            }
            if let Some(items) = &param.items {
                prop.insert("items".to_string(), json!({ "type": items.json_tag() }));
            }
            properties.insert(param.name.clone(), JsonValue::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Package this operation as a provider-facing tool schema under the
    /// given namespaced name.
    pub fn to_tool_schema(&self, namespaced_name: impl Into<String>) -> ToolSchema {
        ToolSchema {
            name: namespaced_name.into(),
            description: self.description.clone(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Per-call identity handed to plugin executions.
#[derive(Clone)]
pub struct ExecutionContext {
    pub board_id: String,
    /// Hex of the tool entity being invoked.
    pub hex_key: String,
    /// Id of the tool entity being invoked.
    pub entity_id: String,
    /// Id of the invoking agent, when the call came from an agent loop.
    pub agent_id: Option<String>,
    pub bus: Arc<EventBus>,
}

impl ExecutionContext {
    /// Publish an event attributed to this tool's hex.
    pub async fn emit(&self, payload: EventPayload) {
        self.bus
            .publish(EngineEvent::new(
                self.board_id.clone(),
                Some(self.hex_key.clone()),
                payload,
            ))
            .await;
    }
}

/// Dispatch and execution failures, classified for the error taxonomy.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No plugin/operation matches, or the plugin is unavailable.
    NotFound(String),
    /// The RBAC check denied the call.
    PermissionDenied(String),
    /// Parameter validation failed.
    InvalidParams(String),
    /// The per-call deadline elapsed.
    Timeout(String),
    /// The plugin ran and reported a failure.
    ExecutionFailed(String),
}

impl ToolError {
    /// The dotted kind string from the engine error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool.not_found",
            ToolError::PermissionDenied(_) => "tool.permission_denied",
            ToolError::InvalidParams(_) => "tool.invalid_params",
            ToolError::Timeout(_) => "tool.timeout",
            ToolError::ExecutionFailed(_) => "tool.execution_failed",
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(msg) => write!(f, "Tool not found: {}", msg),
            ToolError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ToolError::InvalidParams(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::Timeout(msg) => write!(f, "Tool timed out: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Self-describing tool plugin.
///
/// Most hooks have defaults; a minimal plugin supplies identity, its
/// [`ToolDef`]s, and `execute`. Per-hex state (e.g. a tasklist's store) is
/// keyed by the [`ExecutionContext::hex_key`].
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    /// Stable plugin id, matched against `ToolEntity::tool_type`.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> &str {
        "general"
    }

    /// Icon hint for board authoring surfaces.
    fn icon(&self) -> &str {
        "tool"
    }

    /// JSON Schema of the per-entity configuration.
    fn config_schema(&self) -> JsonValue {
        json!({ "type": "object", "properties": {} })
    }

    /// Defaults merged under per-entity configuration.
    fn default_config(&self) -> serde_json::Map<String, JsonValue> {
        serde_json::Map::new()
    }

    /// Validate a per-entity configuration map.
    fn validate_config(&self, _config: &serde_json::Map<String, JsonValue>) -> Result<(), ToolError> {
        Ok(())
    }

    /// The operations this plugin exposes.
    fn tools(&self) -> Vec<ToolDef>;

    /// Whether the plugin can run in this process (binaries present,
    /// platform supported, ...). Unavailable plugins are hidden from
    /// authoring surfaces and refuse dispatch.
    fn is_available(&self) -> bool {
        true
    }

    /// One-time setup at board start.
    async fn initialize(
        &self,
        _config: &serde_json::Map<String, JsonValue>,
    ) -> Result<(), ToolError> {
        Ok(())
    }

    /// Teardown at board stop.
    async fn dispose(&self) {}

    /// Liveness probe for long-running backends.
    async fn health_check(&self) -> bool {
        true
    }

    /// Execute one operation.
    async fn execute(
        &self,
        tool_name: &str,
        params: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError>;
}

/// Registration failures.
#[derive(Debug, Clone)]
pub enum RegistryError {
    DuplicateId(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateId(id) => write!(f, "Plugin id already registered: {}", id),
        }
    }
}

impl Error for RegistryError {}

/// Registry of tool plugins, effectively immutable once the board starts.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn ToolPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Duplicate ids are rejected.
    pub fn register(&self, plugin: Arc<dyn ToolPlugin>) -> Result<(), RegistryError> {
        let id = plugin.id().to_string();
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        if plugins.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        log::debug!("registry: plugin '{}' registered", id);
        plugins.insert(id, plugin);
        Ok(())
    }

    /// Look up a plugin by id, available or not.
    pub fn get(&self, plugin_id: &str) -> Option<Arc<dyn ToolPlugin>> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.get(plugin_id).cloned()
    }

    /// The plugins whose `is_available()` is true, sorted by id. These are
    /// the templates board authoring offers.
    pub fn available_plugins(&self) -> Vec<Arc<dyn ToolPlugin>> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Arc<dyn ToolPlugin>> = plugins
            .values()
            .filter(|p| p.is_available())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// The permission an operation requires, if the plugin defines it.
    pub fn permission_for(&self, plugin_id: &str, operation: &str) -> Option<Permission> {
        self.get(plugin_id)?
            .tools()
            .iter()
            .find(|def| def.name == operation)
            .map(|def| def.permission)
    }

    /// Dispatch one tool call.
    ///
    /// Unknown or unavailable plugins and unknown operations produce a
    /// structured [`ToolError`], never a panic. Required parameters
    /// without defaults are checked here so plugins can assume presence.
    pub async fn execute_tool(
        &self,
        plugin_id: &str,
        tool_name: &str,
        params: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let plugin = self
            .get(plugin_id)
            .ok_or_else(|| ToolError::NotFound(format!("Unknown plugin: {}", plugin_id)))?;
        if !plugin.is_available() {
            return Err(ToolError::NotFound(format!(
                "Plugin '{}' is not available on this host",
                plugin_id
            )));
        }
        let def = plugin
            .tools()
            .into_iter()
            .find(|def| def.name == tool_name)
            .ok_or_else(|| {
                ToolError::NotFound(format!(
                    "Plugin '{}' has no operation '{}'",
                    plugin_id, tool_name
                ))
            })?;

        let mut params = match params {
            JsonValue::Object(map) => map,
            JsonValue::Null => serde_json::Map::new(),
            other => {
                return Err(ToolError::InvalidParams(format!(
                    "Parameters must be a JSON object, got {}",
                    other
                )))
            }
        };
        for param in &def.parameters {
            if !params.contains_key(&param.name) {
                if let Some(default) = &param.default {
                    params.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(ToolError::InvalidParams(format!(
                        "Missing required parameter '{}'",
                        param.name
                    )));
                }
            }
        }

        plugin
            .execute(tool_name, JsonValue::Object(params), ctx)
            .await
    }
}
