//! Board Model
//!
//! The board is a pre-generated hexagonal grid of radius `R` plus the
//! entities placed on it. Placement is the whole programming model:
//! which agent may use which tool, and how, is derived from where the
//! pieces sit (see [`crate::rbac`]) — connections exist for the author's
//! intent visualization and are never consulted for routing.
//!
//! The model owns the occupancy invariants: every hex holds at most one
//! entity and every entity occupies at most one hex. On every mutation it
//! recomputes the projected hourly cost (the sum of entity `cost` fields)
//! and notifies registered observers.
//!
//! # Example
//!
//! ```rust
//! use ainulindale::board::{AgentEntity, BoardModel, Entity};
//!
//! let mut board = BoardModel::new("board-1", "Demo", 3);
//! let agent = AgentEntity::new("planner-1", "Planner");
//! board.place_entity("0,0", Entity::Agent(agent)).unwrap();
//! assert!(board.entity_by_hex("0,0").is_some());
//! assert_eq!(board.hex_of_entity("planner-1"), Some("0,0"));
//! ```

use crate::ainulindale::hex::{coords_in_radius, AxialCoord};
use crate::ainulindale::rbac::RbacConfig;
use crate::ainulindale::rulefile::EquippedRulefile;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Errors produced by board mutations and validation.
#[derive(Debug, Clone)]
pub enum BoardError {
    /// The hex key does not exist on this board.
    UnknownHex(String),
    /// The hex already holds an entity.
    HexOccupied(String),
    /// An entity with this id is already placed.
    DuplicateEntity(String),
    /// No entity with this id is on the board.
    UnknownEntity(String),
    /// No connection with this id exists.
    UnknownConnection(String),
    /// The entity's configuration violates a board invariant.
    InvalidEntity(String),
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::UnknownHex(key) => write!(f, "Unknown hex: {}", key),
            BoardError::HexOccupied(key) => write!(f, "Hex already occupied: {}", key),
            BoardError::DuplicateEntity(id) => write!(f, "Entity already placed: {}", id),
            BoardError::UnknownEntity(id) => write!(f, "Unknown entity: {}", id),
            BoardError::UnknownConnection(id) => write!(f, "Unknown connection: {}", id),
            BoardError::InvalidEntity(msg) => write!(f, "Invalid entity: {}", msg),
        }
    }
}

impl Error for BoardError {}

/// Lifecycle status surfaced on every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Idle,
    Active,
    Busy,
    Warning,
    Error,
    Disabled,
}

/// Role template selecting an agent's role guidelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTemplate {
    Planner,
    Coder,
    Reviewer,
    Researcher,
    Generalist,
}

/// Optional usage counters attached to an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetrics {
    pub tasks_completed: u64,
    pub tokens_used: u64,
    pub dollars_spent: f64,
}

/// An LLM-backed agent placed on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntity {
    pub id: String,
    pub name: String,
    pub status: EntityStatus,
    /// Projected hourly cost contribution.
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EntityMetrics>,
    pub template: AgentTemplate,
    /// Name of the injected LLM provider to use.
    pub provider: String,
    pub model: String,
    /// Custom addition appended verbatim as the last prompt section.
    #[serde(default)]
    pub system_prompt: String,
    pub temperature: f32,
    #[serde(default)]
    pub equipped_rulefiles: Vec<EquippedRulefile>,
}

impl AgentEntity {
    /// Create a generalist agent with neutral defaults.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: EntityStatus::Idle,
            cost: 0.0,
            metrics: None,
            template: AgentTemplate::Generalist,
            provider: String::new(),
            model: String::new(),
            system_prompt: String::new(),
            temperature: 0.7,
            equipped_rulefiles: Vec::new(),
        }
    }

    /// Set the role template (builder pattern).
    pub fn with_template(mut self, template: AgentTemplate) -> Self {
        self.template = template;
        self
    }

    /// Set provider name and model id (builder pattern).
    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    /// Set the custom system prompt addition (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Equip a rulefile (builder pattern).
    pub fn with_rulefile(mut self, equipped: EquippedRulefile) -> Self {
        self.equipped_rulefiles.push(equipped);
        self
    }
}

/// How a tool decides which hexes it can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkingMode {
    /// Proximity: every hex within `range` is reachable.
    Range,
    /// Only the hexes in `linked_hexes` are reachable.
    Explicit,
}

/// A tool placed on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntity {
    pub id: String,
    pub name: String,
    pub status: EntityStatus,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EntityMetrics>,
    /// Plugin id (e.g. `"filesystem"`, `"shell"`, `"tasklist"`).
    pub tool_type: String,
    /// Opaque configuration validated by the owning plugin.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub is_configured: bool,
    pub range: u32,
    pub linking_mode: LinkingMode,
    /// Only meaningful in [`LinkingMode::Explicit`].
    #[serde(default)]
    pub linked_hexes: BTreeSet<String>,
    pub rbac: RbacConfig,
}

impl ToolEntity {
    /// Create a range-1 tool with RBAC disabled.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tool_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: EntityStatus::Idle,
            cost: 0.0,
            metrics: None,
            tool_type: tool_type.into(),
            config: serde_json::Map::new(),
            is_configured: false,
            range: 1,
            linking_mode: LinkingMode::Range,
            linked_hexes: BTreeSet::new(),
            rbac: RbacConfig::disabled(),
        }
    }

    /// Set the reach radius (builder pattern).
    pub fn with_range(mut self, range: u32) -> Self {
        self.range = range;
        self
    }

    /// Switch to explicit linking with the given hex keys (builder pattern).
    pub fn with_linked_hexes<I, S>(mut self, hexes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linking_mode = LinkingMode::Explicit;
        self.linked_hexes = hexes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the RBAC configuration (builder pattern).
    pub fn with_rbac(mut self, rbac: RbacConfig) -> Self {
        self.rbac = rbac;
        self
    }

    /// Set a configuration key (builder pattern).
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self.is_configured = true;
        self
    }
}

/// Either kind of placeable entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Entity {
    Agent(AgentEntity),
    Tool(ToolEntity),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Agent(a) => &a.id,
            Entity::Tool(t) => &t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Agent(a) => &a.name,
            Entity::Tool(t) => &t.name,
        }
    }

    pub fn status(&self) -> EntityStatus {
        match self {
            Entity::Agent(a) => a.status,
            Entity::Tool(t) => t.status,
        }
    }

    pub fn set_status(&mut self, status: EntityStatus) {
        match self {
            Entity::Agent(a) => a.status = status,
            Entity::Tool(t) => t.status = status,
        }
    }

    pub fn cost(&self) -> f64 {
        match self {
            Entity::Agent(a) => a.cost,
            Entity::Tool(t) => t.cost,
        }
    }

    /// Borrow the tool payload, if this is a tool.
    pub fn as_tool(&self) -> Option<&ToolEntity> {
        match self {
            Entity::Tool(t) => Some(t),
            Entity::Agent(_) => None,
        }
    }

    /// Borrow the agent payload, if this is an agent.
    pub fn as_agent(&self) -> Option<&AgentEntity> {
        match self {
            Entity::Agent(a) => Some(a),
            Entity::Tool(_) => None,
        }
    }
}

/// One cell of the pre-generated grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hex {
    pub coord: AxialCoord,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub is_edge: bool,
}

/// Visual connection type between two hexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Flow,
    Hierarchy,
    Data,
}

/// A user-drawn edge between two hexes. Not consulted for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub from_hex_key: String,
    pub to_hex_key: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
}

/// Mutation notice delivered to board observers.
#[derive(Debug, Clone)]
pub enum BoardChange {
    EntityPlaced { entity_id: String, hex_key: String },
    EntityRemoved { entity_id: String, hex_key: String },
    EntityUpdated { entity_id: String },
    ConnectionAdded { connection_id: String },
    ConnectionRemoved { connection_id: String },
}

/// Observer callback invoked after each mutation.
pub type BoardObserver = Arc<dyn Fn(&BoardChange) + Send + Sync>;

/// Serializable snapshot of an entire board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub id: String,
    pub name: String,
    pub radius: i32,
    pub placements: Vec<Placement>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// One entity with its hex, inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub hex_key: String,
    pub entity: Entity,
}

/// The authored board: grid, entities, connections, and indexes.
pub struct BoardModel {
    id: String,
    name: String,
    radius: i32,
    hexes: HashMap<String, Hex>,
    entities: HashMap<String, Entity>,
    hex_by_entity: HashMap<String, String>,
    connections: BTreeMap<String, Connection>,
    projected_cost: f64,
    observers: Vec<BoardObserver>,
}

impl BoardModel {
    /// Create an empty board with a pre-generated hexagon of the given
    /// radius. Edge cells are the ones at exactly `radius` distance.
    pub fn new(id: impl Into<String>, name: impl Into<String>, radius: i32) -> Self {
        let origin = AxialCoord::new(0, 0);
        let hexes = coords_in_radius(radius)
            .into_iter()
            .map(|coord| {
                let key = coord.key();
                (
                    key.clone(),
                    Hex {
                        coord,
                        key,
                        entity_id: None,
                        is_edge: coord.distance(&origin) == radius,
                    },
                )
            })
            .collect();
        Self {
            id: id.into(),
            name: name.into(),
            radius,
            hexes,
            entities: HashMap::new(),
            hex_by_entity: HashMap::new(),
            connections: BTreeMap::new(),
            projected_cost: 0.0,
            observers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Current projected hourly cost (sum of entity `cost` fields).
    pub fn projected_cost(&self) -> f64 {
        self.projected_cost
    }

    /// Register an observer for mutations.
    pub fn subscribe(&mut self, observer: BoardObserver) {
        self.observers.push(observer);
    }

    fn after_mutation(&mut self, change: BoardChange) {
        self.projected_cost = self.entities.values().map(Entity::cost).sum();
        for observer in &self.observers {
            observer(&change);
        }
    }

    /// Place an entity on a vacant hex.
    pub fn place_entity(&mut self, hex_key: &str, entity: Entity) -> Result<(), BoardError> {
        if !self.hexes.contains_key(hex_key) {
            return Err(BoardError::UnknownHex(hex_key.to_string()));
        }
        if self
            .hexes
            .get(hex_key)
            .map(|h| h.entity_id.is_some())
            .unwrap_or(false)
        {
            return Err(BoardError::HexOccupied(hex_key.to_string()));
        }
        if self.entities.contains_key(entity.id()) {
            return Err(BoardError::DuplicateEntity(entity.id().to_string()));
        }
        self.validate_entity(&entity, hex_key)?;

        let entity_id = entity.id().to_string();
        if let Some(hex) = self.hexes.get_mut(hex_key) {
            hex.entity_id = Some(entity_id.clone());
        }
        self.hex_by_entity
            .insert(entity_id.clone(), hex_key.to_string());
        self.entities.insert(entity_id.clone(), entity);
        self.after_mutation(BoardChange::EntityPlaced {
            entity_id,
            hex_key: hex_key.to_string(),
        });
        Ok(())
    }

    /// Remove an entity, vacating its hex. Returns the owned entity.
    pub fn remove_entity(&mut self, entity_id: &str) -> Result<Entity, BoardError> {
        let hex_key = self
            .hex_by_entity
            .remove(entity_id)
            .ok_or_else(|| BoardError::UnknownEntity(entity_id.to_string()))?;
        let entity = self
            .entities
            .remove(entity_id)
            .ok_or_else(|| BoardError::UnknownEntity(entity_id.to_string()))?;
        if let Some(hex) = self.hexes.get_mut(&hex_key) {
            hex.entity_id = None;
        }
        self.after_mutation(BoardChange::EntityRemoved {
            entity_id: entity_id.to_string(),
            hex_key,
        });
        Ok(entity)
    }

    /// Mutate an entity in place, then re-validate its invariants.
    pub fn update_entity<F>(&mut self, entity_id: &str, mutate: F) -> Result<(), BoardError>
    where
        F: FnOnce(&mut Entity),
    {
        let hex_key = self
            .hex_by_entity
            .get(entity_id)
            .cloned()
            .ok_or_else(|| BoardError::UnknownEntity(entity_id.to_string()))?;
        // Mutate a copy so a failed validation leaves the board untouched.
        let mut updated = self
            .entities
            .get(entity_id)
            .cloned()
            .ok_or_else(|| BoardError::UnknownEntity(entity_id.to_string()))?;
        mutate(&mut updated);
        if updated.id() != entity_id {
            return Err(BoardError::InvalidEntity(format!(
                "Entity id may not change (was {}, now {})",
                entity_id,
                updated.id()
            )));
        }
        self.validate_entity(&updated, &hex_key)?;
        self.entities.insert(entity_id.to_string(), updated);
        self.after_mutation(BoardChange::EntityUpdated {
            entity_id: entity_id.to_string(),
        });
        Ok(())
    }

    /// Convenience: set an entity's status.
    pub fn set_entity_status(
        &mut self,
        entity_id: &str,
        status: EntityStatus,
    ) -> Result<(), BoardError> {
        self.update_entity(entity_id, |e| e.set_status(status))
    }

    /// Add a connection between two existing hexes.
    pub fn add_connection(
        &mut self,
        from_hex_key: &str,
        to_hex_key: &str,
        connection_type: ConnectionType,
    ) -> Result<String, BoardError> {
        for key in [from_hex_key, to_hex_key].iter() {
            if !self.hexes.contains_key(*key) {
                return Err(BoardError::UnknownHex((*key).to_string()));
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                from_hex_key: from_hex_key.to_string(),
                to_hex_key: to_hex_key.to_string(),
                connection_type,
            },
        );
        self.after_mutation(BoardChange::ConnectionAdded {
            connection_id: id.clone(),
        });
        Ok(id)
    }

    /// Remove a connection by id.
    pub fn remove_connection(&mut self, connection_id: &str) -> Result<(), BoardError> {
        self.connections
            .remove(connection_id)
            .ok_or_else(|| BoardError::UnknownConnection(connection_id.to_string()))?;
        self.after_mutation(BoardChange::ConnectionRemoved {
            connection_id: connection_id.to_string(),
        });
        Ok(())
    }

    /// Look up the entity occupying a hex.
    pub fn entity_by_hex(&self, hex_key: &str) -> Option<&Entity> {
        let hex = self.hexes.get(hex_key)?;
        let entity_id = hex.entity_id.as_ref()?;
        self.entities.get(entity_id)
    }

    /// Look up the hex an entity occupies.
    pub fn hex_of_entity(&self, entity_id: &str) -> Option<&str> {
        self.hex_by_entity.get(entity_id).map(String::as_str)
    }

    /// Borrow an entity by id.
    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    /// Borrow a hex by key.
    pub fn hex(&self, hex_key: &str) -> Option<&Hex> {
        self.hexes.get(hex_key)
    }

    /// Whether a hex key exists on this board.
    pub fn contains_hex(&self, hex_key: &str) -> bool {
        self.hexes.contains_key(hex_key)
    }

    /// All hex keys, unsorted.
    pub fn hex_keys(&self) -> impl Iterator<Item = &str> {
        self.hexes.keys().map(String::as_str)
    }

    /// Occupied hexes as `(hex_key, entity)` pairs, sorted by hex key so
    /// iteration order is deterministic.
    pub fn occupied(&self) -> Vec<(String, &Entity)> {
        let mut out: Vec<(String, &Entity)> = self
            .hex_by_entity
            .iter()
            .filter_map(|(entity_id, hex_key)| {
                self.entities.get(entity_id).map(|e| (hex_key.clone(), e))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// All connections, sorted by id.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    fn validate_entity(&self, entity: &Entity, own_hex: &str) -> Result<(), BoardError> {
        if let Entity::Tool(tool) = entity {
            tool.rbac
                .zone_config
                .validate()
                .map_err(BoardError::InvalidEntity)?;
            if tool.linking_mode == LinkingMode::Explicit {
                for linked in &tool.linked_hexes {
                    if linked == own_hex {
                        return Err(BoardError::InvalidEntity(format!(
                            "Tool {} links its own hex {}",
                            tool.id, own_hex
                        )));
                    }
                    if !self.hexes.contains_key(linked) {
                        return Err(BoardError::InvalidEntity(format!(
                            "Tool {} links unknown hex {}",
                            tool.id, linked
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Check every board invariant. Run by the board runner before start.
    pub fn validate(&self) -> Result<(), BoardError> {
        for (entity_id, hex_key) in &self.hex_by_entity {
            let hex = self
                .hexes
                .get(hex_key)
                .ok_or_else(|| BoardError::UnknownHex(hex_key.clone()))?;
            if hex.entity_id.as_deref() != Some(entity_id.as_str()) {
                return Err(BoardError::InvalidEntity(format!(
                    "Occupancy index out of sync at hex {}",
                    hex_key
                )));
            }
            let entity = self
                .entities
                .get(entity_id)
                .ok_or_else(|| BoardError::UnknownEntity(entity_id.clone()))?;
            self.validate_entity(entity, hex_key)?;
        }
        Ok(())
    }

    /// Capture a serializable snapshot of the whole board.
    pub fn snapshot(&self) -> BoardSnapshot {
        let placements = self
            .occupied()
            .into_iter()
            .map(|(hex_key, entity)| Placement {
                hex_key,
                entity: entity.clone(),
            })
            .collect();
        BoardSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            radius: self.radius,
            placements,
            connections: self.connections.values().cloned().collect(),
        }
    }

    /// Rebuild a board from a snapshot, re-validating every placement.
    pub fn from_snapshot(snapshot: BoardSnapshot) -> Result<Self, BoardError> {
        let mut board = BoardModel::new(snapshot.id, snapshot.name, snapshot.radius);
        for placement in snapshot.placements {
            board.place_entity(&placement.hex_key, placement.entity)?;
        }
        for connection in snapshot.connections {
            board.connections.insert(connection.id.clone(), connection);
        }
        board.projected_cost = board.entities.values().map(Entity::cost).sum();
        Ok(board)
    }
}
