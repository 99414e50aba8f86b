//! Directional Zone RBAC
//!
//! Placement is permission: whether an agent may use a tool, and in which
//! mode, is a pure function of the resource entity's configuration and the
//! two hex coordinates involved. This module owns that decision.
//!
//! # Decision algorithm
//!
//! [`RbacEngine::check_permission`] evaluates, first match wins:
//!
//! 1. RBAC disabled on the resource → allow iff the requester is reachable.
//! 2. Requester hex on the deny list → deny.
//! 3. Explicit linking → look up the grant for the requester hex; allow iff
//!    the grant carries the requested permission.
//! 4. Range linking → require reachability, then either the zone the
//!    requester's direction falls in (plus `execute` when
//!    `execute_in_all_zones` is set) or, with zones off, the resource's
//!    default permission set.
//!
//! A direction that appears in no zone grants nothing beyond the optional
//! blanket `execute` — with the flag off this means deny-all.
//!
//! # Example
//!
//! ```rust
//! use ainulindale::board::{BoardModel, Entity, ToolEntity};
//! use ainulindale::rbac::{Permission, RbacConfig, RbacEngine, ZoneConfig};
//!
//! let mut board = BoardModel::new("b", "B", 3);
//! let tool = ToolEntity::new("fs", "Files", "filesystem")
//!     .with_range(1)
//!     .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
//! board.place_entity("0,0", Entity::Tool(tool)).unwrap();
//!
//! let decision = RbacEngine::check_permission(&board, "-1,0", "fs", Permission::Read);
//! assert!(decision.allowed);
//! ```

use crate::ainulindale::board::{BoardModel, LinkingMode, ToolEntity};
use crate::ainulindale::hex::{direction_between, AxialCoord, Direction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single access mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

/// Which zone a direction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoneKind {
    Read,
    Write,
    ReadWrite,
}

/// Direction-indexed permission zones around a tool.
///
/// The three sets must be disjoint: a direction may appear in at most one
/// of them. [`ZoneConfig::validate`] enforces this and is called by the
/// board model on placement and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    #[serde(default)]
    pub read_zone: Vec<Direction>,
    #[serde(default)]
    pub write_zone: Vec<Direction>,
    #[serde(default)]
    pub read_write_zone: Vec<Direction>,
    /// Grant `execute` in every direction, zoned or not.
    pub execute_in_all_zones: bool,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            read_zone: Vec::new(),
            write_zone: Vec::new(),
            read_write_zone: Vec::new(),
            execute_in_all_zones: true,
        }
    }
}

impl ZoneConfig {
    /// The split used by the `read-left-write-right` pattern: reads from
    /// the NW/SW/S side, writes from the NE/SE/N side.
    pub fn read_left_write_right() -> Self {
        Self {
            read_zone: vec![Direction::NW, Direction::SW, Direction::S],
            write_zone: vec![Direction::NE, Direction::SE, Direction::N],
            read_write_zone: Vec::new(),
            execute_in_all_zones: true,
        }
    }

    /// Read-only from every direction.
    pub fn read_all() -> Self {
        Self {
            read_zone: Direction::ALL.to_vec(),
            write_zone: Vec::new(),
            read_write_zone: Vec::new(),
            execute_in_all_zones: true,
        }
    }

    /// Full read/write from every direction.
    pub fn read_write_all() -> Self {
        Self {
            read_zone: Vec::new(),
            write_zone: Vec::new(),
            read_write_zone: Direction::ALL.to_vec(),
            execute_in_all_zones: true,
        }
    }

    /// Check that no direction appears in more than one zone.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for (zone, dirs) in [
            ("readZone", &self.read_zone),
            ("writeZone", &self.write_zone),
            ("readWriteZone", &self.read_write_zone),
        ]
        .iter()
        {
            for dir in dirs.iter() {
                if !seen.insert(format!("{}", dir)) {
                    return Err(format!(
                        "Direction {} appears in more than one zone (last in {})",
                        dir, zone
                    ));
                }
            }
        }
        Ok(())
    }

    /// The zone a direction falls in, if any.
    pub fn zone_of(&self, direction: Direction) -> Option<ZoneKind> {
        if self.read_zone.contains(&direction) {
            Some(ZoneKind::Read)
        } else if self.write_zone.contains(&direction) {
            Some(ZoneKind::Write)
        } else if self.read_write_zone.contains(&direction) {
            Some(ZoneKind::ReadWrite)
        } else {
            None
        }
    }

    /// Effective permissions for a requester approaching from `direction`.
    pub fn permissions_for(&self, direction: Direction) -> BTreeSet<Permission> {
        let mut perms = BTreeSet::new();
        match self.zone_of(direction) {
            Some(ZoneKind::Read) => {
                perms.insert(Permission::Read);
            }
            Some(ZoneKind::Write) => {
                perms.insert(Permission::Write);
            }
            Some(ZoneKind::ReadWrite) => {
                perms.insert(Permission::Read);
                perms.insert(Permission::Write);
            }
            None => {}
        }
        if self.execute_in_all_zones {
            perms.insert(Permission::Execute);
        }
        perms
    }
}

/// An explicit-mode permission grant for one requester hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub target_hex_key: String,
    pub permissions: BTreeSet<Permission>,
}

impl AccessGrant {
    pub fn new<I>(target_hex_key: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = Permission>,
    {
        Self {
            target_hex_key: target_hex_key.into(),
            permissions: permissions.into_iter().collect(),
        }
    }
}

/// Per-tool access control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacConfig {
    pub enabled: bool,
    pub default_role: String,
    /// Used in range mode when zones are off.
    #[serde(default)]
    pub default_permissions: BTreeSet<Permission>,
    pub use_zones: bool,
    #[serde(default)]
    pub zone_config: ZoneConfig,
    #[serde(default)]
    pub access_grants: Vec<AccessGrant>,
    #[serde(default)]
    pub deny_list: BTreeSet<String>,
}

impl RbacConfig {
    /// Access control off: reachability alone decides.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            default_role: "operator".to_string(),
            default_permissions: BTreeSet::new(),
            use_zones: false,
            zone_config: ZoneConfig::default(),
            access_grants: Vec::new(),
            deny_list: BTreeSet::new(),
        }
    }

    /// Access control on with an empty default permission set.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    /// Replace the default permission set (builder pattern).
    pub fn with_default_permissions<I>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = Permission>,
    {
        self.default_permissions = permissions.into_iter().collect();
        self
    }

    /// Turn on zoned permissions (builder pattern).
    pub fn with_zones(mut self, zone_config: ZoneConfig) -> Self {
        self.use_zones = true;
        self.zone_config = zone_config;
        self
    }

    /// Add an explicit-mode grant (builder pattern).
    pub fn with_grant(mut self, grant: AccessGrant) -> Self {
        self.access_grants.push(grant);
        self
    }

    /// Deny a requester hex outright (builder pattern).
    pub fn with_denied_hex(mut self, hex_key: impl Into<String>) -> Self {
        self.deny_list.insert(hex_key.into());
        self
    }
}

/// The outcome of a permission check, with a human-readable reason.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AccessDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// One affected hex in a zone visualization.
#[derive(Debug, Clone)]
pub struct ZoneHex {
    pub hex_key: String,
    pub distance: i32,
    pub zone: Option<ZoneKind>,
    pub permissions: BTreeSet<Permission>,
}

/// One reachable requester hex in an access summary.
#[derive(Debug, Clone)]
pub struct AccessSummaryEntry {
    pub hex_key: String,
    pub role: String,
    pub distance: i32,
    pub permissions: BTreeSet<Permission>,
}

/// Stateless decision engine over the board.
///
/// Every method is a pure function of the resource entity and the hex
/// coordinates involved, so identical inputs always produce identical
/// decisions.
pub struct RbacEngine;

impl RbacEngine {
    /// Whether `tool` (at `tool_hex_key`) reaches `target_hex_key`.
    ///
    /// Range mode reaches every hex at distance `1..=range`; explicit mode
    /// reaches exactly the linked hexes. A tool never reaches its own hex.
    pub fn can_reach(tool: &ToolEntity, tool_hex_key: &str, target_hex_key: &str) -> bool {
        if tool_hex_key == target_hex_key {
            return false;
        }
        match tool.linking_mode {
            LinkingMode::Explicit => tool.linked_hexes.contains(target_hex_key),
            LinkingMode::Range => {
                match (
                    AxialCoord::from_key(tool_hex_key),
                    AxialCoord::from_key(target_hex_key),
                ) {
                    (Some(a), Some(b)) => {
                        let d = a.distance(&b);
                        d > 0 && d <= tool.range as i32
                    }
                    _ => false,
                }
            }
        }
    }

    /// Enumerate the board hexes a tool reaches, sorted by hex key.
    ///
    /// The inverse of [`can_reach`](RbacEngine::can_reach); the actor
    /// runtime uses it to route events.
    pub fn reachable_hexes(board: &BoardModel, tool: &ToolEntity, tool_hex_key: &str) -> Vec<String> {
        let mut out: Vec<String> = board
            .hex_keys()
            .filter(|key| Self::can_reach(tool, tool_hex_key, key))
            .map(str::to_string)
            .collect();
        out.sort();
        out
    }

    /// Decide whether the requester hex holds `permission` on the resource.
    ///
    /// See the module docs for the full algorithm. The resource must be a
    /// tool entity currently placed on the board.
    pub fn check_permission(
        board: &BoardModel,
        requester_hex_key: &str,
        resource_id: &str,
        permission: Permission,
    ) -> AccessDecision {
        let tool = match board.entity(resource_id).and_then(|e| e.as_tool()) {
            Some(tool) => tool,
            None => {
                return AccessDecision::deny(format!("Unknown tool resource: {}", resource_id))
            }
        };
        let resource_hex = match board.hex_of_entity(resource_id) {
            Some(hex) => hex,
            None => return AccessDecision::deny(format!("Resource {} is not placed", resource_id)),
        };

        // 1. RBAC off: reachability alone decides.
        if !tool.rbac.enabled {
            return if Self::can_reach(tool, resource_hex, requester_hex_key) {
                AccessDecision::allow("Access control disabled")
            } else {
                AccessDecision::deny(Self::reach_failure(tool, resource_hex, requester_hex_key))
            };
        }

        // 2. Deny list beats everything else.
        if tool.rbac.deny_list.contains(requester_hex_key) {
            return AccessDecision::deny(format!("Hex {} is deny-listed", requester_hex_key));
        }

        // 3. Explicit mode: the grant table is the whole story.
        if tool.linking_mode == LinkingMode::Explicit {
            return match tool
                .rbac
                .access_grants
                .iter()
                .find(|g| g.target_hex_key == requester_hex_key)
            {
                Some(grant) if grant.permissions.contains(&permission) => {
                    AccessDecision::allow(format!("Granted '{}' explicitly", permission))
                }
                Some(_) => AccessDecision::deny(format!(
                    "Grant for hex {} does not include '{}'",
                    requester_hex_key, permission
                )),
                None => AccessDecision::deny(format!(
                    "No explicit grant for hex {}",
                    requester_hex_key
                )),
            };
        }

        // 4. Range mode: reachability, then zones or defaults.
        if !Self::can_reach(tool, resource_hex, requester_hex_key) {
            return AccessDecision::deny(Self::reach_failure(
                tool,
                resource_hex,
                requester_hex_key,
            ));
        }

        if tool.rbac.use_zones {
            let src = AxialCoord::from_key(resource_hex);
            let dst = AxialCoord::from_key(requester_hex_key);
            let direction = match (src, dst) {
                (Some(src), Some(dst)) => direction_between(&src, &dst),
                _ => None,
            };
            let direction = match direction {
                Some(direction) => direction,
                None => return AccessDecision::deny("No direction between coincident hexes"),
            };
            let perms = tool.rbac.zone_config.permissions_for(direction);
            if perms.contains(&permission) {
                AccessDecision::allow(format!("Direction {} grants '{}'", direction, permission))
            } else {
                AccessDecision::deny(format!(
                    "Direction {} does not grant '{}'",
                    direction, permission
                ))
            }
        } else if tool.rbac.default_permissions.contains(&permission) {
            AccessDecision::allow(format!("Default permissions include '{}'", permission))
        } else {
            AccessDecision::deny(format!(
                "Default permissions do not include '{}'",
                permission
            ))
        }
    }

    fn reach_failure(tool: &ToolEntity, resource_hex: &str, requester_hex_key: &str) -> String {
        match tool.linking_mode {
            LinkingMode::Explicit => format!("Hex {} is not linked", requester_hex_key),
            LinkingMode::Range => {
                let distance = match (
                    AxialCoord::from_key(resource_hex),
                    AxialCoord::from_key(requester_hex_key),
                ) {
                    (Some(a), Some(b)) => a.distance(&b),
                    _ => -1,
                };
                format!(
                    "Not within range (distance: {}, range: {})",
                    distance, tool.range
                )
            }
        }
    }

    /// Classify every hex a resource affects, with its zone and distance.
    ///
    /// This is the same classification code path as
    /// [`check_permission`](RbacEngine::check_permission), packaged for the
    /// UI. `range_override` lets callers preview a different radius.
    pub fn zone_visualization(
        board: &BoardModel,
        resource_id: &str,
        range_override: Option<u32>,
    ) -> Vec<ZoneHex> {
        let tool = match board.entity(resource_id).and_then(|e| e.as_tool()) {
            Some(tool) => tool,
            None => return Vec::new(),
        };
        let resource_hex = match board.hex_of_entity(resource_id) {
            Some(hex) => hex.to_string(),
            None => return Vec::new(),
        };
        let mut preview = tool.clone();
        if let Some(range) = range_override {
            preview.range = range;
        }
        let src = match AxialCoord::from_key(&resource_hex) {
            Some(src) => src,
            None => return Vec::new(),
        };

        let mut out: Vec<ZoneHex> = Self::reachable_hexes(board, &preview, &resource_hex)
            .into_iter()
            .filter_map(|hex_key| {
                let dst = AxialCoord::from_key(&hex_key)?;
                let direction = direction_between(&src, &dst)?;
                let (zone, permissions) = if preview.rbac.enabled && preview.rbac.use_zones {
                    (
                        preview.rbac.zone_config.zone_of(direction),
                        preview.rbac.zone_config.permissions_for(direction),
                    )
                } else {
                    (None, preview.rbac.default_permissions.clone())
                };
                Some(ZoneHex {
                    distance: src.distance(&dst),
                    hex_key,
                    zone,
                    permissions,
                })
            })
            .collect();
        out.sort_by(|a, b| a.hex_key.cmp(&b.hex_key));
        out
    }

    /// Summarize effective access for every hex a resource reaches.
    pub fn access_summary(board: &BoardModel, resource_id: &str) -> Vec<AccessSummaryEntry> {
        let tool = match board.entity(resource_id).and_then(|e| e.as_tool()) {
            Some(tool) => tool,
            None => return Vec::new(),
        };
        let role = tool.rbac.default_role.clone();
        Self::zone_visualization(board, resource_id, None)
            .into_iter()
            .map(|zone_hex| {
                let permissions = if tool.rbac.deny_list.contains(&zone_hex.hex_key) {
                    BTreeSet::new()
                } else {
                    zone_hex.permissions
                };
                AccessSummaryEntry {
                    hex_key: zone_hex.hex_key,
                    role: role.clone(),
                    distance: zone_hex.distance,
                    permissions,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ainulindale::board::Entity;

    fn board_with_tool(tool: ToolEntity, hex: &str) -> BoardModel {
        let mut board = BoardModel::new("b", "B", 3);
        board.place_entity(hex, Entity::Tool(tool)).unwrap();
        board
    }

    #[test]
    fn test_zone_partition_is_enforced() {
        let mut zones = ZoneConfig::read_left_write_right();
        assert!(zones.validate().is_ok());
        zones.read_zone.push(Direction::N); // N is already in the write zone
        assert!(zones.validate().is_err());
    }

    #[test]
    fn test_range_reachability_excludes_own_hex() {
        let tool = ToolEntity::new("t", "T", "filesystem").with_range(2);
        assert!(!RbacEngine::can_reach(&tool, "0,0", "0,0"));
        assert!(RbacEngine::can_reach(&tool, "0,0", "1,0"));
        assert!(RbacEngine::can_reach(&tool, "0,0", "2,0"));
        assert!(!RbacEngine::can_reach(&tool, "0,0", "3,0"));
    }

    #[test]
    fn test_explicit_reachability_uses_links_only() {
        let tool = ToolEntity::new("t", "T", "filesystem").with_linked_hexes(["2,0", "-2,2"]);
        assert!(RbacEngine::can_reach(&tool, "0,0", "2,0"));
        assert!(RbacEngine::can_reach(&tool, "0,0", "-2,2"));
        assert!(!RbacEngine::can_reach(&tool, "0,0", "1,0"));
    }

    #[test]
    fn test_neighbor_read_allowed_and_range_denied() {
        // Spec scenario S1 topology.
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(
                RbacConfig::enabled()
                    .with_default_permissions([Permission::Read, Permission::Execute]),
            );
        let board = board_with_tool(tool, "1,0");

        let near = RbacEngine::check_permission(&board, "0,0", "fs", Permission::Read);
        assert!(near.allowed);

        // All six neighbors of the tool hex sit at distance 1.
        let far = RbacEngine::check_permission(&board, "2,0", "fs", Permission::Read);
        assert!(far.allowed);
        let miss = RbacEngine::check_permission(&board, "3,0", "fs", Permission::Read);
        assert!(!miss.allowed);
        assert_eq!(miss.reason, "Not within range (distance: 2, range: 1)");
    }

    #[test]
    fn test_zone_split_read_left_write_right() {
        // Spec scenario S2.
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
        let board = board_with_tool(tool, "0,0");

        let nw_read = RbacEngine::check_permission(&board, "-1,0", "fs", Permission::Read);
        let nw_write = RbacEngine::check_permission(&board, "-1,0", "fs", Permission::Write);
        assert!(nw_read.allowed && !nw_write.allowed);

        let se_write = RbacEngine::check_permission(&board, "1,0", "fs", Permission::Write);
        let se_read = RbacEngine::check_permission(&board, "1,0", "fs", Permission::Read);
        assert!(se_write.allowed && !se_read.allowed);

        let s_read = RbacEngine::check_permission(&board, "0,1", "fs", Permission::Read);
        let s_write = RbacEngine::check_permission(&board, "0,1", "fs", Permission::Write);
        assert!(s_read.allowed && !s_write.allowed);
    }

    #[test]
    fn test_execute_in_all_zones_blankets_execute() {
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
        let board = board_with_tool(tool, "0,0");
        for hex in ["-1,0", "1,0", "0,1", "0,-1"].iter() {
            let d = RbacEngine::check_permission(&board, hex, "fs", Permission::Execute);
            assert!(d.allowed, "execute denied from {}", hex);
        }
    }

    #[test]
    fn test_unzoned_direction_denies_all_without_flag() {
        let mut zones = ZoneConfig {
            read_zone: vec![Direction::NW],
            write_zone: Vec::new(),
            read_write_zone: Vec::new(),
            execute_in_all_zones: false,
        };
        assert!(zones.validate().is_ok());
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(RbacConfig::enabled().with_zones(zones.clone()));
        let board = board_with_tool(tool, "0,0");
        // SE is in no zone and the blanket flag is off: nothing is granted.
        for perm in [Permission::Read, Permission::Write, Permission::Execute].iter() {
            let d = RbacEngine::check_permission(&board, "1,0", "fs", *perm);
            assert!(!d.allowed);
        }
        zones.execute_in_all_zones = true;
        assert!(zones.permissions_for(Direction::SE).contains(&Permission::Execute));
    }

    #[test]
    fn test_deny_list_wins_over_zones() {
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(
                RbacConfig::enabled()
                    .with_zones(ZoneConfig::read_write_all())
                    .with_denied_hex("1,0"),
            );
        let board = board_with_tool(tool, "0,0");
        let d = RbacEngine::check_permission(&board, "1,0", "fs", Permission::Read);
        assert!(!d.allowed);
        assert!(d.reason.contains("deny-listed"));
    }

    #[test]
    fn test_explicit_mode_requires_grant() {
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_linked_hexes(["1,0", "2,0"])
            .with_rbac(
                RbacConfig::enabled()
                    .with_grant(AccessGrant::new("1,0", [Permission::Read])),
            );
        let board = board_with_tool(tool, "0,0");

        assert!(RbacEngine::check_permission(&board, "1,0", "fs", Permission::Read).allowed);
        assert!(!RbacEngine::check_permission(&board, "1,0", "fs", Permission::Write).allowed);
        let ungranted = RbacEngine::check_permission(&board, "2,0", "fs", Permission::Read);
        assert!(!ungranted.allowed);
        assert!(ungranted.reason.contains("No explicit grant"));
    }

    #[test]
    fn test_disabled_rbac_falls_back_to_reachability() {
        let tool = ToolEntity::new("fs", "FS", "filesystem").with_range(1);
        let board = board_with_tool(tool, "0,0");
        assert!(RbacEngine::check_permission(&board, "1,0", "fs", Permission::Write).allowed);
        assert!(!RbacEngine::check_permission(&board, "3,0", "fs", Permission::Write).allowed);
    }

    #[test]
    fn test_check_permission_is_deterministic() {
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(2)
            .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
        let board = board_with_tool(tool, "0,0");
        let first = RbacEngine::check_permission(&board, "0,2", "fs", Permission::Read);
        for _ in 0..10 {
            let again = RbacEngine::check_permission(&board, "0,2", "fs", Permission::Read);
            assert_eq!(first.allowed, again.allowed);
            assert_eq!(first.reason, again.reason);
        }
    }

    #[test]
    fn test_zone_visualization_covers_reachable_hexes() {
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
        let board = board_with_tool(tool, "0,0");
        let zones = RbacEngine::zone_visualization(&board, "fs", None);
        assert_eq!(zones.len(), 6);
        for zone_hex in &zones {
            assert_eq!(zone_hex.distance, 1);
            assert!(zone_hex.zone.is_some());
        }
        // Widening the preview radius widens the result.
        let wide = RbacEngine::zone_visualization(&board, "fs", Some(2));
        assert!(wide.len() > zones.len());
    }

    #[test]
    fn test_access_summary_blanks_denied_hexes() {
        let tool = ToolEntity::new("fs", "FS", "filesystem")
            .with_range(1)
            .with_rbac(
                RbacConfig::enabled()
                    .with_zones(ZoneConfig::read_write_all())
                    .with_denied_hex("1,0"),
            );
        let board = board_with_tool(tool, "0,0");
        let summary = RbacEngine::access_summary(&board, "fs");
        let denied = summary.iter().find(|e| e.hex_key == "1,0").unwrap();
        assert!(denied.permissions.is_empty());
        let open = summary.iter().find(|e| e.hex_key == "0,1").unwrap();
        assert!(open.permissions.contains(&Permission::Read));
    }
}
