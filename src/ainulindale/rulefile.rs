//! Rulefiles
//!
//! A rulefile is a reusable, priority-ordered block of instructions that
//! agents equip; the prompt composer appends the equipped rulefiles to the
//! agent's system prompt in equip order. Rulefiles enter the engine as
//! already-parsed data — authoring UI and storage layout are external
//! concerns. The on-disk JSON shape uses camelCase keys and ISO-8601
//! dates.
//!
//! # Rendering
//!
//! [`Rulefile::render`] produces the text the composer embeds: the
//! `content` field verbatim when present, otherwise the enabled rules
//! sorted by priority (descending, insertion order breaking ties). An
//! agent may override individual rule bodies via its equip entry.
//!
//! # Example
//!
//! ```rust
//! use ainulindale::rulefile::{Rule, Rulefile};
//!
//! let rf = Rulefile::new("rust-style", "Rust Style")
//!     .with_rule(Rule::new("fmt", "Formatting", "Run rustfmt before committing.", 10))
//!     .with_rule(Rule::new("clippy", "Lints", "Keep clippy clean.", 20));
//!
//! // Higher priority first.
//! assert!(rf.render(&Default::default()).starts_with("Keep clippy clean."));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One rule inside a rulefile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub content: String,
    /// Higher priority renders earlier.
    pub priority: i32,
    pub enabled: bool,
}

impl Rule {
    /// Create an enabled rule.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
            priority,
            enabled: true,
        }
    }
}

/// A reusable block of agent instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rulefile {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Verbatim body; takes precedence over `rules` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub is_builtin: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rulefile {
    /// Create an empty user rulefile in the `general` category.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            category: "general".to_string(),
            tags: Vec::new(),
            rules: Vec::new(),
            content: None,
            is_builtin: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the category (builder pattern).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Append a rule (builder pattern).
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the rule list with a verbatim content block (builder pattern).
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Render the text the prompt composer embeds for this rulefile.
    ///
    /// `overrides` maps rule id to replacement content; entries for rule
    /// ids not present in the rulefile are ignored.
    pub fn render(&self, overrides: &HashMap<String, String>) -> String {
        if let Some(content) = &self.content {
            return content.clone();
        }
        let mut rules: Vec<&Rule> = self.rules.iter().filter(|r| r.enabled).collect();
        // Stable sort keeps insertion order for equal priorities.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
            .iter()
            .map(|r| {
                overrides
                    .get(&r.id)
                    .map(String::as_str)
                    .unwrap_or(&r.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An agent's equip entry for one rulefile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquippedRulefile {
    pub rulefile_id: String,
    pub enabled: bool,
    /// Per-rule content overrides, keyed by rule id.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

impl EquippedRulefile {
    /// Equip a rulefile with no overrides.
    pub fn new(rulefile_id: impl Into<String>) -> Self {
        Self {
            rulefile_id: rulefile_id.into(),
            enabled: true,
            overrides: HashMap::new(),
        }
    }
}

/// Serialize a rulefile to its persisted JSON form.
pub fn serialize_rulefile(rulefile: &Rulefile) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rulefile)
}

/// Deserialize a rulefile from its persisted JSON form.
pub fn deserialize_rulefile(json: &str) -> Result<Rulefile, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sorts_by_priority_descending() {
        let rf = Rulefile::new("r", "R")
            .with_rule(Rule::new("a", "A", "first added", 1))
            .with_rule(Rule::new("b", "B", "high priority", 50))
            .with_rule(Rule::new("c", "C", "mid priority", 10));
        let text = rf.render(&HashMap::new());
        assert_eq!(text, "high priority\nmid priority\nfirst added");
    }

    #[test]
    fn test_render_prefers_content_field() {
        let rf = Rulefile::new("r", "R")
            .with_rule(Rule::new("a", "A", "unused", 1))
            .with_content("verbatim body");
        assert_eq!(rf.render(&HashMap::new()), "verbatim body");
    }

    #[test]
    fn test_render_skips_disabled_rules() {
        let mut rule = Rule::new("a", "A", "hidden", 99);
        rule.enabled = false;
        let rf = Rulefile::new("r", "R")
            .with_rule(rule)
            .with_rule(Rule::new("b", "B", "visible", 1));
        assert_eq!(rf.render(&HashMap::new()), "visible");
    }

    #[test]
    fn test_render_applies_overrides() {
        let rf = Rulefile::new("r", "R").with_rule(Rule::new("a", "A", "original", 1));
        let mut overrides = HashMap::new();
        overrides.insert("a".to_string(), "replaced".to_string());
        assert_eq!(rf.render(&overrides), "replaced");
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let rf = Rulefile::new("r", "R")
            .with_rule(Rule::new("a", "A", "one", 5))
            .with_rule(Rule::new("b", "B", "two", 5));
        assert_eq!(rf.render(&HashMap::new()), "one\ntwo");
    }

    #[test]
    fn test_serialize_round_trip_is_identity() {
        let rf = Rulefile::new("style", "Style Guide")
            .with_category("coding")
            .with_rule(Rule::new("fmt", "Formatting", "Run rustfmt.", 10));
        let json = serialize_rulefile(&rf).unwrap();
        let back = deserialize_rulefile(&json).unwrap();
        assert_eq!(serialize_rulefile(&back).unwrap(), json);
        assert_eq!(back.id, rf.id);
        assert_eq!(back.rules.len(), 1);
        assert_eq!(back.created_at, rf.created_at);
    }

    #[test]
    fn test_persisted_shape_uses_camel_case() {
        let rf = Rulefile::new("style", "Style Guide");
        let json = serialize_rulefile(&rf).unwrap();
        assert!(json.contains("\"isBuiltin\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"updatedAt\""));
    }
}
