//! Tool Output Truncation
//!
//! Tool results flow back into LLM context, so oversized outputs are
//! capped per tool type. The character cap applies first; the line cap is
//! applied to the character-truncated text. A trailing marker records how
//! much was dropped, and truncation is idempotent: output that already
//! fits (including a previous marker) passes through unchanged.
//!
//! Results larger than [`FILE_REFERENCE_THRESHOLD`] characters skip
//! truncation entirely: the full content is parked in the [`OutputStore`]
//! under an opaque `ainu://outputs/<id>` handle and the LLM receives a
//! small [`FileReference`] descriptor instead. The stored content is
//! byte-for-byte retrievable through the handle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Character count above which results become file references.
pub const FILE_REFERENCE_THRESHOLD: usize = 100_000;

/// URI scheme of output handles.
pub const OUTPUT_SCHEME: &str = "ainu";

/// Headroom reserved for the truncation marker so the marker itself never
/// pushes the result back over the caps.
const MARKER_RESERVE: usize = 200;

/// Maximum characters in a file-reference preview.
const PREVIEW_MAX_CHARS: usize = 500;

/// Maximum lines in a file-reference preview.
const PREVIEW_MAX_LINES: usize = 10;

/// Per-tool-type output caps.
#[derive(Debug, Clone, Copy)]
pub struct TruncationCaps {
    pub max_chars: usize,
    pub max_lines: usize,
}

/// The caps for a tool type (`filesystem`, `shell`, `tasklist`, or the
/// default for everything else).
pub fn caps_for(tool_type: &str) -> TruncationCaps {
    match tool_type {
        "filesystem" => TruncationCaps {
            max_chars: 50_000,
            max_lines: 1_000,
        },
        "shell" => TruncationCaps {
            max_chars: 20_000,
            max_lines: 500,
        },
        "tasklist" => TruncationCaps {
            max_chars: 10_000,
            max_lines: 200,
        },
        _ => TruncationCaps {
            max_chars: 30_000,
            max_lines: 750,
        },
    }
}

/// A (possibly) truncated tool output.
#[derive(Debug, Clone)]
pub struct TruncatedOutput {
    pub text: String,
    pub truncated: bool,
    pub dropped_chars: usize,
    pub dropped_lines: usize,
}

/// Apply the per-tool-type caps to a tool output.
///
/// Character cap wins first; the line cap is computed on the
/// character-truncated text. Idempotent: `truncate(truncate(x)) ==
/// truncate(x)`.
pub fn truncate_output(tool_type: &str, text: &str) -> TruncatedOutput {
    let caps = caps_for(tool_type);
    let total_chars = text.chars().count();
    let total_lines = text.lines().count();

    if total_chars <= caps.max_chars && total_lines <= caps.max_lines {
        return TruncatedOutput {
            text: text.to_string(),
            truncated: false,
            dropped_chars: 0,
            dropped_lines: 0,
        };
    }

    // Character cap, reserving room for the marker line.
    let char_budget = caps.max_chars.saturating_sub(MARKER_RESERVE);
    let mut kept: String = if total_chars > char_budget {
        let end = text
            .char_indices()
            .nth(char_budget)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        text[..end].to_string()
    } else {
        text.to_string()
    };

    // Line cap on the character-truncated text, reserving the marker line.
    let line_budget = caps.max_lines.saturating_sub(1).max(1);
    if kept.lines().count() > line_budget {
        kept = kept
            .lines()
            .take(line_budget)
            .collect::<Vec<_>>()
            .join("\n");
    }

    let kept_chars = kept.chars().count();
    let kept_lines = kept.lines().count();
    let dropped_chars = total_chars.saturating_sub(kept_chars);
    let dropped_lines = total_lines.saturating_sub(kept_lines);

    kept.push_str(&format!(
        "\n[output truncated: {} characters and {} lines dropped]",
        dropped_chars, dropped_lines
    ));

    TruncatedOutput {
        text: kept,
        truncated: true,
        dropped_chars,
        dropped_lines,
    }
}

/// Descriptor returned to the LLM in place of an oversized result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReference {
    /// Always `"file_reference"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Character count of the stored content.
    pub size: usize,
    /// Opaque retrieval handle (`ainu://outputs/<id>`).
    pub path: String,
    /// First lines of the content, capped for context economy.
    pub preview: String,
}

/// In-process store for oversized tool outputs, keyed by opaque handle.
#[derive(Default)]
pub struct OutputStore {
    outputs: Mutex<HashMap<String, String>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park content under a fresh handle and build its descriptor.
    pub fn store(&self, content: String) -> FileReference {
        let id = uuid::Uuid::new_v4().to_string();
        let path = format!("{}://outputs/{}", OUTPUT_SCHEME, id);
        let preview = preview_of(&content);
        let size = content.chars().count();
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.insert(id, content);
        FileReference {
            kind: "file_reference".to_string(),
            size,
            path,
            preview,
        }
    }

    /// Retrieve content by its `ainu://outputs/<id>` handle.
    pub fn retrieve(&self, handle: &str) -> Option<String> {
        let prefix = format!("{}://outputs/", OUTPUT_SCHEME);
        let id = handle.strip_prefix(&prefix)?;
        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.get(id).cloned()
    }

    /// Number of parked outputs.
    pub fn len(&self) -> usize {
        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every parked output (board stop).
    pub fn clear(&self) {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.clear();
    }
}

/// Either an inline (possibly truncated) output or a file reference.
#[derive(Debug, Clone)]
pub enum ProcessedOutput {
    Inline(TruncatedOutput),
    Reference(FileReference),
}

impl ProcessedOutput {
    /// The text actually delivered to the LLM.
    pub fn llm_text(&self) -> String {
        match self {
            ProcessedOutput::Inline(t) => t.text.clone(),
            ProcessedOutput::Reference(r) => {
                serde_json::to_string(r).unwrap_or_else(|_| r.path.clone())
            }
        }
    }
}

/// Route a raw tool output through the caps: oversized results are parked
/// in `store`, everything else is truncated inline.
pub fn process_tool_output(store: &OutputStore, tool_type: &str, text: &str) -> ProcessedOutput {
    if text.chars().count() > FILE_REFERENCE_THRESHOLD {
        ProcessedOutput::Reference(store.store(text.to_string()))
    } else {
        ProcessedOutput::Inline(truncate_output(tool_type, text))
    }
}

fn preview_of(content: &str) -> String {
    let mut preview = content
        .lines()
        .take(PREVIEW_MAX_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    if preview.chars().count() > PREVIEW_MAX_CHARS {
        let end = preview
            .char_indices()
            .nth(PREVIEW_MAX_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(preview.len());
        preview.truncate(end);
    }
    preview
}
