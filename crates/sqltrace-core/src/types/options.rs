//! Analyzer configuration and script requests.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Options controlling analysis behavior and resource budgets.
///
/// All budgets are per-script; concurrency applies to the batch layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalyzerOptions {
    /// AST recursion cap. Subtrees deeper than this are skipped with a
    /// diagnostic; the rest of the walk continues.
    pub max_depth: usize,

    /// Fragment budget per run. Once exceeded, the current handler finishes
    /// and the walk unwinds with the result marked incomplete.
    pub max_fragments: u64,

    /// Wall-clock budget in milliseconds, sampled between fragments.
    pub max_time_ms: u64,

    /// When true, identifier equality preserves case. Defaults to false:
    /// identifiers are case-folded to their canonical form.
    pub case_sensitive_identifiers: bool,

    /// Maximum scripts analyzed concurrently by the batch layer.
    pub max_concurrent_scripts: usize,

    /// Run the compaction post-pass when the walk finishes.
    pub compact_on_finish: bool,

    /// Whether WHERE/HAVING clauses produce `Filter` edges.
    pub emit_filter_edges: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            max_depth: 500,
            max_fragments: 100_000,
            max_time_ms: 60_000,
            case_sensitive_identifiers: false,
            max_concurrent_scripts: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            compact_on_finish: true,
            emit_filter_edges: true,
        }
    }
}

/// A single T-SQL script submitted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScriptRequest {
    /// The T-SQL source text (multi-batch scripts separated by GO lines).
    pub sql: String,

    /// Optional source name (file path or script identifier) for grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl ScriptRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            source_name: None,
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }
}
