//! The analysis result surface.

use serde::{Deserialize, Serialize};

use crate::graph::LineageGraph;
use crate::intern::StringInterner;
use crate::types::common::{Diagnostic, DiagnosticCount, Summary};
use std::sync::Arc;

/// The terminal artifact of one script analysis: the lineage graph plus the
/// diagnostics and summary gathered while building it.
///
/// A budget overrun or cancellation yields the best partial graph with
/// `summary.incomplete == true`; consumers should treat such graphs as a
/// lower bound on the real lineage.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Optional source name (file path or script identifier) for grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    /// The lineage graph.
    pub graph: LineageGraph,

    /// All findings recorded during the walk, in encounter order.
    pub diagnostics: Vec<Diagnostic>,

    /// Summary statistics.
    pub summary: Summary,
}

impl AnalysisResult {
    /// True when a budget or cancellation cut the walk short.
    pub fn is_incomplete(&self) -> bool {
        self.summary.incomplete
    }

    /// Builds a result carrying only an error diagnostic, for entry points
    /// that fail before any walk starts.
    pub fn from_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        let diagnostics = vec![Diagnostic::error(code, message)];
        let summary = Summary {
            diagnostic_count: DiagnosticCount::tally(&diagnostics),
            incomplete: true,
            ..Summary::default()
        };
        Self {
            source_name: None,
            graph: LineageGraph::new(Arc::new(StringInterner::new()), false),
            diagnostics,
            summary,
        }
    }
}
