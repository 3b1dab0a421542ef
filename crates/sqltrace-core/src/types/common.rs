//! Shared types for diagnostics and analysis summaries.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stable diagnostic codes reported during analysis.
///
/// These strings are part of the external contract; consumers match on them
/// programmatically.
pub mod diagnostic_codes {
    /// The parser rejected a batch.
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// A table, column, or variable could not be resolved.
    pub const UNKNOWN_IDENTIFIER: &str = "UNKNOWN_IDENTIFIER";
    /// A one-part column name matched more than one in-scope table.
    pub const AMBIGUOUS_COLUMN: &str = "AMBIGUOUS_COLUMN";
    /// A depth, fragment, or time budget was exceeded.
    pub const BUDGET_EXCEEDED: &str = "BUDGET_EXCEEDED";
    /// The cancellation token was signaled mid-walk.
    pub const CANCELLED: &str = "CANCELLED";
    /// The batch layer rejected work under memory pressure.
    pub const MEMORY_PRESSURE: &str = "MEMORY_PRESSURE";
    /// A construct the analyzer recognizes but does not extract lineage from.
    pub const UNSUPPORTED_SYNTAX: &str = "UNSUPPORTED_SYNTAX";
    /// An internal invariant was violated; the current analysis was aborted.
    pub const INTERNAL: &str = "INTERNAL";
}

/// A byte-offset range in the source SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A non-fatal finding recorded during analysis.
///
/// Diagnostics accompany the partial graph: analysis continues past every
/// diagnostic except an internal invariant violation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostic {
    /// Severity of the finding.
    pub severity: Severity,
    /// Stable code from [`diagnostic_codes`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Zero-based index of the statement the finding belongs to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_index: Option<usize>,
    /// Location of the offending construct in the source SQL, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            statement_index: None,
            span: None,
        }
    }

    /// Attaches the statement index.
    pub fn with_statement(mut self, index: usize) -> Self {
        self.statement_index = Some(index);
        self
    }

    /// Attaches a source span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Diagnostic counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DiagnosticCount {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl DiagnosticCount {
    /// Tallies a slice of diagnostics.
    pub fn tally(diagnostics: &[Diagnostic]) -> Self {
        let mut count = Self::default();
        for diagnostic in diagnostics {
            match diagnostic.severity {
                Severity::Error => count.errors += 1,
                Severity::Warning => count.warnings += 1,
                Severity::Info => count.infos += 1,
            }
        }
        count
    }
}

/// Summary statistics for one analysis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    /// Number of statements analyzed across all batches.
    pub statement_count: usize,
    /// Table nodes in the final graph.
    pub table_count: usize,
    /// Column nodes in the final graph.
    pub column_count: usize,
    /// Expression nodes in the final graph.
    pub expression_count: usize,
    /// Edges in the final graph.
    pub edge_count: usize,
    /// Diagnostic counts by severity.
    pub diagnostic_count: DiagnosticCount,
    /// True when a budget or cancellation cut the walk short.
    pub incomplete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_builders() {
        let d = Diagnostic::warning(diagnostic_codes::UNKNOWN_IDENTIFIER, "no such table")
            .with_statement(2)
            .with_span(Span::new(10, 15));
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.code, diagnostic_codes::UNKNOWN_IDENTIFIER);
        assert_eq!(d.statement_index, Some(2));
        assert_eq!(d.span, Some(Span::new(10, 15)));
    }

    #[test]
    fn test_diagnostic_count_tally() {
        let diagnostics = vec![
            Diagnostic::error(diagnostic_codes::PARSE_ERROR, "bad"),
            Diagnostic::warning(diagnostic_codes::AMBIGUOUS_COLUMN, "which"),
            Diagnostic::warning(diagnostic_codes::UNKNOWN_IDENTIFIER, "who"),
            Diagnostic::info(diagnostic_codes::UNSUPPORTED_SYNTAX, "skip"),
        ];
        let count = DiagnosticCount::tally(&diagnostics);
        assert_eq!(count.errors, 1);
        assert_eq!(count.warnings, 2);
        assert_eq!(count.infos, 1);
    }

    #[test]
    fn test_diagnostic_serialization() {
        let d = Diagnostic::error(diagnostic_codes::PARSE_ERROR, "bad token").with_statement(0);
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"severity\":\"error\""));
        assert!(json.contains("\"code\":\"PARSE_ERROR\""));
        assert!(!json.contains("span"));

        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back.statement_index, Some(0));
    }
}
