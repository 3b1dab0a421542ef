//! Error types for T-SQL parsing and lineage analysis.
//!
//! # Error Handling Strategy
//!
//! This crate uses two complementary error handling patterns:
//!
//! - [`ParseError`]: Fatal errors raised by the external parser. They stop
//!   processing of the affected batch and are propagated unchanged into the
//!   diagnostic list.
//!
//! - [`crate::types::Diagnostic`]: Non-fatal findings collected during the
//!   walk (unresolved identifiers, ambiguous columns, exceeded budgets).
//!   These are accumulated alongside the partial graph, allowing lineage
//!   extraction to continue when individual references cannot be resolved.
//!
//! [`AnalysisError`] carries the structured error kinds used internally by
//! the graph and context layers. Every non-`Internal` variant is local to
//! the fragment that raised it; only `Internal` aborts the current analysis.

use crate::graph::NodeId;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Error encountered while parsing a T-SQL batch.
///
/// Preserves structured information from the underlying parser, including
/// position information when available.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Human-readable error message.
    pub message: String,
    /// Position where the error occurred, if available.
    pub position: Option<Position>,
    /// The specific category of parse error.
    pub kind: ParseErrorKind,
}

/// Position information for a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

/// Category of parse error for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseErrorKind {
    /// Unexpected token or character in input.
    #[default]
    SyntaxError,
    /// Missing required clause or keyword.
    MissingClause,
    /// Invalid or unexpected end of input.
    UnexpectedEof,
    /// Feature not supported by the parser.
    UnsupportedFeature,
    /// Lexer/tokenization error.
    LexerError,
}

impl ParseError {
    /// Creates a new parse error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
            kind: ParseErrorKind::SyntaxError,
        }
    }

    /// Creates a parse error with position information.
    pub fn with_position(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            position: Some(Position { line, column }),
            kind: ParseErrorKind::SyntaxError,
        }
    }

    /// Sets the error kind.
    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Parses position from the parser's error message format.
    ///
    /// sqlparser uses messages like "Expected ..., found ... at Line: X,
    /// Column: Y". The regex tolerates whitespace variations and returns
    /// `None` when the expected format is not found.
    fn parse_position_from_message(message: &str) -> Option<Position> {
        static POSITION_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = POSITION_REGEX.get_or_init(|| {
            Regex::new(r"Line:\s*(\d+)\s*,\s*Column:\s*(\d+)").expect("Invalid regex pattern")
        });

        re.captures(message).and_then(|caps| {
            let line: usize = caps.get(1)?.as_str().parse().ok()?;
            let column: usize = caps.get(2)?.as_str().parse().ok()?;
            Some(Position { line, column })
        })
    }

    /// Determines the error kind from the message content.
    ///
    /// Relies on patterns in `sqlparser` error messages and may need updates
    /// if those messages change.
    fn infer_kind_from_message(message: &str) -> ParseErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("unexpected end") || lower.contains("eof") {
            ParseErrorKind::UnexpectedEof
        } else if lower.contains("expected") {
            ParseErrorKind::MissingClause
        } else if lower.contains("not supported") || lower.contains("unsupported") {
            ParseErrorKind::UnsupportedFeature
        } else if lower.contains("lexer") || lower.contains("token") {
            ParseErrorKind::LexerError
        } else {
            ParseErrorKind::SyntaxError
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error")?;

        if let Some(pos) = self.position {
            write!(f, " at line {}, column {}", pos.line, pos.column)?;
        }

        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        let message = err.to_string();
        let position = Self::parse_position_from_message(&message);
        let kind = Self::infer_kind_from_message(&message);

        Self {
            message,
            position,
            kind,
        }
    }
}

/// Structured error kinds raised by the graph and context layers.
///
/// Every variant except [`AnalysisError::Internal`] is local: the walk
/// records a diagnostic, produces the best partial graph, and continues.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Raised by the external parser; propagated unchanged.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A column, table, or variable could not be resolved.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// A one-part column name matched more than one in-scope table.
    #[error("column '{column}' is ambiguous across tables: {candidates}")]
    AmbiguousColumn {
        column: String,
        /// Comma-separated candidate table names, sorted for determinism.
        candidates: String,
    },

    /// `add_column` referenced a table node that does not exist.
    #[error("owner table {0} does not exist")]
    UnknownOwner(NodeId),

    /// A depth, time, or fragment budget was exceeded; the walk unwinds and
    /// the result is marked incomplete.
    #[error("analysis budget exceeded: {0}")]
    BudgetExceeded(&'static str),

    /// The cancellation token was signaled.
    #[error("analysis cancelled")]
    Cancelled,

    /// The batch layer rejected new work under memory pressure.
    #[error("memory pressure: new analysis batches are rejected")]
    MemoryPressure,

    /// Invariant violation; fatal for the current analysis only.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position_from_message() {
        let msg = "Expected SELECT, found 'INSERT' at Line: 1, Column: 5";
        let pos = ParseError::parse_position_from_message(msg);
        assert_eq!(pos, Some(Position { line: 1, column: 5 }));
    }

    #[test]
    fn test_parse_position_no_position() {
        let msg = "Unexpected token";
        let pos = ParseError::parse_position_from_message(msg);
        assert_eq!(pos, None);
    }

    #[test]
    fn test_parse_position_no_whitespace() {
        let msg = "Error at Line:3,Column:12";
        let pos = ParseError::parse_position_from_message(msg);
        assert_eq!(
            pos,
            Some(Position {
                line: 3,
                column: 12
            })
        );
    }

    #[test]
    fn test_parse_position_malformed() {
        assert_eq!(
            ParseError::parse_position_from_message("Error at Line: abc, Column: 5"),
            None
        );
        assert_eq!(
            ParseError::parse_position_from_message("Error at Line: 5"),
            None
        );
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(
            ParseError::infer_kind_from_message("Unexpected end of input"),
            ParseErrorKind::UnexpectedEof
        );
        assert_eq!(
            ParseError::infer_kind_from_message("Expected FROM keyword"),
            ParseErrorKind::MissingClause
        );
        assert_eq!(
            ParseError::infer_kind_from_message("Feature not supported"),
            ParseErrorKind::UnsupportedFeature
        );
        assert_eq!(
            ParseError::infer_kind_from_message("Something went wrong"),
            ParseErrorKind::SyntaxError
        );
    }

    #[test]
    fn test_display_with_position() {
        let err = ParseError::with_position("Unexpected token", 10, 5);
        assert_eq!(
            err.to_string(),
            "Parse error at line 10, column 5: Unexpected token"
        );
    }

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::UnknownIdentifier("orders.total".to_string());
        assert_eq!(err.to_string(), "unknown identifier 'orders.total'");

        let err = AnalysisError::BudgetExceeded("depth");
        assert_eq!(err.to_string(), "analysis budget exceeded: depth");
    }

    #[test]
    fn test_error_trait() {
        let err = ParseError::new("Test error");
        let _: &dyn std::error::Error = &err;
        let err = AnalysisError::Cancelled;
        let _: &dyn std::error::Error = &err;
    }
}
