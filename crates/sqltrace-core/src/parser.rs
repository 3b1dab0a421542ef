//! Thin wrapper around the external T-SQL parser.
//!
//! The core never parses characters itself: this module splits a script
//! into its `GO`-separated batches, hands each batch to `sqlparser` with
//! the MS SQL dialect, and converts parser failures into [`ParseError`].

use crate::error::ParseError;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use std::sync::OnceLock;

/// One `GO`-separated batch of a script.
#[derive(Debug)]
pub struct ScriptBatch<'a> {
    /// The batch text, GO line excluded.
    pub sql: &'a str,
    /// Byte offset of the batch within the original script.
    pub offset: usize,
    /// Parsed statements, or the parse failure for this batch. A failure in
    /// one batch does not stop the others.
    pub result: Result<Vec<Statement>, ParseError>,
}

/// Matches a T-SQL batch separator: `GO` alone on a line, optionally with a
/// repeat count and a trailing line comment.
fn is_go_line(line: &str) -> bool {
    static GO_LINE: OnceLock<Regex> = OnceLock::new();
    let re = GO_LINE.get_or_init(|| {
        Regex::new(r"(?i)^[ \t]*go([ \t]+\d+)?[ \t]*(--.*)?$").expect("Invalid regex pattern")
    });
    re.is_match(line)
}

/// Splits a script into its batches at `GO` lines.
///
/// Batch boundaries are line-based, per T-SQL rules (`GO` must stand alone
/// on its line). Empty batches are dropped.
pub fn split_batches(script: &str) -> Vec<(usize, &str)> {
    let mut batches = Vec::new();
    let mut batch_start = 0;
    let mut cursor = 0;

    for line in script.split_inclusive('\n') {
        if is_go_line(line.trim_end_matches(['\n', '\r'])) {
            push_batch(script, batch_start, cursor, &mut batches);
            batch_start = cursor + line.len();
        }
        cursor += line.len();
    }
    push_batch(script, batch_start, script.len(), &mut batches);
    batches
}

fn push_batch<'a>(script: &'a str, start: usize, end: usize, batches: &mut Vec<(usize, &'a str)>) {
    let slice = &script[start..end];
    if !slice.trim().is_empty() {
        batches.push((start, slice));
    }
}

/// Parses one batch with the MS SQL dialect.
pub fn parse_batch(sql: &str) -> Result<Vec<Statement>, ParseError> {
    Parser::parse_sql(&MsSqlDialect {}, sql).map_err(ParseError::from)
}

/// Splits a script into batches and parses each one.
pub fn parse_script(script: &str) -> Vec<ScriptBatch<'_>> {
    split_batches(script)
        .into_iter()
        .map(|(offset, sql)| ScriptBatch {
            sql,
            offset,
            result: parse_batch(sql),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_batch() {
        let batches = parse_script("SELECT a FROM t");
        assert_eq!(batches.len(), 1);
        let statements = batches[0].result.as_ref().unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_split_on_go() {
        let script = "SELECT a FROM t\nGO\nSELECT b FROM u\ngo 3\nSELECT c FROM v";
        let batches = split_batches(script);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].1.trim(), "SELECT a FROM t");
        assert_eq!(batches[1].1.trim(), "SELECT b FROM u");
        assert_eq!(batches[2].1.trim(), "SELECT c FROM v");
        // Offsets index into the original script.
        assert_eq!(&script[batches[1].0..], "SELECT b FROM u\ngo 3\nSELECT c FROM v");
    }

    #[test]
    fn test_go_requires_own_line() {
        let script = "SELECT going FROM t WHERE x = 'go now'";
        assert_eq!(split_batches(script).len(), 1);
    }

    #[test]
    fn test_go_with_comment() {
        let script = "SELECT a FROM t\nGO -- end of batch\nSELECT b FROM u";
        assert_eq!(split_batches(script).len(), 2);
    }

    #[test]
    fn test_empty_batches_dropped() {
        let script = "GO\n\nGO\nSELECT a FROM t\nGO";
        let batches = split_batches(script);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_parse_error_is_local_to_batch() {
        let script = "SELECT FROM\nGO\nSELECT a FROM t";
        let batches = parse_script(script);
        assert_eq!(batches.len(), 2);
        assert!(batches[0].result.is_err());
        assert!(batches[1].result.is_ok());
    }

    #[test]
    fn test_bracketed_identifiers_parse() {
        let batches = parse_script("SELECT [Order Id] FROM [dbo].[Orders]");
        assert!(batches[0].result.is_ok());
    }

    #[test]
    fn test_declare_and_set_parse() {
        let script = "DECLARE @v INT = 5;\nSET @v = @v + 1;";
        let batches = parse_script(script);
        let statements = batches[0].result.as_ref().unwrap();
        assert_eq!(statements.len(), 2);
    }
}
