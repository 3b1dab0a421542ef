//! Identifier utilities shared across the analyzer.
//!
//! T-SQL identifiers can be quoted with double quotes or square brackets and
//! qualified with up to four dot-separated parts. These helpers split and
//! unquote multipart names without being confused by dots inside quotes, and
//! locate identifiers in source text for diagnostic spans.

use crate::types::Span;
use regex::Regex;
use sqlparser::ast::ObjectName;

/// Splits a possibly-qualified identifier into its parts, respecting
/// `"double quoted"`, `[bracketed]`, `` `backticked` ``, and `'quoted'`
/// segments. Quote characters are preserved on each part.
pub fn split_qualified_identifiers(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = name.chars().peekable();
    let mut closing_quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(quote) = closing_quote {
            current.push(ch);
            if ch == quote {
                // Doubled closing characters escape themselves inside
                // quoted segments ("a""b", [a]]b]).
                if chars.peek() == Some(&quote) {
                    current.push(chars.next().unwrap());
                    continue;
                }
                closing_quote = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' | '`' => {
                closing_quote = Some(ch);
                current.push(ch);
            }
            '[' => {
                closing_quote = Some(']');
                current.push(ch);
            }
            '.' => {
                if !current.is_empty() {
                    parts.push(current.trim().to_string());
                    current.clear();
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current.trim().to_string());
    }
    if parts.is_empty() && !name.is_empty() {
        parts.push(name.trim().to_string());
    }
    parts
}

/// True when the part is wrapped in a recognized quote pair.
pub fn is_quoted_identifier(part: &str) -> bool {
    let trimmed = part.trim();
    if trimmed.len() < 2 {
        return false;
    }
    let first = trimmed.chars().next().unwrap();
    let last = trimmed.chars().last().unwrap();
    matches!(
        (first, last),
        ('"', '"') | ('[', ']') | ('`', '`') | ('\'', '\'')
    )
}

/// Strips one layer of quoting from an identifier part.
pub fn unquote_identifier(part: &str) -> String {
    let trimmed = part.trim();
    if is_quoted_identifier(trimmed) {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Splits and unquotes a multipart name in one pass.
pub fn identifier_parts(name: &str) -> Vec<String> {
    split_qualified_identifiers(name)
        .iter()
        .map(|part| unquote_identifier(part))
        .collect()
}

/// Unquoted parts of a parsed object name.
pub fn object_name_parts(name: &ObjectName) -> Vec<String> {
    identifier_parts(&name.to_string())
}

/// The last (table or column) part of a possibly-qualified name.
pub fn simple_name(name: &str) -> String {
    identifier_parts(name)
        .pop()
        .unwrap_or_else(|| name.trim().to_string())
}

/// Finds the byte span of an identifier in SQL text, searching from
/// `search_start`. The parser does not expose node locations, so spans are
/// approximated by a case-insensitive whole-word text search.
pub fn find_identifier_span(sql: &str, identifier: &str, search_start: usize) -> Option<Span> {
    if identifier.is_empty() || search_start >= sql.len() {
        return None;
    }
    let haystack = &sql[search_start..];

    let pattern = format!(r"(?i)\b{}\b", regex::escape(identifier));
    if let Ok(re) = Regex::new(&pattern) {
        if let Some(found) = re.find(haystack) {
            return Some(Span::new(
                search_start + found.start(),
                search_start + found.end(),
            ));
        }
    }

    // Identifiers like `@v` or `#tmp` defeat word boundaries; fall back to a
    // plain case-insensitive search.
    let lowered = haystack.to_lowercase();
    lowered.find(&identifier.to_lowercase()).map(|pos| {
        Span::new(search_start + pos, search_start + pos + identifier.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain() {
        assert_eq!(
            split_qualified_identifiers("dbo.Orders"),
            vec!["dbo".to_string(), "Orders".to_string()]
        );
        assert_eq!(split_qualified_identifiers("Orders"), vec!["Orders".to_string()]);
    }

    #[test]
    fn test_split_bracketed() {
        assert_eq!(
            split_qualified_identifiers("[My Db].[dbo].[Order Details]"),
            vec![
                "[My Db]".to_string(),
                "[dbo]".to_string(),
                "[Order Details]".to_string()
            ]
        );
    }

    #[test]
    fn test_split_quoted_dot() {
        // A dot inside quotes is not a separator.
        assert_eq!(
            split_qualified_identifiers(r#""a.b".c"#),
            vec![r#""a.b""#.to_string(), "c".to_string()]
        );
        assert_eq!(
            split_qualified_identifiers("[a.b].c"),
            vec!["[a.b]".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote_identifier("[Order Details]"), "Order Details");
        assert_eq!(unquote_identifier("\"Orders\""), "Orders");
        assert_eq!(unquote_identifier("Orders"), "Orders");
    }

    #[test]
    fn test_identifier_parts() {
        assert_eq!(
            identifier_parts("[dbo].[Orders]"),
            vec!["dbo".to_string(), "Orders".to_string()]
        );
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("dbo.Orders"), "Orders");
        assert_eq!(simple_name("[dbo].[Order Details]"), "Order Details");
        assert_eq!(simple_name("t"), "t");
    }

    #[test]
    fn test_find_identifier_span() {
        let sql = "SELECT users_id FROM users WHERE id = 1";
        let span = find_identifier_span(sql, "users", 0).unwrap();
        assert_eq!(&sql[span.start..span.end].to_lowercase(), "users");
        assert_eq!(span.start, 21);

        assert_eq!(find_identifier_span(sql, "orders", 0), None);
        assert_eq!(find_identifier_span(sql, "", 0), None);
    }

    #[test]
    fn test_find_identifier_span_variable() {
        let sql = "SET @total = @total + 1";
        let span = find_identifier_span(sql, "@total", 0).unwrap();
        assert_eq!(&sql[span.start..span.end], "@total");
    }

    #[test]
    fn test_find_identifier_span_offset() {
        let sql = "SELECT a FROM t; SELECT a FROM t";
        let span = find_identifier_span(sql, "t", 16).unwrap();
        assert!(span.start > 16);
    }
}
