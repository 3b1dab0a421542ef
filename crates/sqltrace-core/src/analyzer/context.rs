//! Per-analysis state: scopes, registries, resolution, and budgets.
//!
//! The context carries everything one walk needs that is not the graph
//! itself: the lexical scope stack, alias and table registries, variable
//! bindings, processing flags, and the cancellation/budget machinery that
//! [`should_stop`](AnalysisContext::should_stop) samples between fragments.
//!
//! Variables are modeled as degenerate columns under a synthetic owner
//! table (`@@Variables`, or the current procedure when inside one), so
//! assignments participate in the same lineage graph as real columns.

use crate::analyzer::helpers::{find_identifier_span, identifier_parts};
use crate::batch::CancellationToken;
use crate::catalog::SchemaCatalog;
use crate::error::AnalysisError;
use crate::graph::{ColumnFlags, LineageGraph, NodeId, TableType};
use crate::intern::StringInterner;
use crate::types::{diagnostic_codes, AnalyzerOptions, Diagnostic};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the synthetic table owning script-level variables.
pub const VARIABLES_OWNER: &str = "@@Variables";

/// Kind of a lexical scope frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Batch,
    Procedure,
    Function,
    Block,
    If,
    While,
    TryCatch,
    Query,
}

/// One frame of the scope stack.
#[derive(Debug)]
pub struct ScopeFrame {
    pub kind: ScopeKind,
    pub name: Option<Arc<str>>,
    variables: HashMap<Arc<str>, NodeId>,
    aliases: HashMap<Arc<str>, Arc<str>>,
    tables: Vec<NodeId>,
}

impl ScopeFrame {
    fn new(kind: ScopeKind, name: Option<Arc<str>>) -> Self {
        Self {
            kind,
            name,
            variables: HashMap::new(),
            aliases: HashMap::new(),
            tables: Vec::new(),
        }
    }
}

/// A named scratch state with a typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Bool(bool),
    Text(Arc<str>),
    Node(NodeId),
}

/// Where the projection currently being processed writes its columns.
///
/// Pushed by the statement handlers (top-level query, INSERT, CTE body,
/// derived table) and consumed by the SELECT handler.
#[derive(Debug, Clone)]
pub struct QuerySink {
    /// Target table receiving projection columns. `None` discards lineage
    /// (used for subqueries walked only for discovery).
    pub table: Option<NodeId>,
    /// Explicit positional target column names (INSERT column list, CTE
    /// column list). When absent, names derive from aliases.
    pub columns: Option<Vec<Arc<str>>>,
    /// Operation label for identity edges ("select", "insert", ...).
    pub verb: &'static str,
    /// Set-operation right arm: link item `i` to `pair_with[i]` instead of
    /// creating target columns.
    pub pair_with: Option<Vec<NodeId>>,
    /// Forced operation for set-operation edges ("union", ...).
    pub setop: Option<&'static str>,
    /// Target columns produced so far, in ordinal order.
    pub produced: Vec<NodeId>,
}

impl QuerySink {
    pub fn table(table: NodeId, verb: &'static str) -> Self {
        Self {
            table: Some(table),
            columns: None,
            verb,
            pair_with: None,
            setop: None,
            produced: Vec::new(),
        }
    }

    /// A sink that registers sources but records no projection lineage.
    pub fn discard() -> Self {
        Self {
            table: None,
            columns: None,
            verb: "select",
            pair_with: None,
            setop: None,
            produced: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<Arc<str>>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Transient state for a single script analysis.
pub struct AnalysisContext<'a> {
    pub options: &'a AnalyzerOptions,
    pub catalog: &'a dyn SchemaCatalog,
    pub graph: LineageGraph,
    pub diagnostics: Vec<Diagnostic>,

    /// Zero-based index of the statement being walked.
    pub statement_index: usize,
    /// Byte offset of the current batch in the script, for span search.
    pub batch_offset: usize,
    /// Procedure node when walking a procedure body.
    pub current_procedure: Option<NodeId>,
    pub processing_cte: bool,
    pub processing_with: bool,
    /// True once a budget or cancellation has cut the walk short.
    pub incomplete: bool,

    script: &'a str,
    scopes: Vec<ScopeFrame>,
    regular_tables: HashMap<Arc<str>, NodeId>,
    temp_tables: HashMap<Arc<str>, NodeId>,
    table_variables: HashMap<Arc<str>, NodeId>,
    ctes: HashMap<Arc<str>, NodeId>,
    states: HashMap<Arc<str>, StateValue>,
    sink_stack: Vec<QuerySink>,
    /// ORDER BY column names stashed by the query handler for the SELECT
    /// handler, which owns the scope they resolve in.
    pub pending_order_by: Vec<String>,

    expression_seq: u64,
    fragments_visited: u64,
    started: Instant,
    time_budget: Duration,
    cancel: CancellationToken,
    stop_reported: bool,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(
        options: &'a AnalyzerOptions,
        catalog: &'a dyn SchemaCatalog,
        interner: Arc<StringInterner>,
        script: &'a str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            catalog,
            graph: LineageGraph::new(interner, options.case_sensitive_identifiers),
            diagnostics: Vec::new(),
            statement_index: 0,
            batch_offset: 0,
            current_procedure: None,
            processing_cte: false,
            processing_with: false,
            incomplete: false,
            script,
            scopes: vec![ScopeFrame::new(ScopeKind::Global, None)],
            regular_tables: HashMap::new(),
            temp_tables: HashMap::new(),
            table_variables: HashMap::new(),
            ctes: HashMap::new(),
            states: HashMap::new(),
            sink_stack: Vec::new(),
            pending_order_by: Vec::new(),
            expression_seq: 0,
            fragments_visited: 0,
            started: Instant::now(),
            time_budget: Duration::from_millis(options.max_time_ms),
            cancel,
            stop_reported: false,
        }
    }

    // --- Scope discipline ---

    pub fn push_scope(&mut self, kind: ScopeKind, name: Option<&str>) {
        let name = name.map(|n| self.graph.canonical(n));
        self.scopes.push(ScopeFrame::new(kind, name));
    }

    /// Pops the innermost scope. Popping the global scope is a no-op.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn scope_kind(&self) -> ScopeKind {
        self.scopes.last().map(|frame| frame.kind).unwrap_or(ScopeKind::Global)
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    // --- Variables ---

    /// The table owning newly declared variables: the current procedure, or
    /// the synthetic `@@Variables` table.
    pub fn variables_owner(&mut self) -> NodeId {
        match self.current_procedure {
            Some(procedure) => procedure,
            None => {
                let owner = self
                    .graph
                    .add_table(VARIABLES_OWNER, TableType::TableVar, None, None);
                self.graph.mark_output(owner);
                owner
            }
        }
    }

    /// Declares a variable in the innermost scope (or globally when the
    /// current scope is the global one) and returns its column node.
    pub fn declare_variable(&mut self, name: &str, data_type: Option<&str>) -> NodeId {
        let owner = self.variables_owner();
        let resolved_type = data_type.map(|t| self.catalog.resolve_type(t));
        let column = self
            .graph
            .add_column(owner, name, resolved_type.as_deref(), ColumnFlags::default())
            .expect("variables owner is always a table");
        self.graph.mark_output(column);

        let key = self.graph.canonical(name);
        if let Some(frame) = self.scopes.last_mut() {
            frame.variables.insert(key, column);
        }
        column
    }

    /// Resolves a variable for writing: the nearest enclosing frame that
    /// owns the name, or a fresh declaration in the current scope.
    pub fn set_variable(&mut self, name: &str) -> NodeId {
        if let Some(existing) = self.get_variable(name) {
            return existing;
        }
        self.declare_variable(name, None)
    }

    /// Binds an existing column (a procedure parameter) as a variable in
    /// the innermost scope.
    pub fn bind_parameter(&mut self, name: &str, column: NodeId) {
        let key = self.graph.canonical(name);
        if let Some(frame) = self.scopes.last_mut() {
            frame.variables.insert(key, column);
        }
    }

    /// Resolves a variable for reading, walking the scope chain inward-out.
    pub fn get_variable(&self, name: &str) -> Option<NodeId> {
        let key = self.graph.canonical(name);
        self.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.variables.get(&key).copied())
    }

    // --- Aliases and table registries ---

    /// Registers `alias` for `table_name` in the innermost scope.
    pub fn add_table_alias(&mut self, alias: &str, table_name: &str) {
        let alias = self.graph.canonical(alias);
        let canonical = self.graph.canonical(table_name);
        if let Some(frame) = self.scopes.last_mut() {
            frame.aliases.insert(alias, canonical);
        }
    }

    /// Resolves an alias to its canonical table name, or returns the input
    /// (canonicalized) unchanged when no mapping exists.
    pub fn resolve_alias(&self, name_or_alias: &str) -> Arc<str> {
        let key = self.graph.canonical(name_or_alias);
        for frame in self.scopes.iter().rev() {
            if let Some(canonical) = frame.aliases.get(&key) {
                return canonical.clone();
            }
        }
        key
    }

    /// Registers a table node under its canonical name, routed by prefix:
    /// `#name` to the temp registry, `@name` to table variables, everything
    /// else to the regular registry.
    pub fn register_table(&mut self, name: &str, id: NodeId) {
        let key = self.graph.canonical(name);
        if name.starts_with('#') {
            self.temp_tables.insert(key, id);
        } else if name.starts_with('@') {
            self.table_variables.insert(key, id);
        } else {
            self.regular_tables.insert(key, id);
        }
    }

    /// Registers a CTE binding. CTE names are checked before regular tables
    /// during resolution.
    pub fn register_cte(&mut self, name: &str, id: NodeId) {
        let key = self.graph.canonical(name);
        self.ctes.insert(key, id);
    }

    /// Looks up a registered table by canonical name, CTEs first.
    pub fn lookup_table(&self, name: &str) -> Option<NodeId> {
        let key = self.graph.canonical(name);
        self.ctes
            .get(&key)
            .or_else(|| self.temp_tables.get(&key))
            .or_else(|| self.table_variables.get(&key))
            .or_else(|| self.regular_tables.get(&key))
            .copied()
    }

    /// Makes a table visible in the innermost scope for column resolution.
    pub fn bring_into_scope(&mut self, id: NodeId) {
        if let Some(frame) = self.scopes.last_mut() {
            if !frame.tables.contains(&id) {
                frame.tables.push(id);
            }
        }
    }

    /// Tables visible for one-part column resolution: the innermost scope
    /// frame that has any, so correlated subqueries see enclosing tables.
    pub fn tables_in_scope(&self) -> Vec<NodeId> {
        for frame in self.scopes.iter().rev() {
            if !frame.tables.is_empty() {
                return frame.tables.clone();
            }
        }
        Vec::new()
    }

    /// Resolves a table reference (alias, CTE, temp, variable, or regular),
    /// creating a node on first mention. Catalog metadata populates columns
    /// when available; otherwise a stub table is created and a diagnostic
    /// recorded.
    pub fn resolve_or_create_table(&mut self, name: &str) -> NodeId {
        let resolved = if identifier_parts(name).len() == 1 {
            self.resolve_alias(name).to_string()
        } else {
            name.to_string()
        };

        let parts = identifier_parts(&resolved);
        let key = parts.join(".");
        if let Some(existing) = self.lookup_table(&key) {
            self.bring_into_scope(existing);
            return existing;
        }

        let id = self.create_table_node(&parts, &key);
        self.register_table(&key, id);
        self.bring_into_scope(id);
        id
    }

    fn create_table_node(&mut self, parts: &[String], key: &str) -> NodeId {
        let (database, schema, name) = match parts {
            [name] => (None, None, name.as_str()),
            [schema, name] => (None, Some(schema.as_str()), name.as_str()),
            [database, schema, name, ..] => {
                (Some(database.as_str()), Some(schema.as_str()), name.as_str())
            }
            [] => (None, None, key),
        };

        let table_type = if name.starts_with('#') {
            TableType::Temp
        } else if name.starts_with('@') {
            TableType::TableVar
        } else {
            TableType::Base
        };

        // Try the catalog under the given key, then under the default
        // schema for bare names.
        let mut catalog_key = key.to_string();
        let mut metadata = self.catalog.get_table(&catalog_key);
        if metadata.is_none() && schema.is_none() && table_type == TableType::Base {
            let qualified = format!("dbo.{name}");
            if let Some(found) = self.catalog.get_table(&qualified) {
                metadata = Some(found);
                catalog_key = qualified;
            }
        }

        let id = match metadata {
            Some(table) => {
                let id = self.graph.add_table(
                    &table.name,
                    table_type,
                    table.schema.as_deref().or(schema),
                    table.database.as_deref().or(database),
                );
                for column in self.catalog.get_columns(&catalog_key) {
                    let data_type = column.data_type.as_deref().map(|t| self.catalog.resolve_type(t));
                    let flags = ColumnFlags {
                        nullable: column.nullable,
                        ..ColumnFlags::default()
                    };
                    let _ = self.graph.add_column(id, &column.name, data_type.as_deref(), flags);
                }
                id
            }
            None => {
                if table_type == TableType::Base {
                    let diagnostic = Diagnostic::info(
                        diagnostic_codes::UNKNOWN_IDENTIFIER,
                        format!("Table '{key}' is not in the schema catalog; columns will be inferred"),
                    )
                    .with_statement(self.statement_index);
                    self.report_with_span(diagnostic, key);
                }
                self.graph.add_table(name, table_type, schema, database)
            }
        };
        id
    }

    /// Resolves a multipart column reference to `(table_id, column_id)`.
    ///
    /// One-part names resolve against in-scope tables; ambiguity attaches a
    /// stub to the first candidate and records a diagnostic. Unknown columns
    /// on known tables become synthetic stub columns so `SELECT *` lineage
    /// can still link. Variable references (`@name`) resolve through the
    /// scope chain.
    pub fn resolve_column(&mut self, parts: &[String]) -> Option<(NodeId, NodeId)> {
        match parts {
            [] => None,
            [single] if single.starts_with('@') => {
                let column = match self.get_variable(single) {
                    Some(column) => column,
                    None => {
                        let diagnostic = Diagnostic::info(
                            diagnostic_codes::UNKNOWN_IDENTIFIER,
                            format!("Variable '{single}' used before DECLARE"),
                        )
                        .with_statement(self.statement_index);
                        self.report_with_span(diagnostic, single);
                        self.declare_variable(single, None)
                    }
                };
                let owner = self.column_owner(column)?;
                Some((owner, column))
            }
            [column] => self.resolve_unqualified(column),
            parts => {
                let (table_parts, column) = parts.split_at(parts.len() - 1);
                let table_name = table_parts.join(".");
                let table = self.resolve_or_create_table(&table_name);
                let column = self.column_or_stub(table, &column[0]);
                Some((table, column))
            }
        }
    }

    fn resolve_unqualified(&mut self, column: &str) -> Option<(NodeId, NodeId)> {
        let in_scope = self.tables_in_scope();
        if in_scope.is_empty() {
            let diagnostic = Diagnostic::warning(
                diagnostic_codes::UNKNOWN_IDENTIFIER,
                format!("Column '{column}' referenced with no tables in scope"),
            )
            .with_statement(self.statement_index);
            self.report_with_span(diagnostic, column);
            return None;
        }

        let candidates: Vec<NodeId> = in_scope
            .iter()
            .copied()
            .filter(|table| self.graph.column_of(*table, column).is_some())
            .collect();

        match candidates.as_slice() {
            [table] => {
                let column = self.graph.column_of(*table, column).unwrap();
                Some((*table, column))
            }
            [] => {
                // Unknown column: attach a stub to the only table in scope,
                // or the first one with a diagnostic.
                let table = in_scope[0];
                if in_scope.len() > 1 {
                    let diagnostic = Diagnostic::warning(
                        diagnostic_codes::UNKNOWN_IDENTIFIER,
                        format!(
                            "Column '{column}' not found in any in-scope table; attaching to the first"
                        ),
                    )
                    .with_statement(self.statement_index);
                    self.report_with_span(diagnostic, column);
                }
                Some((table, self.column_or_stub(table, column)))
            }
            [first, ..] => {
                let mut names: Vec<String> = candidates
                    .iter()
                    .filter_map(|table| self.graph.node(*table))
                    .map(|node| node.kind.name().to_string())
                    .collect();
                names.sort();
                let diagnostic = Diagnostic::warning(
                    diagnostic_codes::AMBIGUOUS_COLUMN,
                    AnalysisError::AmbiguousColumn {
                        column: column.to_string(),
                        candidates: names.join(", "),
                    }
                    .to_string(),
                )
                .with_statement(self.statement_index);
                self.report_with_span(diagnostic, column);
                let table = *first;
                Some((table, self.column_or_stub(table, column)))
            }
        }
    }

    /// Existing column, or a synthetic stub on the table.
    pub fn column_or_stub(&mut self, table: NodeId, column: &str) -> NodeId {
        if let Some(existing) = self.graph.column_of(table, column) {
            return existing;
        }
        self.graph
            .add_column(table, column, None, ColumnFlags::synthetic())
            .expect("stub owner is always a table")
    }

    fn column_owner(&self, column: NodeId) -> Option<NodeId> {
        match self.graph.node(column).map(|node| &node.kind) {
            Some(crate::graph::NodeKind::Column(c)) => Some(c.owner_table_id),
            _ => None,
        }
    }

    // --- Sinks ---

    pub fn push_sink(&mut self, sink: QuerySink) {
        self.sink_stack.push(sink);
    }

    pub fn pop_sink(&mut self) -> Option<QuerySink> {
        self.sink_stack.pop()
    }

    pub fn current_sink_mut(&mut self) -> Option<&mut QuerySink> {
        self.sink_stack.last_mut()
    }

    // --- Scratch states ---

    pub fn set_state(&mut self, key: &str, value: StateValue) {
        let key = self.graph.intern(key);
        self.states.insert(key, value);
    }

    pub fn state(&self, key: &str) -> Option<&StateValue> {
        self.states.get(key)
    }

    // --- Expression naming ---

    /// Mints a diagnostic-friendly name for a synthetic expression node.
    pub fn next_expression_name(&mut self, prefix: &str) -> String {
        self.expression_seq += 1;
        format!("{prefix}_{}", self.expression_seq)
    }

    // --- Diagnostics ---

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Records a diagnostic, attaching a best-effort source span for the
    /// identifier.
    pub fn report_with_span(&mut self, diagnostic: Diagnostic, identifier: &str) {
        let with_span = match find_identifier_span(self.script, identifier, self.batch_offset) {
            Some(span) => diagnostic.with_span(span),
            None => diagnostic,
        };
        self.diagnostics.push(with_span);
    }

    // --- Budgets and cancellation ---

    /// Counts one visited fragment.
    pub fn note_fragment(&mut self) {
        self.fragments_visited += 1;
    }

    pub fn fragments_visited(&self) -> u64 {
        self.fragments_visited
    }

    /// True when cancellation was requested or a budget is exhausted. The
    /// engine samples this between fragments; handlers finish their current
    /// sub-step before unwinding. The first trip records a diagnostic and
    /// marks the result incomplete.
    pub fn should_stop(&mut self) -> bool {
        if self.stop_reported {
            return true;
        }
        let reason = if self.cancel.is_cancelled() {
            Some((diagnostic_codes::CANCELLED, "analysis cancelled".to_string()))
        } else if self.fragments_visited > self.options.max_fragments {
            Some((
                diagnostic_codes::BUDGET_EXCEEDED,
                format!("fragment budget of {} exceeded", self.options.max_fragments),
            ))
        } else if self.started.elapsed() >= self.time_budget {
            Some((
                diagnostic_codes::BUDGET_EXCEEDED,
                format!("time budget of {} ms exceeded", self.options.max_time_ms),
            ))
        } else {
            None
        };

        if let Some((code, message)) = reason {
            self.stop_reported = true;
            self.incomplete = true;
            let diagnostic =
                Diagnostic::warning(code, message).with_statement(self.statement_index);
            self.diagnostics.push(diagnostic);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EmptyCatalog, MemoryCatalog};
    use crate::graph::NodeKind;

    fn options() -> AnalyzerOptions {
        AnalyzerOptions::default()
    }

    fn context<'a>(options: &'a AnalyzerOptions, catalog: &'a dyn SchemaCatalog) -> AnalysisContext<'a> {
        AnalysisContext::new(
            options,
            catalog,
            Arc::new(StringInterner::new()),
            "",
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_pop_global_scope_is_noop() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        assert_eq!(ctx.scope_depth(), 1);
        ctx.pop_scope();
        ctx.pop_scope();
        assert_eq!(ctx.scope_depth(), 1);
        assert_eq!(ctx.scope_kind(), ScopeKind::Global);
    }

    #[test]
    fn test_variable_scoping() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);

        let global = ctx.declare_variable("@g", Some("INT"));
        ctx.push_scope(ScopeKind::Procedure, Some("p"));
        let local = ctx.declare_variable("@x", None);

        // Inner scope sees both; set resolves to the owning frame.
        assert_eq!(ctx.get_variable("@g"), Some(global));
        assert_eq!(ctx.get_variable("@X"), Some(local));
        assert_eq!(ctx.set_variable("@g"), global);

        ctx.pop_scope();
        // Scoped variable left visibility; global persists.
        assert_eq!(ctx.get_variable("@x"), None);
        assert_eq!(ctx.get_variable("@g"), Some(global));

        // SET on an unknown name creates it in the current scope.
        let fresh = ctx.set_variable("@fresh");
        assert_eq!(ctx.get_variable("@fresh"), Some(fresh));
    }

    #[test]
    fn test_variables_owner_table() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        let v = ctx.declare_variable("@v", Some("INT"));
        let owner = ctx.graph.table_id(VARIABLES_OWNER).expect("owner table");
        match ctx.graph.node(v).map(|n| &n.kind) {
            Some(NodeKind::Column(column)) => {
                assert_eq!(column.owner_table_id, owner);
                assert_eq!(column.data_type.as_deref(), Some("int"));
            }
            _ => panic!("expected variable column"),
        }
    }

    #[test]
    fn test_alias_resolution() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        ctx.push_scope(ScopeKind::Query, None);
        ctx.add_table_alias("o", "dbo.orders");
        assert_eq!(ctx.resolve_alias("O").as_ref(), "dbo.orders");
        // Unmapped names pass through canonicalized.
        assert_eq!(ctx.resolve_alias("Customers").as_ref(), "customers");
        ctx.pop_scope();
        assert_eq!(ctx.resolve_alias("o").as_ref(), "o");
    }

    #[test]
    fn test_register_table_prefix_routing() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        let temp = ctx.resolve_or_create_table("#staging");
        let var = ctx.resolve_or_create_table("@rows");
        let base = ctx.resolve_or_create_table("dbo.orders");

        match ctx.graph.node(temp).map(|n| &n.kind) {
            Some(NodeKind::Table(t)) => assert_eq!(t.table_type, TableType::Temp),
            _ => panic!("expected temp table"),
        }
        match ctx.graph.node(var).map(|n| &n.kind) {
            Some(NodeKind::Table(t)) => assert_eq!(t.table_type, TableType::TableVar),
            _ => panic!("expected table variable"),
        }
        match ctx.graph.node(base).map(|n| &n.kind) {
            Some(NodeKind::Table(t)) => {
                assert_eq!(t.table_type, TableType::Base);
                assert_eq!(t.schema.as_deref(), Some("dbo"));
            }
            _ => panic!("expected base table"),
        }

        // Second mention resolves to the same node.
        assert_eq!(ctx.resolve_or_create_table("#STAGING"), temp);
    }

    #[test]
    fn test_cte_checked_before_regular_table() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        let base = ctx.resolve_or_create_table("q");
        let cte = ctx.graph.add_table("q", TableType::Cte, None, None);
        ctx.register_cte("q", cte);
        assert_eq!(ctx.lookup_table("q"), Some(cte));
        assert_ne!(base, cte);
    }

    #[test]
    fn test_catalog_populates_columns() {
        let options = options();
        let mut catalog = MemoryCatalog::new();
        catalog.add_table("dbo.orders", &[("id", "INT"), ("total", "MONEY")]);
        let mut ctx = context(&options, &catalog);

        let table = ctx.resolve_or_create_table("dbo.Orders");
        assert!(ctx.graph.column_of(table, "id").is_some());
        assert!(ctx.graph.column_of(table, "total").is_some());

        // Bare name falls back to the dbo default schema.
        let same = ctx.resolve_or_create_table("ORDERS");
        assert!(ctx.graph.column_of(same, "id").is_some());
    }

    #[test]
    fn test_resolve_column_one_part() {
        let options = options();
        let mut catalog = MemoryCatalog::new();
        catalog.add_table("t", &[("a", "INT")]);
        catalog.add_table("u", &[("a", "INT"), ("b", "INT")]);
        let mut ctx = context(&options, &catalog);

        ctx.push_scope(ScopeKind::Query, None);
        let t = ctx.resolve_or_create_table("t");
        let u = ctx.resolve_or_create_table("u");

        // Unambiguous: only u has b.
        let (owner, column) = ctx.resolve_column(&["b".to_string()]).unwrap();
        assert_eq!(owner, u);
        assert_eq!(ctx.graph.column_of(u, "b"), Some(column));

        // Ambiguous: both have a; first candidate wins with a diagnostic.
        let before = ctx.diagnostics.len();
        let (owner, _) = ctx.resolve_column(&["a".to_string()]).unwrap();
        assert_eq!(owner, t);
        assert_eq!(ctx.diagnostics.len(), before + 1);
        assert_eq!(ctx.diagnostics[before].code, diagnostic_codes::AMBIGUOUS_COLUMN);
    }

    #[test]
    fn test_resolve_column_creates_stub() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        ctx.push_scope(ScopeKind::Query, None);
        let t = ctx.resolve_or_create_table("t");

        let (owner, column) = ctx.resolve_column(&["mystery".to_string()]).unwrap();
        assert_eq!(owner, t);
        match ctx.graph.node(column).map(|n| &n.kind) {
            Some(NodeKind::Column(c)) => assert!(c.synthetic),
            _ => panic!("expected stub column"),
        }

        // Deterministic: resolving again yields the same node.
        let (_, again) = ctx.resolve_column(&["mystery".to_string()]).unwrap();
        assert_eq!(column, again);
    }

    #[test]
    fn test_resolve_column_qualified() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        ctx.push_scope(ScopeKind::Query, None);
        let t = ctx.resolve_or_create_table("dbo.t");
        ctx.add_table_alias("x", "dbo.t");

        let (owner, _) = ctx
            .resolve_column(&["x".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(owner, t);

        let (owner, _) = ctx
            .resolve_column(&["dbo".to_string(), "t".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(owner, t);
    }

    #[test]
    fn test_resolve_variable_reference() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        let v = ctx.declare_variable("@v", None);
        let (_, column) = ctx.resolve_column(&["@v".to_string()]).unwrap();
        assert_eq!(column, v);
    }

    #[test]
    fn test_correlated_scope_sees_outer_tables() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        ctx.push_scope(ScopeKind::Query, None);
        let outer = ctx.resolve_or_create_table("t");
        ctx.push_scope(ScopeKind::Query, None);
        // Inner scope has no tables of its own; resolution walks outward.
        assert_eq!(ctx.tables_in_scope(), vec![outer]);
    }

    #[test]
    fn test_should_stop_on_fragment_budget() {
        let mut options = options();
        options.max_fragments = 10;
        let mut ctx = context(&options, &EmptyCatalog);
        for _ in 0..11 {
            ctx.note_fragment();
        }
        assert!(ctx.should_stop());
        assert!(ctx.incomplete);
        assert_eq!(ctx.diagnostics.len(), 1);
        assert_eq!(ctx.diagnostics[0].code, diagnostic_codes::BUDGET_EXCEEDED);
        // Reported once; subsequent calls stay true without new diagnostics.
        assert!(ctx.should_stop());
        assert_eq!(ctx.diagnostics.len(), 1);
    }

    #[test]
    fn test_should_stop_on_cancellation() {
        let options = options();
        let token = CancellationToken::new();
        let mut ctx = AnalysisContext::new(
            &options,
            &EmptyCatalog,
            Arc::new(StringInterner::new()),
            "",
            token.clone(),
        );
        assert!(!ctx.should_stop());
        token.cancel();
        assert!(ctx.should_stop());
        assert_eq!(ctx.diagnostics[0].code, diagnostic_codes::CANCELLED);
    }

    #[test]
    fn test_scratch_states() {
        let options = options();
        let mut ctx = context(&options, &EmptyCatalog);
        ctx.set_state("ProcessingWithClause", StateValue::Bool(true));
        assert_eq!(
            ctx.state("ProcessingWithClause"),
            Some(&StateValue::Bool(true))
        );
        assert_eq!(ctx.state("missing"), None);
    }
}
