//! Bounded AST traversal with prioritized handler dispatch.
//!
//! The engine performs a pre-order walk over borrowed views of parser AST
//! nodes ([`Fragment`]). For each visited fragment it consults a registry of
//! [`LineageHandler`]s: the first handler whose `can_handle` matches gets to
//! process the fragment, and its return value decides whether the engine
//! still descends into the children. Handlers drive their own sub-walks by
//! re-entering [`Walk::descend`]; the visited set has walk lifetime, so
//! re-entry never processes a fragment twice.
//!
//! Safety valves: a cycle guard keyed on node identity, a depth cap that
//! skips the offending subtree, and fragment/time budgets sampled between
//! fragments via [`AnalysisContext::should_stop`].

use crate::analyzer::context::AnalysisContext;
use crate::types::{diagnostic_codes, Diagnostic};
use sqlparser::ast::{
    Cte, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, TableWithJoins,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Recursion budget considered safe for the default recursive walk. Deeper
/// configurations switch to the explicit iterative walk, which behaves
/// identically but keeps pending fragments on the heap.
pub const SAFE_RECURSION_DEPTH: usize = 500;

/// A borrowed view of one AST fragment.
#[derive(Clone, Copy)]
pub enum Fragment<'a> {
    Statement(&'a Statement),
    Query(&'a Query),
    SetExpr(&'a SetExpr),
    Select(&'a Select),
    Cte(&'a Cte),
    TableWithJoins(&'a TableWithJoins),
    TableFactor(&'a TableFactor),
    SelectItem(&'a SelectItem),
    Expr(&'a Expr),
}

/// Concrete fragment kind used to key the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    QueryStatement,
    Insert,
    Update,
    Delete,
    Merge,
    CreateTable,
    CreateView,
    CreateProcedure,
    Execute,
    Declare,
    SetStatement,
    If,
    While,
    OtherStatement,
    Query,
    SetExpr,
    Select,
    Cte,
    TableWithJoins,
    TableFactor,
    SelectItem,
    Expr,
}

impl<'a> Fragment<'a> {
    pub fn kind(self) -> FragmentKind {
        match self {
            Fragment::Statement(statement) => match statement {
                Statement::Query(_) => FragmentKind::QueryStatement,
                Statement::Insert(_) => FragmentKind::Insert,
                Statement::Update { .. } => FragmentKind::Update,
                Statement::Delete(_) => FragmentKind::Delete,
                Statement::Merge { .. } => FragmentKind::Merge,
                Statement::CreateTable(_) => FragmentKind::CreateTable,
                Statement::CreateView { .. } => FragmentKind::CreateView,
                Statement::CreateProcedure { .. } => FragmentKind::CreateProcedure,
                Statement::Execute { .. } => FragmentKind::Execute,
                Statement::Declare { .. } => FragmentKind::Declare,
                Statement::Set(_) => FragmentKind::SetStatement,
                Statement::If(_) => FragmentKind::If,
                Statement::While(_) => FragmentKind::While,
                _ => FragmentKind::OtherStatement,
            },
            Fragment::Query(_) => FragmentKind::Query,
            Fragment::SetExpr(_) => FragmentKind::SetExpr,
            Fragment::Select(_) => FragmentKind::Select,
            Fragment::Cte(_) => FragmentKind::Cte,
            Fragment::TableWithJoins(_) => FragmentKind::TableWithJoins,
            Fragment::TableFactor(_) => FragmentKind::TableFactor,
            Fragment::SelectItem(_) => FragmentKind::SelectItem,
            Fragment::Expr(_) => FragmentKind::Expr,
        }
    }

    /// Identity of the underlying AST node, for the cycle guard.
    fn address(self) -> usize {
        match self {
            Fragment::Statement(node) => node as *const _ as usize,
            Fragment::Query(node) => node as *const _ as usize,
            Fragment::SetExpr(node) => node as *const _ as usize,
            Fragment::Select(node) => node as *const _ as usize,
            Fragment::Cte(node) => node as *const _ as usize,
            Fragment::TableWithJoins(node) => node as *const _ as usize,
            Fragment::TableFactor(node) => node as *const _ as usize,
            Fragment::SelectItem(node) => node as *const _ as usize,
            Fragment::Expr(node) => node as *const _ as usize,
        }
    }

    /// Children for the default walk. Constructs without a handler are
    /// descended into so nested queries are still discovered.
    pub fn children(self) -> Vec<Fragment<'a>> {
        match self {
            Fragment::Statement(statement) => statement_children(statement),
            Fragment::Query(query) => {
                let mut children: Vec<Fragment<'a>> = Vec::new();
                if let Some(with) = &query.with {
                    children.extend(with.cte_tables.iter().map(Fragment::Cte));
                }
                children.push(Fragment::SetExpr(&query.body));
                children
            }
            Fragment::SetExpr(body) => match body {
                SetExpr::Select(select) => vec![Fragment::Select(select)],
                SetExpr::Query(query) => vec![Fragment::Query(query)],
                SetExpr::SetOperation { left, right, .. } => {
                    vec![Fragment::SetExpr(left), Fragment::SetExpr(right)]
                }
                SetExpr::Insert(statement) | SetExpr::Update(statement) => {
                    vec![Fragment::Statement(statement)]
                }
                _ => Vec::new(),
            },
            Fragment::Select(select) => {
                let mut children: Vec<Fragment<'a>> =
                    select.from.iter().map(Fragment::TableWithJoins).collect();
                children.extend(select.projection.iter().map(Fragment::SelectItem));
                if let Some(selection) = &select.selection {
                    children.push(Fragment::Expr(selection));
                }
                if let Some(having) = &select.having {
                    children.push(Fragment::Expr(having));
                }
                children
            }
            Fragment::Cte(cte) => vec![Fragment::Query(&cte.query)],
            Fragment::TableWithJoins(table) => {
                let mut children = vec![Fragment::TableFactor(&table.relation)];
                children.extend(table.joins.iter().map(|join| Fragment::TableFactor(&join.relation)));
                children
            }
            Fragment::TableFactor(factor) => match factor {
                TableFactor::Derived { subquery, .. } => vec![Fragment::Query(subquery)],
                TableFactor::NestedJoin {
                    table_with_joins, ..
                } => vec![Fragment::TableWithJoins(table_with_joins)],
                _ => Vec::new(),
            },
            Fragment::SelectItem(item) => match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    vec![Fragment::Expr(expr)]
                }
                _ => Vec::new(),
            },
            Fragment::Expr(expr) => expr_children(expr),
        }
    }
}

fn statement_children(statement: &Statement) -> Vec<Fragment<'_>> {
    match statement {
        Statement::Query(query) => vec![Fragment::Query(query)],
        Statement::Insert(insert) => insert
            .source
            .iter()
            .map(|query| Fragment::Query(query))
            .collect(),
        Statement::CreateTable(create) => create
            .query
            .iter()
            .map(|query| Fragment::Query(query))
            .collect(),
        Statement::CreateView { query, .. } => vec![Fragment::Query(query)],
        _ => Vec::new(),
    }
}

fn expr_children(expr: &Expr) -> Vec<Fragment<'_>> {
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            vec![Fragment::Expr(left), Fragment::Expr(right)]
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            vec![Fragment::Expr(expr)]
        }
        Expr::IsNull(expr) | Expr::IsNotNull(expr) => vec![Fragment::Expr(expr)],
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            let mut children: Vec<Fragment<'_>> = Vec::new();
            if let Some(operand) = operand {
                children.push(Fragment::Expr(operand));
            }
            for case_when in conditions {
                children.push(Fragment::Expr(&case_when.condition));
                children.push(Fragment::Expr(&case_when.result));
            }
            if let Some(else_result) = else_result {
                children.push(Fragment::Expr(else_result));
            }
            children
        }
        Expr::Function(function) => {
            let mut children = Vec::new();
            if let FunctionArguments::List(list) = &function.args {
                for arg in &list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
                    | FunctionArg::Named {
                        arg: FunctionArgExpr::Expr(expr),
                        ..
                    } = arg
                    {
                        children.push(Fragment::Expr(expr));
                    }
                }
            }
            children
        }
        Expr::Subquery(query) => vec![Fragment::Query(query)],
        Expr::InSubquery { expr, subquery, .. } => {
            vec![Fragment::Expr(expr), Fragment::Query(subquery)]
        }
        Expr::Exists { subquery, .. } => vec![Fragment::Query(subquery)],
        Expr::InList { expr, list, .. } => {
            let mut children = vec![Fragment::Expr(expr)];
            children.extend(list.iter().map(Fragment::Expr));
            children
        }
        Expr::Between {
            expr, low, high, ..
        } => vec![
            Fragment::Expr(expr),
            Fragment::Expr(low),
            Fragment::Expr(high),
        ],
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            vec![Fragment::Expr(expr), Fragment::Expr(pattern)]
        }
        Expr::Tuple(exprs) => exprs.iter().map(Fragment::Expr).collect(),
        _ => Vec::new(),
    }
}

/// A per-construct lineage rule.
///
/// `can_handle` matches structurally; `handle` establishes nodes and edges.
/// Returning `true` from `handle` means the fragment is fully processed and
/// the engine must not descend into its children.
pub trait LineageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Dispatch priority. Higher runs first; ties break by registration
    /// order.
    fn priority(&self) -> i32 {
        0
    }

    /// Fragment kinds this handler wants to see.
    fn kinds(&self) -> &'static [FragmentKind];

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool;

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool;
}

/// The handler registry and walk entry point.
pub struct Engine {
    registry: HashMap<FragmentKind, Vec<Arc<dyn LineageHandler>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
        }
    }

    /// Registers a handler under each of its fragment kinds, keeping every
    /// bucket ordered by priority (registration order breaks ties).
    pub fn register(&mut self, handler: Arc<dyn LineageHandler>) {
        for kind in handler.kinds() {
            let bucket = self.registry.entry(*kind).or_default();
            bucket.push(handler.clone());
            bucket.sort_by_key(|h| std::cmp::Reverse(h.priority()));
        }
    }

    fn handlers_for(&self, kind: FragmentKind) -> &[Arc<dyn LineageHandler>] {
        self.registry.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Walks one fragment tree. The iterative strategy is selected
    /// automatically when the configured depth exceeds the safe recursion
    /// budget.
    pub fn walk(&self, root: Fragment<'_>, ctx: &mut AnalysisContext<'_>) {
        let iterative = ctx.options.max_depth > SAFE_RECURSION_DEPTH;
        self.walk_with_strategy(root, ctx, iterative);
    }

    /// Walks with an explicit strategy choice; both produce identical
    /// visit order.
    pub fn walk_with_strategy(
        &self,
        root: Fragment<'_>,
        ctx: &mut AnalysisContext<'_>,
        iterative: bool,
    ) {
        let mut walk = Walk {
            engine: self,
            visited: HashSet::new(),
            depth: 0,
            iterative,
            depth_reported: false,
        };
        walk.descend(root, ctx);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight walk: the visited set, the current depth, and the engine.
pub struct Walk<'e> {
    engine: &'e Engine,
    visited: HashSet<(FragmentKind, usize)>,
    depth: usize,
    iterative: bool,
    depth_reported: bool,
}

impl<'e> Walk<'e> {
    /// Visits a fragment and, unless a handler claims it, its children.
    /// Handlers call this to drive their own sub-traversals; the visited
    /// set is shared for the whole walk.
    pub fn descend(&mut self, fragment: Fragment<'_>, ctx: &mut AnalysisContext<'_>) {
        if ctx.should_stop() {
            return;
        }
        if self.depth >= ctx.options.max_depth {
            self.report_depth_exceeded(ctx);
            return;
        }
        if !self.visited.insert((fragment.kind(), fragment.address())) {
            return;
        }
        ctx.note_fragment();

        self.depth += 1;
        if !self.dispatch(fragment, ctx) {
            if self.iterative {
                self.descend_children_iterative(fragment, ctx);
            } else {
                for child in fragment.children() {
                    self.descend(child, ctx);
                }
            }
        }
        self.depth -= 1;
    }

    /// Explicit-stack variant of the default child walk. Visit order is
    /// identical to the recursive form; only pending fragments move from
    /// the call stack to the heap.
    fn descend_children_iterative<'a>(
        &mut self,
        fragment: Fragment<'a>,
        ctx: &mut AnalysisContext<'_>,
    ) {
        let entry_depth = self.depth;
        let mut stack: Vec<(Fragment<'a>, usize)> = fragment
            .children()
            .into_iter()
            .rev()
            .map(|child| (child, entry_depth))
            .collect();

        while let Some((fragment, depth)) = stack.pop() {
            if ctx.should_stop() {
                break;
            }
            if depth >= ctx.options.max_depth {
                self.report_depth_exceeded(ctx);
                continue;
            }
            if !self.visited.insert((fragment.kind(), fragment.address())) {
                continue;
            }
            ctx.note_fragment();

            self.depth = depth + 1;
            let handled = self.dispatch(fragment, ctx);
            if !handled {
                for child in fragment.children().into_iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }
        self.depth = entry_depth;
    }

    fn dispatch(&mut self, fragment: Fragment<'_>, ctx: &mut AnalysisContext<'_>) -> bool {
        let handlers = self.engine.handlers_for(fragment.kind());
        for handler in handlers {
            if handler.can_handle(&fragment) {
                return handler.handle(&fragment, self, ctx);
            }
        }
        false
    }

    fn report_depth_exceeded(&mut self, ctx: &mut AnalysisContext<'_>) {
        ctx.incomplete = true;
        if self.depth_reported {
            return;
        }
        self.depth_reported = true;
        ctx.report(
            Diagnostic::warning(
                diagnostic_codes::BUDGET_EXCEEDED,
                format!(
                    "AST depth cap of {} reached; subtree skipped",
                    ctx.options.max_depth
                ),
            )
            .with_statement(ctx.statement_index),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CancellationToken;
    use crate::catalog::EmptyCatalog;
    use crate::intern::StringInterner;
    use crate::types::AnalyzerOptions;
    use std::sync::Mutex;

    struct Recorder {
        kinds: Mutex<Vec<FragmentKind>>,
        claim: Option<FragmentKind>,
    }

    impl Recorder {
        fn new(claim: Option<FragmentKind>) -> Self {
            Self {
                kinds: Mutex::new(Vec::new()),
                claim,
            }
        }
    }

    impl LineageHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn kinds(&self) -> &'static [FragmentKind] {
            &[
                FragmentKind::QueryStatement,
                FragmentKind::Query,
                FragmentKind::SetExpr,
                FragmentKind::Select,
                FragmentKind::TableWithJoins,
                FragmentKind::TableFactor,
                FragmentKind::SelectItem,
                FragmentKind::Expr,
            ]
        }

        fn can_handle(&self, _fragment: &Fragment<'_>) -> bool {
            true
        }

        fn handle(
            &self,
            fragment: &Fragment<'_>,
            _walk: &mut Walk<'_>,
            _ctx: &mut AnalysisContext<'_>,
        ) -> bool {
            self.kinds.lock().unwrap().push(fragment.kind());
            self.claim == Some(fragment.kind())
        }
    }

    fn options() -> AnalyzerOptions {
        AnalyzerOptions::default()
    }

    fn context<'a>(options: &'a AnalyzerOptions, sql: &'a str) -> AnalysisContext<'a> {
        AnalysisContext::new(
            options,
            &EmptyCatalog,
            Arc::new(StringInterner::new()),
            sql,
            CancellationToken::new(),
        )
    }

    fn parse_one(sql: &str) -> Statement {
        crate::parser::parse_batch(sql).unwrap().remove(0)
    }

    #[test]
    fn test_preorder_and_strategy_parity() {
        let statement = parse_one("SELECT a, b + 1 FROM t JOIN u ON t.x = u.y WHERE a > 0");
        let options = options();

        let mut orders = Vec::new();
        for iterative in [false, true] {
            let recorder = Arc::new(Recorder::new(None));
            let mut engine = Engine::new();
            engine.register(recorder.clone());
            let mut ctx = context(&options, "");
            engine.walk_with_strategy(Fragment::Statement(&statement), &mut ctx, iterative);
            orders.push(recorder.kinds.lock().unwrap().clone());
        }

        assert_eq!(orders[0], orders[1], "walk strategies must agree");
        // Pre-order: the statement first, then the query expression chain.
        assert_eq!(orders[0][0], FragmentKind::QueryStatement);
        assert_eq!(orders[0][1], FragmentKind::Query);
        assert!(orders[0].contains(&FragmentKind::TableFactor));
        assert!(orders[0].contains(&FragmentKind::Expr));
    }

    #[test]
    fn test_handled_fragment_stops_descent() {
        let statement = parse_one("SELECT a FROM t");
        let options = options();
        let recorder = Arc::new(Recorder::new(Some(FragmentKind::Query)));
        let mut engine = Engine::new();
        engine.register(recorder.clone());
        let mut ctx = context(&options, "");
        engine.walk(Fragment::Statement(&statement), &mut ctx);

        let kinds = recorder.kinds.lock().unwrap();
        // The Query handler claimed the fragment; nothing below it visited.
        assert_eq!(*kinds, vec![FragmentKind::QueryStatement, FragmentKind::Query]);
    }

    #[test]
    fn test_priority_wins_over_registration_order() {
        struct Named(&'static str, i32, Arc<Mutex<Vec<&'static str>>>);
        impl LineageHandler for Named {
            fn name(&self) -> &'static str {
                self.0
            }
            fn priority(&self) -> i32 {
                self.1
            }
            fn kinds(&self) -> &'static [FragmentKind] {
                &[FragmentKind::QueryStatement]
            }
            fn can_handle(&self, _fragment: &Fragment<'_>) -> bool {
                true
            }
            fn handle(
                &self,
                _fragment: &Fragment<'_>,
                _walk: &mut Walk<'_>,
                _ctx: &mut AnalysisContext<'_>,
            ) -> bool {
                self.2.lock().unwrap().push(self.0);
                true
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();
        engine.register(Arc::new(Named("low", 0, seen.clone())));
        engine.register(Arc::new(Named("high", 10, seen.clone())));

        let statement = parse_one("SELECT 1");
        let options = options();
        let mut ctx = context(&options, "");
        engine.walk(Fragment::Statement(&statement), &mut ctx);

        assert_eq!(*seen.lock().unwrap(), vec!["high"]);
    }

    #[test]
    fn test_depth_cap_skips_subtree_only() {
        // Nesting well past the cap: ((((((1)))))) ...
        let mut expr = String::from("1");
        for _ in 0..12 {
            expr = format!("({expr})");
        }
        let statement = parse_one(&format!("SELECT {expr}, plain FROM t"));

        let mut options = options();
        options.max_depth = 8;
        let mut ctx = context(&options, "");
        let engine = Engine::new();
        engine.walk(Fragment::Statement(&statement), &mut ctx);

        assert!(ctx.incomplete);
        let budget_diags: Vec<_> = ctx
            .diagnostics
            .iter()
            .filter(|d| d.code == diagnostic_codes::BUDGET_EXCEEDED)
            .collect();
        assert_eq!(budget_diags.len(), 1, "depth warning reported once");
        // The walk still visited fragments outside the deep subtree.
        assert!(ctx.fragments_visited() > 4);
    }

    #[test]
    fn test_depth_exactly_at_cap_succeeds() {
        let statement = parse_one("SELECT a FROM t");
        // Statement -> Query -> SetExpr -> Select -> children sit at depth 5.
        let mut options = options();
        options.max_depth = 16;
        let mut ctx = context(&options, "");
        Engine::new().walk(Fragment::Statement(&statement), &mut ctx);
        assert!(!ctx.incomplete);
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn test_revisit_guard() {
        let statement = parse_one("SELECT a FROM t");
        let options = options();
        let recorder = Arc::new(Recorder::new(None));
        let mut engine = Engine::new();
        engine.register(recorder.clone());
        let mut ctx = context(&options, "");

        // Walking the same root twice within one walk is guarded; two
        // separate walks each start with a fresh visited set.
        engine.walk(Fragment::Statement(&statement), &mut ctx);
        let first = recorder.kinds.lock().unwrap().len();
        engine.walk(Fragment::Statement(&statement), &mut ctx);
        assert_eq!(recorder.kinds.lock().unwrap().len(), first * 2);
    }
}
