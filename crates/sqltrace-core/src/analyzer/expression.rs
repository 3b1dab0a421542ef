//! Scalar expression lineage.
//!
//! [`analyze_scalar`] walks any scalar expression and collects the nodes its
//! value derives from: column references through binary/unary operators,
//! parentheses, function calls, CASE (searched and simple), IS NULL, IN,
//! LIKE, BETWEEN, comparisons, and boolean operators. CASE expressions and
//! window functions materialize dedicated expression nodes with their own
//! internal edges; everything else flows through transparently.
//!
//! The returned [`ScalarLineage`] carries the sources, an operation label
//! (function name, operator, "case", "cast", "convert", or "expression"),
//! and whether the expression is exactly a column reference (identity).

use crate::analyzer::context::{AnalysisContext, ScopeKind};
use crate::analyzer::engine::{Fragment, Walk};
use crate::analyzer::handlers::relations::{self, QueryLocal};
use crate::analyzer::helpers::object_name_parts;
use crate::graph::{EdgeKind, ExpressionType, NodeId};
use crate::types::{diagnostic_codes, Diagnostic};
use sqlparser::ast::{
    self, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, SelectItem, SetExpr,
    WindowFrameBound, WindowType,
};

/// Recursion cap for expression traversal, guarding against pathologically
/// nested expressions ahead of the engine's own depth cap.
pub(crate) const MAX_EXPR_DEPTH: usize = 100;

/// What one scalar expression derives from.
#[derive(Debug, Clone)]
pub(crate) struct ScalarLineage {
    /// Source nodes (columns, variables, or materialized expressions).
    pub sources: Vec<NodeId>,
    /// Operation label for Indirect edges out of this expression.
    pub label: String,
    /// True when the expression is exactly a column reference.
    pub identity: bool,
}

impl ScalarLineage {
    fn empty(label: &str) -> Self {
        Self {
            sources: Vec::new(),
            label: label.to_string(),
            identity: false,
        }
    }

    fn column(source: NodeId) -> Self {
        Self {
            sources: vec![source],
            label: String::new(),
            identity: true,
        }
    }
}

/// Adds an edge, downgrading internal failures to diagnostics so a handler
/// error never aborts the walk.
pub(crate) fn add_edge(
    ctx: &mut AnalysisContext<'_>,
    source: NodeId,
    target: NodeId,
    kind: EdgeKind,
    operation: &str,
    sql: Option<&str>,
) {
    if let Err(error) = ctx.graph.add_edge(source, target, kind, operation, sql) {
        let statement = ctx.statement_index;
        ctx.report(
            Diagnostic::error(diagnostic_codes::INTERNAL, error.to_string())
                .with_statement(statement),
        );
    }
}

/// Links a scalar expression's sources to a target column.
///
/// Identity references produce `Direct` edges labeled with the statement
/// verb ("select", "insert", ...); everything else produces `Indirect`
/// edges labeled with the expression's own operation.
pub(crate) fn link_to_column(
    ctx: &mut AnalysisContext<'_>,
    lineage: &ScalarLineage,
    target: NodeId,
    verb: &str,
    sql: &str,
) {
    let direct = lineage.identity && lineage.sources.len() == 1;
    for source in &lineage.sources {
        if direct {
            add_edge(ctx, *source, target, EdgeKind::Direct, verb, Some(sql));
        } else {
            let operation = if lineage.label.is_empty() {
                "expression"
            } else {
                lineage.label.as_str()
            };
            add_edge(ctx, *source, target, EdgeKind::Indirect, operation, Some(sql));
        }
    }
}

/// Links an assignment expression to a variable column. Assignments are
/// always `Indirect`; identity assignments are labeled "assignment" and
/// computed ones carry the expression's operation.
pub(crate) fn link_assignment(
    ctx: &mut AnalysisContext<'_>,
    lineage: &ScalarLineage,
    target: NodeId,
    sql: &str,
) {
    let operation = if lineage.identity || lineage.label.is_empty() {
        "assignment".to_string()
    } else {
        lineage.label.clone()
    };
    for source in &lineage.sources {
        add_edge(ctx, *source, target, EdgeKind::Indirect, &operation, Some(sql));
    }
}

/// Analyzes a scalar expression, resolving column references against the
/// context and materializing CASE/window expression nodes.
pub(crate) fn analyze_scalar(
    expr: &Expr,
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
) -> ScalarLineage {
    analyze_scalar_at(expr, ctx, walk, 0)
}

fn analyze_scalar_at(
    expr: &Expr,
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    depth: usize,
) -> ScalarLineage {
    if depth > MAX_EXPR_DEPTH {
        report_depth_limit(ctx);
        return ScalarLineage::empty("expression");
    }
    let next = depth + 1;

    match expr {
        Expr::Identifier(ident) => resolve_reference(ctx, &[ident.value.clone()]),
        Expr::CompoundIdentifier(parts) => {
            let parts: Vec<String> = parts.iter().map(|part| part.value.clone()).collect();
            resolve_reference(ctx, &parts)
        }
        Expr::BinaryOp { left, op, right } => {
            let mut lineage = analyze_scalar_at(left, ctx, walk, next);
            let rhs = analyze_scalar_at(right, ctx, walk, next);
            lineage.sources.extend(rhs.sources);
            lineage.label = op.to_string();
            lineage.identity = false;
            lineage
        }
        Expr::UnaryOp { op, expr } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage.label = op.to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Nested(inner) => analyze_scalar_at(inner, ctx, walk, next),
        Expr::Cast { expr, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage.label = "cast".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Convert { expr, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage.label = "convert".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Collate { expr, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage.label = "collate".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Extract { expr, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage.label = "extract".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Function(function) => {
            if function.over.is_some() {
                window_expression(expr, function, ctx, walk, next)
            } else {
                let label = function_label(function);
                let mut lineage = ScalarLineage::empty(&label);
                for argument in function_argument_exprs(function) {
                    let arg = analyze_scalar_at(argument, ctx, walk, next);
                    lineage.sources.extend(arg.sources);
                }
                lineage
            }
        }
        Expr::Case { .. } => case_expression(expr, ctx, walk, next),
        Expr::Subquery(query) => scalar_subquery(query, ctx, walk, next),
        Expr::InSubquery { expr, subquery, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            let inner = scalar_subquery(subquery, ctx, walk, next);
            lineage.sources.extend(inner.sources);
            lineage.label = "in".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Exists { subquery, .. } => {
            let mut lineage = scalar_subquery(subquery, ctx, walk, next);
            lineage.label = "exists".to_string();
            lineage
        }
        Expr::InList { expr, list, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            for item in list {
                let entry = analyze_scalar_at(item, ctx, walk, next);
                lineage.sources.extend(entry.sources);
            }
            lineage.label = "in".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage
                .sources
                .extend(analyze_scalar_at(low, ctx, walk, next).sources);
            lineage
                .sources
                .extend(analyze_scalar_at(high, ctx, walk, next).sources);
            lineage.label = "between".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
            let mut lineage = analyze_scalar_at(inner, ctx, walk, next);
            lineage.label = "is-null".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => {
            let mut lineage = analyze_scalar_at(inner, ctx, walk, next);
            lineage.label = "is".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            let mut lineage = analyze_scalar_at(expr, ctx, walk, next);
            lineage
                .sources
                .extend(analyze_scalar_at(pattern, ctx, walk, next).sources);
            lineage.label = "like".to_string();
            lineage.identity = false;
            lineage
        }
        Expr::Tuple(exprs) => {
            let mut lineage = ScalarLineage::empty("expression");
            for item in exprs {
                lineage
                    .sources
                    .extend(analyze_scalar_at(item, ctx, walk, next).sources);
            }
            lineage
        }
        Expr::Value(_) => ScalarLineage::empty("literal"),
        _ => ScalarLineage::empty("expression"),
    }
}

/// Resolves a (possibly variable) reference into a single-source identity
/// lineage.
fn resolve_reference(ctx: &mut AnalysisContext<'_>, parts: &[String]) -> ScalarLineage {
    match ctx.resolve_column(parts) {
        Some((_, column)) => ScalarLineage::column(column),
        None => ScalarLineage::empty("expression"),
    }
}

/// Bare, lowercased function name.
pub(crate) fn function_label(function: &ast::Function) -> String {
    object_name_parts(&function.name)
        .pop()
        .unwrap_or_default()
        .to_lowercase()
}

fn function_argument_exprs(function: &ast::Function) -> Vec<&Expr> {
    let mut exprs = Vec::new();
    if let FunctionArguments::List(list) = &function.args {
        for argument in &list.args {
            if let FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
            | FunctionArg::Named {
                arg: FunctionArgExpr::Expr(expr),
                ..
            } = argument
            {
                exprs.push(expr);
            }
        }
    }
    exprs
}

/// Materializes a CASE expression node: WHEN conditions contribute
/// `Filter` edges labeled with the condition's operator, arms and the
/// simple-CASE operand contribute `Indirect`/`Filter` edges, and the node
/// itself becomes the single source for downstream consumers.
fn case_expression(
    expr: &Expr,
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    depth: usize,
) -> ScalarLineage {
    let Expr::Case {
        operand,
        conditions,
        else_result,
        ..
    } = expr
    else {
        return ScalarLineage::empty("case");
    };

    let sql = expr.to_string();
    let name = ctx.next_expression_name("CASE");
    let node = ctx
        .graph
        .add_expression(&name, &sql, ExpressionType::Case, None);

    if let Some(operand) = operand {
        let input = analyze_scalar_at(operand, ctx, walk, depth);
        let input_sql = operand.to_string();
        for source in input.sources {
            add_edge(ctx, source, node, EdgeKind::Filter, "case", Some(&input_sql));
        }
    }

    for case_when in conditions {
        let condition = analyze_scalar_at(&case_when.condition, ctx, walk, depth);
        let condition_sql = case_when.condition.to_string();
        let operation = if condition.label.is_empty() {
            "case"
        } else {
            condition.label.as_str()
        };
        for source in condition.sources {
            add_edge(ctx, source, node, EdgeKind::Filter, operation, Some(&condition_sql));
        }

        let result = analyze_scalar_at(&case_when.result, ctx, walk, depth);
        let result_sql = case_when.result.to_string();
        for source in result.sources {
            add_edge(ctx, source, node, EdgeKind::Indirect, "case", Some(&result_sql));
        }
    }

    if let Some(else_result) = else_result {
        let fallback = analyze_scalar_at(else_result, ctx, walk, depth);
        let else_sql = else_result.to_string();
        for source in fallback.sources {
            add_edge(ctx, source, node, EdgeKind::Indirect, "case", Some(&else_sql));
        }
    }

    ScalarLineage {
        sources: vec![node],
        label: "case".to_string(),
        identity: false,
    }
}

/// Materializes a window function node: arguments flow in as
/// `Indirect`, PARTITION BY as `GroupBy`, frame bounds as `Filter`, and the
/// window ORDER BY is resolved for dependency tracking only.
fn window_expression(
    expr: &Expr,
    function: &ast::Function,
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    depth: usize,
) -> ScalarLineage {
    let label = function_label(function);
    let sql = expr.to_string();
    let name = ctx.next_expression_name("WIN");
    let node = ctx
        .graph
        .add_expression(&name, &sql, ExpressionType::Window, None);

    for argument in function_argument_exprs(function) {
        let arg = analyze_scalar_at(argument, ctx, walk, depth);
        let arg_sql = argument.to_string();
        for source in arg.sources {
            add_edge(ctx, source, node, EdgeKind::Indirect, &label, Some(&arg_sql));
        }
    }

    if let Some(WindowType::WindowSpec(spec)) = &function.over {
        for partition in &spec.partition_by {
            let part = analyze_scalar_at(partition, ctx, walk, depth);
            let part_sql = partition.to_string();
            for source in part.sources {
                add_edge(
                    ctx,
                    source,
                    node,
                    EdgeKind::GroupBy,
                    "partition-by",
                    Some(&part_sql),
                );
            }
        }

        // Window ORDER BY: dependency only, no edges.
        for order in &spec.order_by {
            let _ = analyze_scalar_at(&order.expr, ctx, walk, depth);
        }

        if let Some(frame) = &spec.window_frame {
            let mut bounds = vec![&frame.start_bound];
            if let Some(end) = &frame.end_bound {
                bounds.push(end);
            }
            for bound in bounds {
                if let WindowFrameBound::Preceding(Some(limit))
                | WindowFrameBound::Following(Some(limit)) = bound
                {
                    let bound_sql = limit.to_string();
                    let lineage = analyze_scalar_at(limit, ctx, walk, depth);
                    for source in lineage.sources {
                        add_edge(ctx, source, node, EdgeKind::Filter, "frame", Some(&bound_sql));
                    }
                }
            }
        }
    }

    ScalarLineage {
        sources: vec![node],
        label,
        identity: false,
    }
}

/// Collects the sources of a scalar subquery's projection, transparently:
/// `(SELECT SUM(a) FROM t)` yields `t.a` with label "sum", without an
/// intermediate node.
fn scalar_subquery(
    query: &Query,
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    depth: usize,
) -> ScalarLineage {
    if depth > MAX_EXPR_DEPTH {
        report_depth_limit(ctx);
        return ScalarLineage::empty("expression");
    }

    let mut lineage = ScalarLineage::empty("expression");
    ctx.push_scope(ScopeKind::Query, None);

    if let SetExpr::Select(select) = query.body.as_ref() {
        let mut local = QueryLocal::new();
        relations::register_from(ctx, walk, &select.from, &mut local);

        let mut labels: Vec<String> = Vec::new();
        for item in &select.projection {
            if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
                let item_lineage = analyze_scalar_at(expr, ctx, walk, depth + 1);
                labels.push(item_lineage.label.clone());
                lineage.sources.extend(item_lineage.sources);
            }
        }
        if let [label] = labels.as_slice() {
            if !label.is_empty() {
                lineage.label = label.clone();
            }
        }

        // The subquery's own predicate is walked for discovery (nested
        // subqueries, stub columns); its sources do not flow outward.
        if let Some(selection) = &select.selection {
            let _ = analyze_scalar_at(selection, ctx, walk, depth + 1);
        }
    } else {
        // Set operations and nested queries in scalar position: walk for
        // discovery without projecting sources.
        ctx.push_sink(crate::analyzer::context::QuerySink::discard());
        walk.descend(Fragment::Query(query), ctx);
        ctx.pop_sink();
    }

    ctx.pop_scope();
    lineage
}

fn report_depth_limit(ctx: &mut AnalysisContext<'_>) {
    use crate::analyzer::context::StateValue;
    if ctx.state("expression_depth_reported").is_some() {
        return;
    }
    ctx.set_state("expression_depth_reported", StateValue::Bool(true));
    let statement = ctx.statement_index;
    ctx.report(
        Diagnostic::warning(
            diagnostic_codes::BUDGET_EXCEEDED,
            format!("expression nesting beyond {MAX_EXPR_DEPTH} levels; lineage truncated"),
        )
        .with_statement(statement),
    );
}
