//! FROM-clause registration shared by the SELECT handler and scalar
//! subquery analysis: source tables, aliases, derived tables, and join
//! lineage.

use crate::analyzer::context::{AnalysisContext, QuerySink};
use crate::analyzer::engine::{Fragment, Walk};
use crate::analyzer::expression::{self, analyze_scalar};
use crate::analyzer::helpers::identifier_parts;
use crate::graph::{EdgeKind, ExpressionType, NodeId, TableType};
use crate::types::{diagnostic_codes, Diagnostic};
use sqlparser::ast::{
    BinaryOperator, Expr, Join, JoinConstraint, JoinOperator, TableFactor, TableWithJoins,
};
use std::sync::Arc;

/// Per-query state built up while registering relations: the lazy output
/// expression node that filter and join-condition edges target.
pub(crate) struct QueryLocal {
    pub output_expr: Option<NodeId>,
}

impl QueryLocal {
    pub fn new() -> Self {
        Self { output_expr: None }
    }
}

/// The query's output expression node, created on first need. Filter,
/// grouping, and join-condition edges point into it; the SELECT handler
/// later links it to the produced target columns so the chain survives
/// compaction.
pub(crate) fn ensure_output_expr(
    ctx: &mut AnalysisContext<'_>,
    local: &mut QueryLocal,
    sql: &str,
) -> NodeId {
    if let Some(existing) = local.output_expr {
        return existing;
    }
    let name = ctx.next_expression_name("OUT");
    let node = ctx
        .graph
        .add_expression(&name, sql, ExpressionType::Output, None);
    local.output_expr = Some(node);
    node
}

/// Registers every relation in a FROM clause, including joins.
pub(crate) fn register_from(
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    from: &[TableWithJoins],
    local: &mut QueryLocal,
) {
    for table in from {
        register_table_with_joins(ctx, walk, table, local);
    }
}

pub(crate) fn register_table_with_joins(
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    table: &TableWithJoins,
    local: &mut QueryLocal,
) {
    register_table_factor(ctx, walk, &table.relation, local);
    for join in &table.joins {
        register_table_factor(ctx, walk, &join.relation, local);
        process_join(ctx, walk, join, local);
    }
}

/// Registers one table factor: named tables resolve through the context
/// (catalog, CTEs, temp tables); derived tables become CTE-typed relations
/// fed by their subquery.
pub(crate) fn register_table_factor(
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    factor: &TableFactor,
    local: &mut QueryLocal,
) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table_name = name.to_string();
            ctx.resolve_or_create_table(&table_name);
            if let Some(alias) = alias {
                let canonical = identifier_parts(&table_name).join(".");
                ctx.add_table_alias(&alias.name.value, &canonical);
            }
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            let alias_name = match alias {
                Some(alias) => alias.name.value.clone(),
                None => ctx.next_expression_name("derived"),
            };
            let table = ctx.graph.add_table(&alias_name, TableType::Cte, None, None);
            ctx.register_cte(&alias_name, table);

            let mut sink = QuerySink::table(table, "select");
            if let Some(alias) = alias {
                let columns: Vec<Arc<str>> = alias
                    .columns
                    .iter()
                    .map(|column| ctx.graph.canonical(&column.name.value))
                    .collect();
                if !columns.is_empty() {
                    sink = sink.with_columns(columns);
                }
            }
            ctx.push_sink(sink);
            walk.descend(Fragment::Query(subquery), ctx);
            ctx.pop_sink();
            ctx.bring_into_scope(table);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            register_table_with_joins(ctx, walk, table_with_joins, local);
        }
        TableFactor::TableFunction { .. } | TableFactor::Function { .. } => {
            let statement = ctx.statement_index;
            ctx.report(
                Diagnostic::info(
                    diagnostic_codes::UNSUPPORTED_SYNTAX,
                    "table-valued function lineage is not tracked",
                )
                .with_statement(statement),
            );
        }
        TableFactor::Pivot { .. } | TableFactor::Unpivot { .. } => {
            let statement = ctx.statement_index;
            ctx.report(
                Diagnostic::warning(
                    diagnostic_codes::UNSUPPORTED_SYNTAX,
                    "PIVOT/UNPIVOT lineage is not tracked",
                )
                .with_statement(statement),
            );
        }
        _ => {}
    }
}

/// Join lineage: every column pair across the predicate gets a
/// `Join` edge pair carrying the join sidedness, and the ON columns feed a
/// synthetic join-condition expression node with `Filter` edges.
fn process_join(
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    join: &Join,
    local: &mut QueryLocal,
) {
    let (sidedness, constraint) = join_operator_parts(&join.join_operator);
    let Some(JoinConstraint::On(on)) = constraint else {
        return;
    };
    let on_sql = on.to_string();

    emit_join_pairs(ctx, walk, on, sidedness, &on_sql);

    let name = ctx.next_expression_name("JOIN");
    let condition_node = ctx
        .graph
        .add_expression(&name, &on_sql, ExpressionType::JoinCondition, None);
    let lineage = analyze_scalar(on, ctx, walk);
    for source in lineage.sources {
        expression::add_edge(
            ctx,
            source,
            condition_node,
            EdgeKind::Filter,
            sidedness,
            Some(&on_sql),
        );
    }
    let output = ensure_output_expr(ctx, local, &on_sql);
    expression::add_edge(ctx, condition_node, output, EdgeKind::Filter, "join", None);
}

pub(crate) fn emit_join_pairs(
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    predicate: &Expr,
    sidedness: &str,
    sql: &str,
) {
    match predicate {
        Expr::BinaryOp { left, op, right } if is_comparison(op) => {
            let left_sources = analyze_scalar(left, ctx, walk).sources;
            let right_sources = analyze_scalar(right, ctx, walk).sources;
            for a in &left_sources {
                for b in &right_sources {
                    // Join edges are undirected in meaning; record the pair.
                    expression::add_edge(ctx, *a, *b, EdgeKind::Join, sidedness, Some(sql));
                    expression::add_edge(ctx, *b, *a, EdgeKind::Join, sidedness, Some(sql));
                }
            }
        }
        Expr::BinaryOp { left, op, right }
            if matches!(op, BinaryOperator::And | BinaryOperator::Or) =>
        {
            emit_join_pairs(ctx, walk, left, sidedness, sql);
            emit_join_pairs(ctx, walk, right, sidedness, sql);
        }
        Expr::Nested(inner) => emit_join_pairs(ctx, walk, inner, sidedness, sql),
        _ => {}
    }
}

/// Columns a table node currently exposes, in declaration order.
pub(crate) fn visible_columns(
    ctx: &AnalysisContext<'_>,
    table: NodeId,
) -> Vec<(Arc<str>, NodeId)> {
    let Some(node) = ctx.graph.node(table) else {
        return Vec::new();
    };
    let crate::graph::NodeKind::Table(table_node) = &node.kind else {
        return Vec::new();
    };
    table_node
        .columns
        .iter()
        .filter_map(|id| {
            ctx.graph
                .node(*id)
                .map(|column| (column.kind.name().clone(), *id))
        })
        .collect()
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

/// Join sidedness label and constraint, from the parsed operator.
pub(crate) fn join_operator_parts(operator: &JoinOperator) -> (&'static str, Option<&JoinConstraint>) {
    match operator {
        JoinOperator::Join(constraint) | JoinOperator::Inner(constraint) => {
            ("inner", Some(constraint))
        }
        JoinOperator::Left(constraint) | JoinOperator::LeftOuter(constraint) => {
            ("left", Some(constraint))
        }
        JoinOperator::Right(constraint) | JoinOperator::RightOuter(constraint) => {
            ("right", Some(constraint))
        }
        JoinOperator::FullOuter(constraint) => ("full", Some(constraint)),
        JoinOperator::CrossJoin(_) => ("cross", None),
        JoinOperator::Semi(constraint) | JoinOperator::LeftSemi(constraint) => {
            ("left-semi", Some(constraint))
        }
        JoinOperator::RightSemi(constraint) => ("right-semi", Some(constraint)),
        JoinOperator::Anti(constraint) | JoinOperator::LeftAnti(constraint) => {
            ("left-anti", Some(constraint))
        }
        JoinOperator::RightAnti(constraint) => ("right-anti", Some(constraint)),
        JoinOperator::CrossApply => ("cross-apply", None),
        JoinOperator::OuterApply => ("outer-apply", None),
        JoinOperator::AsOf { constraint, .. } => ("asof", Some(constraint)),
        JoinOperator::StraightJoin(constraint) => ("inner", Some(constraint)),
        _ => ("inner", None),
    }
}
