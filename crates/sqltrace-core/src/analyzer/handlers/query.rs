//! Query-shaped handlers: top-level SELECT statements, query expressions
//! with their WITH clauses, and set operations.

use crate::analyzer::context::{AnalysisContext, QuerySink};
use crate::analyzer::engine::{Fragment, FragmentKind, LineageHandler, Walk};
use crate::analyzer::expression::{analyze_scalar, link_to_column};
use crate::graph::TableType;
use sqlparser::ast::{OrderByKind, Query, SetExpr, SetOperator, Statement, Values};
use std::sync::Arc;

/// Name of the synthetic table receiving a top-level SELECT's projection.
pub const RESULT_TABLE: &str = "out";

fn query_selects_into(query: &Query) -> bool {
    match query.body.as_ref() {
        SetExpr::Select(select) => select.into.is_some(),
        _ => false,
    }
}

/// Routes a top-level `Statement::Query` into the synthetic `out` result
/// table, unless the query carries its own `INTO` target.
pub struct QueryStatementHandler;

impl LineageHandler for QueryStatementHandler {
    fn name(&self) -> &'static str {
        "query-statement"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::QueryStatement]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Query(_)))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Query(query)) = fragment else {
            return false;
        };

        if query_selects_into(query) {
            // SELECT ... INTO owns its target; the select handler creates it.
            walk.descend(Fragment::Query(query), ctx);
            return true;
        }

        let out = ctx.graph.add_table(RESULT_TABLE, TableType::Base, None, None);
        ctx.graph.mark_output(out);
        ctx.push_sink(QuerySink::table(out, "select"));
        walk.descend(Fragment::Query(query), ctx);
        if let Some(sink) = ctx.pop_sink() {
            for column in sink.produced {
                ctx.graph.mark_output(column);
            }
        }
        true
    }
}

/// Processes a query expression: CTEs in declaration order (each registered
/// before its body is analyzed, so recursive CTEs resolve), then the body.
/// ORDER BY column names are stashed for the select handler, which owns the
/// scope they resolve in; they produce no edges.
pub struct QueryExprHandler;

impl LineageHandler for QueryExprHandler {
    fn name(&self) -> &'static str {
        "query-expression"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Query]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Query(_))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Query(query) = fragment else {
            return false;
        };

        if let Some(with) = &query.with {
            let previous_with = ctx.processing_with;
            ctx.processing_with = true;
            for cte in &with.cte_tables {
                let cte_name = cte.alias.name.value.clone();
                let table = ctx.graph.add_table(&cte_name, TableType::Cte, None, None);
                ctx.register_cte(&cte_name, table);

                let columns: Vec<Arc<str>> = cte
                    .alias
                    .columns
                    .iter()
                    .map(|column| ctx.graph.canonical(&column.name.value))
                    .collect();
                let mut sink = QuerySink::table(table, "select");
                if !columns.is_empty() {
                    sink = sink.with_columns(columns);
                }

                let previous_cte = ctx.processing_cte;
                ctx.processing_cte = true;
                ctx.push_sink(sink);
                walk.descend(Fragment::Query(&cte.query), ctx);
                ctx.pop_sink();
                ctx.processing_cte = previous_cte;
            }
            ctx.processing_with = previous_with;
        }

        if let Some(order_by) = &query.order_by {
            if let OrderByKind::Expressions(exprs) = &order_by.kind {
                ctx.pending_order_by = exprs.iter().map(|order| order.expr.to_string()).collect();
            }
        }

        walk.descend(Fragment::SetExpr(&query.body), ctx);
        true
    }
}

/// Set operations: the left arm defines the target columns; every right-arm
/// item at ordinal `i` adds an `Indirect` edge to the left arm's column `i`
/// labeled with the operator.
pub struct SetExprHandler;

impl SetExprHandler {
    fn operator_label(op: &SetOperator) -> &'static str {
        match op {
            SetOperator::Union => "union",
            SetOperator::Intersect => "intersect",
            SetOperator::Except => "except",
            _ => "union",
        }
    }
}

impl LineageHandler for SetExprHandler {
    fn name(&self) -> &'static str {
        "set-expression"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::SetExpr]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::SetExpr(_))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::SetExpr(body) = fragment else {
            return false;
        };

        match body {
            SetExpr::Select(select) => {
                walk.descend(Fragment::Select(select), ctx);
            }
            SetExpr::Query(query) => {
                walk.descend(Fragment::Query(query), ctx);
            }
            SetExpr::SetOperation {
                op, left, right, ..
            } => {
                walk.descend(Fragment::SetExpr(left), ctx);

                // Pair the right arm's items with the left arm's columns.
                let produced = ctx
                    .current_sink_mut()
                    .map(|sink| sink.produced.clone())
                    .unwrap_or_default();
                let (table, verb) = ctx
                    .current_sink_mut()
                    .map(|sink| (sink.table, sink.verb))
                    .unwrap_or((None, "select"));

                let right_sink = QuerySink {
                    table,
                    columns: None,
                    verb,
                    pair_with: Some(produced),
                    setop: Some(Self::operator_label(op)),
                    produced: Vec::new(),
                };
                ctx.push_sink(right_sink);
                walk.descend(Fragment::SetExpr(right), ctx);
                ctx.pop_sink();
            }
            SetExpr::Values(values) => {
                self.values_into_sink(ctx, walk, values);
            }
            SetExpr::Insert(statement) | SetExpr::Update(statement) => {
                walk.descend(Fragment::Statement(statement), ctx);
            }
            _ => {}
        }
        true
    }
}

impl SetExprHandler {
    /// `INSERT ... VALUES`: pairs each row's expressions positionally with
    /// the sink's column list, so variable and expression references inside
    /// VALUES still produce lineage.
    fn values_into_sink(
        &self,
        ctx: &mut AnalysisContext<'_>,
        walk: &mut Walk<'_>,
        values: &Values,
    ) {
        let Some(mut sink) = ctx.pop_sink() else {
            return;
        };
        if let Some(table) = sink.table {
            for row in &values.rows {
                for (ordinal, value) in row.iter().enumerate() {
                    let Some(name) = sink
                        .columns
                        .as_ref()
                        .and_then(|columns| columns.get(ordinal).map(|name| name.to_string()))
                    else {
                        continue;
                    };
                    let target = ctx.column_or_stub(table, &name);
                    if sink.produced.len() <= ordinal {
                        sink.produced.push(target);
                    }
                    let lineage = analyze_scalar(value, ctx, walk);
                    link_to_column(ctx, &lineage, target, sink.verb, &value.to_string());
                }
            }
        }
        ctx.push_sink(sink);
    }
}
