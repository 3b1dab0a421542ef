//! The SELECT handler: projection lineage, star expansion, filter
//! and grouping edges, and `SELECT ... INTO` targets.

use crate::analyzer::context::{AnalysisContext, QuerySink, ScopeKind};
use crate::analyzer::engine::{Fragment, FragmentKind, LineageHandler, Walk};
use crate::analyzer::expression::{add_edge, analyze_scalar, link_to_column, ScalarLineage};
use crate::analyzer::handlers::relations::{self, visible_columns, QueryLocal};
use crate::analyzer::helpers::identifier_parts;
use crate::graph::{ColumnFlags, EdgeKind, NodeId};
use crate::types::{diagnostic_codes, Diagnostic};
use sqlparser::ast::{Expr, GroupByExpr, SelectItem, SelectItemQualifiedWildcardKind};
use std::sync::Arc;

pub struct SelectHandler;

impl LineageHandler for SelectHandler {
    fn name(&self) -> &'static str {
        "select"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Select]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Select(_))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Select(select) = fragment else {
            return false;
        };

        ctx.push_scope(ScopeKind::Query, None);
        let mut local = QueryLocal::new();
        relations::register_from(ctx, walk, &select.from, &mut local);

        // SELECT ... INTO creates its own target table; otherwise the
        // projection writes into whatever sink the statement pushed.
        let mut owns_sink = false;
        if let Some(into) = &select.into {
            let target = ctx.resolve_or_create_table(&into.name.to_string());
            ctx.graph.mark_output(target);
            ctx.push_sink(QuerySink::table(target, "select-into"));
            owns_sink = true;
        }
        let mut sink = ctx.pop_sink().unwrap_or_else(QuerySink::discard);

        let mut star_counter = 0usize;
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    self.process_item(ctx, walk, &mut sink, expr, None);
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.process_item(ctx, walk, &mut sink, expr, Some(alias.value.clone()));
                }
                SelectItem::Wildcard(_) => {
                    self.expand_star(ctx, &mut sink, None, &mut star_counter);
                }
                SelectItem::QualifiedWildcard(kind, _) => match kind {
                    SelectItemQualifiedWildcardKind::ObjectName(name) => {
                        self.expand_star(ctx, &mut sink, Some(&name.to_string()), &mut star_counter);
                    }
                    _ => {
                        let statement = ctx.statement_index;
                        ctx.report(
                            Diagnostic::info(
                                diagnostic_codes::UNSUPPORTED_SYNTAX,
                                "wildcard over an expression is not expanded",
                            )
                            .with_statement(statement),
                        );
                    }
                },
            }
        }

        if let Some(selection) = &select.selection {
            self.filter_clause(ctx, walk, &mut local, selection, "where");
        }
        if let Some(having) = &select.having {
            self.filter_clause(ctx, walk, &mut local, having, "having");
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for group in exprs {
                let lineage = analyze_scalar(group, ctx, walk);
                let group_sql = group.to_string();
                let output = relations::ensure_output_expr(ctx, &mut local, &group_sql);
                for source in lineage.sources {
                    add_edge(
                        ctx,
                        source,
                        output,
                        EdgeKind::GroupBy,
                        "group-by",
                        Some(&group_sql),
                    );
                }
            }
        }

        // ORDER BY columns stashed by the query handler: dependency only.
        let pending = std::mem::take(&mut ctx.pending_order_by);
        for name in pending {
            if is_plain_identifier(&name) {
                let parts = identifier_parts(&name);
                let _ = ctx.resolve_column(&parts);
            }
        }

        // Anchor filter/grouping inputs to the produced columns so the
        // chain survives compaction.
        if let Some(output) = local.output_expr {
            for target in &sink.produced {
                add_edge(ctx, output, *target, EdgeKind::Indirect, "output", None);
            }
        }

        ctx.pop_scope();
        if owns_sink {
            for column in &sink.produced {
                ctx.graph.mark_output(*column);
            }
        } else {
            ctx.push_sink(sink);
        }
        true
    }
}

impl SelectHandler {
    fn process_item(
        &self,
        ctx: &mut AnalysisContext<'_>,
        walk: &mut Walk<'_>,
        sink: &mut QuerySink,
        expr: &Expr,
        alias: Option<String>,
    ) {
        let lineage = analyze_scalar(expr, ctx, walk);
        let sql = expr.to_string();
        let ordinal = sink.produced.len();

        // Set-operation right arm: pair with the left arm's columns.
        if let Some(pairs) = sink.pair_with.clone() {
            let Some(target) = pairs.get(ordinal) else {
                let statement = ctx.statement_index;
                ctx.report(
                    Diagnostic::warning(
                        diagnostic_codes::UNSUPPORTED_SYNTAX,
                        "set operation arms project different column counts",
                    )
                    .with_statement(statement),
                );
                return;
            };
            let operation = sink.setop.unwrap_or("union");
            for source in &lineage.sources {
                add_edge(ctx, *source, *target, EdgeKind::Indirect, operation, Some(&sql));
            }
            sink.produced.push(*target);
            return;
        }

        let Some(table) = sink.table else {
            return;
        };

        let (name, synthetic) = match self.target_name(ctx, sink, &lineage, alias, ordinal) {
            Some(resolved) => resolved,
            None => return,
        };
        let flags = ColumnFlags {
            computed: !lineage.identity,
            synthetic,
            ..ColumnFlags::default()
        };
        let target = match ctx.graph.add_column(table, &name, None, flags) {
            Ok(target) => target,
            Err(error) => {
                let statement = ctx.statement_index;
                ctx.report(
                    Diagnostic::error(diagnostic_codes::INTERNAL, error.to_string())
                        .with_statement(statement),
                );
                return;
            }
        };
        sink.produced.push(target);
        link_to_column(ctx, &lineage, target, sink.verb, &sql);
    }

    /// Target column name: the sink's explicit list first, then the alias,
    /// then the source column's own name, then a synthesized ordinal name.
    fn target_name(
        &self,
        ctx: &mut AnalysisContext<'_>,
        sink: &QuerySink,
        lineage: &ScalarLineage,
        alias: Option<String>,
        ordinal: usize,
    ) -> Option<(String, bool)> {
        if let Some(columns) = &sink.columns {
            return match columns.get(ordinal) {
                Some(name) => Some((name.to_string(), false)),
                None => {
                    let statement = ctx.statement_index;
                    ctx.report(
                        Diagnostic::warning(
                            diagnostic_codes::UNSUPPORTED_SYNTAX,
                            "more projection items than target columns",
                        )
                        .with_statement(statement),
                    );
                    None
                }
            };
        }
        if let Some(alias) = alias {
            return Some((alias, false));
        }
        if lineage.identity {
            if let [source] = lineage.sources.as_slice() {
                if let Some(node) = ctx.graph.node(*source) {
                    return Some((node.kind.name().to_string(), false));
                }
            }
        }
        Some((format!("col{}", ordinal + 1), true))
    }

    /// `SELECT *` expansion: known source columns map through by
    /// name; sources without metadata produce a synthetic `StarColumnN`
    /// placeholder fed by the source table node itself.
    fn expand_star(
        &self,
        ctx: &mut AnalysisContext<'_>,
        sink: &mut QuerySink,
        qualifier: Option<&str>,
        star_counter: &mut usize,
    ) {
        if sink.pair_with.is_some() {
            let statement = ctx.statement_index;
            ctx.report(
                Diagnostic::info(
                    diagnostic_codes::UNSUPPORTED_SYNTAX,
                    "star expansion inside a set operation arm is not paired",
                )
                .with_statement(statement),
            );
            return;
        }

        let tables: Vec<NodeId> = match qualifier {
            Some(qualifier) => vec![ctx.resolve_or_create_table(qualifier)],
            None => ctx.tables_in_scope(),
        };

        for table in tables {
            let columns = visible_columns(ctx, table);
            let Some(target_table) = sink.table else {
                continue;
            };

            if columns.is_empty() {
                *star_counter += 1;
                let placeholder = format!("StarColumn{star_counter}");
                if let Ok(target) = ctx.graph.add_column(
                    target_table,
                    &placeholder,
                    None,
                    ColumnFlags::synthetic(),
                ) {
                    sink.produced.push(target);
                    add_edge(ctx, table, target, EdgeKind::Indirect, sink.verb, None);
                }
                continue;
            }

            for (name, source) in columns {
                let ordinal = sink.produced.len();
                let target_name = sink
                    .columns
                    .as_ref()
                    .and_then(|columns| columns.get(ordinal).map(|c| c.to_string()))
                    .unwrap_or_else(|| name.to_string());
                if let Ok(target) =
                    ctx.graph
                        .add_column(target_table, &target_name, None, ColumnFlags::default())
                {
                    sink.produced.push(target);
                    add_edge(ctx, source, target, EdgeKind::Direct, sink.verb, None);
                }
            }
        }
    }

    fn filter_clause(
        &self,
        ctx: &mut AnalysisContext<'_>,
        walk: &mut Walk<'_>,
        local: &mut QueryLocal,
        predicate: &Expr,
        clause: &'static str,
    ) {
        // Walked even with filter edges disabled so subqueries are still
        // discovered and registered.
        let lineage = analyze_scalar(predicate, ctx, walk);
        if !ctx.options.emit_filter_edges {
            return;
        }
        let sql = predicate.to_string();
        let output = relations::ensure_output_expr(ctx, local, &sql);
        for source in lineage.sources {
            add_edge(ctx, source, output, EdgeKind::Filter, clause, Some(&sql));
        }
    }
}

/// True when an ORDER BY entry is a bare (possibly qualified) identifier
/// rather than an arbitrary expression.
fn is_plain_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '@' | '#' | '$' | '.' | '[' | ']'))
}
