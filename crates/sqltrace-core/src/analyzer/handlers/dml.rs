//! DML and DDL-with-query handlers: INSERT, UPDATE and MERGE
//! (Direct/Indirect edges for SET targets, like INSERT), CREATE TABLE AS,
//! and CREATE VIEW.

use crate::analyzer::context::{AnalysisContext, QuerySink, ScopeKind};
use crate::analyzer::engine::{Fragment, FragmentKind, LineageHandler, Walk};
use crate::analyzer::expression::{analyze_scalar, link_to_column};
use crate::analyzer::handlers::relations::{self, visible_columns, QueryLocal};
use crate::analyzer::helpers::{identifier_parts, object_name_parts};
use crate::graph::{ColumnFlags, NodeId, TableType};
use crate::types::{diagnostic_codes, Diagnostic};
use sqlparser::ast::{
    Assignment, AssignmentTarget, MergeAction, MergeClause, MergeInsertKind, Statement,
    TableFactor, UpdateTableFromKind,
};
use std::sync::Arc;

/// INSERT: pairs the target column list positionally with the source
/// projection; every pair yields Direct or Indirect edges with operation
/// "insert".
pub struct InsertHandler;

impl LineageHandler for InsertHandler {
    fn name(&self) -> &'static str {
        "insert"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Insert]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Insert(_)))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Insert(insert)) = fragment else {
            return false;
        };

        ctx.push_scope(ScopeKind::Query, None);
        let target = ctx.resolve_or_create_table(&insert.table.to_string());
        ctx.graph.mark_output(target);

        let columns: Option<Vec<Arc<str>>> = if insert.columns.is_empty() {
            // Full column list of the target, when metadata gave us one.
            let known: Vec<Arc<str>> = visible_columns(ctx, target)
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            (!known.is_empty()).then_some(known)
        } else {
            Some(
                insert
                    .columns
                    .iter()
                    .map(|column| ctx.graph.canonical(&column.value))
                    .collect(),
            )
        };

        let mut sink = QuerySink::table(target, "insert");
        if let Some(columns) = columns {
            sink = sink.with_columns(columns);
        }
        ctx.push_sink(sink);
        if let Some(source) = &insert.source {
            walk.descend(Fragment::Query(source), ctx);
        }
        if let Some(sink) = ctx.pop_sink() {
            for column in sink.produced {
                ctx.graph.mark_output(column);
            }
        }
        ctx.pop_scope();
        true
    }
}

/// UPDATE: SET targets receive Direct/Indirect edges from their assigned
/// expressions, operation "update".
pub struct UpdateHandler;

impl LineageHandler for UpdateHandler {
    fn name(&self) -> &'static str {
        "update"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Update]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Update { .. }))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        }) = fragment
        else {
            return false;
        };

        ctx.push_scope(ScopeKind::Query, None);
        let mut local = QueryLocal::new();
        relations::register_table_with_joins(ctx, walk, table, &mut local);

        let target = match &table.relation {
            TableFactor::Table { name, .. } => {
                let id = ctx.resolve_or_create_table(&name.to_string());
                ctx.graph.mark_output(id);
                Some(id)
            }
            _ => None,
        };

        if let Some(from_kind) = from {
            let tables = match from_kind {
                UpdateTableFromKind::BeforeSet(tables) | UpdateTableFromKind::AfterSet(tables) => {
                    tables
                }
            };
            for table in tables {
                relations::register_table_with_joins(ctx, walk, table, &mut local);
            }
        }

        for assignment in assignments {
            apply_assignment(ctx, walk, target, assignment, "update");
        }

        // WHERE walked for subquery discovery; control-flow into the body
        // produces no edges.
        if let Some(selection) = selection {
            let _ = analyze_scalar(selection, ctx, walk);
        }

        ctx.pop_scope();
        true
    }
}

fn apply_assignment(
    ctx: &mut AnalysisContext<'_>,
    walk: &mut Walk<'_>,
    target_table: Option<NodeId>,
    assignment: &Assignment,
    verb: &'static str,
) {
    let AssignmentTarget::ColumnName(name) = &assignment.target else {
        let statement = ctx.statement_index;
        ctx.report(
            Diagnostic::info(
                diagnostic_codes::UNSUPPORTED_SYNTAX,
                "tuple assignment targets are not tracked",
            )
            .with_statement(statement),
        );
        return;
    };

    let parts = object_name_parts(name);
    let target = match (parts.as_slice(), target_table) {
        ([column], Some(table)) => Some(ctx.column_or_stub(table, column)),
        _ => ctx.resolve_column(&parts).map(|(_, column)| column),
    };
    let Some(target) = target else {
        return;
    };

    let lineage = analyze_scalar(&assignment.value, ctx, walk);
    link_to_column(ctx, &lineage, target, verb, &assignment.value.to_string());
    ctx.graph.mark_output(target);
}

/// MERGE: the ON predicate contributes Join edges; WHEN MATCHED UPDATE and
/// WHEN NOT MATCHED INSERT clauses produce edges like UPDATE/INSERT with
/// operation "merge".
pub struct MergeHandler;

impl LineageHandler for MergeHandler {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Merge]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Merge { .. }))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Merge {
            table,
            source,
            on,
            clauses,
            ..
        }) = fragment
        else {
            return false;
        };

        ctx.push_scope(ScopeKind::Query, None);
        let mut local = QueryLocal::new();
        relations::register_table_factor(ctx, walk, table, &mut local);
        let target = match table {
            TableFactor::Table { name, .. } => {
                let id = ctx.resolve_or_create_table(&name.to_string());
                ctx.graph.mark_output(id);
                Some(id)
            }
            _ => None,
        };
        relations::register_table_factor(ctx, walk, source, &mut local);

        relations::emit_join_pairs(ctx, walk, on, "merge", &on.to_string());

        for clause in clauses {
            self.process_clause(ctx, walk, target, clause);
        }

        ctx.pop_scope();
        true
    }
}

impl MergeHandler {
    fn process_clause(
        &self,
        ctx: &mut AnalysisContext<'_>,
        walk: &mut Walk<'_>,
        target: Option<NodeId>,
        clause: &MergeClause,
    ) {
        match &clause.action {
            MergeAction::Update { assignments } => {
                for assignment in assignments {
                    apply_assignment(ctx, walk, target, assignment, "merge");
                }
            }
            MergeAction::Insert(insert) => {
                let columns: Vec<Arc<str>> = insert
                    .columns
                    .iter()
                    .map(|column| ctx.graph.canonical(&column.value))
                    .collect();
                if let MergeInsertKind::Values(values) = &insert.kind {
                    for row in &values.rows {
                        for (ordinal, value) in row.iter().enumerate() {
                            let Some(table) = target else { continue };
                            let Some(column) = columns.get(ordinal) else {
                                continue;
                            };
                            let column = column.to_string();
                            let target_column = ctx.column_or_stub(table, &column);
                            let lineage = analyze_scalar(value, ctx, walk);
                            link_to_column(ctx, &lineage, target_column, "merge", &value.to_string());
                            ctx.graph.mark_output(target_column);
                        }
                    }
                }
            }
            MergeAction::Delete => {}
        }

        if let Some(predicate) = &clause.predicate {
            let _ = analyze_scalar(predicate, ctx, walk);
        }
    }
}

/// CREATE TABLE: a CTAS query flows into the new table like SELECT INTO;
/// a plain definition registers the declared columns as implied schema.
pub struct CreateTableHandler;

impl LineageHandler for CreateTableHandler {
    fn name(&self) -> &'static str {
        "create-table"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::CreateTable]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::CreateTable(_)))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::CreateTable(create)) = fragment else {
            return false;
        };

        let name = create.name.to_string();
        ctx.push_scope(ScopeKind::Query, None);
        let target = ctx.resolve_or_create_table(&name);
        ctx.graph.mark_output(target);

        for column in &create.columns {
            let data_type = ctx.catalog.resolve_type(&column.data_type.to_string());
            let _ = ctx
                .graph
                .add_column(target, &column.name.value, Some(&data_type), ColumnFlags::default());
        }

        if let Some(query) = &create.query {
            ctx.push_sink(QuerySink::table(target, "select-into"));
            walk.descend(Fragment::Query(query), ctx);
            if let Some(sink) = ctx.pop_sink() {
                for column in sink.produced {
                    ctx.graph.mark_output(column);
                }
            }
        }
        ctx.pop_scope();
        true
    }
}

/// CREATE VIEW: a View table fed by its defining query.
pub struct CreateViewHandler;

impl LineageHandler for CreateViewHandler {
    fn name(&self) -> &'static str {
        "create-view"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::CreateView]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::CreateView { .. }))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::CreateView { name, query, .. }) = fragment else {
            return false;
        };

        let parts = identifier_parts(&name.to_string());
        let (schema, view_name) = match parts.as_slice() {
            [schema, view_name] => (Some(schema.as_str()), view_name.as_str()),
            [view_name] => (None, view_name.as_str()),
            [_, schema, view_name] => (Some(schema.as_str()), view_name.as_str()),
            _ => (None, "view"),
        };

        ctx.push_scope(ScopeKind::Query, None);
        let view = ctx.graph.add_table(view_name, TableType::View, schema, None);
        ctx.register_table(&parts.join("."), view);
        ctx.graph.mark_output(view);

        ctx.push_sink(QuerySink::table(view, "select"));
        walk.descend(Fragment::Query(query), ctx);
        if let Some(sink) = ctx.pop_sink() {
            for column in sink.produced {
                ctx.graph.mark_output(column);
            }
        }
        ctx.pop_scope();
        true
    }
}
