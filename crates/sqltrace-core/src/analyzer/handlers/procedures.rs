//! Stored procedure handlers: CREATE PROCEDURE bodies and
//! EXECUTE argument mapping.

use crate::analyzer::context::{AnalysisContext, ScopeKind};
use crate::analyzer::engine::{Fragment, FragmentKind, LineageHandler, Walk};
use crate::analyzer::expression::{add_edge, analyze_scalar};
use crate::analyzer::handlers::control_flow::conditional_statements;
use crate::analyzer::handlers::relations::visible_columns;
use crate::analyzer::helpers::object_name_parts;
use crate::graph::{ColumnFlags, EdgeKind, NodeId, NodeKind, TableType};
use crate::types::{diagnostic_codes, Diagnostic};
use sqlparser::ast::{BinaryOperator, Expr, Statement};

/// CREATE PROCEDURE: the procedure becomes a Table(Procedure) node, each
/// parameter a column under it, and the body is walked with
/// `CurrentProcedure` set so DECLAREd variables land under the procedure.
pub struct CreateProcedureHandler;

impl LineageHandler for CreateProcedureHandler {
    fn name(&self) -> &'static str {
        "create-procedure"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::CreateProcedure]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::CreateProcedure { .. }))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::CreateProcedure {
            name, params, body, ..
        }) = fragment
        else {
            return false;
        };

        let parts = object_name_parts(name);
        let (schema, proc_name) = match parts.as_slice() {
            [schema, proc_name] => (Some(schema.as_str()), proc_name.as_str()),
            [proc_name] => (None, proc_name.as_str()),
            [_, schema, proc_name] => (Some(schema.as_str()), proc_name.as_str()),
            _ => (None, "procedure"),
        };

        let procedure = ctx
            .graph
            .add_table(proc_name, TableType::Procedure, schema, None);
        ctx.register_table(&parts.join("."), procedure);
        ctx.graph.mark_output(procedure);

        ctx.push_scope(ScopeKind::Procedure, Some(proc_name));
        let previous = ctx.current_procedure.replace(procedure);

        if let Some(params) = params {
            for param in params {
                let data_type = ctx.catalog.resolve_type(&param.data_type.to_string());
                if let Ok(column) = ctx.graph.add_column(
                    procedure,
                    &param.name.value,
                    Some(&data_type),
                    ColumnFlags::default(),
                ) {
                    // Parameters are part of the procedure's interface and
                    // survive compaction with it.
                    ctx.graph.mark_output(column);
                    ctx.bind_parameter(&param.name.value, column);
                }
            }
        }

        for statement in conditional_statements(body) {
            walk.descend(Fragment::Statement(statement), ctx);
        }

        ctx.current_procedure = previous;
        ctx.pop_scope();
        true
    }
}

/// EXECUTE: arguments map onto the procedure's parameters with `Parameter`
/// edges (operation "map"). Unknown procedures are tolerated as stubs with
/// `@ParamN` parameter columns.
pub struct ExecuteHandler;

impl LineageHandler for ExecuteHandler {
    fn name(&self) -> &'static str {
        "execute"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Execute]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Execute { .. }))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Execute {
            name, parameters, ..
        }) = fragment
        else {
            return false;
        };

        let Some(name) = name else {
            let statement = ctx.statement_index;
            ctx.report(
                Diagnostic::info(
                    diagnostic_codes::UNSUPPORTED_SYNTAX,
                    "EXECUTE of a dynamic string is not tracked",
                )
                .with_statement(statement),
            );
            return true;
        };

        let procedure = self.resolve_procedure(ctx, &object_name_parts(name));
        ctx.graph.mark_output(procedure);
        let declared: Vec<NodeId> = visible_columns(ctx, procedure)
            .into_iter()
            .map(|(_, id)| id)
            .collect();

        for (ordinal, argument) in parameters.iter().enumerate() {
            let (parameter, value) = self.parameter_for(ctx, procedure, &declared, ordinal, argument);
            let lineage = analyze_scalar(value, ctx, walk);
            let sql = value.to_string();
            for source in lineage.sources {
                add_edge(ctx, source, parameter, EdgeKind::Parameter, "map", Some(&sql));
            }
        }
        true
    }
}

impl ExecuteHandler {
    fn resolve_procedure(&self, ctx: &mut AnalysisContext<'_>, parts: &[String]) -> NodeId {
        let key = parts.join(".");
        if let Some(existing) = ctx.lookup_table(&key) {
            if matches!(
                ctx.graph.node(existing).map(|node| &node.kind),
                Some(NodeKind::Table(table)) if table.table_type == TableType::Procedure
            ) {
                return existing;
            }
        }

        let (schema, proc_name) = match parts {
            [schema, proc_name] => (Some(schema.as_str()), proc_name.as_str()),
            [proc_name] => (None, proc_name.as_str()),
            [_, schema, proc_name] => (Some(schema.as_str()), proc_name.as_str()),
            _ => (None, "procedure"),
        };
        let statement = ctx.statement_index;
        ctx.report_with_span(
            Diagnostic::info(
                diagnostic_codes::UNKNOWN_IDENTIFIER,
                format!("Procedure '{key}' executed before definition; creating a stub"),
            )
            .with_statement(statement),
            &key,
        );
        let stub = ctx
            .graph
            .add_table(proc_name, TableType::Procedure, schema, None);
        ctx.register_table(&key, stub);
        stub
    }

    /// The parameter node and value expression for one argument: named
    /// (`@p = expr`) when the argument is an equality on a variable name,
    /// positional otherwise (stubbing `@ParamN` for unknown procedures).
    fn parameter_for<'v>(
        &self,
        ctx: &mut AnalysisContext<'_>,
        procedure: NodeId,
        declared: &[NodeId],
        ordinal: usize,
        argument: &'v Expr,
    ) -> (NodeId, &'v Expr) {
        if let Expr::BinaryOp { left, op, right } = argument {
            if *op == BinaryOperator::Eq {
                if let Expr::Identifier(ident) = left.as_ref() {
                    if ident.value.starts_with('@') {
                        let parameter = ctx.column_or_stub(procedure, &ident.value);
                        ctx.graph.mark_output(parameter);
                        return (parameter, right);
                    }
                }
            }
        }

        let parameter = match declared.get(ordinal) {
            Some(existing) => *existing,
            None => {
                let stub_name = format!("@Param{}", ordinal + 1);
                ctx.column_or_stub(procedure, &stub_name)
            }
        };
        ctx.graph.mark_output(parameter);
        (parameter, argument)
    }
}
