//! Variable handlers: DECLARE and SET assignments.
//!
//! Variables are columns under the current procedure (or the synthetic
//! `@@Variables` table). Assignment edges are always `Indirect`: a plain
//! copy is labeled "assignment", a computed one carries the expression's
//! operation, so `SET @v = @v + 1` records the self-edge with "+".

use crate::analyzer::context::AnalysisContext;
use crate::analyzer::engine::{Fragment, FragmentKind, LineageHandler, Walk};
use crate::analyzer::expression::{analyze_scalar, link_assignment};
use sqlparser::ast::{DeclareAssignment, Expr, Set, Statement};

pub struct DeclareHandler;

impl LineageHandler for DeclareHandler {
    fn name(&self) -> &'static str {
        "declare"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::Declare]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Declare { .. }))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Declare { stmts }) = fragment else {
            return false;
        };

        for declare in stmts {
            let data_type = declare.data_type.as_ref().map(|t| t.to_string());
            let initializer = declare.assignment.as_ref().and_then(assignment_expr);

            for name in &declare.names {
                let variable = ctx.declare_variable(&name.value, data_type.as_deref());
                if let Some(expr) = initializer {
                    let lineage = analyze_scalar(expr, ctx, walk);
                    link_assignment(ctx, &lineage, variable, &expr.to_string());
                }
            }
        }
        true
    }
}

fn assignment_expr(assignment: &DeclareAssignment) -> Option<&Expr> {
    match assignment {
        DeclareAssignment::Expr(expr)
        | DeclareAssignment::Default(expr)
        | DeclareAssignment::DuckAssignment(expr)
        | DeclareAssignment::MsSqlAssignment(expr) => Some(expr),
        _ => None,
    }
}

pub struct SetVariableHandler;

impl LineageHandler for SetVariableHandler {
    fn name(&self) -> &'static str {
        "set-variable"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::SetStatement]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(fragment, Fragment::Statement(Statement::Set(_)))
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        let Fragment::Statement(Statement::Set(set)) = fragment else {
            return false;
        };

        if let Set::SingleAssignment {
            variable, values, ..
        } = set
        {
            let name = variable.to_string();
            // Session options (SET NOCOUNT ON, ...) carry no lineage.
            if name.starts_with('@') {
                let target = ctx.set_variable(&name);
                if let Some(value) = values.first() {
                    let lineage = analyze_scalar(value, ctx, walk);
                    link_assignment(ctx, &lineage, target, &value.to_string());
                }
            }
        }
        true
    }
}
