//! Control-flow handlers: IF, WHILE, and BEGIN/END blocks.
//!
//! Bodies are processed in order inside their own scope frame. Predicates
//! produce no edges into the bodies: control-flow dependencies are out of
//! scope, only data flow is tracked.

use crate::analyzer::context::{AnalysisContext, ScopeKind};
use crate::analyzer::engine::{Fragment, FragmentKind, LineageHandler, Walk};
use sqlparser::ast::{ConditionalStatementBlock, ConditionalStatements, Statement};

/// Statements of a conditional block, whether written inline or wrapped in
/// BEGIN/END.
pub(crate) fn conditional_statements(block: &ConditionalStatements) -> &[Statement] {
    match block {
        ConditionalStatements::Sequence { statements } => statements,
        ConditionalStatements::BeginEnd(begin_end) => &begin_end.statements,
    }
}

pub struct ControlFlowHandler;

impl ControlFlowHandler {
    fn walk_block(
        &self,
        ctx: &mut AnalysisContext<'_>,
        walk: &mut Walk<'_>,
        kind: ScopeKind,
        block: &ConditionalStatementBlock,
    ) {
        ctx.push_scope(kind, None);
        for statement in conditional_statements(&block.conditional_statements) {
            walk.descend(Fragment::Statement(statement), ctx);
        }
        ctx.pop_scope();
    }
}

impl LineageHandler for ControlFlowHandler {
    fn name(&self) -> &'static str {
        "control-flow"
    }

    fn kinds(&self) -> &'static [FragmentKind] {
        &[FragmentKind::If, FragmentKind::While]
    }

    fn can_handle(&self, fragment: &Fragment<'_>) -> bool {
        matches!(
            fragment,
            Fragment::Statement(Statement::If(_)) | Fragment::Statement(Statement::While(_))
        )
    }

    fn handle(
        &self,
        fragment: &Fragment<'_>,
        walk: &mut Walk<'_>,
        ctx: &mut AnalysisContext<'_>,
    ) -> bool {
        match fragment {
            Fragment::Statement(Statement::If(statement)) => {
                self.walk_block(ctx, walk, ScopeKind::If, &statement.if_block);
                for block in &statement.elseif_blocks {
                    self.walk_block(ctx, walk, ScopeKind::If, block);
                }
                if let Some(block) = &statement.else_block {
                    self.walk_block(ctx, walk, ScopeKind::If, block);
                }
                true
            }
            Fragment::Statement(Statement::While(statement)) => {
                self.walk_block(ctx, walk, ScopeKind::While, &statement.while_block);
                true
            }
            _ => false,
        }
    }
}
