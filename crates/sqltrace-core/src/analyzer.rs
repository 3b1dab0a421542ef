//! The lineage analyzer: parses a script into batches, walks every
//! statement through the traversal engine, and assembles the final graph,
//! diagnostics, and summary.
//!
//! Services (interner, catalog) are passed in at construction; tests
//! instantiate fresh copies instead of sharing process-wide singletons.

pub mod context;
pub mod engine;
pub(crate) mod expression;
pub mod handlers;
pub mod helpers;

pub use context::{AnalysisContext, QuerySink, ScopeKind, StateValue, VARIABLES_OWNER};
pub use engine::{Engine, Fragment, FragmentKind, LineageHandler, Walk};
pub use handlers::RESULT_TABLE;

use crate::batch::CancellationToken;
use crate::catalog::{EmptyCatalog, SchemaCatalog};
use crate::intern::StringInterner;
use crate::parser;
use crate::types::{
    diagnostic_codes, AnalysisResult, AnalyzerOptions, Diagnostic, DiagnosticCount,
    ScriptRequest, Summary,
};
use sqlparser::ast::Statement;
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::debug;

/// Analyzes a script with default options, a fresh interner, and an empty
/// catalog. The main entry point for one-off analyses.
pub fn analyze(sql: &str) -> AnalysisResult {
    Analyzer::new(AnalyzerOptions::default()).analyze(&ScriptRequest::new(sql))
}

/// The column-lineage analyzer.
///
/// One `Analyzer` is cheap to share: concurrent analyses share the interner
/// while each walk owns its graph, context, and visited set.
pub struct Analyzer {
    options: AnalyzerOptions,
    interner: Arc<StringInterner>,
    catalog: Arc<dyn SchemaCatalog>,
    engine: Engine,
}

impl Analyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Self::with_services(options, Arc::new(StringInterner::new()), Arc::new(EmptyCatalog))
    }

    /// Builds an analyzer around shared services.
    pub fn with_services(
        options: AnalyzerOptions,
        interner: Arc<StringInterner>,
        catalog: Arc<dyn SchemaCatalog>,
    ) -> Self {
        Self {
            options,
            interner,
            catalog,
            engine: handlers::default_engine(),
        }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn analyze(&self, request: &ScriptRequest) -> AnalysisResult {
        self.analyze_with_cancellation(request, CancellationToken::new())
    }

    /// Analyzes one script, unwinding early when the token is signaled or a
    /// budget runs out; the result then carries the best partial graph with
    /// `summary.incomplete` set.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip(self, request, cancel), fields(source = request.source_name.as_deref()))
    )]
    pub fn analyze_with_cancellation(
        &self,
        request: &ScriptRequest,
        cancel: CancellationToken,
    ) -> AnalysisResult {
        let mut ctx = AnalysisContext::new(
            &self.options,
            self.catalog.as_ref(),
            self.interner.clone(),
            &request.sql,
            cancel,
        );

        let mut statement_count = 0;
        'batches: for batch in parser::parse_script(&request.sql) {
            ctx.batch_offset = batch.offset;
            match &batch.result {
                Err(error) => {
                    ctx.report(
                        Diagnostic::error(diagnostic_codes::PARSE_ERROR, error.to_string())
                            .with_statement(statement_count),
                    );
                }
                Ok(statements) => {
                    ctx.push_scope(ScopeKind::Batch, None);
                    for statement in statements {
                        if ctx.should_stop() {
                            ctx.pop_scope();
                            break 'batches;
                        }
                        ctx.statement_index = statement_count;
                        self.note_statement(&mut ctx, statement);
                        self.engine.walk(Fragment::Statement(statement), &mut ctx);
                        statement_count += 1;
                    }
                    ctx.pop_scope();
                }
            }
        }

        if self.options.compact_on_finish {
            ctx.graph.compact();
        }

        let stats = ctx.graph.statistics();
        #[cfg(feature = "tracing")]
        debug!(
            statements = statement_count,
            nodes = stats.node_count(),
            edges = stats.edge_count(),
            "analysis finished"
        );

        let summary = Summary {
            statement_count,
            table_count: stats.table_count,
            column_count: stats.column_count,
            expression_count: stats.expression_count,
            edge_count: stats.edge_count(),
            diagnostic_count: DiagnosticCount::tally(&ctx.diagnostics),
            incomplete: ctx.incomplete,
        };

        AnalysisResult {
            source_name: request.source_name.clone(),
            graph: ctx.graph,
            diagnostics: ctx.diagnostics,
            summary,
        }
    }

    /// Records an informational diagnostic for statement kinds the walk
    /// recognizes but extracts no lineage from.
    fn note_statement(&self, ctx: &mut AnalysisContext<'_>, statement: &Statement) {
        if classify_statement(statement) == "UNKNOWN" {
            let index = ctx.statement_index;
            ctx.report(
                Diagnostic::info(
                    diagnostic_codes::UNSUPPORTED_SYNTAX,
                    "statement type not supported for lineage analysis",
                )
                .with_statement(index),
            );
        }
    }
}

/// Short classification label for a statement.
pub fn classify_statement(statement: &Statement) -> &'static str {
    match statement {
        Statement::Query(_) => "SELECT",
        Statement::Insert(_) => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::Merge { .. } => "MERGE",
        Statement::CreateTable(create) => {
            if create.query.is_some() {
                "CREATE_TABLE_AS"
            } else {
                "CREATE_TABLE"
            }
        }
        Statement::CreateView { .. } => "CREATE_VIEW",
        Statement::CreateProcedure { .. } => "CREATE_PROCEDURE",
        Statement::CreateFunction { .. } => "CREATE_FUNCTION",
        Statement::CreateIndex(_) => "CREATE_INDEX",
        Statement::Execute { .. } => "EXECUTE",
        Statement::Declare { .. } => "DECLARE",
        Statement::Set(_) => "SET",
        Statement::If(_) => "IF",
        Statement::While(_) => "WHILE",
        Statement::Drop { .. } => "DROP",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Grant { .. } | Statement::Revoke { .. } => "PERMISSION",
        Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. } => "TRANSACTION",
        Statement::Use(_) => "USE",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statement() {
        let statements = crate::parser::parse_batch(
            "SELECT 1; INSERT INTO t (a) VALUES (1); DECLARE @v INT; BEGIN TRANSACTION;",
        )
        .unwrap();
        let labels: Vec<&str> = statements.iter().map(classify_statement).collect();
        assert_eq!(labels, vec!["SELECT", "INSERT", "DECLARE", "TRANSACTION"]);
    }

    #[test]
    fn test_parse_error_becomes_diagnostic() {
        let result = analyze("SELECT FROM WHERE");
        assert_eq!(result.summary.statement_count, 0);
        assert_eq!(result.summary.diagnostic_count.errors, 1);
        assert_eq!(result.diagnostics[0].code, diagnostic_codes::PARSE_ERROR);
    }

    #[test]
    fn test_parse_error_is_batch_local() {
        let result = analyze("SELECT FROM\nGO\nSELECT a FROM t");
        // The second batch still analyzed.
        assert_eq!(result.summary.statement_count, 1);
        assert_eq!(result.summary.diagnostic_count.errors, 1);
        assert!(result.graph.table_id("t").is_some());
    }

    #[test]
    fn test_statement_indices_span_batches() {
        let result = analyze("SELECT a FROM t\nGO\nSELECT b FROM u");
        assert_eq!(result.summary.statement_count, 2);
    }
}
