pub mod analyzer;
pub mod batch;
pub mod catalog;
pub mod error;
pub mod graph;
pub mod intern;
pub mod parser;
pub mod types;

// Re-export main types and functions
pub use analyzer::{analyze, classify_statement, Analyzer};
pub use batch::{
    BatchAnalyzer, CancellationToken, LockManager, MemoryMonitor, MemoryPressure,
    NoopMemoryMonitor,
};
pub use catalog::{
    ColumnMetadata, ColumnOrigin, EmptyCatalog, MemoryCatalog, SchemaCatalog, TableMetadata,
};
pub use error::{AnalysisError, ParseError, ParseErrorKind};
pub use parser::{parse_batch, parse_script, split_batches};

// Re-export graph and shared types explicitly
pub use graph::{
    ColumnFlags,
    ColumnNode,
    Edge,
    EdgeId,
    EdgeKind,
    ExpressionNode,
    ExpressionType,
    GraphDocument,
    GraphStatistics,
    LineageGraph,
    Node,
    NodeId,
    NodeKind,
    TableNode,
    TableType,
};
pub use intern::{hash_id, IdAllocator, StringInterner};
pub use types::{
    diagnostic_codes,
    AnalysisResult,
    AnalyzerOptions,
    Diagnostic,
    DiagnosticCount,
    ScriptRequest,
    Severity,
    Span,
    Summary,
};
