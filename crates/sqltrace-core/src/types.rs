pub mod common;
pub mod options;
pub mod response;

pub use common::{
    diagnostic_codes, Diagnostic, DiagnosticCount, Severity, Span, Summary,
};
pub use options::{AnalyzerOptions, ScriptRequest};
pub use response::AnalysisResult;
