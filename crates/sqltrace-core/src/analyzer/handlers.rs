//! Construct handlers: one per lineage-bearing T-SQL shape.
//!
//! Each handler matches structurally via `can_handle` and establishes nodes
//! and edges via `handle`. The default set below is registered in priority
//! order; statement-level handlers run before the generic query machinery.

pub mod control_flow;
pub mod dml;
pub mod procedures;
pub mod query;
pub mod relations;
pub mod select;
pub mod variables;

pub use control_flow::ControlFlowHandler;
pub use dml::{CreateTableHandler, CreateViewHandler, InsertHandler, MergeHandler, UpdateHandler};
pub use procedures::{CreateProcedureHandler, ExecuteHandler};
pub use query::{QueryExprHandler, QueryStatementHandler, SetExprHandler, RESULT_TABLE};
pub use select::SelectHandler;
pub use variables::{DeclareHandler, SetVariableHandler};

use crate::analyzer::engine::{Engine, LineageHandler};
use std::sync::Arc;

/// The default handler set, in registration order.
pub fn default_handlers() -> Vec<Arc<dyn LineageHandler>> {
    vec![
        Arc::new(QueryStatementHandler),
        Arc::new(QueryExprHandler),
        Arc::new(SetExprHandler),
        Arc::new(SelectHandler),
        Arc::new(InsertHandler),
        Arc::new(UpdateHandler),
        Arc::new(MergeHandler),
        Arc::new(CreateTableHandler),
        Arc::new(CreateViewHandler),
        Arc::new(CreateProcedureHandler),
        Arc::new(ExecuteHandler),
        Arc::new(DeclareHandler),
        Arc::new(SetVariableHandler),
        Arc::new(ControlFlowHandler),
    ]
}

/// An engine loaded with the default handlers.
pub fn default_engine() -> Engine {
    let mut engine = Engine::new();
    for handler in default_handlers() {
        engine.register(handler);
    }
    engine
}
