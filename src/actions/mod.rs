//! Side-effecting actions run when a scope triggers.

/// Handler table and executor.
pub mod executor;

pub use executor::{
    resolve_params, ActionExecutor, ActionHandler, ActionInvocation, ActionOutcome, ActionRegistry,
    ActionStatus,
};
