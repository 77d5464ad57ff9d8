//! Core implementation of the opal command orchestrator: the execution tree evaluator, decorator
//! protocol, session abstraction, and supporting model described in SPEC_FULL.md. The plan
//! compiler/planner and CLI shell live outside this crate; this crate only runs an already-built
//! plan.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod builtins;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod eval;
pub mod executor;
pub mod invariant;
pub mod openfiles;
pub mod plan;
pub mod plan_reader;
pub mod registry;
pub mod secret;
pub mod session;
mod sys;
pub mod telemetry;

pub use context::{CancellationToken, Context};
pub use error::{Error, ErrorKind};
pub use executor::{ExecutionResult, Executor, ExecutorConfig};
pub use plan::{
    Arg, ExecNode, RedirectMode, RedirectTarget, Sink, SinkCapabilities, Step, Value, VariableVault,
};
pub use plan_reader::{read_plan, Plan, PlanHeader, PlanKind};
pub use registry::{Registry, RegistryEntry};
pub use secret::Secret;
