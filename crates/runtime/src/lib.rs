//! ensura-runtime: the EnsuraScript enforcement runtime.
//!
//! Consumes a [`Plan`](ensura_core::Plan) compiled by `ensura-core`
//! and repeatedly checks each step through its handler, repairing
//! violations with a bounded retry budget. Handlers live behind the
//! [`Handler`] contract and are looked up in a [`HandlerRegistry`];
//! [`default_registry`] installs the built-ins (filesystem, POSIX
//! permissions, AES-256-GCM, HTTP, cron).

pub mod handler;
pub mod runtime;

pub use handler::{
    default_registry, Handler, HandlerArgs, HandlerError, HandlerRegistry, HandlerResult,
};
pub use runtime::{Config, RunResult, Runtime, RuntimeError, StepResult, StepStatus};
