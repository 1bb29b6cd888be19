//! ensura-core: EnsuraScript compiler core.
//!
//! Compiles `.ens` source declaring system-state guarantees into an
//! ordered execution plan:
//!
//! 1. [`lexer`] -- UTF-8 source to tokens with positions
//! 2. [`parser`] -- tokens to the statement AST
//! 3. [`binder`] -- implicit subjects, aliases, policy expansion
//! 4. [`imply`] -- prerequisite expansion, dedupe, conflicts
//! 5. [`graph`] -- dependency DAG over guarantees
//! 6. [`planner`] -- Kahn toposort into the ordered [`Plan`]
//!
//! [`compile_source`] runs the whole pipeline; the enforcement loop
//! that executes plans lives in the `ensura-runtime` crate.

pub mod ast;
pub mod binder;
pub mod compile;
pub mod conditions;
pub mod error;
pub mod graph;
pub mod imply;
pub mod lexer;
pub mod parser;
pub mod planner;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{EnsureStmt, Program, ResourceRef, Statement, ViolationHandler};
pub use error::{Diagnostic, Stage};
pub use lexer::{Lexer, Position, Token, TokenKind};
pub use planner::{Plan, Step};

// ── Convenience re-exports: pipeline entry points ────────────────────

pub use compile::{compile_source, CompileOutput};
pub use parser::parse_source;
