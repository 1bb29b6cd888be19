//! The compilation pipeline: a thin orchestrator that runs each stage
//! in order. A stage with diagnostics stops the pipeline and returns
//! everything that stage collected.

use crate::binder::Binder;
use crate::error::Diagnostic;
use crate::graph;
use crate::graph::Graph;
use crate::imply::Expander;
use crate::parser::parse_source;
use crate::planner::{create_plan, Plan};
use crate::Program;

/// Everything compilation produces for a well-formed program.
#[derive(Debug)]
pub struct CompileOutput {
    /// The fully bound and expanded program.
    pub program: Program,
    pub graph: Graph,
    pub plan: Plan,
    /// Non-fatal findings (e.g. skipped `for each` blocks).
    pub warnings: Vec<Diagnostic>,
}

/// Compile `.ens` source into an execution plan.
pub fn compile_source(source: &str, filename: &str) -> Result<CompileOutput, Vec<Diagnostic>> {
    // Lex + parse.
    let (program, parse_diagnostics) = parse_source(source, filename);
    if !parse_diagnostics.is_empty() {
        return Err(parse_diagnostics);
    }

    // Bind subjects and references, then expand policy applications.
    let mut binder = Binder::new();
    let program = binder.bind(program);
    let program = binder.expand_policies(program);
    if !binder.diagnostics().is_empty() {
        return Err(binder.diagnostics().to_vec());
    }
    let warnings = binder.warnings().to_vec();

    // Implication expansion and conflict detection.
    let mut expander = Expander::new();
    let program = expander.expand(program);
    expander.check_conflicts(&program);
    if !expander.diagnostics().is_empty() {
        return Err(expander.diagnostics().to_vec());
    }

    // Dependency graph.
    let graph = graph::build(&program);
    if !graph.diagnostics().is_empty() {
        return Err(graph.diagnostics().to_vec());
    }

    // Topological plan.
    let plan = create_plan(&graph, &program).map_err(|diag| vec![diag])?;

    Ok(CompileOutput {
        program,
        graph,
        plan,
        warnings,
    })
}
