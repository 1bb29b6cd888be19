//! Turns the sorted guarantee graph into the executable plan.

use std::collections::BTreeMap;

use crate::ast::{EnsureStmt, Program, Statement, ViolationHandler};
use crate::conditions;
use crate::error::Diagnostic;
use crate::graph::Graph;

/// One executable step of the plan.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub stmt: EnsureStmt,
    pub description: String,
    /// Explicit handler name, or the condition's default.
    pub handler: String,
    pub args: BTreeMap<String, String>,
    pub is_invariant: bool,
}

/// The deterministic, ordered execution plan. Immutable after
/// planning.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub global_violation: Option<ViolationHandler>,
}

/// Topologically order the graph and emit one step per guarantee.
pub fn create_plan(graph: &Graph, program: &Program) -> Result<Plan, Diagnostic> {
    let sorted = graph.topo_sort()?;

    let steps = sorted.iter().map(|guarantee| {
        let stmt = &guarantee.stmt;
        let (handler, args) = match &stmt.handler {
            Some(spec) => (spec.name.clone(), spec.args.clone()),
            None => (
                conditions::default_handler(&stmt.condition).to_owned(),
                BTreeMap::new(),
            ),
        };

        Step {
            id: guarantee.id.clone(),
            stmt: stmt.clone(),
            description: describe(stmt),
            handler,
            args,
            is_invariant: guarantee.is_invariant,
        }
    });

    Ok(Plan {
        steps: steps.collect(),
        global_violation: extract_global_violation(program),
    })
}

fn describe(stmt: &EnsureStmt) -> String {
    let mut parts = vec!["Ensure".to_owned(), stmt.condition.clone()];
    if let Some(subject) = &stmt.subject {
        parts.push("on".to_owned());
        parts.push(subject.canonical());
    }
    if let Some(handler) = &stmt.handler {
        parts.push("with".to_owned());
        parts.push(handler.name.clone());
    }
    parts.join(" ")
}

fn extract_global_violation(program: &Program) -> Option<ViolationHandler> {
    program.statements.iter().find_map(|stmt| match stmt {
        Statement::OnViolation(block) => Some(block.handler.clone()),
        _ => None,
    })
}

impl Plan {
    /// JSON form of the plan. serde_json keeps map keys sorted, so the
    /// output is byte-identical for identical input.
    pub fn to_json(&self) -> serde_json::Value {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .map(|step| {
                serde_json::json!({
                    "id":          step.id,
                    "description": step.description,
                    "handler":     step.handler,
                    "args":        step.args,
                    "isInvariant": step.is_invariant,
                    "isImplied":   step.stmt.is_implied,
                })
            })
            .collect();

        let mut plan = serde_json::json!({ "steps": steps });
        if let Some(violation) = &self.global_violation {
            plan["globalViolation"] = serde_json::json!({
                "retry":  violation.retry,
                "notify": violation.notify,
            });
        }
        plan
    }

    /// Human-readable rendering for `ensura plan`.
    pub fn render(&self) -> String {
        let mut out = String::from("Execution Plan\n==============\n\n");

        for (i, step) in self.steps.iter().enumerate() {
            let marker = if step.is_invariant { "! " } else { "  " };
            out.push_str(&format!("{}{}. {}\n", marker, i + 1, step.description));
            out.push_str(&format!("      Handler: {}\n", step.handler));
            if !step.args.is_empty() {
                out.push_str("      Args:\n");
                for (key, value) in &step.args {
                    out.push_str(&format!("        {}: {}\n", key, value));
                }
            }
        }

        if let Some(violation) = &self.global_violation {
            out.push_str("\nGlobal Violation Handler\n------------------------\n");
            if violation.retry > 0 {
                out.push_str(&format!("  Retry: {} times\n", violation.retry));
            }
            for target in &violation.notify {
                out.push_str(&format!("  Notify: {}\n", target));
            }
        }

        out
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
