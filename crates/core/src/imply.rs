//! Implication expansion: prerequisite guarantees, deduplication, and
//! conflict detection, driven by the condition registry.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{EnsureStmt, Program, Statement};
use crate::conditions;
use crate::error::Diagnostic;
use crate::lexer::Position;

pub struct Expander {
    diagnostics: Vec<Diagnostic>,
}

impl Default for Expander {
    fn default() -> Self {
        Expander::new()
    }
}

impl Expander {
    pub fn new() -> Self {
        Expander {
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Insert implied prerequisite guarantees ahead of each statement,
    /// then deduplicate (condition, subject) pairs program-wide.
    pub fn expand(&mut self, program: Program) -> Program {
        let statements = program
            .statements
            .into_iter()
            .flat_map(|stmt| self.expand_statement(stmt))
            .collect();
        let mut program = Program { statements };
        self.deduplicate(&mut program);
        program
    }

    fn expand_statement(&mut self, stmt: Statement) -> Vec<Statement> {
        match stmt {
            Statement::Ensure(ensure) => self.expand_ensure(ensure),
            Statement::On(mut block) => {
                block.body = self.expand_body(block.body);
                vec![Statement::On(block)]
            }
            Statement::Invariant(mut block) => {
                block.body = self.expand_body(block.body);
                vec![Statement::Invariant(block)]
            }
            Statement::Parallel(mut block) => {
                block.body = self.expand_body(block.body);
                vec![Statement::Parallel(block)]
            }
            other => vec![other],
        }
    }

    fn expand_body(&mut self, body: Vec<Statement>) -> Vec<Statement> {
        body.into_iter()
            .flat_map(|stmt| self.expand_statement(stmt))
            .collect()
    }

    /// Emit the implied prerequisites (recursively expanded, marked
    /// implied) before the statement itself. Unknown conditions pass
    /// through untouched.
    fn expand_ensure(&mut self, stmt: EnsureStmt) -> Vec<Statement> {
        let Some(meta) = conditions::lookup(&stmt.condition) else {
            return vec![Statement::Ensure(stmt)];
        };

        if let Some(subject) = &stmt.subject {
            if !subject.resource_type.is_empty()
                && !meta
                    .applicable_types
                    .contains(&subject.resource_type.as_str())
            {
                self.diagnostics.push(Diagnostic::imply(
                    &stmt.pos,
                    format!(
                        "condition '{}' is not applicable to resource type '{}'",
                        stmt.condition, subject.resource_type
                    ),
                ));
            }
        }

        let mut result = Vec::new();
        for implied in meta.implies {
            let mut implied_stmt = EnsureStmt::new(stmt.pos.clone(), implied);
            implied_stmt.subject = stmt.subject.clone();
            implied_stmt.guard = stmt.guard.clone();
            implied_stmt.is_implied = true;
            result.extend(self.expand_ensure(implied_stmt));
        }
        result.push(Statement::Ensure(stmt));
        result
    }

    // -- Deduplication ------------------------------------------

    /// Keep the first occurrence of each (condition, subject) pair in
    /// document order. Flags merge: the survivor is implied iff every
    /// duplicate was implied.
    fn deduplicate(&mut self, program: &mut Program) {
        let mut merged: BTreeMap<String, bool> = BTreeMap::new();
        walk_ensures(&program.statements, &mut |ensure| {
            let entry = merged.entry(dedupe_key(ensure)).or_insert(true);
            *entry = *entry && ensure.is_implied;
        });

        let mut emitted = BTreeSet::new();
        let statements = std::mem::take(&mut program.statements);
        program.statements = dedupe_body(statements, &merged, &mut emitted);
    }

    // -- Conflict detection -------------------------------------

    /// Report every pair of conflicting conditions sharing a subject,
    /// citing both source positions.
    pub fn check_conflicts(&mut self, program: &Program) {
        let mut by_subject: BTreeMap<String, Vec<(String, Position)>> = BTreeMap::new();
        walk_ensures(&program.statements, &mut |ensure| {
            by_subject
                .entry(ensure.subject_key())
                .or_default()
                .push((ensure.condition.clone(), ensure.pos.clone()));
        });

        for (subject, ensures) in &by_subject {
            let mut seen: BTreeMap<&str, &Position> = BTreeMap::new();
            for (condition, pos) in ensures {
                seen.insert(condition.as_str(), pos);
                let Some(meta) = conditions::lookup(condition) else {
                    continue;
                };
                for conflict in meta.conflicts {
                    if let Some(other_pos) = seen.get(conflict) {
                        if *conflict == condition.as_str() {
                            continue;
                        }
                        self.diagnostics.push(Diagnostic::imply(
                            pos,
                            format!(
                                "'{}' conflicts with '{}' on {} (declared at {})",
                                condition, conflict, subject, other_pos
                            ),
                        ));
                    }
                }
            }
        }
    }
}

fn dedupe_key(ensure: &EnsureStmt) -> String {
    format!("{}:{}", ensure.condition, ensure.subject_key())
}

/// Visit every ensure statement in document order, descending into
/// blocks.
fn walk_ensures<'a>(statements: &'a [Statement], visit: &mut impl FnMut(&'a EnsureStmt)) {
    for stmt in statements {
        match stmt {
            Statement::Ensure(ensure) => visit(ensure),
            Statement::On(block) => walk_ensures(&block.body, visit),
            Statement::Invariant(block) => walk_ensures(&block.body, visit),
            Statement::Parallel(block) => walk_ensures(&block.body, visit),
            Statement::ForEach(block) => walk_ensures(&block.body, visit),
            _ => {}
        }
    }
}

fn dedupe_body(
    statements: Vec<Statement>,
    merged: &BTreeMap<String, bool>,
    emitted: &mut BTreeSet<String>,
) -> Vec<Statement> {
    let mut result = Vec::new();
    for stmt in statements {
        match stmt {
            Statement::Ensure(mut ensure) => {
                let key = dedupe_key(&ensure);
                if emitted.insert(key.clone()) {
                    ensure.is_implied = merged.get(&key).copied().unwrap_or(ensure.is_implied);
                    result.push(Statement::Ensure(ensure));
                }
            }
            Statement::On(mut block) => {
                block.body = dedupe_body(block.body, merged, emitted);
                result.push(Statement::On(block));
            }
            Statement::Invariant(mut block) => {
                block.body = dedupe_body(block.body, merged, emitted);
                result.push(Statement::Invariant(block));
            }
            Statement::Parallel(mut block) => {
                block.body = dedupe_body(block.body, merged, emitted);
                result.push(Statement::Parallel(block));
            }
            other => result.push(other),
        }
    }
    result
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
