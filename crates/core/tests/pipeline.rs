//! End-to-end pipeline scenarios: source text in, plan (or
//! diagnostics) out.

use ensura_core::{compile_source, Diagnostic, Stage};

fn conditions_in_order(source: &str) -> Vec<(String, String, String)> {
    let output = compile_source(source, "scenario.ens").expect("compiles");
    output
        .plan
        .steps
        .iter()
        .map(|step| {
            (
                step.stmt.condition.clone(),
                step.stmt.subject_key(),
                step.handler.clone(),
            )
        })
        .collect()
}

fn compile_errors(source: &str) -> Vec<Diagnostic> {
    compile_source(source, "scenario.ens").expect_err("should fail")
}

// ── S1: implication and ordering ─────────────────────────────────────

#[test]
fn implied_chain_is_planned_in_dependency_order() {
    let steps = conditions_in_order(
        "on file \"s.db\" {\n  ensure encrypted with AES:256 key \"env:K\"\n}",
    );

    let subject = "file \"s.db\"".to_owned();
    assert_eq!(
        steps,
        vec![
            ("exists".to_owned(), subject.clone(), "fs.native".to_owned()),
            ("readable".to_owned(), subject.clone(), "fs.native".to_owned()),
            ("writable".to_owned(), subject.clone(), "fs.native".to_owned()),
            ("encrypted".to_owned(), subject, "AES:256".to_owned()),
        ]
    );
}

// ── S2: policy expansion ─────────────────────────────────────────────

#[test]
fn policy_application_expands_and_deduplicates() {
    let source = "policy secure(k) {\n  ensure encrypted with AES:256 key k\n  ensure permissions with posix mode \"0600\"\n}\non file \"x\" {\n  ensure exists\n  apply secure(\"env:KK\")\n}";

    let output = compile_source(source, "scenario.ens").expect("compiles");
    let steps = &output.plan.steps;

    // At most one step per (condition, subject).
    let mut seen = std::collections::BTreeSet::new();
    for step in steps {
        let key = format!("{}:{}", step.stmt.condition, step.stmt.subject_key());
        assert!(seen.insert(key.clone()), "duplicate step for {}", key);
    }

    let encrypted = steps
        .iter()
        .find(|s| s.stmt.condition == "encrypted")
        .expect("encrypted step");
    assert_eq!(encrypted.args.get("key").unwrap(), "env:KK");

    let permissions = steps
        .iter()
        .find(|s| s.stmt.condition == "permissions")
        .expect("permissions step");
    assert_eq!(permissions.args.get("mode").unwrap(), "0600");

    let exists_count = steps
        .iter()
        .filter(|s| s.stmt.condition == "exists")
        .count();
    assert_eq!(exists_count, 1);
}

// ── S3: conflicting conditions ───────────────────────────────────────

#[test]
fn conflicting_conditions_fail_compilation_with_both_positions() {
    let errors = compile_errors(
        "on file \"f\" {\n  ensure encrypted with AES:256 key \"env:K\"\n  ensure unencrypted\n}",
    );

    let conflict = errors
        .iter()
        .find(|d| d.message.contains("conflicts with"))
        .expect("conflict diagnostic");
    assert_eq!(conflict.stage, Stage::Imply);
    // Cites the other declaration's position too.
    assert!(conflict.message.contains("declared at scenario.ens:"));
}

// ── S4: dependency cycles ────────────────────────────────────────────

#[test]
fn requires_cycle_names_both_guarantees() {
    let errors = compile_errors(
        "ensure replicated on database \"db\" requires verified\nensure verified on database \"db\" requires replicated",
    );

    assert_eq!(errors.len(), 1);
    let err = &errors[0];
    assert_eq!(err.stage, Stage::Plan);
    assert!(err.message.contains("cyclic dependency detected"));
    assert!(err.message.contains("replicated:database \"db\""));
    assert!(err.message.contains("verified:database \"db\""));
}

// ── Determinism ──────────────────────────────────────────────────────

#[test]
fn plan_json_is_byte_identical_across_compilations() {
    let source = "resource file \"secrets.db\" as secrets\non secrets {\n  ensure encrypted with AES:256 key \"env:K\"\n  ensure permissions with posix mode \"0600\"\n}\nensure reachable on http \"https://example.com\"\ninvariant {\n  ensure exists on file \"audit.log\"\n}";

    let first = serde_json::to_string_pretty(
        &compile_source(source, "scenario.ens").expect("compiles").plan.to_json(),
    )
    .unwrap();
    let second = serde_json::to_string_pretty(
        &compile_source(source, "scenario.ens").expect("compiles").plan.to_json(),
    )
    .unwrap();
    assert_eq!(first, second);
}

// ── Error staging ────────────────────────────────────────────────────

#[test]
fn bind_errors_prevent_later_stages() {
    let errors = compile_errors("on missing_alias {\n  ensure exists\n}");
    assert!(errors.iter().all(|d| d.stage == Stage::Bind));
    assert!(errors[0].message.contains("undefined resource alias"));
}

#[test]
fn every_step_has_a_handler() {
    let source = "on file \"s.db\" {\n  ensure encrypted with AES:256 key \"env:K\"\n  ensure permissions with posix mode \"0600\"\n}";
    let output = compile_source(source, "scenario.ens").expect("compiles");
    for step in &output.plan.steps {
        assert!(!step.handler.is_empty(), "step {} has no handler", step.id);
    }
}

#[test]
fn plans_are_closed_under_implication() {
    let source = "ensure checksum on file \"a\" with fs.native expected \"00\"\nensure tls on http \"https://example.com\"\nensure healthy on service \"api\"";
    let output = compile_source(source, "scenario.ens").expect("compiles");

    let present: std::collections::BTreeSet<(String, String)> = output
        .plan
        .steps
        .iter()
        .map(|s| (s.stmt.condition.clone(), s.stmt.subject_key()))
        .collect();

    for step in &output.plan.steps {
        if let Some(meta) = ensura_core::conditions::lookup(&step.stmt.condition) {
            for implied in meta.implies {
                assert!(
                    present.contains(&((*implied).to_owned(), step.stmt.subject_key())),
                    "{} present but implied {} missing",
                    step.stmt.condition,
                    implied
                );
            }
        }
    }
}

#[test]
fn predecessors_precede_successors() {
    let source = "ensure exists on file \"a\"\nensure exists on file \"b\" after file \"a\"\nensure checksum on file \"a\" with fs.native expected \"deadbeef\"";
    let output = compile_source(source, "scenario.ens").expect("compiles");

    let index_of = |id: &str| {
        output
            .plan
            .steps
            .iter()
            .position(|s| s.id == id)
            .unwrap_or_else(|| panic!("step {} missing", id))
    };
    for edge in &output.graph.edges {
        assert!(
            index_of(&edge.from) < index_of(&edge.to),
            "edge {} -> {} violated",
            edge.from,
            edge.to
        );
    }
}
