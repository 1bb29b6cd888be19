//! Subject resolution, reference validation, and policy expansion.
//!
//! The binder runs two phases. `bind` registers declarations, threads
//! the implicit-subject slot through the tree, resolves alias
//! references to their declared type and path, evaluates `when` guards
//! against the assumption table, and expands `for each` blocks.
//! `expand_policies` then inlines `apply` statements inside `on`
//! blocks with parameter substitution.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::ast::{
    ApplyStmt, EnsureStmt, ForEachStmt, GuardExpr, GuardOp, HandlerSpec, OnBlock, PolicyDecl,
    Program, ResourceDecl, ResourceRef, Statement,
};
use crate::error::Diagnostic;

// ──────────────────────────────────────────────
// Declaration tables
// ──────────────────────────────────────────────

/// Declared resources, keyed by both `type:path` and alias.
#[derive(Default)]
pub struct AliasTable {
    by_path: BTreeMap<String, ResourceDecl>,
    by_alias: BTreeMap<String, ResourceDecl>,
}

impl AliasTable {
    pub fn add(&mut self, decl: ResourceDecl) -> Result<(), Diagnostic> {
        let key = format!("{}:{}", decl.resource_type, decl.path);
        if let Some(existing) = self.by_path.get(&key) {
            return Err(Diagnostic::bind(
                &decl.pos,
                format!(
                    "duplicate resource declaration: {} (first declared at {})",
                    key, existing.pos
                ),
            ));
        }
        if !decl.alias.is_empty() {
            if let Some(existing) = self.by_alias.get(&decl.alias) {
                return Err(Diagnostic::bind(
                    &decl.pos,
                    format!(
                        "duplicate alias: {} (first declared at {})",
                        decl.alias, existing.pos
                    ),
                ));
            }
            self.by_alias.insert(decl.alias.clone(), decl.clone());
        }
        self.by_path.insert(key, decl);
        Ok(())
    }

    pub fn lookup(&self, ref_: &ResourceRef) -> Option<&ResourceDecl> {
        if !ref_.alias.is_empty() {
            return self.by_alias.get(&ref_.alias);
        }
        let key = format!("{}:{}", ref_.resource_type, ref_.path);
        self.by_path.get(&key)
    }
}

/// Declared policies by name.
#[derive(Default)]
pub struct PolicyTable {
    policies: BTreeMap<String, PolicyDecl>,
}

impl PolicyTable {
    pub fn add(&mut self, decl: PolicyDecl) -> Result<(), Diagnostic> {
        if let Some(existing) = self.policies.get(&decl.name) {
            return Err(Diagnostic::bind(
                &decl.pos,
                format!(
                    "duplicate policy: {} (first declared at {})",
                    decl.name, existing.pos
                ),
            ));
        }
        self.policies.insert(decl.name.clone(), decl);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&PolicyDecl> {
        self.policies.get(name)
    }
}

// ──────────────────────────────────────────────
// Container enumeration
// ──────────────────────────────────────────────

/// Lists directory contents for compile-time `for each` expansion.
/// A trait so tests can point the binder at temp dirs (or fakes).
pub trait ContainerEnumerator {
    /// Entries of `path` as (full path, is_dir), sorted by name.
    fn list(&self, path: &Path) -> io::Result<Vec<(PathBuf, bool)>>;
}

/// Enumerates real directories.
pub struct FsEnumerator;

impl ContainerEnumerator for FsEnumerator {
    fn list(&self, path: &Path) -> io::Result<Vec<(PathBuf, bool)>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            entries.push((entry.path(), entry.file_type()?.is_dir()));
        }
        entries.sort();
        Ok(entries)
    }
}

// ──────────────────────────────────────────────
// Binder
// ──────────────────────────────────────────────

pub struct Binder {
    resources: AliasTable,
    policies: PolicyTable,
    /// `assume left == "right"` declarations, keyed by left.
    assumptions: BTreeMap<String, String>,
    enumerator: Box<dyn ContainerEnumerator>,
    diagnostics: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Default for Binder {
    fn default() -> Self {
        Binder::new()
    }
}

impl Binder {
    pub fn new() -> Self {
        Binder::with_enumerator(Box::new(FsEnumerator))
    }

    pub fn with_enumerator(enumerator: Box<dyn ContainerEnumerator>) -> Self {
        Binder {
            resources: AliasTable::default(),
            policies: PolicyTable::default(),
            assumptions: BTreeMap::new(),
            enumerator,
            diagnostics: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Non-fatal findings (dropped `for each` blocks and the like).
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    fn report(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    /// Register declarations, then resolve subjects and references.
    pub fn bind(&mut self, program: Program) -> Program {
        // Registration pass.
        for stmt in &program.statements {
            match stmt {
                Statement::Resource(decl) => {
                    if let Err(diag) = self.resources.add(decl.clone()) {
                        self.report(diag);
                    }
                }
                Statement::Policy(decl) => {
                    if let Err(diag) = self.policies.add(decl.clone()) {
                        self.report(diag);
                    }
                }
                Statement::Assume(assume) => {
                    if let Some(guard) = &assume.guard {
                        if guard.op == GuardOp::Eq {
                            self.assumptions
                                .insert(guard.left.clone(), guard.right.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        // Resolution pass.
        let mut slot: Option<ResourceRef> = None;
        let mut bound = Vec::new();
        for stmt in program.statements {
            bound.extend(self.bind_statement(stmt, &mut slot));
        }

        Program { statements: bound }
    }

    fn bind_statement(
        &mut self,
        stmt: Statement,
        slot: &mut Option<ResourceRef>,
    ) -> Vec<Statement> {
        match stmt {
            Statement::Ensure(ensure) => self
                .bind_ensure(ensure, slot)
                .map(Statement::Ensure)
                .into_iter()
                .collect(),
            Statement::On(block) => self
                .bind_on_block(block)
                .map(Statement::On)
                .into_iter()
                .collect(),
            Statement::Apply(apply) => self
                .validate_apply(apply)
                .map(Statement::Apply)
                .into_iter()
                .collect(),
            Statement::ForEach(for_each) => self.expand_for_each(for_each),
            Statement::Invariant(mut block) => {
                let mut inner: Option<ResourceRef> = None;
                block.body = self.bind_body(block.body, &mut inner);
                vec![Statement::Invariant(block)]
            }
            Statement::Parallel(mut block) => {
                let mut inner: Option<ResourceRef> = None;
                block.body = self.bind_body(block.body, &mut inner);
                vec![Statement::Parallel(block)]
            }
            other => vec![other],
        }
    }

    fn bind_body(
        &mut self,
        body: Vec<Statement>,
        slot: &mut Option<ResourceRef>,
    ) -> Vec<Statement> {
        let mut bound = Vec::new();
        for stmt in body {
            bound.extend(self.bind_statement(stmt, slot));
        }
        bound
    }

    fn bind_ensure(
        &mut self,
        mut stmt: EnsureStmt,
        slot: &mut Option<ResourceRef>,
    ) -> Option<EnsureStmt> {
        match stmt.subject.take() {
            Some(mut subject) => {
                self.resolve_ref(&mut subject);
                *slot = Some(subject.clone());
                stmt.subject = Some(subject);
            }
            None => match slot {
                Some(inherited) => stmt.subject = Some(inherited.clone()),
                None => {
                    self.report(Diagnostic::bind(
                        &stmt.pos,
                        "ensure statement has no subject and no implicit subject available",
                    ));
                    return None;
                }
            },
        }

        for ref_ in stmt.after.iter_mut().chain(stmt.before.iter_mut()) {
            self.resolve_ref(ref_);
        }

        if let Some(guard) = &stmt.guard {
            if !self.guard_satisfied(guard) {
                return None;
            }
        }

        Some(stmt)
    }

    fn bind_on_block(&mut self, mut block: OnBlock) -> Option<OnBlock> {
        self.resolve_ref(&mut block.subject);

        // The block's subject fills the slot for the block's scope only.
        let mut inner = Some(block.subject.clone());
        block.body = self.bind_body(block.body, &mut inner);
        Some(block)
    }

    fn validate_apply(&mut self, apply: ApplyStmt) -> Option<ApplyStmt> {
        let Some(policy) = self.policies.lookup(&apply.policy) else {
            self.report(Diagnostic::bind(
                &apply.pos,
                format!("undefined policy: {}", apply.policy),
            ));
            return None;
        };
        if apply.args.len() != policy.params.len() {
            let message = format!(
                "policy {} expects {} arguments, got {}",
                apply.policy,
                policy.params.len(),
                apply.args.len()
            );
            self.report(Diagnostic::bind(&apply.pos, message));
            return None;
        }
        Some(apply)
    }

    /// Resolve an alias reference against the alias table, filling in
    /// the declared type and path so downstream identity is canonical.
    fn resolve_ref(&mut self, ref_: &mut ResourceRef) {
        if ref_.alias.is_empty() {
            return;
        }
        match self.resources.lookup(ref_) {
            Some(decl) => {
                ref_.resource_type = decl.resource_type.clone();
                ref_.path = decl.path.clone();
            }
            None => {
                self.report(Diagnostic::bind(
                    &ref_.pos,
                    format!("undefined resource alias: {}", ref_.alias),
                ));
            }
        }
    }

    /// A guard over an identifier with no assumption keeps the
    /// statement; only a contradicted guard drops it.
    fn guard_satisfied(&self, guard: &GuardExpr) -> bool {
        match self.assumptions.get(&guard.left) {
            None => true,
            Some(value) => match guard.op {
                GuardOp::Eq => value == &guard.right,
                GuardOp::Ne => value != &guard.right,
            },
        }
    }

    // -- for each expansion -------------------------------------

    /// Expand a `for each` block whose container is statically known
    /// into one `on` block per matching directory entry. Containers
    /// that cannot be enumerated produce a warning and no statements.
    fn expand_for_each(&mut self, mut for_each: ForEachStmt) -> Vec<Statement> {
        self.resolve_ref(&mut for_each.container);

        if for_each.container.resource_type != "directory" {
            self.warnings.push(Diagnostic::bind(
                &for_each.pos,
                format!(
                    "for each container must be a directory, got '{}'; block skipped",
                    for_each.container.resource_type
                ),
            ));
            return Vec::new();
        }

        let want_dirs = match for_each.item_type.as_str() {
            "file" => false,
            "directory" => true,
            other => {
                self.warnings.push(Diagnostic::bind(
                    &for_each.pos,
                    format!("for each over item type '{}' is not supported; block skipped", other),
                ));
                return Vec::new();
            }
        };

        let entries = match self.enumerator.list(Path::new(&for_each.container.path)) {
            Ok(entries) => entries,
            Err(err) => {
                self.warnings.push(Diagnostic::bind(
                    &for_each.pos,
                    format!(
                        "cannot enumerate directory {:?}: {}; block skipped",
                        for_each.container.path, err
                    ),
                ));
                return Vec::new();
            }
        };

        let mut expanded = Vec::new();
        for (path, is_dir) in entries {
            if is_dir != want_dirs {
                continue;
            }
            let subject = ResourceRef::inline(
                for_each.pos.clone(),
                &for_each.item_type,
                &path.to_string_lossy(),
            );
            let block = OnBlock {
                pos: for_each.pos.clone(),
                subject,
                body: for_each.body.clone(),
            };
            expanded.extend(
                self.bind_on_block(block)
                    .map(Statement::On)
                    .into_iter()
                    .collect::<Vec<_>>(),
            );
        }
        expanded
    }

    // -- Policy expansion ---------------------------------------

    /// Replace every `apply` inside an `on` block with the policy's
    /// ensure statements, substituting parameter names in handler
    /// argument values. An `apply` that survives outside any `on`
    /// block has no subject to attach to and is an error.
    pub fn expand_policies(&mut self, program: Program) -> Program {
        let statements = program
            .statements
            .into_iter()
            .filter_map(|stmt| self.expand_in_statement(stmt, None))
            .collect();
        Program { statements }
    }

    fn expand_in_statement(
        &mut self,
        stmt: Statement,
        subject: Option<&ResourceRef>,
    ) -> Option<Statement> {
        match stmt {
            Statement::On(mut block) => {
                let block_subject = block.subject.clone();
                block.body = self.expand_in_body(block.body, Some(&block_subject));
                Some(Statement::On(block))
            }
            Statement::Invariant(mut block) => {
                block.body = self.expand_in_body(block.body, subject);
                Some(Statement::Invariant(block))
            }
            Statement::Parallel(mut block) => {
                block.body = self.expand_in_body(block.body, subject);
                Some(Statement::Parallel(block))
            }
            Statement::Apply(apply) if subject.is_none() => {
                self.report(Diagnostic::bind(
                    &apply.pos,
                    format!(
                        "apply {} outside of an 'on' block has no subject",
                        apply.policy
                    ),
                ));
                None
            }
            other => Some(other),
        }
    }

    fn expand_in_body(
        &mut self,
        body: Vec<Statement>,
        subject: Option<&ResourceRef>,
    ) -> Vec<Statement> {
        let mut expanded = Vec::new();
        for stmt in body {
            match stmt {
                Statement::Apply(apply) => match subject {
                    Some(subject) => expanded.extend(self.expand_apply(&apply, subject)),
                    None => {
                        self.report(Diagnostic::bind(
                            &apply.pos,
                            format!(
                                "apply {} outside of an 'on' block has no subject",
                                apply.policy
                            ),
                        ));
                    }
                },
                other => expanded.extend(self.expand_in_statement(other, subject)),
            }
        }
        expanded
    }

    fn expand_apply(&mut self, apply: &ApplyStmt, subject: &ResourceRef) -> Vec<Statement> {
        let Some(policy) = self.policies.lookup(&apply.policy) else {
            // Already reported during bind.
            return Vec::new();
        };

        let mut params = BTreeMap::new();
        for (param, arg) in policy.params.iter().zip(&apply.args) {
            params.insert(param.clone(), arg.clone());
        }

        let mut expanded = Vec::new();
        for stmt in &policy.body {
            let Statement::Ensure(ensure) = stmt else {
                continue;
            };
            let mut clone = EnsureStmt::new(apply.pos.clone(), &ensure.condition);
            clone.subject = Some(subject.clone());
            clone.guard = ensure.guard.clone();
            clone.requires = ensure.requires.clone();

            if let Some(handler) = &ensure.handler {
                let mut args = BTreeMap::new();
                for (key, value) in &handler.args {
                    let substituted = params.get(value).cloned().unwrap_or_else(|| value.clone());
                    args.insert(key.clone(), substituted);
                }
                clone.handler = Some(HandlerSpec {
                    pos: handler.pos.clone(),
                    name: handler.name.clone(),
                    args,
                });
            }

            expanded.push(Statement::Ensure(clone));
        }
        expanded
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn parse(input: &str) -> Program {
        let (program, diagnostics) = parse_source(input, "test.ens");
        assert!(diagnostics.is_empty(), "parse diagnostics: {:?}", diagnostics);
        program
    }

    fn as_ensure(stmt: &Statement) -> &EnsureStmt {
        match stmt {
            Statement::Ensure(e) => e,
            other => panic!("expected ensure, got {:?}", other),
        }
    }

    #[test]
    fn implicit_subject_inherits_from_previous_ensure() {
        let program = parse(
            "ensure exists on file \"secrets.db\"\nensure encrypted with AES:256 key \"env:K\"",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);
        assert!(binder.diagnostics().is_empty(), "{:?}", binder.diagnostics());

        let second = as_ensure(&program.statements[1]);
        assert_eq!(second.subject.as_ref().unwrap().path, "secrets.db");
    }

    #[test]
    fn missing_implicit_subject_is_an_error() {
        let program = parse("ensure encrypted with AES:256 key \"env:K\"");
        let mut binder = Binder::new();
        binder.bind(program);
        assert_eq!(binder.diagnostics().len(), 1);
        assert!(binder.diagnostics()[0]
            .message
            .contains("no implicit subject"));
    }

    #[test]
    fn on_block_binds_body_subjects() {
        let program = parse("on file \"secrets.db\" {\n  ensure exists\n  ensure readable\n}");
        let mut binder = Binder::new();
        let program = binder.bind(program);
        assert!(binder.diagnostics().is_empty());

        let Statement::On(block) = &program.statements[0] else {
            panic!("expected on block");
        };
        for stmt in &block.body {
            assert_eq!(as_ensure(stmt).subject.as_ref().unwrap().path, "secrets.db");
        }
    }

    #[test]
    fn on_block_subject_is_scoped_to_the_block() {
        let program = parse(
            "ensure exists on file \"outer.txt\"\non file \"inner.txt\" {\n  ensure exists\n}\nensure readable",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);
        assert!(binder.diagnostics().is_empty());

        // The trailing ensure inherits the outer subject, not the block's.
        let last = as_ensure(program.statements.last().unwrap());
        assert_eq!(last.subject.as_ref().unwrap().path, "outer.txt");
    }

    #[test]
    fn alias_references_resolve_to_declared_type_and_path() {
        let program = parse(
            "resource file \"secrets.db\" as secrets\non secrets {\n  ensure exists\n}",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);
        assert!(binder.diagnostics().is_empty());

        let Statement::On(block) = &program.statements[1] else {
            panic!("expected on block");
        };
        assert_eq!(block.subject.resource_type, "file");
        assert_eq!(block.subject.path, "secrets.db");
        assert_eq!(block.subject.canonical(), r#"file "secrets.db""#);
    }

    #[test]
    fn undefined_alias_is_an_error() {
        let program = parse("on secrets {\n  ensure exists\n}");
        let mut binder = Binder::new();
        binder.bind(program);
        assert!(binder
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("undefined resource alias: secrets")));
    }

    #[test]
    fn duplicate_alias_and_path_are_errors() {
        let program = parse(
            "resource file \"a.txt\" as data\nresource file \"b.txt\" as data\nresource file \"a.txt\"",
        );
        let mut binder = Binder::new();
        binder.bind(program);
        let messages: Vec<_> = binder.diagnostics().iter().map(|d| &d.message).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate alias")));
        assert!(messages
            .iter()
            .any(|m| m.contains("duplicate resource declaration")));
    }

    #[test]
    fn apply_arity_is_checked() {
        let program = parse(
            "policy secure(k, extra) {\n  ensure encrypted with AES:256 key k\n}\non file \"x\" {\n  apply secure(\"env:K\")\n}",
        );
        let mut binder = Binder::new();
        binder.bind(program);
        assert!(binder
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("expects 2 arguments, got 1")));
    }

    #[test]
    fn undefined_policy_is_an_error() {
        let program = parse("on file \"x\" {\n  apply missing(\"a\")\n}");
        let mut binder = Binder::new();
        binder.bind(program);
        assert!(binder
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("undefined policy: missing")));
    }

    #[test]
    fn expand_policies_substitutes_parameters() {
        let program = parse(
            "policy secure(k) {\n  ensure encrypted with AES:256 key k\n  ensure permissions with posix mode \"0600\"\n}\non file \"x\" {\n  ensure exists\n  apply secure(\"env:KK\")\n}",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);
        let program = binder.expand_policies(program);
        assert!(binder.diagnostics().is_empty(), "{:?}", binder.diagnostics());

        let Statement::On(block) = &program.statements[1] else {
            panic!("expected on block");
        };
        assert_eq!(block.body.len(), 3);

        let encrypted = as_ensure(&block.body[1]);
        assert_eq!(encrypted.condition, "encrypted");
        assert_eq!(encrypted.subject.as_ref().unwrap().path, "x");
        assert_eq!(
            encrypted.handler.as_ref().unwrap().args.get("key").unwrap(),
            "env:KK"
        );

        let permissions = as_ensure(&block.body[2]);
        assert_eq!(
            permissions
                .handler
                .as_ref()
                .unwrap()
                .args
                .get("mode")
                .unwrap(),
            "0600"
        );
    }

    #[test]
    fn apply_outside_on_block_is_an_error() {
        let program = parse("policy p() {\n  ensure exists\n}\napply p()");
        let mut binder = Binder::new();
        let program = binder.bind(program);
        binder.expand_policies(program);
        assert!(binder
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("outside of an 'on' block")));
    }

    #[test]
    fn contradicted_guard_drops_statement() {
        let program = parse(
            "assume environment == \"dev\"\non file \"x\" {\n  ensure exists\n  ensure encrypted with AES:256 key \"env:K\" when environment == \"prod\"\n}",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);
        assert!(binder.diagnostics().is_empty());

        let Statement::On(block) = &program.statements[1] else {
            panic!("expected on block");
        };
        assert_eq!(block.body.len(), 1);
        assert_eq!(as_ensure(&block.body[0]).condition, "exists");
    }

    #[test]
    fn matching_and_unknown_guards_keep_statements() {
        let program = parse(
            "assume environment == \"prod\"\non file \"x\" {\n  ensure exists when environment == \"prod\"\n  ensure readable when region != \"eu\"\n}",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);

        let Statement::On(block) = &program.statements[1] else {
            panic!("expected on block");
        };
        assert_eq!(block.body.len(), 2);
    }

    #[test]
    fn for_each_expands_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pem"), b"b").unwrap();
        std::fs::write(dir.path().join("a.pem"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let source = format!(
            "for each file in directory {:?} {{\n  ensure exists\n}}",
            dir.path().to_string_lossy()
        );
        let program = parse(&source);
        let mut binder = Binder::new();
        let program = binder.bind(program);
        assert!(binder.diagnostics().is_empty(), "{:?}", binder.diagnostics());
        assert!(binder.warnings().is_empty(), "{:?}", binder.warnings());

        // One on-block per file, sorted, subdirectory skipped.
        assert_eq!(program.statements.len(), 2);
        let subjects: Vec<String> = program
            .statements
            .iter()
            .map(|stmt| match stmt {
                Statement::On(block) => block.subject.path.clone(),
                other => panic!("expected on block, got {:?}", other),
            })
            .collect();
        assert!(subjects[0].ends_with("a.pem"));
        assert!(subjects[1].ends_with("b.pem"));
    }

    #[test]
    fn for_each_over_missing_directory_warns_and_skips() {
        let program = parse(
            "for each file in directory \"/no/such/dir/anywhere\" {\n  ensure exists\n}",
        );
        let mut binder = Binder::new();
        let program = binder.bind(program);

        assert!(binder.diagnostics().is_empty());
        assert_eq!(binder.warnings().len(), 1);
        assert!(program.statements.is_empty());
    }

    #[test]
    fn invariant_scope_does_not_leak_subjects() {
        let program = parse("invariant {\n  ensure encrypted with AES:256 key \"env:K\"\n}");
        let mut binder = Binder::new();
        binder.bind(program);
        // No subject available inside the fresh invariant scope.
        assert_eq!(binder.diagnostics().len(), 1);
    }
}
