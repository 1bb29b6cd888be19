//! AST types for EnsuraScript.
//!
//! These are produced by the parser and transformed in place by the
//! binder and the implication expander. They live here so that stage
//! modules can import them without depending on the parser.

use std::collections::BTreeMap;
use std::fmt;

use crate::lexer::Position;

// ──────────────────────────────────────────────
// Resources
// ──────────────────────────────────────────────

/// A top-level resource declaration.
/// `resource file "secrets.db" as secrets_db`
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub pos: Position,
    pub resource_type: String,
    pub path: String,
    /// Optional alias from `as`; empty if none.
    pub alias: String,
}

impl fmt::Display for ResourceDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alias.is_empty() {
            write!(f, "resource {} {:?}", self.resource_type, self.path)
        } else {
            write!(
                f,
                "resource {} {:?} as {}",
                self.resource_type, self.path, self.alias
            )
        }
    }
}

/// A reference to a resource, either inline (`file "x"`) or by alias.
///
/// The binder rewrites resolvable alias references with the declared
/// type and path, so after binding two refs denote the same resource
/// iff their canonical forms are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub pos: Position,
    pub resource_type: String,
    pub path: String,
    pub alias: String,
}

impl ResourceRef {
    pub fn inline(pos: Position, resource_type: &str, path: &str) -> Self {
        ResourceRef {
            pos,
            resource_type: resource_type.to_owned(),
            path: path.to_owned(),
            alias: String::new(),
        }
    }

    /// Canonical form used for identity: `type "path"` once resolved,
    /// the bare alias otherwise.
    pub fn canonical(&self) -> String {
        if !self.resource_type.is_empty() {
            format!("{} {:?}", self.resource_type, self.path)
        } else {
            self.alias.clone()
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

// ──────────────────────────────────────────────
// Ensure statement parts
// ──────────────────────────────────────────────

/// A handler specification: `AES:256 key "env:SECRET_KEY"`.
///
/// Argument values are literal strings or policy parameter names,
/// substituted during policy expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    pub pos: Position,
    pub name: String,
    pub args: BTreeMap<String, String>,
}

impl fmt::Display for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (k, v) in &self.args {
            write!(f, " {} {:?}", k, v)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOp {
    Eq,
    Ne,
}

impl fmt::Display for GuardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuardOp::Eq => "==",
            GuardOp::Ne => "!=",
        })
    }
}

/// A conditional guard: `environment == "prod"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardExpr {
    pub pos: Position,
    pub left: String,
    pub op: GuardOp,
    pub right: String,
}

impl fmt::Display for GuardExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.left, self.op, self.right)
    }
}

/// Violation handling configuration (`retry` / `notify`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationHandler {
    pub pos: Position,
    pub retry: u32,
    pub notify: Vec<String>,
}

/// A single guarantee declaration.
/// `ensure encrypted on file "secrets.db" with AES:256 key "env:K"`
#[derive(Debug, Clone)]
pub struct EnsureStmt {
    pub pos: Position,
    pub condition: String,
    /// May be absent in the parse tree; filled in by the binder.
    pub subject: Option<ResourceRef>,
    pub handler: Option<HandlerSpec>,
    pub guard: Option<GuardExpr>,
    /// Required conditions on the same subject.
    pub requires: Vec<String>,
    /// Ordering: run after every guarantee on these resources.
    pub after: Vec<ResourceRef>,
    /// Ordering: run before every guarantee on these resources.
    pub before: Vec<ResourceRef>,
    pub violation: Option<ViolationHandler>,
    /// Synthesized by the implication expander.
    pub is_implied: bool,
}

impl EnsureStmt {
    pub fn new(pos: Position, condition: &str) -> Self {
        EnsureStmt {
            pos,
            condition: condition.to_owned(),
            subject: None,
            handler: None,
            guard: None,
            requires: Vec::new(),
            after: Vec::new(),
            before: Vec::new(),
            violation: None,
            is_implied: false,
        }
    }

    /// Canonical subject string; empty when no subject is bound.
    pub fn subject_key(&self) -> String {
        self.subject
            .as_ref()
            .map(ResourceRef::canonical)
            .unwrap_or_default()
    }
}

impl fmt::Display for EnsureStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ensure {}", self.condition)?;
        if let Some(subject) = &self.subject {
            write!(f, " on {}", subject)?;
        }
        if let Some(handler) = &self.handler {
            write!(f, " with {}", handler)?;
        }
        if let Some(guard) = &self.guard {
            write!(f, " when {}", guard)?;
        }
        for req in &self.requires {
            write!(f, " requires {}", req)?;
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Blocks and remaining statements
// ──────────────────────────────────────────────

/// `on <resource> { ... }`
#[derive(Debug, Clone)]
pub struct OnBlock {
    pub pos: Position,
    pub subject: ResourceRef,
    pub body: Vec<Statement>,
}

/// `policy <name>(<params>) { ... }`
#[derive(Debug, Clone)]
pub struct PolicyDecl {
    pub pos: Position,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

/// `apply <name>("arg", ...)`
#[derive(Debug, Clone)]
pub struct ApplyStmt {
    pub pos: Position,
    pub policy: String,
    pub args: Vec<String>,
}

/// `for each <type> in <container> { ... }`
#[derive(Debug, Clone)]
pub struct ForEachStmt {
    pub pos: Position,
    pub item_type: String,
    pub container: ResourceRef,
    pub body: Vec<Statement>,
}

/// `invariant { ... }` -- guarantees inside get elevated priority.
#[derive(Debug, Clone)]
pub struct InvariantBlock {
    pub pos: Position,
    pub body: Vec<Statement>,
}

/// `on violation { retry N notify "..." }` at the top level.
#[derive(Debug, Clone)]
pub struct OnViolationBlock {
    pub pos: Position,
    pub handler: ViolationHandler,
}

/// `assume environment == "prod"` or `assume filesystem reliable`.
#[derive(Debug, Clone)]
pub struct AssumeStmt {
    pub pos: Position,
    pub guard: Option<GuardExpr>,
    /// Free-form words for the simple (non-guard) form.
    pub simple: String,
}

/// `parallel { ... }` -- parsed for forward compatibility, lowered to
/// sequential execution.
#[derive(Debug, Clone)]
pub struct ParallelBlock {
    pub pos: Position,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Resource(ResourceDecl),
    Ensure(EnsureStmt),
    On(OnBlock),
    Policy(PolicyDecl),
    Apply(ApplyStmt),
    ForEach(ForEachStmt),
    Invariant(InvariantBlock),
    OnViolation(OnViolationBlock),
    Assume(AssumeStmt),
    Parallel(ParallelBlock),
}

impl Statement {
    pub fn pos(&self) -> &Position {
        match self {
            Statement::Resource(s) => &s.pos,
            Statement::Ensure(s) => &s.pos,
            Statement::On(s) => &s.pos,
            Statement::Policy(s) => &s.pos,
            Statement::Apply(s) => &s.pos,
            Statement::ForEach(s) => &s.pos,
            Statement::Invariant(s) => &s.pos,
            Statement::OnViolation(s) => &s.pos,
            Statement::Assume(s) => &s.pos,
            Statement::Parallel(s) => &s.pos,
        }
    }
}

/// Root of the AST.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ref_canonical_forms() {
        let inline = ResourceRef::inline(Position::default(), "file", "secrets.db");
        assert_eq!(inline.canonical(), r#"file "secrets.db""#);

        let alias = ResourceRef {
            pos: Position::default(),
            resource_type: String::new(),
            path: String::new(),
            alias: "secrets".to_owned(),
        };
        assert_eq!(alias.canonical(), "secrets");
    }

    #[test]
    fn ensure_display_includes_clauses() {
        let mut stmt = EnsureStmt::new(Position::default(), "encrypted");
        stmt.subject = Some(ResourceRef::inline(Position::default(), "file", "x"));
        let mut handler = HandlerSpec {
            pos: Position::default(),
            name: "AES:256".to_owned(),
            args: BTreeMap::new(),
        };
        handler.args.insert("key".to_owned(), "env:K".to_owned());
        stmt.handler = Some(handler);

        let rendered = stmt.to_string();
        assert!(rendered.starts_with("ensure encrypted on file \"x\""));
        assert!(rendered.contains("with AES:256 key \"env:K\""));
    }
}
