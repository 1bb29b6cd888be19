//! Recursive descent parser for EnsuraScript.
//!
//! Diagnostics are collected, not thrown: a malformed statement is
//! recorded and the parser skips ahead to the next statement-starting
//! keyword, so a single pass reports every defect it can find.

use crate::ast::{
    ApplyStmt, AssumeStmt, EnsureStmt, ForEachStmt, GuardExpr, GuardOp, HandlerSpec,
    InvariantBlock, OnBlock, OnViolationBlock, ParallelBlock, PolicyDecl, Program, ResourceDecl,
    ResourceRef, Statement, ViolationHandler,
};
use crate::error::{Diagnostic, Stage};
use crate::lexer::{Lexer, Token, TokenKind};

use std::collections::BTreeMap;

/// Lex and parse a source string. Returns the program alongside every
/// diagnostic encountered; the program is usable only when the
/// diagnostic list is empty.
pub fn parse_source(input: &str, filename: &str) -> (Program, Vec<Diagnostic>) {
    let tokens = Lexer::with_filename(input, filename).tokenize();
    Parser::new(&tokens).parse()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    // -- Token access -------------------------------------------

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn cur_is(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> Diagnostic {
        Diagnostic::parse(&self.cur().pos, msg)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.cur_is(kind) {
            let tok = self.cur().clone();
            self.advance();
            Ok(tok)
        } else {
            Err(self.err(format!("expected {}, got {}", kind, self.cur().kind)))
        }
    }

    fn take_ident(&mut self) -> Result<Token, Diagnostic> {
        self.expect(TokenKind::Ident)
    }

    // -- Program ------------------------------------------------

    fn parse(mut self) -> (Program, Vec<Diagnostic>) {
        let mut program = Program::default();
        while !self.cur_is(TokenKind::Eof) {
            let start = self.pos;
            match self.parse_statement() {
                Ok(stmt) => program.statements.push(stmt),
                Err(diag) => {
                    self.diagnostics.push(diag);
                    self.synchronize(start);
                }
            }
        }
        (program, self.diagnostics)
    }

    /// Skip tokens until something that can start a statement. The
    /// failed parse may have stopped on a statement-start keyword
    /// already; only force progress when it consumed nothing.
    fn synchronize(&mut self, start: usize) {
        if self.pos == start {
            self.advance();
        }
        while !self.cur_is(TokenKind::Eof) && !is_statement_start(self.cur().kind) {
            self.advance();
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, Diagnostic> {
        match self.cur().kind {
            TokenKind::Resource => self.parse_resource_decl().map(Statement::Resource),
            TokenKind::Ensure => self.parse_ensure().map(Statement::Ensure),
            TokenKind::On => {
                // A single lookahead disambiguates the global violation
                // block from a subject block.
                if self.peek_is(TokenKind::Violation) {
                    self.parse_on_violation_block().map(Statement::OnViolation)
                } else {
                    self.parse_on_block().map(Statement::On)
                }
            }
            TokenKind::Policy => self.parse_policy_decl().map(Statement::Policy),
            TokenKind::Apply => self.parse_apply().map(Statement::Apply),
            TokenKind::For => self.parse_for_each().map(Statement::ForEach),
            TokenKind::Invariant => self.parse_invariant().map(Statement::Invariant),
            TokenKind::Assume => self.parse_assume().map(Statement::Assume),
            TokenKind::Parallel => self.parse_parallel().map(Statement::Parallel),
            TokenKind::Illegal => Err(Diagnostic::new(
                Stage::Lex,
                &self.cur().pos,
                format!("illegal token '{}'", self.cur().literal),
            )),
            other => Err(self.err(format!("unexpected token: {}", other))),
        }
    }

    // -- Resources ----------------------------------------------

    fn parse_resource_decl(&mut self) -> Result<ResourceDecl, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'resource'

        if !self.cur().kind.is_resource_type() && !self.cur_is(TokenKind::Ident) {
            return Err(self.err(format!(
                "expected resource type or identifier, got {}",
                self.cur().kind
            )));
        }
        let resource_type = self.cur().literal.clone();
        self.advance();

        let path = self.expect(TokenKind::Str)?.literal;

        let mut alias = String::new();
        if self.cur_is(TokenKind::As) {
            self.advance();
            alias = self.take_ident()?.literal;
        }

        Ok(ResourceDecl {
            pos,
            resource_type,
            path,
            alias,
        })
    }

    fn parse_resource_ref(&mut self) -> Result<ResourceRef, Diagnostic> {
        let pos = self.cur().pos.clone();

        if self.cur().kind.is_resource_type() {
            let resource_type = self.cur().literal.clone();
            self.advance();
            let path = self.expect(TokenKind::Str)?.literal;
            return Ok(ResourceRef {
                pos,
                resource_type,
                path,
                alias: String::new(),
            });
        }

        if self.cur_is(TokenKind::Ident) {
            // An identifier followed by a string is a type/path pair;
            // alone it is an alias reference.
            if self.peek_is(TokenKind::Str) {
                let resource_type = self.cur().literal.clone();
                self.advance();
                let path = self.cur().literal.clone();
                self.advance();
                return Ok(ResourceRef {
                    pos,
                    resource_type,
                    path,
                    alias: String::new(),
                });
            }
            let alias = self.cur().literal.clone();
            self.advance();
            return Ok(ResourceRef {
                pos,
                resource_type: String::new(),
                path: String::new(),
                alias,
            });
        }

        Err(self.err(format!(
            "expected resource reference, got {}",
            self.cur().kind
        )))
    }

    // -- Ensure -------------------------------------------------

    fn parse_ensure(&mut self) -> Result<EnsureStmt, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'ensure'

        let condition = self.take_ident()?.literal;
        let mut stmt = EnsureStmt::new(pos, &condition);

        loop {
            match self.cur().kind {
                TokenKind::On => {
                    if self.peek_is(TokenKind::Violation) {
                        self.advance(); // 'on'
                        self.advance(); // 'violation'
                        stmt.violation = Some(self.parse_violation_body()?);
                        break;
                    }
                    // A second subject clause cannot belong to this
                    // statement; it starts the next one.
                    if stmt.subject.is_some() {
                        break;
                    }
                    self.advance();
                    stmt.subject = Some(self.parse_resource_ref()?);
                }
                TokenKind::With => {
                    self.advance();
                    stmt.handler = Some(self.parse_handler_spec()?);
                }
                TokenKind::When => {
                    self.advance();
                    stmt.guard = Some(self.parse_guard()?);
                }
                TokenKind::Requires => {
                    self.advance();
                    stmt.requires.push(self.take_ident()?.literal);
                }
                TokenKind::After => {
                    self.advance();
                    stmt.after.push(self.parse_resource_ref()?);
                }
                TokenKind::Before => {
                    self.advance();
                    stmt.before.push(self.parse_resource_ref()?);
                }
                _ => break,
            }
        }

        Ok(stmt)
    }

    fn parse_handler_spec(&mut self) -> Result<HandlerSpec, Diagnostic> {
        let pos = self.cur().pos.clone();

        // Handler names can be identifiers or the http/cron keywords.
        let mut name = match self.cur().kind {
            TokenKind::Ident | TokenKind::Http | TokenKind::Cron => self.cur().literal.clone(),
            other => return Err(self.err(format!("expected handler name, got {}", other))),
        };
        self.advance();

        // Colon-joined handler names like AES:256 or http:get.
        if self.cur_is(TokenKind::Colon) {
            self.advance();
            match self.cur().kind {
                TokenKind::Number | TokenKind::Ident => {
                    name.push(':');
                    name.push_str(&self.cur().literal);
                    self.advance();
                }
                other => {
                    return Err(self.err(format!(
                        "expected number or identifier after ':' in handler name, got {}",
                        other
                    )))
                }
            }
        }

        // Key-value arguments. `key` and `mode` are keywords but valid
        // argument names; values may be identifiers so policy parameters
        // can appear unquoted inside a policy body.
        let mut args = BTreeMap::new();
        while matches!(
            self.cur().kind,
            TokenKind::Ident | TokenKind::Key | TokenKind::Mode
        ) {
            let key = self.cur().literal.clone();
            self.advance();
            match self.cur().kind {
                TokenKind::Str | TokenKind::Ident => {
                    args.insert(key, self.cur().literal.clone());
                    self.advance();
                }
                other => {
                    return Err(self.err(format!(
                        "expected value for handler argument '{}', got {}",
                        key, other
                    )))
                }
            }
        }

        Ok(HandlerSpec { pos, name, args })
    }

    fn parse_guard(&mut self) -> Result<GuardExpr, Diagnostic> {
        let pos = self.cur().pos.clone();

        let left = match self.cur().kind {
            TokenKind::Ident | TokenKind::Environment => self.cur().literal.clone(),
            other => return Err(self.err(format!("expected identifier, got {}", other))),
        };
        self.advance();

        let op = match self.cur().kind {
            TokenKind::Equals => GuardOp::Eq,
            TokenKind::NotEquals => GuardOp::Ne,
            other => return Err(self.err(format!("expected '==' or '!=', got {}", other))),
        };
        self.advance();

        let right = self.expect(TokenKind::Str)?.literal;

        Ok(GuardExpr {
            pos,
            left,
            op,
            right,
        })
    }

    // -- Blocks -------------------------------------------------

    fn parse_on_block(&mut self) -> Result<OnBlock, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'on'

        let subject = self.parse_resource_ref()?;
        let body = self.parse_braced_body()?;

        Ok(OnBlock { pos, subject, body })
    }

    fn parse_on_violation_block(&mut self) -> Result<OnViolationBlock, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'on'
        self.advance(); // 'violation'

        let handler = self.parse_violation_body()?;
        Ok(OnViolationBlock { pos, handler })
    }

    fn parse_violation_body(&mut self) -> Result<ViolationHandler, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.expect(TokenKind::LBrace)?;

        let mut handler = ViolationHandler {
            pos,
            retry: 0,
            notify: Vec::new(),
        };

        while !self.cur_is(TokenKind::RBrace) && !self.cur_is(TokenKind::Eof) {
            match self.cur().kind {
                TokenKind::Retry => {
                    self.advance();
                    let num = self.expect(TokenKind::Number)?;
                    handler.retry = num.literal.parse().map_err(|_| {
                        Diagnostic::parse(
                            &num.pos,
                            format!("invalid retry count '{}'", num.literal),
                        )
                    })?;
                }
                TokenKind::Notify => {
                    self.advance();
                    handler.notify.push(self.expect(TokenKind::Str)?.literal);
                }
                other => {
                    return Err(self.err(format!(
                        "expected 'retry' or 'notify' in violation block, got {}",
                        other
                    )))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(handler)
    }

    /// Parse `{ statement* }`. Statement errors inside the block are
    /// collected and recovery resumes inside the block.
    fn parse_braced_body(&mut self) -> Result<Vec<Statement>, Diagnostic> {
        self.expect(TokenKind::LBrace)?;

        let mut body = Vec::new();
        while !self.cur_is(TokenKind::RBrace) && !self.cur_is(TokenKind::Eof) {
            let start = self.pos;
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(diag) => {
                    self.diagnostics.push(diag);
                    if self.pos == start {
                        self.advance();
                    }
                    while !self.cur_is(TokenKind::Eof)
                        && !self.cur_is(TokenKind::RBrace)
                        && !is_statement_start(self.cur().kind)
                    {
                        self.advance();
                    }
                }
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(body)
    }

    // -- Policies -----------------------------------------------

    fn parse_policy_decl(&mut self) -> Result<PolicyDecl, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'policy'

        let name = self.take_ident()?.literal;

        let mut params = Vec::new();
        if self.cur_is(TokenKind::LParen) {
            self.advance();
            while !self.cur_is(TokenKind::RParen) && !self.cur_is(TokenKind::Eof) {
                params.push(self.take_ident()?.literal);
                if self.cur_is(TokenKind::Comma) {
                    self.advance();
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let body = self.parse_braced_body()?;

        Ok(PolicyDecl {
            pos,
            name,
            params,
            body,
        })
    }

    fn parse_apply(&mut self) -> Result<ApplyStmt, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'apply'

        let policy = self.take_ident()?.literal;

        let mut args = Vec::new();
        if self.cur_is(TokenKind::LParen) {
            self.advance();
            while !self.cur_is(TokenKind::RParen) && !self.cur_is(TokenKind::Eof) {
                args.push(self.expect(TokenKind::Str)?.literal);
                if self.cur_is(TokenKind::Comma) {
                    self.advance();
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        Ok(ApplyStmt { pos, policy, args })
    }

    // -- Remaining statements -----------------------------------

    fn parse_for_each(&mut self) -> Result<ForEachStmt, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'for'
        self.expect(TokenKind::Each)?;

        if !self.cur().kind.is_resource_type() && !self.cur_is(TokenKind::Ident) {
            return Err(self.err(format!(
                "expected item type, got {}",
                self.cur().kind
            )));
        }
        let item_type = self.cur().literal.clone();
        self.advance();

        self.expect(TokenKind::In)?;
        let container = self.parse_resource_ref()?;
        let body = self.parse_braced_body()?;

        Ok(ForEachStmt {
            pos,
            item_type,
            container,
            body,
        })
    }

    fn parse_invariant(&mut self) -> Result<InvariantBlock, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'invariant'
        let body = self.parse_braced_body()?;
        Ok(InvariantBlock { pos, body })
    }

    fn parse_assume(&mut self) -> Result<AssumeStmt, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'assume'

        if !matches!(self.cur().kind, TokenKind::Ident | TokenKind::Environment) {
            return Err(self.err(format!(
                "expected identifier after 'assume', got {}",
                self.cur().kind
            )));
        }
        let first = self.cur().literal.clone();
        let first_pos = self.cur().pos.clone();

        // Guard form: <ident> ==|!= "string"
        if self.peek_is(TokenKind::Equals) || self.peek_is(TokenKind::NotEquals) {
            self.advance(); // left
            let op = if self.cur_is(TokenKind::Equals) {
                GuardOp::Eq
            } else {
                GuardOp::Ne
            };
            self.advance();
            let right = self.expect(TokenKind::Str)?.literal;
            return Ok(AssumeStmt {
                pos,
                guard: Some(GuardExpr {
                    pos: first_pos,
                    left: first,
                    op,
                    right,
                }),
                simple: String::new(),
            });
        }

        // Simple form: a run of identifiers ("filesystem reliable").
        self.advance();
        let mut simple = first;
        while self.cur_is(TokenKind::Ident) {
            simple.push(' ');
            simple.push_str(&self.cur().literal);
            self.advance();
        }

        Ok(AssumeStmt {
            pos,
            guard: None,
            simple,
        })
    }

    fn parse_parallel(&mut self) -> Result<ParallelBlock, Diagnostic> {
        let pos = self.cur().pos.clone();
        self.advance(); // 'parallel'
        let body = self.parse_braced_body()?;
        Ok(ParallelBlock { pos, body })
    }
}

fn is_statement_start(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Resource
            | TokenKind::Ensure
            | TokenKind::On
            | TokenKind::Policy
            | TokenKind::Apply
            | TokenKind::For
            | TokenKind::Invariant
            | TokenKind::Assume
            | TokenKind::Parallel
    )
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Program {
        let (program, diagnostics) = parse_source(input, "test.ens");
        assert!(diagnostics.is_empty(), "diagnostics: {:?}", diagnostics);
        program
    }

    fn as_ensure(stmt: &Statement) -> &EnsureStmt {
        match stmt {
            Statement::Ensure(e) => e,
            other => panic!("expected ensure, got {:?}", other),
        }
    }

    #[test]
    fn resource_decl_with_alias() {
        let program = parse_ok(r#"resource file "secrets.db" as secrets_db"#);
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Statement::Resource(decl) => {
                assert_eq!(decl.resource_type, "file");
                assert_eq!(decl.path, "secrets.db");
                assert_eq!(decl.alias, "secrets_db");
            }
            other => panic!("expected resource decl, got {:?}", other),
        }
    }

    #[test]
    fn ensure_with_all_clauses() {
        let program = parse_ok(
            r#"ensure encrypted on file "secrets.db" with AES:256 key "env:K" when environment == "prod" requires exists after file "other.db""#,
        );
        let stmt = as_ensure(&program.statements[0]);
        assert_eq!(stmt.condition, "encrypted");
        assert_eq!(stmt.subject.as_ref().unwrap().path, "secrets.db");

        let handler = stmt.handler.as_ref().unwrap();
        assert_eq!(handler.name, "AES:256");
        assert_eq!(handler.args.get("key").unwrap(), "env:K");

        let guard = stmt.guard.as_ref().unwrap();
        assert_eq!(guard.left, "environment");
        assert_eq!(guard.op, GuardOp::Eq);
        assert_eq!(guard.right, "prod");

        assert_eq!(stmt.requires, vec!["exists".to_owned()]);
        assert_eq!(stmt.after.len(), 1);
        assert_eq!(stmt.after[0].path, "other.db");
    }

    #[test]
    fn ensure_clauses_in_any_order() {
        let program =
            parse_ok(r#"ensure permissions with posix mode "0600" on file "x" requires exists"#);
        let stmt = as_ensure(&program.statements[0]);
        assert_eq!(stmt.subject.as_ref().unwrap().path, "x");
        assert_eq!(stmt.handler.as_ref().unwrap().args.get("mode").unwrap(), "0600");
        assert_eq!(stmt.requires, vec!["exists".to_owned()]);
    }

    #[test]
    fn handler_spec_with_dotted_name_and_multiple_args() {
        let program = parse_ok(
            r#"ensure scheduled on cron "backup" with cron.native schedule "0 2 * * *" command "backup.sh""#,
        );
        let stmt = as_ensure(&program.statements[0]);
        let handler = stmt.handler.as_ref().unwrap();
        assert_eq!(handler.name, "cron.native");
        assert_eq!(handler.args.get("schedule").unwrap(), "0 2 * * *");
        assert_eq!(handler.args.get("command").unwrap(), "backup.sh");
    }

    #[test]
    fn per_statement_violation_handler() {
        let program = parse_ok(
            "ensure exists on file \"x\" on violation {\n  retry 5\n  notify \"ops@example.com\"\n}",
        );
        let stmt = as_ensure(&program.statements[0]);
        let violation = stmt.violation.as_ref().unwrap();
        assert_eq!(violation.retry, 5);
        assert_eq!(violation.notify, vec!["ops@example.com".to_owned()]);
    }

    #[test]
    fn global_violation_block() {
        let program = parse_ok("on violation {\n  retry 2\n  notify \"slack:#alerts\"\n}");
        match &program.statements[0] {
            Statement::OnViolation(block) => {
                assert_eq!(block.handler.retry, 2);
                assert_eq!(block.handler.notify, vec!["slack:#alerts".to_owned()]);
            }
            other => panic!("expected on violation block, got {:?}", other),
        }
    }

    #[test]
    fn on_block_with_body() {
        let program = parse_ok(
            "on file \"secrets.db\" {\n  ensure exists\n  ensure encrypted with AES:256 key \"env:K\"\n}",
        );
        match &program.statements[0] {
            Statement::On(block) => {
                assert_eq!(block.subject.path, "secrets.db");
                assert_eq!(block.body.len(), 2);
                assert!(as_ensure(&block.body[0]).subject.is_none());
            }
            other => panic!("expected on block, got {:?}", other),
        }
    }

    #[test]
    fn alias_reference_in_on_block() {
        let program = parse_ok("on secrets {\n  ensure exists\n}");
        match &program.statements[0] {
            Statement::On(block) => {
                assert_eq!(block.subject.alias, "secrets");
                assert!(block.subject.resource_type.is_empty());
            }
            other => panic!("expected on block, got {:?}", other),
        }
    }

    #[test]
    fn policy_and_apply() {
        let program = parse_ok(
            "policy secure(k) {\n  ensure encrypted with AES:256 key k\n}\napply secure(\"env:KK\")",
        );
        match &program.statements[0] {
            Statement::Policy(decl) => {
                assert_eq!(decl.name, "secure");
                assert_eq!(decl.params, vec!["k".to_owned()]);
                assert_eq!(decl.body.len(), 1);
                // Unquoted parameter name as a handler argument value.
                let ensure = as_ensure(&decl.body[0]);
                assert_eq!(ensure.handler.as_ref().unwrap().args.get("key").unwrap(), "k");
            }
            other => panic!("expected policy, got {:?}", other),
        }
        match &program.statements[1] {
            Statement::Apply(apply) => {
                assert_eq!(apply.policy, "secure");
                assert_eq!(apply.args, vec!["env:KK".to_owned()]);
            }
            other => panic!("expected apply, got {:?}", other),
        }
    }

    #[test]
    fn for_each_statement() {
        let program = parse_ok("for each file in directory \"/etc/certs\" {\n  ensure exists\n}");
        match &program.statements[0] {
            Statement::ForEach(stmt) => {
                assert_eq!(stmt.item_type, "file");
                assert_eq!(stmt.container.resource_type, "directory");
                assert_eq!(stmt.container.path, "/etc/certs");
                assert_eq!(stmt.body.len(), 1);
            }
            other => panic!("expected for each, got {:?}", other),
        }
    }

    #[test]
    fn invariant_and_parallel_blocks() {
        let program = parse_ok(
            "invariant {\n  ensure exists on file \"a\"\n}\nparallel {\n  ensure exists on file \"b\"\n}",
        );
        assert!(matches!(program.statements[0], Statement::Invariant(_)));
        assert!(matches!(program.statements[1], Statement::Parallel(_)));
    }

    #[test]
    fn assume_guard_and_simple_forms() {
        let program = parse_ok("assume environment == \"prod\"\nassume filesystem reliable");
        match &program.statements[0] {
            Statement::Assume(stmt) => {
                let guard = stmt.guard.as_ref().unwrap();
                assert_eq!(guard.left, "environment");
                assert_eq!(guard.right, "prod");
            }
            other => panic!("expected assume, got {:?}", other),
        }
        match &program.statements[1] {
            Statement::Assume(stmt) => {
                assert!(stmt.guard.is_none());
                assert_eq!(stmt.simple, "filesystem reliable");
            }
            other => panic!("expected assume, got {:?}", other),
        }
    }

    #[test]
    fn ensure_with_subject_does_not_swallow_a_following_on_block() {
        let program = parse_ok(
            "ensure exists on file \"outer.txt\"\non file \"inner.txt\" {\n  ensure readable\n}",
        );
        assert_eq!(program.statements.len(), 2);
        assert_eq!(
            as_ensure(&program.statements[0]).subject.as_ref().unwrap().path,
            "outer.txt"
        );
        assert!(matches!(program.statements[1], Statement::On(_)));
    }

    #[test]
    fn comments_are_skipped() {
        let program = parse_ok("# leading comment\nensure exists on file \"x\" # trailing\n");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn errors_are_collected_and_parsing_continues() {
        let input = "ensure\nensure exists on file \"ok.txt\"\nresource file\nensure readable on file \"ok.txt\"";
        let (program, diagnostics) = parse_source(input, "test.ens");

        // Both malformed statements are reported.
        assert_eq!(diagnostics.len(), 2, "diagnostics: {:?}", diagnostics);
        // Both well-formed statements survive.
        assert_eq!(program.statements.len(), 2);
        assert!(diagnostics[0].to_string().contains("test.ens"));
    }

    #[test]
    fn illegal_token_is_a_lex_error() {
        let (_, diagnostics) = parse_source("= ensure exists on file \"x\"", "test.ens");
        assert!(!diagnostics.is_empty());
        assert_eq!(diagnostics[0].stage, Stage::Lex);
    }

    #[test]
    fn recovery_inside_block() {
        let input = "on file \"x\" {\n  ensure\n  ensure exists\n}";
        let (program, diagnostics) = parse_source(input, "test.ens");
        assert_eq!(diagnostics.len(), 1);
        match &program.statements[0] {
            Statement::On(block) => assert_eq!(block.body.len(), 1),
            other => panic!("expected on block, got {:?}", other),
        }
    }
}
