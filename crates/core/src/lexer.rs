//! Tokenizer for EnsuraScript source files.
//!
//! Comments are emitted as their own token kind so tooling can keep
//! them; [`Lexer::tokenize`] strips them for the parser.

use std::fmt;

// ──────────────────────────────────────────────
// Token kinds
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Illegal,
    Eof,
    Comment,

    // Literals
    Ident,
    Str,
    Number,

    // Delimiters
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
    Equals,
    NotEquals,

    // Keywords
    Resource,
    Ensure,
    On,
    With,
    Requires,
    After,
    Before,
    Policy,
    Apply,
    Violation,
    Retry,
    Notify,
    Assume,
    When,
    For,
    Each,
    In,
    Invariant,
    As,
    Key,
    Mode,
    Directory,
    File,
    Http,
    Database,
    Service,
    Process,
    Cron,
    Environment,
    Parallel,
}

impl TokenKind {
    /// Resolve an identifier against the keyword table.
    pub fn lookup_ident(word: &str) -> TokenKind {
        match word {
            "resource" => TokenKind::Resource,
            "ensure" => TokenKind::Ensure,
            "on" => TokenKind::On,
            "with" => TokenKind::With,
            "requires" => TokenKind::Requires,
            "after" => TokenKind::After,
            "before" => TokenKind::Before,
            "policy" => TokenKind::Policy,
            "apply" => TokenKind::Apply,
            "violation" => TokenKind::Violation,
            "retry" => TokenKind::Retry,
            "notify" => TokenKind::Notify,
            "assume" => TokenKind::Assume,
            "when" => TokenKind::When,
            "for" => TokenKind::For,
            "each" => TokenKind::Each,
            "in" => TokenKind::In,
            "invariant" => TokenKind::Invariant,
            "as" => TokenKind::As,
            "key" => TokenKind::Key,
            "mode" => TokenKind::Mode,
            "directory" => TokenKind::Directory,
            "file" => TokenKind::File,
            "http" => TokenKind::Http,
            "database" => TokenKind::Database,
            "service" => TokenKind::Service,
            "process" => TokenKind::Process,
            "cron" => TokenKind::Cron,
            "environment" => TokenKind::Environment,
            "parallel" => TokenKind::Parallel,
            _ => TokenKind::Ident,
        }
    }

    /// True for the keyword tokens that name a resource type.
    pub fn is_resource_type(self) -> bool {
        matches!(
            self,
            TokenKind::File
                | TokenKind::Directory
                | TokenKind::Http
                | TokenKind::Database
                | TokenKind::Service
                | TokenKind::Process
                | TokenKind::Cron
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Comment => "COMMENT",
            TokenKind::Ident => "IDENT",
            TokenKind::Str => "STRING",
            TokenKind::Number => "NUMBER",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Equals => "'=='",
            TokenKind::NotEquals => "'!='",
            TokenKind::Resource => "'resource'",
            TokenKind::Ensure => "'ensure'",
            TokenKind::On => "'on'",
            TokenKind::With => "'with'",
            TokenKind::Requires => "'requires'",
            TokenKind::After => "'after'",
            TokenKind::Before => "'before'",
            TokenKind::Policy => "'policy'",
            TokenKind::Apply => "'apply'",
            TokenKind::Violation => "'violation'",
            TokenKind::Retry => "'retry'",
            TokenKind::Notify => "'notify'",
            TokenKind::Assume => "'assume'",
            TokenKind::When => "'when'",
            TokenKind::For => "'for'",
            TokenKind::Each => "'each'",
            TokenKind::In => "'in'",
            TokenKind::Invariant => "'invariant'",
            TokenKind::As => "'as'",
            TokenKind::Key => "'key'",
            TokenKind::Mode => "'mode'",
            TokenKind::Directory => "'directory'",
            TokenKind::File => "'file'",
            TokenKind::Http => "'http'",
            TokenKind::Database => "'database'",
            TokenKind::Service => "'service'",
            TokenKind::Process => "'process'",
            TokenKind::Cron => "'cron'",
            TokenKind::Environment => "'environment'",
            TokenKind::Parallel => "'parallel'",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────────────────────
// Positions and tokens
// ──────────────────────────────────────────────

/// A source position attached to every token and AST node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Position {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub pos: Position,
}

// ──────────────────────────────────────────────
// Lexer
// ──────────────────────────────────────────────

pub struct Lexer {
    chars: Vec<char>,
    filename: String,
    /// Index of the current char in `chars`.
    pos: usize,
    /// Index of the next char to read.
    read_pos: usize,
    /// Current char; '\0' past the end of input.
    ch: char,
    /// Byte offset of the current char.
    offset: usize,
    next_offset: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer::with_filename(input, "")
    }

    pub fn with_filename(input: &str, filename: &str) -> Self {
        let mut l = Lexer {
            chars: input.chars().collect(),
            filename: filename.to_owned(),
            pos: 0,
            read_pos: 0,
            ch: '\0',
            offset: 0,
            next_offset: 0,
            line: 1,
            column: 0,
        };
        l.read_char();
        l
    }

    fn read_char(&mut self) {
        self.pos = self.read_pos;
        self.offset = self.next_offset;
        if self.read_pos >= self.chars.len() {
            self.ch = '\0';
        } else {
            self.ch = self.chars[self.read_pos];
            self.read_pos += 1;
            self.next_offset += self.ch.len_utf8();
        }
        self.column += 1;
        if self.ch == '\n' {
            self.line += 1;
            self.column = 0;
        }
    }

    fn peek_char(&self) -> char {
        if self.read_pos >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.read_pos]
        }
    }

    fn current_pos(&self) -> Position {
        Position {
            file: self.filename.clone(),
            line: self.line,
            column: self.column,
            offset: self.offset,
        }
    }

    /// Produce the next token. Returns an Eof token forever once the
    /// input is exhausted.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let pos = self.current_pos();

        match self.ch {
            '{' => self.single(TokenKind::LBrace, "{", pos),
            '}' => self.single(TokenKind::RBrace, "}", pos),
            '(' => self.single(TokenKind::LParen, "(", pos),
            ')' => self.single(TokenKind::RParen, ")", pos),
            ',' => self.single(TokenKind::Comma, ",", pos),
            ':' => self.single(TokenKind::Colon, ":", pos),
            '=' => {
                if self.peek_char() == '=' {
                    self.read_char();
                    self.single(TokenKind::Equals, "==", pos)
                } else {
                    self.single(TokenKind::Illegal, "=", pos)
                }
            }
            '!' => {
                if self.peek_char() == '=' {
                    self.read_char();
                    self.single(TokenKind::NotEquals, "!=", pos)
                } else {
                    self.single(TokenKind::Illegal, "!", pos)
                }
            }
            '#' => {
                let text = self.read_comment();
                Token {
                    kind: TokenKind::Comment,
                    literal: text,
                    pos,
                }
            }
            '"' => {
                let text = self.read_string();
                Token {
                    kind: TokenKind::Str,
                    literal: text,
                    pos,
                }
            }
            '\0' => Token {
                kind: TokenKind::Eof,
                literal: String::new(),
                pos,
            },
            c if is_letter(c) => {
                let word = self.read_identifier();
                Token {
                    kind: TokenKind::lookup_ident(&word),
                    literal: word,
                    pos,
                }
            }
            c if c.is_ascii_digit() => {
                let num = self.read_number();
                Token {
                    kind: TokenKind::Number,
                    literal: num,
                    pos,
                }
            }
            c => self.single(TokenKind::Illegal, &c.to_string(), pos),
        }
    }

    fn single(&mut self, kind: TokenKind, literal: &str, pos: Position) -> Token {
        self.read_char();
        Token {
            kind,
            literal: literal.to_owned(),
            pos,
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.ch, ' ' | '\t' | '\r' | '\n') {
            self.read_char();
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while is_letter(self.ch) || self.ch.is_ascii_digit() || self.ch == '.' {
            self.read_char();
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn read_number(&mut self) -> String {
        let start = self.pos;
        while self.ch.is_ascii_digit() {
            self.read_char();
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// Read a double-quoted string. A backslash skips the next char
    /// (both are retained; no escape translation). An unterminated
    /// string yields the characters seen so far.
    fn read_string(&mut self) -> String {
        self.read_char(); // opening quote
        let start = self.pos;
        while self.ch != '"' && self.ch != '\0' {
            if self.ch == '\\' {
                self.read_char();
            }
            self.read_char();
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        if self.ch == '"' {
            self.read_char(); // closing quote
        }
        s
    }

    fn read_comment(&mut self) -> String {
        self.read_char(); // '#'
        let start = self.pos;
        while self.ch != '\n' && self.ch != '\0' {
            self.read_char();
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// All tokens with comments stripped, ending in Eof.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            if tok.kind == TokenKind::Comment {
                continue;
            }
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        tokens
    }

    /// All tokens including comments, ending in Eof.
    pub fn tokenize_all(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        tokens
    }
}

fn is_letter(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
