//! Compile-stage diagnostics.
//!
//! Every static stage accumulates diagnostics and continues as far as
//! it safely can, so one invocation surfaces everything wrong with the
//! failing stage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::Position;

/// The pipeline stage a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lex,
    Parse,
    Bind,
    Imply,
    Graph,
    Plan,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Bind => "bind",
            Stage::Imply => "imply",
            Stage::Graph => "graph",
            Stage::Plan => "plan",
        })
    }
}

/// A single compile diagnostic with its source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, pos: &Position, message: impl Into<String>) -> Self {
        Diagnostic {
            stage,
            file: pos.file.clone(),
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }

    pub fn parse(pos: &Position, message: impl Into<String>) -> Self {
        Diagnostic::new(Stage::Parse, pos, message)
    }

    pub fn bind(pos: &Position, message: impl Into<String>) -> Self {
        Diagnostic::new(Stage::Bind, pos, message)
    }

    pub fn imply(pos: &Position, message: impl Into<String>) -> Self {
        Diagnostic::new(Stage::Imply, pos, message)
    }

    pub fn graph(pos: &Position, message: impl Into<String>) -> Self {
        Diagnostic::new(Stage::Graph, pos, message)
    }

    /// Structured form mirroring the human output.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "stage":   self.stage.to_string(),
            "file":    self.file,
            "line":    self.line,
            "column":  self.column,
            "message": self.message,
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(
                f,
                "{}:{}: {} error: {}",
                self.line, self.column, self.stage, self.message
            )
        } else {
            write!(
                f,
                "{}:{}:{}: {} error: {}",
                self.file, self.line, self.column, self.stage, self.message
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position_and_stage() {
        let pos = Position {
            file: "config.ens".to_owned(),
            line: 3,
            column: 7,
            offset: 40,
        };
        let d = Diagnostic::bind(&pos, "undefined resource alias: secrets");
        assert_eq!(
            d.to_string(),
            "config.ens:3:7: bind error: undefined resource alias: secrets"
        );
    }

    #[test]
    fn json_value_has_all_fields() {
        let d = Diagnostic::parse(&Position::default(), "unexpected token");
        let v = d.to_json_value();
        assert_eq!(v["stage"], "parse");
        assert_eq!(v["message"], "unexpected token");
    }
}
