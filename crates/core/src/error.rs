use serde::Serialize;

/// A compilation error. The first error aborts the unit; there is no
/// recovery and no accumulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VfrError {
    /// Unexpected token, missing terminator or unmatched scope.
    #[error("line {line}: syntax error: {message}")]
    Syntax { line: u32, message: String },

    /// Unknown struct field, varstore, default store, or a rule/question/form
    /// reference never defined in the unit.
    #[error("line {line}: undeclared symbol '{name}'")]
    UndeclaredSymbol { line: u32, name: String },

    /// Redefinition of a typedef, varstore, default store, form, rule or
    /// question name.
    #[error("line {line}: duplicate declaration of '{name}' (first declared at line {first_line})")]
    DuplicateDeclaration {
        line: u32,
        name: String,
        first_line: u32,
    },

    /// Numeric overflow, malformed GUID literal, array-size mismatch.
    #[error("line {line}: malformed literal: {message}")]
    MalformedLiteral { line: u32, message: String },

    /// A parser setting outside its accepted range. Raised before any
    /// source is read.
    #[error("invalid parser configuration: {message}")]
    Config { message: String },
}

pub type VfrResult<T> = Result<T, VfrError>;

impl VfrError {
    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        VfrError::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn undeclared(line: u32, name: impl Into<String>) -> Self {
        VfrError::UndeclaredSymbol {
            line,
            name: name.into(),
        }
    }

    pub fn duplicate(line: u32, name: impl Into<String>, first_line: u32) -> Self {
        VfrError::DuplicateDeclaration {
            line,
            name: name.into(),
            first_line,
        }
    }

    pub fn malformed(line: u32, message: impl Into<String>) -> Self {
        VfrError::MalformedLiteral {
            line,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        VfrError::Config {
            message: message.into(),
        }
    }

    /// Source line the error was captured at; 0 for configuration errors.
    pub fn line(&self) -> u32 {
        match self {
            VfrError::Syntax { line, .. }
            | VfrError::UndeclaredSymbol { line, .. }
            | VfrError::DuplicateDeclaration { line, .. }
            | VfrError::MalformedLiteral { line, .. } => *line,
            VfrError::Config { .. } => 0,
        }
    }

    /// Serialize for machine-readable driver output.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "kind": "unknown",
                "line": self.line(),
                "message": self.to_string(),
            })
        })
    }
}
