//! Source text to a linked opcode tree in one call.

use crate::config::ParserConfig;
use crate::error::VfrResult;
use crate::lexer;
use crate::opcode::OpcodeNode;
use crate::parser;
use crate::symbols::SymbolTable;
use tracing::{event, Level};

/// The finished tree of one compilation unit plus the tables it was
/// resolved against.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// The `FormSet` root.
    pub formset: OpcodeNode,
    pub symbols: SymbolTable,
}

pub fn compile(src: &str, config: &ParserConfig) -> VfrResult<CompiledUnit> {
    let tokens = lexer::lex(src)?;
    event!(Level::DEBUG, "{} tokens", tokens.len());
    parser::parse(&tokens, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VfrError;

    #[test]
    fn lexer_errors_surface_unchanged() {
        let err = compile("formset $", &ParserConfig::default()).unwrap_err();
        assert!(matches!(err, VfrError::Syntax { line: 1, .. }));
    }

    #[test]
    fn identical_input_gives_identical_errors() {
        let src = "formset guid = {1, 2, 3, {1, 2, 3}}, title = STRING_TOKEN(1),";
        let a = compile(src, &ParserConfig::default()).unwrap_err();
        let b = compile(src, &ParserConfig::default()).unwrap_err();
        assert_eq!(a, b);
        assert!(matches!(a, VfrError::MalformedLiteral { .. }));
    }
}
