//! Reference lexer for preprocessed VFR source.
//!
//! The parser only consumes the `Spanned` slice; any token source that
//! produces the same shape (terminated by `Eof`) can stand in for this one.

use crate::error::VfrError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifiers and keywords, distinguished in the parser
    Word(String),
    /// Numeric literal lexeme (decimal or `0x` hex); radix and range are
    /// decoded by the parser so overflow surfaces as a literal error.
    Number(String),
    // Punctuation
    Hash,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Colon,
    Semicolon,
    Comma,
    Question,
    Assign,
    // Comparison operators
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    // Bitwise and arithmetic operators
    Pipe,
    Amp,
    Shl,
    Shr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    // End of input
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let punct = match self {
            Token::Word(w) => return write!(f, "'{}'", w),
            Token::Number(n) => return write!(f, "number {}", n),
            Token::Eof => return write!(f, "end of input"),
            Token::Hash => "#",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Dot => ".",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Comma => ",",
            Token::Question => "?",
            Token::Assign => "=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Pipe => "|",
            Token::Amp => "&",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Tilde => "~",
        };
        write!(f, "'{}'", punct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

/// Reserved words of the language. A reserved word is never accepted where
/// an identifier is expected.
pub fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        // statements
        "formset" | "endformset" | "form" | "endform" | "formmap" | "maptitle" | "mapguid"
            | "subtitle" | "endsubtitle" | "text" | "goto" | "checkbox" | "endcheckbox"
            | "numeric" | "endnumeric" | "oneof" | "endoneof" | "option" | "string"
            | "endstring" | "password" | "endpassword" | "orderedlist" | "endlist" | "date"
            | "enddate" | "time" | "endtime" | "suppressif" | "grayoutif" | "disableif"
            | "inconsistentif" | "nosubmitif" | "warningif" | "endif" | "default" | "value"
            | "read" | "write" | "varstore" | "efivarstore" | "namevaluevarstore"
            | "defaultstore" | "rule" | "endrule" | "guidop" | "endguidop" | "label"
            | "banner" | "modal" | "action" | "endaction" | "resetbutton" | "endresetbutton"
            | "image" | "locked" | "refresh" | "refreshguid" | "varstoredevice" | "typedef"
            | "struct" | "union"
            // clauses
            | "guid" | "title" | "help" | "classguid" | "class" | "subclass" | "name"
            | "varid" | "questionid" | "prompt" | "flags" | "key" | "minimum" | "maximum"
            | "step" | "minsize" | "maxsize" | "encoding" | "maxcontainers" | "config"
            | "formid" | "question" | "devicepath" | "formsetguid" | "attribute" | "varsize"
            | "interval" | "timeout" | "line" | "align" | "left" | "center" | "right"
            | "year" | "month" | "day" | "hour" | "minute" | "second" | "datatype" | "data"
            | "uuid" | "format"
            // expressions
            | "OR" | "AND" | "NOT" | "or" | "and" | "not" | "catenate" | "match" | "match2"
            | "dup" | "vareqval" | "var" | "ideqval" | "ideqid" | "ideqvallist"
            | "questionref" | "ruleref" | "stringref" | "pushthis" | "security" | "get"
            | "set" | "length" | "bitwisenot" | "questionrefval" | "stringrefval" | "boolval"
            | "stringval" | "uintval" | "unintval" | "toupper" | "tolower" | "cond" | "find"
            | "mid" | "tok" | "span" | "map" | "TRUE" | "FALSE" | "ONE" | "ONES" | "ZERO"
            | "UNDEFINED" | "VERSION" | "true" | "false" | "one" | "ones" | "zero"
            | "undefined" | "version"
            // literal forms and built-in types
            | "STRING_TOKEN" | "IMAGE_TOKEN" | "UINT8" | "UINT16" | "UINT32" | "UINT64"
            | "BOOLEAN" | "EFI_STRING_ID" | "EFI_HII_DATE" | "EFI_HII_TIME" | "EFI_HII_REF"
            | "EFI_GUID"
    )
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, VfrError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;
    let mut line: u32 = 1;

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();

        // Line comment
        if c == '/' && next == Some('/') {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        // Block comment
        if c == '/' && next == Some('*') {
            let start_line = line;
            pos += 2;
            loop {
                if pos >= chars.len() {
                    return Err(VfrError::syntax(start_line, "unterminated block comment"));
                }
                if chars[pos] == '\n' {
                    line += 1;
                }
                if chars[pos] == '*' && chars.get(pos + 1) == Some(&'/') {
                    pos += 2;
                    break;
                }
                pos += 1;
            }
            continue;
        }

        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
            }
            pos += 1;
            continue;
        }

        let tok_line = line;

        // Number
        if c.is_ascii_digit() {
            let start = pos;
            if c == '0' && matches!(next, Some('x') | Some('X')) {
                pos += 2;
                while pos < chars.len() && chars[pos].is_ascii_hexdigit() {
                    pos += 1;
                }
                if pos == start + 2 {
                    return Err(VfrError::malformed(tok_line, "hex literal has no digits"));
                }
            } else {
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            if pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                let mut end = pos;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let s: String = chars[start..end].iter().collect();
                return Err(VfrError::malformed(
                    tok_line,
                    format!("invalid numeric literal '{}'", s),
                ));
            }
            let s: String = chars[start..pos].iter().collect();
            tokens.push(Spanned {
                token: Token::Number(s),
                line: tok_line,
            });
            continue;
        }

        // Identifier / keyword
        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            tokens.push(Spanned {
                token: Token::Word(word),
                line: tok_line,
            });
            continue;
        }

        // Two-character operators
        let pair = match (c, next) {
            ('=', Some('=')) => Some(Token::EqEq),
            ('!', Some('=')) => Some(Token::NotEq),
            ('<', Some('=')) => Some(Token::Le),
            ('>', Some('=')) => Some(Token::Ge),
            ('<', Some('<')) => Some(Token::Shl),
            ('>', Some('>')) => Some(Token::Shr),
            _ => None,
        };
        if let Some(token) = pair {
            tokens.push(Spanned {
                token,
                line: tok_line,
            });
            pos += 2;
            continue;
        }

        let single = match c {
            '#' => Token::Hash,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '.' => Token::Dot,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '?' => Token::Question,
            '=' => Token::Assign,
            '<' => Token::Lt,
            '>' => Token::Gt,
            '|' => Token::Pipe,
            '&' => Token::Amp,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '~' => Token::Tilde,
            _ => {
                return Err(VfrError::syntax(
                    tok_line,
                    format!("unexpected character '{}'", c),
                ))
            }
        };
        tokens.push(Spanned {
            token: single,
            line: tok_line,
        });
        pos += 1;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn operators_prefer_longest_match() {
        assert_eq!(
            kinds("a<<=b >= == != ="),
            vec![
                Token::Word("a".into()),
                Token::Shl,
                Token::Assign,
                Token::Word("b".into()),
                Token::Ge,
                Token::EqEq,
                Token::NotEq,
                Token::Assign,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers_keep_their_lexeme() {
        assert_eq!(
            kinds("0x1F 42"),
            vec![
                Token::Number("0x1F".into()),
                Token::Number("42".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn lines_advance_through_comments() {
        let toks = lex("a // one\n/* two\nthree */ b\nc").unwrap();
        let lines: Vec<u32> = toks.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 3, 4, 4]);
    }

    #[test]
    fn unterminated_block_comment_is_rejected() {
        let err = lex("form /* never closed").unwrap_err();
        assert!(matches!(err, VfrError::Syntax { line: 1, .. }));
    }

    #[test]
    fn number_glued_to_letters_is_malformed() {
        let err = lex("12abc").unwrap_err();
        assert!(matches!(err, VfrError::MalformedLiteral { .. }));
    }

    #[test]
    fn keywords_are_reserved() {
        assert!(is_keyword("endcheckbox"));
        assert!(is_keyword("STRING_TOKEN"));
        assert!(!is_keyword("MyIfrNVData"));
    }
}
