/// Error raised while tokenizing or parsing a source unit.
#[derive(Debug, Clone)]
pub enum ParseError {
    /// A character run the lexer could not classify.
    InvalidToken {
        lexeme: String,
        line: u16,
        col: u16,
    },
    /// The parser wanted one construct and found another.
    Expected {
        what: &'static str,
        found: String,
        line: u16,
        col: u16,
    },
    /// A literal that lexed but does not parse to a value (e.g. an
    /// out-of-range integer).
    InvalidLiteral {
        lexeme: String,
        line: u16,
        col: u16,
    },
    /// Something other than `fun`, `native fun`, or `import` at top level.
    InvalidTopLevel {
        found: String,
        line: u16,
        col: u16,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidToken { lexeme, line, col } => {
                write!(f, "parse error at {}:{}: invalid token '{}'", line, col, lexeme)
            }
            ParseError::Expected {
                what,
                found,
                line,
                col,
            } => {
                write!(
                    f,
                    "parse error at {}:{}: expected {}, found '{}'",
                    line, col, what, found
                )
            }
            ParseError::InvalidLiteral { lexeme, line, col } => {
                write!(
                    f,
                    "parse error at {}:{}: invalid literal '{}'",
                    line, col, lexeme
                )
            }
            ParseError::InvalidTopLevel { found, line, col } => {
                write!(
                    f,
                    "parse error at {}:{}: '{}' cannot start a top-level declaration",
                    line, col, found
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}
