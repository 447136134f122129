use std::fmt;
use std::io;

//===----------------------------------------------------------------------===//
// Error
//===----------------------------------------------------------------------===//

/// Every failure the interpreter can surface at the REPL boundary.
///
/// All variants unwind to the prompt (or abort an enclosing `load`); none of
/// them leaves the heap in an inconsistent state.
#[derive(Debug, Clone)]
pub enum Error {
    Syntax(SyntaxError),
    UnboundVariable(String),
    Type { expected: &'static str, actual: String },
    Arity { expected: usize, got: usize },
    BadForm(String),
    NotApplicable(String),
    CannotEvaluate(String),
    DivisionByZero,
    Overflow,
    Io(String),
    User(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Syntax(e) => write!(f, "{}", e),
            Error::UnboundVariable(name) => {
                write!(f, "unbound variable: {}", name)
            }
            Error::Type { expected, actual } => {
                write!(f, "type error: expected {}, got {}", expected, actual)
            }
            Error::Arity { expected, got } => {
                write!(
                    f,
                    "arity error: expected {} argument{}, got {}",
                    expected,
                    if *expected == 1 { "" } else { "s" },
                    got
                )
            }
            Error::BadForm(form) => write!(f, "bad special form: {}", form),
            Error::NotApplicable(what) => {
                write!(f, "cannot apply non-procedure: {}", what)
            }
            Error::CannotEvaluate(what) => {
                write!(f, "cannot evaluate expression: {}", what)
            }
            Error::DivisionByZero => write!(f, "division by zero"),
            Error::Overflow => write!(f, "fixnum overflow"),
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::User(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl From<SyntaxError> for Error {
    fn from(e: SyntaxError) -> Self {
        Error::Syntax(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

//===----------------------------------------------------------------------===//
// SyntaxError
//===----------------------------------------------------------------------===//

/// Failures raised by the reader. Each one terminates the current read; the
/// REPL then discards the remainder of the buffered input.
#[derive(Debug, Clone)]
pub enum SyntaxError {
    UnknownLiteral { found: char },
    ExpectedDelimiter { after: &'static str, found: char },
    UnterminatedString,
    IncompleteCharacter,
    BadDot,
    MissingCloseParen,
    UnexpectedChar { found: char },
    UnexpectedEof,
    FixnumOverflow,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyntaxError::UnknownLiteral { found } => {
                write!(f, "unknown '#' literal: #{}", found)
            }
            SyntaxError::ExpectedDelimiter { after, found } => {
                write!(f, "{} not followed by delimiter (found '{}')", after, found)
            }
            SyntaxError::UnterminatedString => write!(f, "unterminated string literal"),
            SyntaxError::IncompleteCharacter => {
                write!(f, "incomplete character literal")
            }
            SyntaxError::BadDot => write!(f, "dot not followed by delimiter"),
            SyntaxError::MissingCloseParen => write!(f, "missing closing ')'"),
            SyntaxError::UnexpectedChar { found } => {
                write!(f, "bad input, unexpected '{}'", found)
            }
            SyntaxError::UnexpectedEof => write!(f, "unexpected end of input"),
            SyntaxError::FixnumOverflow => {
                write!(f, "number literal does not fit a fixnum")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_user_readable() {
        let e = Error::UnboundVariable("x".to_string());
        assert_eq!(e.to_string(), "unbound variable: x");

        let e = Error::Arity { expected: 2, got: 3 };
        assert_eq!(e.to_string(), "arity error: expected 2 arguments, got 3");

        let e = Error::Syntax(SyntaxError::BadDot);
        assert_eq!(e.to_string(), "dot not followed by delimiter");
    }
}
