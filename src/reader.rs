use crate::error::{Error, SyntaxError};
use crate::heap::{Heap, Value};
use crate::ports::ByteStream;

//===----------------------------------------------------------------------===//
// Reader
//===----------------------------------------------------------------------===//
//
// Incremental S-expression reader: consumes bytes from a peekable stream and
// allocates exactly one datum per call directly on the heap. The same reader
// serves the REPL, `load`, and the `read` primitive on input ports, which is
// why it works a byte at a time instead of tokenizing a complete source
// string up front.

fn is_delimiter(c: u8) -> bool {
    c.is_ascii_whitespace() || c == b'(' || c == b')' || c == b'"' || c == b';'
}

/// First character of a symbol.
fn is_initial(c: u8) -> bool {
    c.is_ascii_alphabetic() || matches!(c, b'*' | b'/' | b'>' | b'<' | b'=' | b'?' | b'!')
}

/// Continuation characters of a symbol.
fn is_subsequent(c: u8) -> bool {
    is_initial(c) || c.is_ascii_digit() || c == b'+' || c == b'-'
}

/// Reads one top-level datum, or `None` at end of input.
pub fn read(heap: &Heap, src: &mut ByteStream) -> Result<Option<Value>, Error> {
    skip_whitespace(src)?;
    if src.peek()?.is_none() {
        return Ok(None);
    }
    read_datum(heap, src).map(Some)
}

/// Reads one datum where end of input is an error (inside lists, after `'`).
fn read_datum(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    skip_whitespace(src)?;
    let c = src.next()?.ok_or(SyntaxError::UnexpectedEof)?;

    match c {
        b'#' => read_hash(heap, src),
        b'"' => read_string(heap, src),
        b'(' => read_list(heap, src),
        b'\'' => read_quoted(heap, src),
        b'-' => {
            if next_is_digit(src)? {
                read_fixnum(heap, src, -1)
            } else if at_delimiter(src)? {
                // A standalone `-` followed by a delimiter is a symbol.
                Ok(heap.intern_symbol("-"))
            } else {
                Err(SyntaxError::UnexpectedChar { found: '-' }.into())
            }
        }
        b'+' => {
            if at_delimiter(src)? {
                Ok(heap.intern_symbol("+"))
            } else {
                Err(SyntaxError::UnexpectedChar { found: '+' }.into())
            }
        }
        _ if c.is_ascii_digit() => {
            src.unread(c);
            read_fixnum(heap, src, 1)
        }
        _ if is_initial(c) => {
            src.unread(c);
            read_symbol(heap, src)
        }
        _ => Err(SyntaxError::UnexpectedChar { found: c as char }.into()),
    }
}

/// Skips whitespace and `;` line comments between tokens.
fn skip_whitespace(src: &mut ByteStream) -> Result<(), Error> {
    while let Some(c) = src.next()? {
        if c.is_ascii_whitespace() {
            continue;
        }
        if c == b';' {
            while let Some(c) = src.next()? {
                if c == b'\n' {
                    break;
                }
            }
            continue;
        }
        src.unread(c);
        break;
    }
    Ok(())
}

fn at_delimiter(src: &mut ByteStream) -> Result<bool, Error> {
    Ok(match src.peek()? {
        None => true,
        Some(c) => is_delimiter(c),
    })
}

fn next_is_digit(src: &mut ByteStream) -> Result<bool, Error> {
    Ok(matches!(src.peek()?, Some(c) if c.is_ascii_digit()))
}

/// `#t`, `#f`, or `#\<char>`.
fn read_hash(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    let c = src.next()?.ok_or(SyntaxError::UnexpectedEof)?;
    match c {
        b't' => Ok(heap.bool_value(true)),
        b'f' => Ok(heap.bool_value(false)),
        b'\\' => read_character(heap, src),
        _ => Err(SyntaxError::UnknownLiteral { found: c as char }.into()),
    }
}

/// `#\c` with the named forms `#\space`, `#\newline`, `#\tab`. The literal
/// must be followed by a delimiter.
fn read_character(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    let c = src.next()?.ok_or(SyntaxError::IncompleteCharacter)?;
    let named = match c {
        b's' => Some(("pace", b' ')),
        b'n' => Some(("ewline", b'\n')),
        b't' => Some(("ab", b'\t')),
        _ => None,
    };
    if let Some((rest, value)) = named {
        if src.peek()? == Some(rest.as_bytes()[0]) {
            eat_expected(src, rest)?;
            expect_delimiter(src, "character")?;
            return Ok(heap.char_value(value));
        }
    }
    expect_delimiter(src, "character")?;
    Ok(heap.char_value(c))
}

fn eat_expected(src: &mut ByteStream, rest: &str) -> Result<(), Error> {
    for expected in rest.bytes() {
        match src.next()? {
            Some(c) if c == expected => {}
            Some(c) => return Err(SyntaxError::UnexpectedChar { found: c as char }.into()),
            None => return Err(SyntaxError::UnexpectedEof.into()),
        }
    }
    Ok(())
}

fn expect_delimiter(src: &mut ByteStream, after: &'static str) -> Result<(), Error> {
    match src.peek()? {
        None => Ok(()),
        Some(c) if is_delimiter(c) => Ok(()),
        Some(c) => Err(SyntaxError::ExpectedDelimiter { after, found: c as char }.into()),
    }
}

/// Decimal fixnum; the sign has already been consumed when negative.
fn read_fixnum(heap: &Heap, src: &mut ByteStream, sign: i64) -> Result<Value, Error> {
    let mut num: i64 = 0;
    while let Some(c) = src.peek()? {
        if !c.is_ascii_digit() {
            break;
        }
        src.next()?;
        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add((c - b'0') as i64))
            .ok_or(SyntaxError::FixnumOverflow)?;
    }
    expect_delimiter(src, "number")?;
    Ok(heap.fixnum(sign * num))
}

/// `"..."` with `\n`, `\\`, and `\"` escapes. Any other escaped character
/// stands for itself.
fn read_string(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    let mut buf = String::new();
    loop {
        let c = src.next()?.ok_or(SyntaxError::UnterminatedString)?;
        match c {
            b'"' => return Ok(heap.intern_string(&buf)),
            b'\\' => {
                let escaped = src.next()?.ok_or(SyntaxError::UnterminatedString)?;
                buf.push(match escaped {
                    b'n' => '\n',
                    other => other as char,
                });
            }
            _ => buf.push(c as char),
        }
    }
}

fn read_symbol(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    let mut name = String::new();
    while let Some(c) = src.peek()? {
        if !is_subsequent(c) {
            break;
        }
        src.next()?;
        name.push(c as char);
    }
    expect_delimiter(src, "symbol")?;
    Ok(heap.intern_symbol(&name))
}

/// `'<expr>` reads as `(quote <expr>)`.
fn read_quoted(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    let scope = heap.scope();
    let datum = scope.keep(read_datum(heap, src)?);
    let tail = scope.keep(heap.cons(datum, heap.nil()));
    Ok(heap.cons(heap.intern_symbol("quote"), tail))
}

/// List body after the opening `(`: `<expr>*` with an optional
/// `. <expr>` dotted tail.
fn read_list(heap: &Heap, src: &mut ByteStream) -> Result<Value, Error> {
    skip_whitespace(src)?;
    match src.peek()? {
        None => return Err(SyntaxError::MissingCloseParen.into()),
        Some(b')') => {
            src.next()?;
            return Ok(heap.nil());
        }
        Some(_) => {}
    }

    let scope = heap.scope();
    let head = scope.keep(read_datum(heap, src)?);
    skip_whitespace(src)?;

    let c = src.next()?.ok_or(SyntaxError::MissingCloseParen)?;
    if c == b'.' && at_delimiter(src)? {
        let tail = scope.keep(read_datum(heap, src)?);
        skip_whitespace(src)?;
        match src.next()? {
            Some(b')') => Ok(heap.cons(head, tail)),
            _ => Err(SyntaxError::MissingCloseParen.into()),
        }
    } else if c == b'.' {
        Err(SyntaxError::BadDot.into())
    } else {
        src.unread(c);
        let tail = scope.keep(read_list(heap, src)?);
        Ok(heap.cons(head, tail))
    }
}
