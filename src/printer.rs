use std::io::{self, Write};

use crate::heap::{Heap, Tag, Value};

//===----------------------------------------------------------------------===//
// Printer
//===----------------------------------------------------------------------===//
//
// Writes the external representation of a value. For the textual subset
// (everything except procedures, ports, and the EOF object) the output reads
// back as an identical value.

pub fn write_value(heap: &Heap, v: Value, out: &mut dyn Write) -> io::Result<()> {
    match heap.tag(v) {
        Tag::Nil => write!(out, "()"),
        Tag::Bool => {
            let b = heap.as_bool(v) == Some(true);
            write!(out, "{}", if b { "#t" } else { "#f" })
        }
        Tag::Fixnum => write!(out, "{}", heap.as_fixnum(v).unwrap_or(0)),
        Tag::Char => write_char(heap.as_char(v).unwrap_or(b'?'), out),
        Tag::Str => {
            let text = heap.text(v).unwrap();
            write_string(&text, out)
        }
        Tag::Symbol => write!(out, "{}", heap.text(v).unwrap()),
        Tag::Cell => {
            write!(out, "(")?;
            write_cell(heap, v, out)?;
            write!(out, ")")
        }
        Tag::PrimProc => write!(out, "#<primitive-procedure>"),
        Tag::CompProc => write!(out, "#<compound-procedure>"),
        Tag::InputPort => write!(out, "#<input-port>"),
        Tag::OutputPort => write!(out, "#<output-port>"),
        Tag::Eof => write!(out, "#<eof>"),
    }
}

/// External form as a string.
pub fn to_string(heap: &Heap, v: Value) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_value(heap, v, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn write_char(c: u8, out: &mut dyn Write) -> io::Result<()> {
    match c {
        b' ' => write!(out, "#\\space"),
        b'\n' => write!(out, "#\\newline"),
        b'\t' => write!(out, "#\\tab"),
        _ => write!(out, "#\\{}", c as char),
    }
}

fn write_string(s: &str, out: &mut dyn Write) -> io::Result<()> {
    write!(out, "\"")?;
    for c in s.chars() {
        match c {
            '\n' => write!(out, "\\n")?,
            '\\' => write!(out, "\\\\")?,
            '"' => write!(out, "\\\"")?,
            _ => write!(out, "{}", c)?,
        }
    }
    write!(out, "\"")
}

/// Elements space-separated; a final tail that is neither a cell nor nil is
/// written in dotted form.
fn write_cell(heap: &Heap, v: Value, out: &mut dyn Write) -> io::Result<()> {
    let mut v = v;
    loop {
        let head = heap.car(v).unwrap_or_else(|| heap.nil());
        write_value(heap, head, out)?;
        let tail = heap.cdr(v).unwrap_or_else(|| heap.nil());
        match heap.tag(tail) {
            Tag::Cell => {
                write!(out, " ")?;
                v = tail;
            }
            Tag::Nil => return Ok(()),
            _ => {
                write!(out, " . ")?;
                return write_value(heap, tail, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atoms() {
        let heap = Heap::new();
        assert_eq!(to_string(&heap, heap.nil()), "()");
        assert_eq!(to_string(&heap, heap.bool_value(true)), "#t");
        assert_eq!(to_string(&heap, heap.bool_value(false)), "#f");
        assert_eq!(to_string(&heap, heap.fixnum(-42)), "-42");
        assert_eq!(to_string(&heap, heap.eof()), "#<eof>");
        assert_eq!(to_string(&heap, heap.intern_symbol("cons")), "cons");
    }

    #[test]
    fn characters() {
        let heap = Heap::new();
        assert_eq!(to_string(&heap, heap.char_value(b'a')), "#\\a");
        assert_eq!(to_string(&heap, heap.char_value(b' ')), "#\\space");
        assert_eq!(to_string(&heap, heap.char_value(b'\n')), "#\\newline");
        assert_eq!(to_string(&heap, heap.char_value(b'\t')), "#\\tab");
    }

    #[test]
    fn strings_are_escaped() {
        let heap = Heap::new();
        let s = heap.intern_string("a\"b\\c\nd");
        assert_eq!(to_string(&heap, s), "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn lists_and_dotted_tails() {
        let heap = Heap::new();
        let scope = heap.scope();

        let one = heap.fixnum(1);
        let list = scope.keep(heap.list(&[one, heap.fixnum(2), heap.fixnum(3)]));
        assert_eq!(to_string(&heap, list), "(1 2 3)");

        let pair = scope.keep(heap.cons(heap.fixnum(1), heap.fixnum(2)));
        assert_eq!(to_string(&heap, pair), "(1 . 2)");

        let nested = scope.keep(heap.cons(list, pair));
        assert_eq!(to_string(&heap, nested), "((1 2 3) 1 . 2)");
    }
}
