use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::Path;

/// Writable sink owned by an output port.
pub type OutputStream = Box<dyn Write>;

/// A byte source with one byte of lookahead.
///
/// The reader needs `peek` to implement the delimiter rules (a number or
/// symbol must not consume the delimiter that terminates it), and ports need
/// it for `peek-char`. Wrapping every source in this type lets the REPL,
/// `load`, and input ports share one reader.
pub struct ByteStream {
    inner: Box<dyn Read>,
    peeked: Option<u8>,
}

impl ByteStream {
    pub fn new(inner: Box<dyn Read>) -> Self {
        ByteStream { inner, peeked: None }
    }

    /// Stream over an in-memory string (REPL input).
    pub fn from_str(text: &str) -> Self {
        ByteStream::new(Box::new(Cursor::new(text.as_bytes().to_vec())))
    }

    /// Buffered stream over a file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(ByteStream::new(Box::new(BufReader::new(file))))
    }

    /// Stream over standard input.
    pub fn stdin() -> Self {
        ByteStream::new(Box::new(io::stdin()))
    }

    /// Consumes and returns the next byte, or `None` at end of input.
    pub fn next(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.next()?;
        }
        Ok(self.peeked)
    }

    /// Pushes one byte back. At most one byte of pushback is supported.
    pub fn unread(&mut self, b: u8) {
        debug_assert!(self.peeked.is_none());
        self.peeked = Some(b);
    }
}

/// Opens a file for writing, for `open-output-port`.
pub fn open_output(path: &Path) -> io::Result<OutputStream> {
    let file = File::create(path)?;
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_and_peek() {
        let mut s = ByteStream::from_str("ab");
        assert_eq!(s.peek().unwrap(), Some(b'a'));
        assert_eq!(s.next().unwrap(), Some(b'a'));
        assert_eq!(s.next().unwrap(), Some(b'b'));
        assert_eq!(s.peek().unwrap(), None);
        assert_eq!(s.next().unwrap(), None);
    }

    #[test]
    fn unread_round_trips() {
        let mut s = ByteStream::from_str("x");
        let b = s.next().unwrap().unwrap();
        s.unread(b);
        assert_eq!(s.next().unwrap(), Some(b'x'));
    }
}
