//! # Tetherpack
//!
//! A small, bounded, schema-agnostic byte codec. It is the raw encoding that
//! every tether frame and credential file is written in.
//!
//! ## Philosophy
//!
//! - **Explicit State**: The `Writer` keeps a stack of open scopes and back-patches
//!   their lengths when they close. Nothing is buffered behind the caller's back.
//! - **TLV Architecture**: `[Tag][Length?][Value]` so readers can skip what they
//!   do not understand.
//! - **Zero-Copy Reads**: A `Reader` is a bounds-checked view over a byte slice.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Scopes**: `[Tag: 1b][Len: 4b][Body: Len]`, a `Tagged` body starts with its name.
//!
//! All integers are Little-Endian.

#[cfg(test)]
mod tests;

/// Tetherpack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A valid tag was found where another was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or scope length exceeds `u32::MAX`.
    TooLarge(usize),
    /// Closing a scope that is not the innermost open one.
    ScopeMismatch { expected: ScopeKind, found: ScopeKind },
    /// Closing a scope when none is open.
    ScopeUnderflow,
    /// Finishing the buffer while scopes are still open.
    ScopeStillOpen(usize),
    /// Bytes were left over after a value that should have been the last one.
    TrailingBytes(usize),
    /// A fixed-size blob had the wrong length.
    LengthMismatch { expected: usize, found: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "expected {:?}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::UnexpectedEnd => write!(f, "unexpected end of buffer"),
            Error::TooLarge(n) => write!(f, "length {} does not fit in u32", n),
            Error::ScopeMismatch { expected, found } => {
                write!(f, "scope mismatch: closing {:?} but {:?} is open", expected, found)
            }
            Error::ScopeUnderflow => write!(f, "no scope is open"),
            Error::ScopeStillOpen(n) => write!(f, "{} scope(s) still open", n),
            Error::TrailingBytes(n) => write!(f, "{} trailing byte(s)", n),
            Error::LengthMismatch { expected, found } => {
                write!(f, "expected {} bytes, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for tetherpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    False = 0x02,
    True = 0x03,
    U64 = 0x04,
    I64 = 0x05,
    F64 = 0x06,

    // Blobs (Tag + u32 Len + Bytes)
    Str = 0x10,
    Bytes = 0x11,

    // Scopes (Tag + u32 Len + Body)
    List = 0x20,
    Tagged = 0x21,
}

impl Tag {
    /// Returns the Tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Tag::Unit,
            0x02 => Tag::False,
            0x03 => Tag::True,
            0x04 => Tag::U64,
            0x05 => Tag::I64,
            0x06 => Tag::F64,
            0x10 => Tag::Str,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Tagged,
            _ => return None,
        })
    }

    fn is_length_prefixed(self) -> bool {
        matches!(self, Tag::Str | Tag::Bytes | Tag::List | Tag::Tagged)
    }
}

/// The kind of an open `Writer` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    List,
    Tagged,
}

struct Open {
    len_pos: usize,
    kind: ScopeKind,
}

/// An append-only encoder with explicit scopes.
///
/// Every `*_begin` must be matched by the corresponding `*_end`; lengths are
/// patched in when the scope closes.
pub struct Writer {
    buf: Vec<u8>,
    open: Vec<Open>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256), open: Vec::new() }
    }

    /// Consumes the writer and returns the encoded bytes.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if any scope was left open.
    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::ScopeStillOpen(self.open.len()));
        }
        Ok(self.buf)
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    fn len_prefix(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::TooLarge(len))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    pub fn unit(&mut self) { self.tag(Tag::Unit); }

    pub fn bool(&mut self, v: bool) { self.tag(if v { Tag::True } else { Tag::False }); }

    pub fn u64(&mut self, v: u64) {
        self.tag(Tag::U64);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.tag(Tag::I64);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.tag(Tag::F64);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.bytes_with(Tag::Str, v.as_bytes())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.bytes_with(Tag::Bytes, v)
    }

    fn bytes_with(&mut self, tag: Tag, v: &[u8]) -> Result<()> {
        self.tag(tag);
        self.len_prefix(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    fn begin(&mut self, tag: Tag, kind: ScopeKind) {
        self.tag(tag);
        let len_pos = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        self.open.push(Open { len_pos, kind });
    }

    fn end(&mut self, kind: ScopeKind) -> Result<()> {
        let open = self.open.pop().ok_or(Error::ScopeUnderflow)?;
        if open.kind != kind {
            let found = open.kind;
            self.open.push(open);
            return Err(Error::ScopeMismatch { expected: kind, found });
        }
        let body_start = open.len_pos + 4;
        let body_len = self.buf.len() - body_start;
        let len = u32::try_from(body_len).map_err(|_| Error::TooLarge(body_len))?;
        self.buf[open.len_pos..body_start].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Begins a list; any number of items may follow.
    pub fn list_begin(&mut self) { self.begin(Tag::List, ScopeKind::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end(ScopeKind::List) }

    /// Begins a named scope. The name is written immediately; the payload
    /// items follow until `tagged_end`.
    pub fn tagged_begin(&mut self, name: &str) -> Result<()> {
        self.begin(Tag::Tagged, ScopeKind::Tagged);
        self.str(name)
    }
    pub fn tagged_end(&mut self) -> Result<()> { self.end(ScopeKind::Tagged) }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the cursor. Scope reads return a new `Reader` restricted
/// to the body of that scope.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fails if any bytes are left unread.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = u32::from_le_bytes(self.take_array::<4>()?) as usize;
        self.take(len)
    }

    /// Skips the next item, including everything nested inside it.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag {
            Tag::Unit | Tag::False | Tag::True => {}
            Tag::U64 | Tag::I64 | Tag::F64 => { self.take(8)?; }
            t if t.is_length_prefixed() => { self.len_prefixed()?; }
            _ => {}
        }
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.expect(Tag::Unit) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.take(1)?; Ok(true) }
            Tag::False => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::True, found }),
        }
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.expect(Tag::U64)?;
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.expect(Tag::I64)?;
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.expect(Tag::F64)?;
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::Str)?;
        std::str::from_utf8(self.len_prefixed()?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        self.len_prefixed()
    }

    /// Reads a fixed-size byte blob, failing if the length differs.
    pub fn byte_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.bytes()?;
        let mut out = [0u8; N];
        if raw.len() != N {
            return Err(Error::LengthMismatch { expected: N, found: raw.len() });
        }
        out.copy_from_slice(raw);
        Ok(out)
    }

    /// Enters a list and returns a reader over its items.
    pub fn list(&mut self) -> Result<Reader<'a>> {
        self.expect(Tag::List)?;
        Ok(Reader::new(self.len_prefixed()?))
    }

    /// Enters a named scope and returns `(name, payload reader)`.
    pub fn tagged(&mut self) -> Result<(&'a str, Reader<'a>)> {
        self.expect(Tag::Tagged)?;
        let mut body = Reader::new(self.len_prefixed()?);
        let name = body.str()?;
        Ok((name, body))
    }
}
