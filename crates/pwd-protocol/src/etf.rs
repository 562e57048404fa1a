//! Erlang external term format for the subset of terms the port emits.
//!
//! Replies are written as `term_to_binary/1` would write them so the host can
//! call `binary_to_term/1` on each packet. [`decode`] reads the same subset
//! back and exists for clients and tests.

use bytes::BufMut;
use thiserror::Error;

use crate::term::{Cell, EncodedTerm, Term};

pub const VERSION: u8 = 131;

const SMALL_INTEGER_EXT: u8 = 97;
const INTEGER_EXT: u8 = 98;
const ATOM_EXT: u8 = 100;
const SMALL_TUPLE_EXT: u8 = 104;
const LARGE_TUPLE_EXT: u8 = 105;
const NIL_EXT: u8 = 106;
const STRING_EXT: u8 = 107;
const LIST_EXT: u8 = 108;
const SMALL_BIG_EXT: u8 = 110;
const SMALL_ATOM_EXT: u8 = 115;
const ATOM_UTF8_EXT: u8 = 118;
const SMALL_ATOM_UTF8_EXT: u8 = 119;

/// Nesting limit for [`decode`].
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Error)]
pub enum EtfError {
    #[error("couldn't allocate {0} bytes for the encoded term")]
    Alloc(usize),

    #[error("atom `{0}` is longer than 255 bytes")]
    AtomTooLong(String),

    #[error("unexpected end of input at byte {0}")]
    Truncated(usize),

    #[error("unsupported version byte {0}")]
    BadVersion(u8),

    #[error("unsupported term tag {tag} at byte {offset}")]
    UnsupportedTag { tag: u8, offset: usize },

    #[error("improper list at byte {0}")]
    ImproperList(usize),

    #[error("integer at byte {0} is not an unsigned 64-bit value")]
    IntegerRange(usize),

    #[error("invalid atom text at byte {0}")]
    InvalidAtom(usize),

    #[error("term nested deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("{0} trailing bytes after term")]
    Trailing(usize),
}

/// Serialize a cell stream straight to bytes, without building a [`Term`].
///
/// Every buffer involved is reserved fallibly, so running out of memory is
/// reported as [`EtfError::Alloc`].
pub fn encode(term: &EncodedTerm) -> Result<Vec<u8>, EtfError> {
    let cells = term.cells();
    let Some(root) = cells.len().checked_sub(1) else {
        return Err(EtfError::Truncated(0));
    };

    let layout = Layout::of(cells)?;
    let len = 1 + layout.size[root];
    let mut buf: Vec<u8> = try_buffer(len)?;
    buf.put_u8(VERSION);
    layout.write(&mut buf, root, 0)?;
    Ok(buf)
}

/// Serialize a term tree, reserving the exact output size up front.
pub fn to_vec(term: &Term) -> Result<Vec<u8>, EtfError> {
    let len = 1 + encoded_len(term);
    let mut buf: Vec<u8> = try_buffer(len)?;
    buf.put_u8(VERSION);
    write_term(&mut buf, term)?;
    Ok(buf)
}

fn try_buffer<T>(len: usize) -> Result<Vec<T>, EtfError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| EtfError::Alloc(len.saturating_mul(std::mem::size_of::<T>())))?;
    Ok(buf)
}

/// Subtree bounds and encoded sizes for a postfix cell stream, indexed by
/// the cell that closes each subtree.
struct Layout<'a> {
    cells: &'a [Cell],
    start: Vec<usize>,
    size: Vec<usize>,
    /// Element count for list subtrees, tails flattened.
    elements: Vec<usize>,
}

impl<'a> Layout<'a> {
    fn of(cells: &'a [Cell]) -> Result<Self, EtfError> {
        let mut layout = Layout {
            cells,
            start: try_buffer(cells.len())?,
            size: try_buffer(cells.len())?,
            elements: try_buffer(cells.len())?,
        };
        let mut stack: Vec<usize> = try_buffer(cells.len())?;

        for (idx, cell) in cells.iter().enumerate() {
            let (start, size, elements) = match cell {
                Cell::Atom(name) => (idx, atom_len(name), 0),
                Cell::String(bytes) => (idx, string_len(bytes), 0),
                Cell::UInt(value) => (idx, uint_len(*value), 0),
                Cell::Nil => (idx, 1, 0),
                Cell::Tuple(arity) => {
                    let at = stack.len().saturating_sub(*arity);
                    let start = stack.get(at).map_or(idx, |&first| layout.start[first]);
                    let body: usize = stack[at..].iter().map(|&end| layout.size[end]).sum();
                    stack.truncate(at);
                    (start, tuple_header_len(*arity) + body, 0)
                }
                Cell::List(length) => {
                    let at = stack.len().saturating_sub(*length);
                    let Some((&tail, front)) = stack[at..].split_last() else {
                        return Err(EtfError::ImproperList(idx));
                    };
                    if !matches!(cells[tail], Cell::Nil | Cell::List(_)) {
                        return Err(EtfError::ImproperList(idx));
                    }

                    let tail_elements = layout.elements[tail];
                    let elements = front.len() + tail_elements;
                    let size = if elements == 0 {
                        1
                    } else {
                        let front_bytes: usize = front.iter().map(|&end| layout.size[end]).sum();
                        5 + front_bytes + layout.size[tail] - list_overhead(tail_elements) + 1
                    };
                    let start = layout.start[stack[at]];
                    stack.truncate(at);
                    (start, size, elements)
                }
            };
            layout.start.push(start);
            layout.size.push(size);
            layout.elements.push(elements);
            stack.push(idx);
        }
        Ok(layout)
    }

    /// Ends of the `count` subtrees directly before `end`, in stream order.
    fn children(&self, end: usize, count: usize) -> Result<Vec<usize>, EtfError> {
        let mut ends: Vec<usize> = try_buffer(count)?;
        let mut cursor = end;
        for _ in 0..count {
            let Some(child) = cursor.checked_sub(1) else {
                break;
            };
            ends.push(child);
            cursor = self.start[child];
        }
        ends.reverse();
        Ok(ends)
    }

    fn write(&self, buf: &mut Vec<u8>, end: usize, depth: usize) -> Result<(), EtfError> {
        if depth > MAX_DEPTH {
            return Err(EtfError::TooDeep);
        }
        match &self.cells[end] {
            Cell::Atom(name) => put_atom(buf, name)?,
            Cell::String(bytes) => put_string(buf, bytes),
            Cell::UInt(value) => put_uint(buf, *value),
            Cell::Nil => buf.put_u8(NIL_EXT),
            Cell::Tuple(arity) => {
                put_tuple_header(buf, *arity);
                for child in self.children(end, *arity)? {
                    self.write(buf, child, depth + 1)?;
                }
            }
            Cell::List(_) if self.elements[end] == 0 => buf.put_u8(NIL_EXT),
            Cell::List(_) => {
                buf.put_u8(LIST_EXT);
                buf.put_u32(self.elements[end] as u32);
                self.write_elements(buf, end, depth)?;
                buf.put_u8(NIL_EXT);
            }
        }
        Ok(())
    }

    /// Write the elements of a list subtree, following its tail.
    fn write_elements(&self, buf: &mut Vec<u8>, end: usize, depth: usize) -> Result<(), EtfError> {
        if depth > MAX_DEPTH {
            return Err(EtfError::TooDeep);
        }
        let Cell::List(length) = self.cells[end] else {
            return Ok(());
        };
        let children = self.children(end, length)?;
        let Some((&tail, front)) = children.split_last() else {
            return Ok(());
        };
        for &child in front {
            self.write(buf, child, depth + 1)?;
        }
        self.write_elements(buf, tail, depth + 1)
    }
}

fn atom_len(name: &str) -> usize {
    2 + name.len()
}

fn string_len(bytes: &[u8]) -> usize {
    if bytes.len() <= usize::from(u16::MAX) {
        3 + bytes.len()
    } else {
        // LIST_EXT of SMALL_INTEGER_EXT elements with a NIL_EXT tail
        5 + 2 * bytes.len() + 1
    }
}

fn uint_len(value: u64) -> usize {
    if value <= u64::from(u8::MAX) {
        2
    } else if value <= i32::MAX as u64 {
        5
    } else {
        3 + big_digits(value).1
    }
}

fn tuple_header_len(arity: usize) -> usize {
    if arity <= usize::from(u8::MAX) { 2 } else { 5 }
}

/// Bytes a list spends on framing rather than elements.
fn list_overhead(elements: usize) -> usize {
    if elements == 0 { 1 } else { 6 }
}

fn encoded_len(term: &Term) -> usize {
    match term {
        Term::Atom(name) => atom_len(name),
        Term::String(bytes) => string_len(bytes),
        Term::UInt(value) => uint_len(*value),
        Term::Tuple(items) => {
            tuple_header_len(items.len()) + items.iter().map(encoded_len).sum::<usize>()
        }
        Term::List(items) if items.is_empty() => 1,
        Term::List(items) => 5 + items.iter().map(encoded_len).sum::<usize>() + 1,
    }
}

fn write_term(buf: &mut Vec<u8>, term: &Term) -> Result<(), EtfError> {
    match term {
        Term::Atom(name) => put_atom(buf, name)?,
        Term::String(bytes) => put_string(buf, bytes),
        Term::UInt(value) => put_uint(buf, *value),
        Term::Tuple(items) => {
            put_tuple_header(buf, items.len());
            for item in items {
                write_term(buf, item)?;
            }
        }
        Term::List(items) if items.is_empty() => buf.put_u8(NIL_EXT),
        Term::List(items) => {
            buf.put_u8(LIST_EXT);
            buf.put_u32(items.len() as u32);
            for item in items {
                write_term(buf, item)?;
            }
            buf.put_u8(NIL_EXT);
        }
    }
    Ok(())
}

fn put_atom(buf: &mut Vec<u8>, name: &str) -> Result<(), EtfError> {
    let len = u8::try_from(name.len()).map_err(|_| EtfError::AtomTooLong(name.to_string()))?;
    buf.put_u8(SMALL_ATOM_UTF8_EXT);
    buf.put_u8(len);
    buf.put_slice(name.as_bytes());
    Ok(())
}

fn put_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    match u16::try_from(bytes.len()) {
        Ok(len) => {
            buf.put_u8(STRING_EXT);
            buf.put_u16(len);
            buf.put_slice(bytes);
        }
        Err(_) => {
            buf.put_u8(LIST_EXT);
            buf.put_u32(bytes.len() as u32);
            for &byte in bytes {
                buf.put_u8(SMALL_INTEGER_EXT);
                buf.put_u8(byte);
            }
            buf.put_u8(NIL_EXT);
        }
    }
}

fn put_uint(buf: &mut Vec<u8>, value: u64) {
    if let Ok(small) = u8::try_from(value) {
        buf.put_u8(SMALL_INTEGER_EXT);
        buf.put_u8(small);
    } else if let Ok(int) = i32::try_from(value) {
        buf.put_u8(INTEGER_EXT);
        buf.put_i32(int);
    } else {
        let (digits, used) = big_digits(value);
        buf.put_u8(SMALL_BIG_EXT);
        buf.put_u8(used as u8);
        buf.put_u8(0);
        buf.put_slice(&digits[..used]);
    }
}

fn put_tuple_header(buf: &mut Vec<u8>, arity: usize) {
    match u8::try_from(arity) {
        Ok(arity) => {
            buf.put_u8(SMALL_TUPLE_EXT);
            buf.put_u8(arity);
        }
        Err(_) => {
            buf.put_u8(LARGE_TUPLE_EXT);
            buf.put_u32(arity as u32);
        }
    }
}

/// Little-endian magnitude digits and how many are used, without trailing
/// zero bytes.
fn big_digits(value: u64) -> ([u8; 8], usize) {
    let bytes = value.to_le_bytes();
    let used = bytes.iter().rposition(|&b| b != 0).map_or(0, |idx| idx + 1);
    (bytes, used)
}

/// Parse one version-prefixed term, rejecting trailing bytes.
pub fn decode(input: &[u8]) -> Result<Term, EtfError> {
    let mut reader = Reader { input, pos: 0 };
    let version = reader.u8()?;
    if version != VERSION {
        return Err(EtfError::BadVersion(version));
    }
    let term = reader.term(0)?;
    let rest = input.len() - reader.pos;
    if rest > 0 {
        return Err(EtfError::Trailing(rest));
    }
    Ok(term)
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], EtfError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or(EtfError::Truncated(self.input.len()))?;
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, EtfError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, EtfError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, EtfError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn term(&mut self, depth: usize) -> Result<Term, EtfError> {
        if depth > MAX_DEPTH {
            return Err(EtfError::TooDeep);
        }

        let offset = self.pos;
        let tag = self.u8()?;
        match tag {
            SMALL_INTEGER_EXT => Ok(Term::UInt(u64::from(self.u8()?))),
            INTEGER_EXT => {
                let value = self.u32()? as i32;
                u64::try_from(value)
                    .map(Term::UInt)
                    .map_err(|_| EtfError::IntegerRange(offset))
            }
            SMALL_BIG_EXT => {
                let len = usize::from(self.u8()?);
                let sign = self.u8()?;
                let digits = self.take(len)?;
                if sign != 0 || digits.iter().skip(8).any(|&b| b != 0) {
                    return Err(EtfError::IntegerRange(offset));
                }
                let value = digits
                    .iter()
                    .take(8)
                    .enumerate()
                    .fold(0_u64, |acc, (idx, &b)| acc | (u64::from(b) << (8 * idx)));
                Ok(Term::UInt(value))
            }
            ATOM_EXT | ATOM_UTF8_EXT => {
                let len = usize::from(self.u16()?);
                self.atom(tag, len, offset)
            }
            SMALL_ATOM_EXT | SMALL_ATOM_UTF8_EXT => {
                let len = usize::from(self.u8()?);
                self.atom(tag, len, offset)
            }
            SMALL_TUPLE_EXT => {
                let arity = usize::from(self.u8()?);
                self.items(arity, depth).map(Term::Tuple)
            }
            LARGE_TUPLE_EXT => {
                let arity = self.u32()? as usize;
                self.items(arity, depth).map(Term::Tuple)
            }
            NIL_EXT => Ok(Term::List(Vec::new())),
            STRING_EXT => {
                let len = usize::from(self.u16()?);
                Ok(Term::String(self.take(len)?.to_vec()))
            }
            LIST_EXT => {
                let len = self.u32()? as usize;
                let items = self.items(len, depth)?;
                let tail_offset = self.pos;
                match self.term(depth + 1)? {
                    Term::List(tail) if tail.is_empty() => Ok(Term::List(items)),
                    _ => Err(EtfError::ImproperList(tail_offset)),
                }
            }
            other => Err(EtfError::UnsupportedTag { tag: other, offset }),
        }
    }

    fn items(&mut self, count: usize, depth: usize) -> Result<Vec<Term>, EtfError> {
        // Every element takes at least one byte.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(self.term(depth + 1)?);
        }
        Ok(items)
    }

    fn atom(&mut self, tag: u8, len: usize, offset: usize) -> Result<Term, EtfError> {
        let bytes = self.take(len)?;
        let name = if matches!(tag, ATOM_EXT | SMALL_ATOM_EXT) {
            bytes.iter().map(|&b| char::from(b)).collect()
        } else {
            std::str::from_utf8(bytes)
                .map_err(|_| EtfError::InvalidAtom(offset))?
                .to_string()
        };
        Ok(Term::Atom(name))
    }
}
