//! Driver-term cells and the builder that assembles them.
//!
//! A term is emitted bottom-up as a flat postfix stream of [`Cell`]s: leaf
//! cells push one term, `Tuple(n)` and `List(n)` pop `n` terms and push one.
//! Each cell also has a fixed width in words, which is what a host that
//! pre-sizes a flat buffer has to account for.

use std::collections::TryReserveError;
use std::fmt;

use thiserror::Error;

/// Interned atom name.
pub type Atom = &'static str;

/// One primitive unit of the cell stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Atom(Atom),
    String(Vec<u8>),
    UInt(u64),
    Tuple(usize),
    Nil,
    /// List of `n` stacked terms, the last one being the tail.
    List(usize),
}

impl Cell {
    /// Width of the cell in the flat driver-term layout.
    pub fn words(&self) -> usize {
        match self {
            Cell::Atom(_) | Cell::UInt(_) | Cell::Tuple(_) | Cell::List(_) => 2,
            Cell::String(_) => 3,
            Cell::Nil => 1,
        }
    }
}

/// Errors raised while assembling a term.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermError {
    /// A buffer reservation failed.
    #[error("couldn't allocate memory for term: {0}")]
    Alloc(#[from] TryReserveError),

    /// A tuple or list asked for more terms than are on the stack.
    #[error("{kind} of {wanted} needs {wanted} stacked terms, only {available} available")]
    Underflow {
        kind: &'static str,
        wanted: usize,
        available: usize,
    },

    /// A list cell must at least hold its tail.
    #[error("list cell without a tail")]
    EmptyList,

    /// A list tail must itself be a list.
    #[error("list tail is not a list")]
    ImproperList,

    /// `finish` requires exactly one complete term on the stack.
    #[error("term stack holds {0} terms, expected exactly one")]
    Unbalanced(usize),
}

/// Incremental, fallibly-allocating builder for an [`EncodedTerm`].
///
/// Every push method returns `&mut Self` so cells can be chained with `?`.
#[derive(Debug, Default)]
pub struct TermBuilder {
    cells: Vec<Cell>,
    depth: usize,
    words: usize,
}

impl TermBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with room for `cells` cells.
    pub fn with_capacity(cells: usize) -> Result<Self, TermError> {
        let mut builder = Self::new();
        builder.reserve(cells)?;
        Ok(builder)
    }

    pub fn reserve(&mut self, additional: usize) -> Result<(), TermError> {
        self.cells.try_reserve_exact(additional)?;
        Ok(())
    }

    /// Number of completed terms currently on the stack.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Words emitted so far.
    pub fn word_count(&self) -> usize {
        self.words
    }

    pub fn atom(&mut self, atom: Atom) -> Result<&mut Self, TermError> {
        self.push(Cell::Atom(atom), 0)
    }

    /// Push an owned copy of `bytes`.
    pub fn string(&mut self, bytes: &[u8]) -> Result<&mut Self, TermError> {
        let mut owned = Vec::new();
        owned.try_reserve_exact(bytes.len())?;
        owned.extend_from_slice(bytes);
        self.push(Cell::String(owned), 0)
    }

    pub fn uint(&mut self, value: u64) -> Result<&mut Self, TermError> {
        self.push(Cell::UInt(value), 0)
    }

    pub fn tuple(&mut self, arity: usize) -> Result<&mut Self, TermError> {
        self.check_stack("tuple", arity)?;
        self.push(Cell::Tuple(arity), arity)
    }

    pub fn nil(&mut self) -> Result<&mut Self, TermError> {
        self.push(Cell::Nil, 0)
    }

    /// Close a list over the last `length` terms; the last of them is the tail.
    pub fn list(&mut self, length: usize) -> Result<&mut Self, TermError> {
        if length == 0 {
            return Err(TermError::EmptyList);
        }
        self.check_stack("list", length)?;
        if !matches!(self.cells.last(), Some(Cell::Nil | Cell::List(_))) {
            return Err(TermError::ImproperList);
        }
        self.push(Cell::List(length), length)
    }

    pub fn finish(self) -> Result<EncodedTerm, TermError> {
        if self.depth != 1 {
            return Err(TermError::Unbalanced(self.depth));
        }
        Ok(EncodedTerm {
            cells: self.cells,
            words: self.words,
        })
    }

    fn check_stack(&self, kind: &'static str, wanted: usize) -> Result<(), TermError> {
        if wanted > self.depth {
            return Err(TermError::Underflow {
                kind,
                wanted,
                available: self.depth,
            });
        }
        Ok(())
    }

    fn push(&mut self, cell: Cell, consumes: usize) -> Result<&mut Self, TermError> {
        self.cells.try_reserve(1)?;
        self.words += cell.words();
        self.cells.push(cell);
        self.depth = self.depth - consumes + 1;
        Ok(self)
    }
}

/// A complete, validated cell stream holding exactly one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTerm {
    cells: Vec<Cell>,
    words: usize,
}

impl EncodedTerm {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Size of the term in the flat driver-term layout.
    pub fn word_count(&self) -> usize {
        self.words
    }

    /// Rebuild the value tree by running the postfix stream.
    ///
    /// Allocates infallibly; replies go through [`crate::etf::encode`],
    /// which reads the cells directly.
    pub fn to_term(&self) -> Term {
        let mut stack: Vec<Term> = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            let term = match cell {
                Cell::Atom(atom) => Term::Atom((*atom).to_string()),
                Cell::String(bytes) => Term::String(bytes.clone()),
                Cell::UInt(value) => Term::UInt(*value),
                Cell::Nil => Term::List(Vec::new()),
                Cell::Tuple(arity) => {
                    let at = stack.len().saturating_sub(*arity);
                    Term::Tuple(stack.split_off(at))
                }
                Cell::List(length) => {
                    let at = stack.len().saturating_sub(*length);
                    let mut items = stack.split_off(at);
                    if let Some(Term::List(tail)) = items.pop() {
                        items.extend(tail);
                    }
                    Term::List(items)
                }
            };
            stack.push(term);
        }
        // The builder guarantees a single term remains.
        stack.pop().unwrap_or(Term::List(Vec::new()))
    }
}

/// Decoded value tree. The empty list doubles as nil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Atom(String),
    String(Vec<u8>),
    UInt(u64),
    Tuple(Vec<Term>),
    List(Vec<Term>),
}

impl Term {
    pub fn atom(name: &str) -> Self {
        Term::Atom(name.to_string())
    }

    pub fn string(text: impl AsRef<[u8]>) -> Self {
        Term::String(text.as_ref().to_vec())
    }

    pub fn tuple(items: impl IntoIterator<Item = Term>) -> Self {
        Term::Tuple(items.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = Term>) -> Self {
        Term::List(items.into_iter().collect())
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Erlang source syntax, e.g. `{error,"unknown_uid"}`.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(name) => fmt_atom(f, name),
            Term::String(bytes) => fmt_string(f, bytes),
            Term::UInt(value) => write!(f, "{value}"),
            Term::Tuple(items) => {
                f.write_str("{")?;
                fmt_items(f, items)?;
                f.write_str("}")
            }
            Term::List(items) => {
                f.write_str("[")?;
                fmt_items(f, items)?;
                f.write_str("]")
            }
        }
    }
}

fn fmt_items(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn fmt_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let bare = name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '@');
    if bare {
        f.write_str(name)
    } else {
        write!(f, "'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

fn fmt_string(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let printable = bytes
        .iter()
        .all(|b| matches!(b, 0x20..=0x7e | b'\n' | b'\t'));
    if !printable {
        // Erlang shows non-printable strings as integer lists.
        f.write_str("[")?;
        for (idx, byte) in bytes.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{byte}")?;
        }
        return f.write_str("]");
    }

    f.write_str("\"")?;
    for &byte in bytes {
        match byte {
            b'"' => f.write_str("\\\"")?,
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\t' => f.write_str("\\t")?,
            other => write!(f, "{}", other as char)?,
        }
    }
    f.write_str("\"")
}
