//! Account records and error replies expressed as driver terms.

use std::borrow::Borrow;

use crate::term::{Atom, EncodedTerm, TermBuilder, TermError};

pub const PW_NAME: Atom = "pw_name";
pub const PW_PASSWD: Atom = "pw_passwd";
pub const PW_UID: Atom = "pw_uid";
pub const PW_GID: Atom = "pw_gid";
pub const ERROR: Atom = "error";

/// Cells emitted per record: four `{Atom, Value}` pairs plus the outer tuple.
pub const RECORD_CELLS: usize = 4 * 3 + 1;

/// Words emitted per record, independent of string lengths.
pub const RECORD_WORDS: usize = (2 + 3 + 2) // {pw_name, Name}
    + (2 + 3 + 2) // {pw_passwd, Passwd}
    + (2 + 2 + 2) // {pw_uid, Uid}
    + (2 + 2 + 2) // {pw_gid, Gid}
    + 2; // outer 4-tuple

/// Words appended after the records of an enumeration: nil plus the list cell.
pub const LIST_TERMINATOR_WORDS: usize = 1 + 2;

/// Flat size of an enumeration reply holding `count` records.
pub fn record_list_words(count: usize) -> usize {
    count * RECORD_WORDS + LIST_TERMINATOR_WORDS
}

/// One passwd entry, copied out of the directory.
///
/// Name and password field are raw bytes so non-UTF-8 entries survive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountRecord {
    pub name: Vec<u8>,
    pub passwd: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
}

impl AccountRecord {
    pub fn new(name: impl Into<Vec<u8>>, passwd: impl Into<Vec<u8>>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            passwd: passwd.into(),
            uid,
            gid,
        }
    }
}

/// `{{pw_name,Name},{pw_passwd,Passwd},{pw_uid,Uid},{pw_gid,Gid}}`
pub fn encode_record(record: &AccountRecord) -> Result<EncodedTerm, TermError> {
    let mut builder = TermBuilder::with_capacity(RECORD_CELLS)?;
    push_record(&mut builder, record)?;
    builder.finish()
}

/// A proper list of records. The list cell counts the nil tail, so its
/// length is the number of records plus one.
pub fn encode_record_list<I>(records: I) -> Result<EncodedTerm, TermError>
where
    I: IntoIterator,
    I::Item: Borrow<AccountRecord>,
{
    let records = records.into_iter();
    // The hint is only a guess; an absurd one fails the reservation.
    let (hint, _) = records.size_hint();
    let mut builder =
        TermBuilder::with_capacity(hint.saturating_mul(RECORD_CELLS).saturating_add(2))?;

    let mut count = 0;
    for record in records {
        push_record(&mut builder, record.borrow())?;
        count += 1;
    }

    builder.nil()?.list(count + 1)?;
    builder.finish()
}

/// `{Tag, Message}` with the message as a string.
pub fn encode_error(tag: Atom, message: &str) -> Result<EncodedTerm, TermError> {
    let mut builder = TermBuilder::with_capacity(3)?;
    builder.atom(tag)?.string(message.as_bytes())?.tuple(2)?;
    builder.finish()
}

fn push_record(builder: &mut TermBuilder, record: &AccountRecord) -> Result<(), TermError> {
    builder.atom(PW_NAME)?.string(&record.name)?.tuple(2)?;
    builder.atom(PW_PASSWD)?.string(&record.passwd)?.tuple(2)?;
    builder.atom(PW_UID)?.uint(u64::from(record.uid))?.tuple(2)?;
    builder.atom(PW_GID)?.uint(u64::from(record.gid))?.tuple(2)?;
    builder.tuple(4)?;
    Ok(())
}

/// The fixed set of `{error, Message}` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReply {
    UnknownCommand,
    UnknownUid,
    UnknownName,
    OutOfMemory,
    OutOfMemoryForResult,
}

impl ErrorReply {
    pub fn message(self) -> &'static str {
        match self {
            ErrorReply::UnknownCommand => "unknown_command",
            ErrorReply::UnknownUid => "unknown_uid",
            ErrorReply::UnknownName => "unknown_name",
            ErrorReply::OutOfMemory => "Couldn't allocate memory",
            ErrorReply::OutOfMemoryForResult => "Couldn't allocate memory for result",
        }
    }

    pub fn encode(self) -> Result<EncodedTerm, TermError> {
        encode_error(ERROR, self.message())
    }
}
