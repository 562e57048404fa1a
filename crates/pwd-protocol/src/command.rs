//! Inbound command format: one tag byte followed by the argument bytes.

use std::ffi::{CStr, CString};
use std::fmt;

pub const GET_PWUID: u8 = 1;
pub const GET_PWNAM: u8 = 2;
pub const GET_PWALL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LookupByUid(u32),
    LookupByName(CString),
    EnumerateAll,
}

/// The packet carried no tag, or a tag outside the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCommand {
    pub tag: Option<u8>,
}

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) => write!(f, "unknown command tag {tag}"),
            None => f.write_str("unknown command tag (empty packet)"),
        }
    }
}

impl std::error::Error for UnknownCommand {}

impl Command {
    /// Decode one packet payload.
    ///
    /// The argument is read as a C string: anything from the first NUL on
    /// is ignored.
    pub fn decode(packet: &[u8]) -> Result<Self, UnknownCommand> {
        let Some((&tag, rest)) = packet.split_first() else {
            return Err(UnknownCommand { tag: None });
        };
        let arg = until_nul(rest);

        match tag {
            GET_PWUID => Ok(Command::LookupByUid(parse_uid(arg))),
            // `arg` holds no NUL, so the conversion cannot fail.
            GET_PWNAM => Ok(Command::LookupByName(CString::new(arg).unwrap_or_default())),
            GET_PWALL => Ok(Command::EnumerateAll),
            other => Err(UnknownCommand { tag: Some(other) }),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Command::LookupByUid(_) => GET_PWUID,
            Command::LookupByName(_) => GET_PWNAM,
            Command::EnumerateAll => GET_PWALL,
        }
    }

    /// Build the request packet payload for `tag` and a raw argument.
    pub fn request(tag: u8, arg: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(arg.len() + 1);
        packet.push(tag);
        packet.extend_from_slice(arg);
        packet
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::LookupByUid(uid) => write!(f, "getpwuid({uid})"),
            Command::LookupByName(name) => write!(f, "getpwnam({})", display_name(name)),
            Command::EnumerateAll => f.write_str("getpwent"),
        }
    }
}

fn display_name(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// Parse a uid the way C `atoi` does.
///
/// Leading whitespace and one sign are accepted, digits are read up to the
/// first non-digit, and input without digits yields 0. The result is
/// truncated to a C `int` and then reinterpreted as an unsigned uid, so
/// `"-1"` becomes `u32::MAX`.
pub fn parse_uid(arg: &[u8]) -> u32 {
    let mut bytes = arg
        .iter()
        .copied()
        .skip_while(|&b| b.is_ascii_whitespace() || b == 0x0b)
        .peekable();

    let negative = match bytes.peek() {
        Some(b'-') => {
            bytes.next();
            true
        }
        Some(b'+') => {
            bytes.next();
            false
        }
        _ => false,
    };

    let magnitude = bytes
        .take_while(u8::is_ascii_digit)
        .fold(0_i64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(i64::from(digit - b'0'))
        });
    let value = if negative { -magnitude } else { magnitude };

    value as i32 as u32
}
