//! Wire-level types shared by the pwd-port worker and its clients.
//!
//! - [`command`]: the one-byte-tagged request format
//! - [`term`]: driver-term cells, the builder that assembles them and the
//!   decoded [`Term`] tree
//! - [`encode`]: account records and error replies as terms
//! - [`etf`]: Erlang external term format serialization
//! - [`packet`]: length-prefixed packet framing over a byte stream

pub mod command;
pub mod encode;
pub mod etf;
pub mod packet;
pub mod term;

pub use command::{Command, UnknownCommand};
pub use encode::{AccountRecord, ErrorReply};
pub use packet::{PacketReader, PacketSize, PacketWriter, ProtocolError};
pub use term::{Cell, EncodedTerm, Term, TermBuilder, TermError};
