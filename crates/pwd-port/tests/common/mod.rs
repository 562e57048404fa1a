//! Test utilities and common setup.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::PathBuf;

use pwd_port::{AccountDirectory, Worker};
use pwd_protocol::encode::RECORD_CELLS;
use pwd_protocol::{AccountRecord, PacketReader, PacketSize, PacketWriter, Term, etf};
use tempfile::TempDir;

/// In-memory passwd database.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    pub records: Vec<AccountRecord>,
}

impl MemoryDirectory {
    pub fn new(records: Vec<AccountRecord>) -> Self {
        Self { records }
    }

    /// root, daemon and nobody, as a stock Linux install has them.
    pub fn standard() -> Self {
        Self::new(vec![
            AccountRecord::new("root", "x", 0, 0),
            AccountRecord::new("daemon", "x", 1, 1),
            AccountRecord::new("nobody", "*", 65534, 65534),
        ])
    }
}

impl AccountDirectory for MemoryDirectory {
    type Entries<'a> = std::iter::Cloned<std::slice::Iter<'a, AccountRecord>>;

    fn lookup_by_uid(&self, uid: u32) -> Option<AccountRecord> {
        self.records.iter().find(|r| r.uid == uid).cloned()
    }

    fn lookup_by_name(&self, name: &CStr) -> Option<AccountRecord> {
        self.records
            .iter()
            .find(|r| r.name == name.to_bytes())
            .cloned()
    }

    fn enumerate_all(&self) -> Self::Entries<'_> {
        self.records.iter().cloned()
    }
}

/// Enumeration that reports a size hint far beyond what it yields, so the
/// list encoder's up-front reservation fails.
#[derive(Debug, Default, Clone)]
pub struct OverstatedDirectory(pub MemoryDirectory);

pub struct Overstated<I>(I);

impl<I: Iterator> Iterator for Overstated<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX / RECORD_CELLS - 1, None)
    }
}

impl AccountDirectory for OverstatedDirectory {
    type Entries<'a> = Overstated<<MemoryDirectory as AccountDirectory>::Entries<'a>>;

    fn lookup_by_uid(&self, uid: u32) -> Option<AccountRecord> {
        self.0.lookup_by_uid(uid)
    }

    fn lookup_by_name(&self, name: &CStr) -> Option<AccountRecord> {
        self.0.lookup_by_name(name)
    }

    fn enumerate_all(&self) -> Self::Entries<'_> {
        Overstated(self.0.enumerate_all())
    }
}

/// A worker over an in-memory channel, plus the directory holding its log.
pub struct Harness<D: AccountDirectory = MemoryDirectory> {
    pub worker: Worker<D, Vec<u8>>,
    pub size: PacketSize,
    pub dir: TempDir,
}

impl<D: AccountDirectory> Harness<D> {
    pub fn new(directory: D) -> Self {
        Self::with_packet_size(directory, PacketSize::Four)
    }

    pub fn with_packet_size(directory: D, size: PacketSize) -> Self {
        let dir = TempDir::new().unwrap();
        let worker = Worker::start(
            PacketWriter::new(Vec::new(), size),
            directory,
            &dir.path().join("pwd.log"),
        )
        .unwrap();
        Self { worker, size, dir }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("pwd.log")
    }

    /// Send one command and return the reply it produced.
    pub fn call(&mut self, packet: &[u8]) -> Term {
        let before = self.worker.channel().get_ref().len();
        self.worker.handle_command(packet).unwrap();
        let written = &self.worker.channel().get_ref()[before..];

        let replies = decode_replies(written, self.size);
        assert_eq!(replies.len(), 1, "each command gets exactly one reply");
        replies.into_iter().next().unwrap()
    }

    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(self.log_path()).unwrap()
    }
}

/// Split a channel capture into packets and decode each one.
pub fn decode_replies(bytes: &[u8], size: PacketSize) -> Vec<Term> {
    let mut reader = PacketReader::new(Cursor::new(bytes), size);
    let mut replies = Vec::new();
    while let Some(packet) = reader.read_packet().unwrap() {
        replies.push(etf::decode(&packet).unwrap());
    }
    replies
}

pub fn error_term(message: &str) -> Term {
    Term::tuple([Term::atom("error"), Term::string(message)])
}

pub fn record_term(record: &AccountRecord) -> Term {
    Term::tuple([
        Term::tuple([Term::atom("pw_name"), Term::String(record.name.clone())]),
        Term::tuple([Term::atom("pw_passwd"), Term::String(record.passwd.clone())]),
        Term::tuple([Term::atom("pw_uid"), Term::UInt(u64::from(record.uid))]),
        Term::tuple([Term::atom("pw_gid"), Term::UInt(u64::from(record.gid))]),
    ])
}
