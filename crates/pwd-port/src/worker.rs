//! The command worker.
//!
//! A worker owns one channel, one diagnostic log and one directory. Each
//! inbound packet is decoded, dispatched, encoded and answered with exactly
//! one outbound packet before the next one is read.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use pwd_protocol::encode::{RECORD_WORDS, encode_record, encode_record_list};
use pwd_protocol::etf::{self, EtfError};
use pwd_protocol::{
    AccountRecord, Command, EncodedTerm, ErrorReply, PacketReader, PacketWriter, ProtocolError,
    TermError,
};
use tracing::{debug, trace};

use crate::diagnostic::DiagnosticLog;
use crate::directory::AccountDirectory;
use crate::error::{PortError, PortResult};

/// Where a worker is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Decoding,
    Dispatching,
    Encoding,
    Responding,
    Stopped,
}

#[derive(Debug)]
pub struct Worker<D, W: Write> {
    directory: D,
    channel: PacketWriter<W>,
    log: DiagnosticLog,
    phase: Phase,
}

impl<D: AccountDirectory, W: Write> Worker<D, W> {
    /// Open the diagnostic log and bind the worker to `channel`.
    ///
    /// Fails only if the log cannot be opened; the host must not route
    /// commands to a worker that failed to start.
    pub fn start(channel: PacketWriter<W>, directory: D, log_path: &Path) -> PortResult<Self> {
        let mut log = DiagnosticLog::open(log_path)?;
        log.info("Start pwd driver");
        debug!(
            "worker started: diagnostic log {}, {:?} packet header",
            log_path.display(),
            channel.packet_size()
        );

        Ok(Self {
            directory,
            channel,
            log,
            phase: Phase::Idle,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn channel(&self) -> &PacketWriter<W> {
        &self.channel
    }

    /// Answer one command packet with exactly one reply packet.
    ///
    /// Lookup misses, unknown commands and allocation failures become error
    /// replies. An `Err` means the channel itself failed.
    pub fn handle_command(&mut self, packet: &[u8]) -> PortResult<()> {
        self.enter(Phase::Decoding);
        let reply = match Command::decode(packet) {
            Ok(command) => {
                debug!("dispatching {command}");
                self.enter(Phase::Dispatching);
                self.dispatch(&command)
            }
            Err(unknown) => {
                self.log.info(&unknown.to_string());
                ErrorReply::UnknownCommand.encode()
            }
        };

        let result = match reply {
            Ok(term) => self.respond(&term),
            Err(err) => Err(err.into()),
        };
        self.enter(Phase::Idle);
        result
    }

    /// Handle packets until the reader reaches end of input, then stop.
    pub fn serve<R: Read>(mut self, mut reader: PacketReader<R>) -> PortResult<()> {
        let outcome = loop {
            match reader.read_packet() {
                Ok(Some(packet)) => {
                    if let Err(err) = self.handle_command(&packet) {
                        break Err(err);
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(PortError::from(err)),
            }
        };

        if let Err(err) = &outcome {
            self.log.warn(&format!("Worker failed: {err}"));
        }
        self.stop();
        outcome
    }

    /// Close the log and hand the channel back.
    pub fn stop(mut self) -> W {
        self.enter(Phase::Stopped);
        self.log.info("Stop pwd driver");
        let Self { channel, log, .. } = self;
        log.close();
        channel.into_inner()
    }

    fn dispatch(&mut self, command: &Command) -> Result<EncodedTerm, TermError> {
        match command {
            Command::LookupByUid(uid) => match self.directory.lookup_by_uid(*uid) {
                Some(record) => self.encode_single(&record),
                None => {
                    self.log.info(&format!("getpwuid returns NULL for {uid}"));
                    self.encode_miss(ErrorReply::UnknownUid)
                }
            },
            Command::LookupByName(name) => match self.directory.lookup_by_name(name) {
                Some(record) => self.encode_single(&record),
                None => {
                    self.log.info(&format!(
                        "getpwnam returns NULL for {}",
                        name.to_string_lossy()
                    ));
                    self.encode_miss(ErrorReply::UnknownName)
                }
            },
            Command::EnumerateAll => {
                self.enter(Phase::Encoding);
                let encoded = encode_record_list(self.directory.enumerate_all());
                self.recover_term(
                    encoded,
                    ErrorReply::OutOfMemoryForResult,
                    format_args!("Couldn't allocate memory for result"),
                )
            }
        }
    }

    fn encode_single(&mut self, record: &AccountRecord) -> Result<EncodedTerm, TermError> {
        self.enter(Phase::Encoding);
        let encoded = encode_record(record);
        self.recover_term(
            encoded,
            ErrorReply::OutOfMemory,
            format_args!("Couldn't allocate memory for result (size: {RECORD_WORDS})"),
        )
    }

    fn encode_miss(&mut self, reply: ErrorReply) -> Result<EncodedTerm, TermError> {
        self.enter(Phase::Encoding);
        reply.encode()
    }

    /// Swap an allocation failure for `reply`, logging `what`.
    fn recover_term(
        &mut self,
        encoded: Result<EncodedTerm, TermError>,
        reply: ErrorReply,
        what: fmt::Arguments<'_>,
    ) -> Result<EncodedTerm, TermError> {
        match encoded {
            Err(TermError::Alloc(err)) => {
                self.log.warn(&format!("{what}: {err}"));
                reply.encode()
            }
            other => other,
        }
    }

    fn respond(&mut self, term: &EncodedTerm) -> PortResult<()> {
        self.enter(Phase::Responding);
        let payload = etf::encode(term);
        let payload = self.recover_payload(payload)?;

        match self.channel.write_packet(&payload) {
            Err(ProtocolError::TooLarge { size, max }) => {
                self.log.warn(&format!(
                    "Result of {size} bytes exceeds the {max} byte packet limit"
                ));
                let fallback = etf::encode(&ErrorReply::OutOfMemoryForResult.encode()?)?;
                self.channel.write_packet(&fallback)?;
                Ok(())
            }
            other => other.map_err(PortError::from),
        }
    }

    /// Serialized reply, or the out-of-memory reply if serializing ran out.
    fn recover_payload(&mut self, payload: Result<Vec<u8>, EtfError>) -> PortResult<Vec<u8>> {
        match payload {
            Ok(payload) => Ok(payload),
            Err(EtfError::Alloc(len)) => {
                self.log
                    .warn(&format!("Couldn't allocate {len} bytes for result"));
                Ok(etf::encode(&ErrorReply::OutOfMemoryForResult.encode()?)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn enter(&mut self, next: Phase) {
        trace!("phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }
}
