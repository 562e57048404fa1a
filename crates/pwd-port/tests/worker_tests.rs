//! End-to-end worker behaviour over an in-memory channel.

mod common;

use std::io::Cursor;

use common::{
    Harness, MemoryDirectory, OverstatedDirectory, decode_replies, error_term, record_term,
};
use pwd_port::{Phase, Worker};
use pwd_protocol::{AccountRecord, PacketReader, PacketSize, PacketWriter, Term};

#[test]
fn test_lookup_root_by_uid() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    let reply = harness.call(&[1, b'0']);

    assert_eq!(
        reply.to_string(),
        r#"{{pw_name,"root"},{pw_passwd,"x"},{pw_uid,0},{pw_gid,0}}"#
    );
}

#[test]
fn test_lookup_by_uid_keeps_every_field() {
    let record = AccountRecord::new(b"caf\xc3\xa9-\xff".to_vec(), "$6$salt$hash", 4242, 100);
    let mut harness = Harness::new(MemoryDirectory::new(vec![record.clone()]));

    assert_eq!(harness.call(b"\x014242"), record_term(&record));
}

#[test]
fn test_lookup_by_name() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    let reply = harness.call(b"\x02nobody");

    assert_eq!(
        reply,
        record_term(&AccountRecord::new("nobody", "*", 65534, 65534))
    );
}

#[test]
fn test_unknown_uid() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    assert_eq!(harness.call(b"\x01999"), error_term("unknown_uid"));
    assert!(harness.log_contents().contains("getpwuid returns NULL for 999"));
}

#[test]
fn test_unknown_name() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    assert_eq!(
        harness.call(&[2, b'n', b'o', b's', b'u', b'c', b'h']),
        error_term("unknown_name")
    );
    assert!(harness.log_contents().contains("getpwnam returns NULL for nosuch"));
}

#[test]
fn test_unknown_command_tags() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    assert_eq!(harness.call(&[9]), error_term("unknown_command"));
    assert_eq!(harness.call(b"\x00root"), error_term("unknown_command"));
    assert_eq!(harness.call(b"\xff\x01\x02\x03"), error_term("unknown_command"));
    assert_eq!(harness.call(b""), error_term("unknown_command"));

    // The worker keeps going afterwards.
    assert_eq!(
        harness.call(b"\x010"),
        record_term(&AccountRecord::new("root", "x", 0, 0))
    );
}

#[test]
fn test_non_numeric_uid_means_root() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    assert_eq!(
        harness.call(b"\x01root"),
        record_term(&AccountRecord::new("root", "x", 0, 0))
    );
}

#[test]
fn test_negative_uid_wraps() {
    let mut harness = Harness::new(MemoryDirectory::new(vec![AccountRecord::new(
        "wrapped",
        "x",
        u32::MAX,
        0,
    )]));
    assert_eq!(harness.call(b"\x01-1").as_tuple().map(<[Term]>::len), Some(4));
}

#[test]
fn test_name_stops_at_nul() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    assert_eq!(
        harness.call(b"\x02daemon\0tail"),
        record_term(&AccountRecord::new("daemon", "x", 1, 1))
    );
}

#[test]
fn test_enumerate_all_accounts() {
    let directory = MemoryDirectory::standard();
    let expected: Vec<Term> = directory.records.iter().map(record_term).collect();
    let mut harness = Harness::new(directory);

    let reply = harness.call(&[3]);
    assert_eq!(reply, Term::List(expected));
}

#[test]
fn test_enumerate_empty_directory() {
    let mut harness = Harness::new(MemoryDirectory::default());
    let reply = harness.call(&[3]);
    assert_eq!(reply, Term::List(Vec::new()));
    assert_eq!(reply.to_string(), "[]");
}

#[test]
fn test_enumerate_out_of_memory_is_reported() {
    let mut harness = Harness::new(OverstatedDirectory(MemoryDirectory::standard()));

    assert_eq!(
        harness.call(&[3]),
        error_term("Couldn't allocate memory for result")
    );
    assert_eq!(harness.worker.phase(), Phase::Idle);
    assert!(
        harness
            .log_contents()
            .lines()
            .any(|line| line.contains("Couldn't allocate memory for result: "))
    );

    // The worker keeps serving.
    assert_eq!(
        harness.call(b"\x010"),
        record_term(&AccountRecord::new("root", "x", 0, 0))
    );
}

#[test]
fn test_enumerate_is_repeatable() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    let first = harness.call(&[3]);
    let second = harness.call(&[3]);
    assert_eq!(first, second);
    assert_eq!(first.as_list().map(<[Term]>::len), Some(3));
}

#[test]
fn test_repeated_lookups_are_identical() {
    let mut harness = Harness::new(MemoryDirectory::standard());
    harness.call(b"\x010");
    harness.call(b"\x010");

    let bytes = harness.worker.channel().get_ref().clone();
    let half = bytes.len() / 2;
    assert_eq!(bytes[..half], bytes[half..]);
}

#[test]
fn test_small_packet_headers_are_honoured() {
    let mut harness = Harness::with_packet_size(MemoryDirectory::standard(), PacketSize::Two);
    assert_eq!(harness.call(&[9]), error_term("unknown_command"));

    let bytes = harness.worker.channel().get_ref();
    let len = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    assert_eq!(bytes.len(), 2 + len);
}

#[test]
fn test_lifecycle_is_logged_once() {
    let harness = Harness::new(MemoryDirectory::standard());
    assert_eq!(harness.worker.phase(), Phase::Idle);

    let log_path = harness.log_path();
    let _dir = harness.dir;
    let _ = harness.worker.stop();

    let log = std::fs::read_to_string(log_path).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("Start pwd driver"));
    assert!(lines[1].ends_with("Stop pwd driver"));
}

#[test]
fn test_serve_answers_every_packet_in_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut out = Vec::new();
    let worker = Worker::start(
        PacketWriter::new(&mut out, PacketSize::Four),
        MemoryDirectory::standard(),
        &dir.path().join("pwd.log"),
    )
    .unwrap();

    let mut input = Vec::new();
    for packet in [&b"\x010"[..], b"\x02nosuch", b"\x09", b"\x03"] {
        input.extend_from_slice(&(packet.len() as u32).to_be_bytes());
        input.extend_from_slice(packet);
    }
    worker
        .serve(PacketReader::new(Cursor::new(input), PacketSize::Four))
        .unwrap();

    let replies = decode_replies(&out, PacketSize::Four);
    assert_eq!(replies.len(), 4);
    assert_eq!(
        replies[0],
        record_term(&AccountRecord::new("root", "x", 0, 0))
    );
    assert_eq!(replies[1], error_term("unknown_name"));
    assert_eq!(replies[2], error_term("unknown_command"));
    assert_eq!(replies[3].as_list().map(<[Term]>::len), Some(3));

    let log = std::fs::read_to_string(dir.path().join("pwd.log")).unwrap();
    assert!(log.lines().last().unwrap().ends_with("Stop pwd driver"));
}
