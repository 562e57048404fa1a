#![no_main]
use libfuzzer_sys::fuzz_target;
use pwd_protocol::etf;

/// Whatever the decoder accepts must encode back to a term that decodes
/// to the same tree.
fuzz_target!(|data: &[u8]| {
    let Ok(term) = etf::decode(data) else {
        return;
    };
    let Ok(bytes) = etf::to_vec(&term) else {
        return; // overlong atoms are accepted by the decoder only
    };
    assert_eq!(etf::decode(&bytes).ok(), Some(term));
});
