#![no_main]
use libfuzzer_sys::fuzz_target;
use pwd_protocol::command::{Command, GET_PWALL, GET_PWNAM, GET_PWUID};
use pwd_protocol::encode::ErrorReply;

/// Any packet must decode to a command or to an unknown-command reply,
/// and a decoded command must keep the tag it arrived with.
fuzz_target!(|data: &[u8]| {
    match Command::decode(data) {
        Ok(cmd) => {
            assert_eq!(Some(&cmd.tag()), data.first());
            if let Command::LookupByName(name) = &cmd {
                assert_eq!(data[0], GET_PWNAM);
                assert!(!name.as_bytes().contains(&0));
                assert!(data[1..].starts_with(name.as_bytes()));
            }
        }
        Err(unknown) => {
            assert_eq!(unknown.tag, data.first().copied());
            assert!(!matches!(unknown.tag, Some(GET_PWUID | GET_PWNAM | GET_PWALL)));
            assert!(ErrorReply::UnknownCommand.encode().is_ok());
        }
    }
});
