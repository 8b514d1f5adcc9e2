//! Fuzz target for response bodies
//!
//! Arrays, player lists, slot counts and `playerinfo` blocks come from the
//! game server verbatim. None of the parsers may panic on any input, and an
//! array judged complete must unpack.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rconwatch_proto::{PlayerEntry, PlayerInfo, Response, Slots, response::is_complete_array, unpack_array};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    let _ = Response::classify(text.as_ref()).is_fail();
    let _ = Slots::parse(&text);
    let _ = PlayerInfo::parse(&text);

    let complete = is_complete_array(&text);
    match unpack_array(&text) {
        Ok(items) => {
            for item in items {
                let _ = PlayerEntry::parse(&item);
            }
        },
        Err(_) => assert!(!complete, "complete array failed to unpack"),
    }
});
