//! Fuzz target for the admin-log parser
//!
//! Arbitrary `showlog` bodies must never panic; malformed entries come back
//! as anomalies instead.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rconwatch_proto::log::{parse_showlog, split_entries};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let _ = split_entries(&text);
    let (lines, _anomalies) = parse_showlog(&text);
    for line in &lines {
        let _ = line.server_now_ms();
    }
});
