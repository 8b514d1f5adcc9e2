//! Fuzz target for the admin-log cursor
//!
//! Overlapping `showlog` windows arrive every tick. Whatever the windows
//! contain, the cursor position never moves backwards.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rconwatch_core::LogCursor;
use rconwatch_proto::log::parse_showlog;

fuzz_target!(|windows: Vec<String>| {
    let mut cursor = LogCursor::new();
    let mut position = cursor.position();
    for window in windows.iter().take(32) {
        let (lines, _) = parse_showlog(window);
        let _ = cursor.advance(lines);
        assert!(cursor.position() >= position, "cursor moved backwards");
        position = cursor.position();
    }
});
