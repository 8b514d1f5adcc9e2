//! Fuzz target for the XOR stream
//!
//! Applying the cipher twice must return the original bytes for any key the
//! greeting parser accepts, including messages longer than the key.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rconwatch_proto::XorCipher;

#[derive(Debug, Arbitrary)]
struct Input {
    greeting: Vec<u8>,
    message: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(cipher) = XorCipher::from_greeting(input.greeting) else {
        return;
    };
    assert!(cipher.key_len() > 0);

    let once = cipher.apply(&input.message);
    assert_eq!(once.len(), input.message.len());
    let twice = cipher.apply(&once);
    assert_eq!(twice.as_ref(), input.message.as_slice());
});
