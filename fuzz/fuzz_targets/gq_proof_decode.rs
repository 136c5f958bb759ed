//! Fuzz target for GQ signature-section decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // the embedded original header must come back out or fail cleanly
    if let Ok(original) = openpubkey::gq::original_jwt_headers(data) {
        let _ = openpubkey::jwt::parse_segment::<serde_json::Value>(&original);
    }
});
