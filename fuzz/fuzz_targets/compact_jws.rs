//! Fuzz target for compact JWS splitting and claim extraction.
//!
//! Exercises the structural parsing path against malformed input; it does
//! NOT test cryptographic validation (that requires valid signatures).

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((header, payload, _)) = openpubkey::jwt::split_compact(data) {
        let _ = openpubkey::jwt::parse_segment::<serde_json::Value>(header);
        let _ = openpubkey::jwt::parse_segment::<serde_json::Value>(payload);

        for claim in ["iss", "sub", "aud", "nonce"] {
            let _ = openpubkey::jwt::extract_claim(data, claim);
        }

        let _ = openpubkey::jwt::OidcClaims::from_token(data);
    }
});
