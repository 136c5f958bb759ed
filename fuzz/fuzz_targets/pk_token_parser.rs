//! Fuzz target for PK Token wire-form parsing.
//!
//! Any token that parses must re-serialize and re-parse to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(token) = openpubkey::PkToken::parse(data) {
        let encoded = token.to_json().expect("parsed token must re-serialize");
        let reparsed =
            openpubkey::PkToken::parse(&encoded).expect("serialized token must re-parse");
        assert_eq!(reparsed, token);

        // derived accessors must not panic on structurally valid tokens
        let _ = token.provider_algorithm();
        let _ = token.get_cic_values();
        let _ = token.hash();
    }
});
