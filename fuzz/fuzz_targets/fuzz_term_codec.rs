//! Fuzz target for the term codec.
//!
//! Arbitrary bytes fed to `decode` must never panic. Bytes that decode must
//! re-encode to a form that decodes to the same term and hashes the same.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tripledb_types::{decode, encode_to_vec, term_hash};

fuzz_target!(|data: &[u8]| {
    let Ok(term) = decode(data) else {
        // Rejection is fine; panicking is not.
        return;
    };

    let encoded = encode_to_vec(&term);
    assert!(encoded.is_ok(), "encode failed after successful decode of {term}");
    let encoded = encoded.expect("already checked");

    let again = decode(&encoded);
    assert!(again.is_ok(), "re-decode failed for {term}");
    assert_eq!(term, again.expect("already checked"), "roundtrip mismatch");

    let first = term_hash(&term).expect("encodable");
    let second = term_hash(&decode(&encoded).expect("already checked")).expect("encodable");
    assert_eq!(first, second, "hash differs after roundtrip");
});
