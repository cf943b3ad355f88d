//! Fuzz target for inline identifiers.
//!
//! Every identifier that decodes to an inline term must encode back to
//! itself, so no two inline identifiers name the same term.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tripledb_types::{NodeId, inline};

fuzz_target!(|raw: u64| {
    let id = NodeId::from_raw(raw);
    if let Some(term) = inline::decode(id) {
        assert!(id.is_inline(), "{id} decoded to {term} but is not inline");
        assert_eq!(inline::encode(&term), Some(id), "{term} does not re-encode to {id}");
    }
});
