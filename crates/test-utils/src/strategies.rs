//! Proptest strategies for tripledb terms.
//!
//! Reusable generators for property-based testing across crates. Strategies
//! produce well-formed, representable terms while exploring edge cases such
//! as escape characters in URIs and literals.
//!
//! # Usage
//!
//! ```no_run
//! use tripledb_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(term in strategies::arb_term()) {
//!         // test invariant with randomly generated term
//!     }
//! }
//! ```

use proptest::prelude::*;
use tripledb_types::{Term, xsd};

/// Generates a URI under `http://example.org/`, sometimes containing `_` or spaces.
pub fn arb_uri() -> impl Strategy<Value = Term> {
    "[a-z0-9_ /#]{0,24}".prop_map(|path| Term::uri(format!("http://example.org/{path}")))
}

/// Generates a blank node with a label matching `[A-Za-z0-9]{1,16}`.
pub fn arb_blank() -> impl Strategy<Value = Term> {
    "[A-Za-z0-9]{1,16}".prop_map(Term::blank)
}

/// Generates a variable with a name matching `[a-z][a-z0-9]{0,7}`.
pub fn arb_variable() -> impl Strategy<Value = Term> {
    "[a-z][a-z0-9]{0,7}".prop_map(Term::variable)
}

/// Generates lexical forms including quotes, backslashes, and control characters.
pub fn arb_lexical() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ -~]{0,32}",
        "[a-z\"\\\\\n\r\t]{0,16}",
        ".{0,16}",
    ]
}

/// Generates a plain, language-tagged, or non-inline typed literal.
pub fn arb_stored_literal() -> impl Strategy<Value = Term> {
    prop_oneof![
        arb_lexical().prop_map(Term::plain),
        (arb_lexical(), "[a-z]{2}(-[A-Z]{2})?").prop_map(|(lex, lang)| Term::lang(lex, lang)),
        arb_lexical().prop_map(|lex| Term::typed(lex, xsd::STRING)),
        // Non-canonical integers are stored rather than inlined.
        (1u32..1000).prop_map(|n| Term::typed(format!("0{n}"), xsd::INTEGER)),
    ]
}

/// Generates a literal in canonical form for one of the inline datatypes.
pub fn arb_inline_literal() -> impl Strategy<Value = Term> {
    prop_oneof![
        (-(1i64 << 40)..(1i64 << 40)).prop_map(Term::integer),
        any::<bool>().prop_map(Term::boolean),
        (1970u32..2100, 1u32..=12, 1u32..=28)
            .prop_map(|(y, m, d)| Term::typed(format!("{y:04}-{m:02}-{d:02}"), xsd::DATE)),
        (1970u32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
            |(y, mo, d, h, mi, s)| {
                Term::typed(format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}Z"), xsd::DATE_TIME)
            }
        ),
    ]
}

/// Generates a concrete term that a node table must store.
pub fn arb_stored_term() -> impl Strategy<Value = Term> {
    prop_oneof![arb_uri(), arb_blank(), arb_variable(), arb_stored_literal()]
}

/// Generates any concrete term, stored or inline.
pub fn arb_term() -> impl Strategy<Value = Term> {
    prop_oneof![3 => arb_stored_term(), 1 => arb_inline_literal()]
}
