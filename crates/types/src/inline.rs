//! Inline value encoding.
//!
//! Small canonical literals are packed directly into the payload of a
//! [`NodeId`] and never reach a node table. Whether a term is inlined depends
//! only on the term itself.
//!
//! A literal is inlined only if re-rendering the packed value reproduces its
//! lexical form exactly. `"042"^^xsd:integer` is therefore stored in the node
//! table, while `"42"^^xsd:integer` is inlined. This keeps the mapping a
//! bijection: decoding an inline identifier always yields the original term.
//!
//! | Datatype       | Payload layout (56 bits)                                         |
//! |----------------|------------------------------------------------------------------|
//! | `xsd:integer`  | two's complement, range -2^55 .. 2^55-1                          |
//! | `xsd:decimal`  | scale (8) ‖ signed unscaled value (48)                           |
//! | `xsd:date`     | year (14) ‖ month (4) ‖ day (5) ‖ timezone (7)                   |
//! | `xsd:dateTime` | year (13) ‖ month (4) ‖ day (5) ‖ hour (5) ‖ minute (6) ‖ millis-of-minute (16) ‖ timezone (7) |
//! | `xsd:boolean`  | 0 or 1                                                           |

use crate::{
    node_id::{NodeId, NodeTag, PAYLOAD_BITS, PAYLOAD_MASK},
    term::{Term, xsd},
};

const INTEGER_MIN: i64 = -(1 << (PAYLOAD_BITS - 1));
const INTEGER_MAX: i64 = (1 << (PAYLOAD_BITS - 1)) - 1;

const DECIMAL_VALUE_BITS: u32 = 48;
const DECIMAL_VALUE_MASK: u64 = (1 << DECIMAL_VALUE_BITS) - 1;
const DECIMAL_MIN: i64 = -(1 << (DECIMAL_VALUE_BITS - 1));
const DECIMAL_MAX: i64 = (1 << (DECIMAL_VALUE_BITS - 1)) - 1;
const DECIMAL_MAX_SCALE: u32 = 18;

const DATE_TIME_MAX_YEAR: u32 = (1 << 13) - 1;

/// Timezone code for "no timezone".
const TZ_NONE: u64 = 0x7F;
/// Timezone code for `Z`.
const TZ_UTC_Z: u64 = 113;
/// Offsets are stored in quarter hours, biased so -14:00 maps to zero.
const TZ_BIAS: i64 = 56;

/// Returns the inline identifier for a term, or `None` if it must be stored.
pub fn encode(term: &Term) -> Option<NodeId> {
    let lit = term.as_literal()?;
    if lit.language().is_some() {
        return None;
    }
    let lexical = lit.lexical();
    let (tag, payload) = match lit.datatype()? {
        xsd::INTEGER => (NodeTag::Integer, encode_integer(lexical)?),
        xsd::DECIMAL => (NodeTag::Decimal, encode_decimal(lexical)?),
        xsd::DATE => (NodeTag::Date, encode_date(lexical)?),
        xsd::DATE_TIME => (NodeTag::DateTime, encode_date_time(lexical)?),
        xsd::BOOLEAN => (NodeTag::Boolean, encode_boolean(lexical)?),
        _ => return None,
    };
    let id = NodeId::from_parts(tag, payload);
    // Only canonical lexical forms are inlined.
    match decode(id) {
        Some(Term::Literal(ref back)) if back.lexical() == lexical => Some(id),
        _ => None,
    }
}

/// Returns the term encoded by an inline identifier.
///
/// Pointer and special identifiers, and inline payloads that no canonical
/// term produces, yield `None`.
pub fn decode(id: NodeId) -> Option<Term> {
    let payload = id.payload();
    let (lexical, datatype) = match id.tag()? {
        NodeTag::Integer => (decode_integer(payload).to_string(), xsd::INTEGER),
        NodeTag::Decimal => (decode_decimal(payload)?, xsd::DECIMAL),
        NodeTag::Date => (decode_date(payload)?, xsd::DATE),
        NodeTag::DateTime => (decode_date_time(payload)?, xsd::DATE_TIME),
        NodeTag::Boolean => match payload {
            0 => ("false".to_string(), xsd::BOOLEAN),
            1 => ("true".to_string(), xsd::BOOLEAN),
            _ => return None,
        },
        NodeTag::Pointer | NodeTag::Special => return None,
    };
    Some(Term::typed(lexical, datatype))
}

// ---------------------------------------------------------------------------
// xsd:integer
// ---------------------------------------------------------------------------

fn encode_integer(lexical: &str) -> Option<u64> {
    let value: i64 = lexical.parse().ok()?;
    if !(INTEGER_MIN..=INTEGER_MAX).contains(&value) {
        return None;
    }
    Some(value as u64 & PAYLOAD_MASK)
}

fn decode_integer(payload: u64) -> i64 {
    // Sign-extend from 56 bits.
    ((payload << 8) as i64) >> 8
}

// ---------------------------------------------------------------------------
// xsd:decimal
// ---------------------------------------------------------------------------

fn encode_decimal(lexical: &str) -> Option<u64> {
    let (negative, body) = match lexical.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lexical),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((int_part, frac_part)) => {
            if frac_part.is_empty() {
                return None;
            }
            (int_part, frac_part)
        },
        None => (body, ""),
    };
    if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }
    let scale = frac_part.len() as u32;
    if scale > DECIMAL_MAX_SCALE {
        return None;
    }
    let mut unscaled: i64 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        unscaled = unscaled.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }
    if negative {
        unscaled = -unscaled;
    }
    if !(DECIMAL_MIN..=DECIMAL_MAX).contains(&unscaled) {
        return None;
    }
    Some((u64::from(scale) << DECIMAL_VALUE_BITS) | (unscaled as u64 & DECIMAL_VALUE_MASK))
}

fn decode_decimal(payload: u64) -> Option<String> {
    let scale = (payload >> DECIMAL_VALUE_BITS) as u32;
    if scale > DECIMAL_MAX_SCALE {
        return None;
    }
    let unscaled = (((payload & DECIMAL_VALUE_MASK) << 16) as i64) >> 16;
    let sign = if unscaled < 0 { "-" } else { "" };
    let magnitude = unscaled.unsigned_abs();
    if scale == 0 {
        return Some(format!("{sign}{magnitude}"));
    }
    let divisor = 10u64.pow(scale);
    Some(format!(
        "{sign}{}.{:0width$}",
        magnitude / divisor,
        magnitude % divisor,
        width = scale as usize
    ))
}

// ---------------------------------------------------------------------------
// xsd:date and xsd:dateTime
// ---------------------------------------------------------------------------

struct DateParts {
    year: u32,
    month: u32,
    day: u32,
}

fn encode_date(lexical: &str) -> Option<u64> {
    let (date, rest) = parse_date(lexical)?;
    let tz = parse_timezone(rest)?;
    Some(
        (u64::from(date.year) << 16)
            | (u64::from(date.month) << 12)
            | (u64::from(date.day) << 7)
            | tz,
    )
}

fn decode_date(payload: u64) -> Option<String> {
    let year = ((payload >> 16) & 0x3FFF) as u32;
    let month = ((payload >> 12) & 0xF) as u32;
    let day = ((payload >> 7) & 0x1F) as u32;
    if payload >> 30 != 0 || !valid_month_day(month, day) || year > 9999 {
        return None;
    }
    Some(format!("{year:04}-{month:02}-{day:02}{}", render_timezone(payload & 0x7F)?))
}

fn encode_date_time(lexical: &str) -> Option<u64> {
    let (date, rest) = parse_date(lexical)?;
    if date.year > DATE_TIME_MAX_YEAR {
        return None;
    }
    let rest = rest.strip_prefix('T')?;
    let hour = parse_two_digits(rest.get(0..2)?)?;
    let minute = parse_two_digits(rest.get(3..5)?)?;
    let second = parse_two_digits(rest.get(6..8)?)?;
    if rest.as_bytes().get(2) != Some(&b':') || rest.as_bytes().get(5) != Some(&b':') {
        return None;
    }
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    let mut rest = &rest[8..];
    let mut millis = 0;
    if let Some(frac) = rest.strip_prefix('.') {
        let digits = frac.get(0..3)?;
        if !all_digits(digits) {
            return None;
        }
        millis = digits.parse::<u32>().ok()?;
        rest = &frac[3..];
    }
    let tz = parse_timezone(rest)?;
    let millis_of_minute = second * 1000 + millis;
    Some(
        (u64::from(date.year) << 43)
            | (u64::from(date.month) << 39)
            | (u64::from(date.day) << 34)
            | (u64::from(hour) << 29)
            | (u64::from(minute) << 23)
            | (u64::from(millis_of_minute) << 7)
            | tz,
    )
}

fn decode_date_time(payload: u64) -> Option<String> {
    let year = ((payload >> 43) & 0x1FFF) as u32;
    let month = ((payload >> 39) & 0xF) as u32;
    let day = ((payload >> 34) & 0x1F) as u32;
    let hour = ((payload >> 29) & 0x1F) as u32;
    let minute = ((payload >> 23) & 0x3F) as u32;
    let millis_of_minute = ((payload >> 7) & 0xFFFF) as u32;
    if !valid_month_day(month, day) || hour > 23 || minute > 59 || millis_of_minute >= 60_000 {
        return None;
    }
    let second = millis_of_minute / 1000;
    let millis = millis_of_minute % 1000;
    let fraction = if millis == 0 { String::new() } else { format!(".{millis:03}") };
    Some(format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}{fraction}{}",
        render_timezone(payload & 0x7F)?
    ))
}

/// Parses `YYYY-MM-DD` and returns the remainder of the input.
fn parse_date(lexical: &str) -> Option<(DateParts, &str)> {
    let bytes = lexical.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year_str = lexical.get(0..4)?;
    if !all_digits(year_str) {
        return None;
    }
    let year = year_str.parse().ok()?;
    let month = parse_two_digits(lexical.get(5..7)?)?;
    let day = parse_two_digits(lexical.get(8..10)?)?;
    if !valid_month_day(month, day) {
        return None;
    }
    Some((DateParts { year, month, day }, &lexical[10..]))
}

fn parse_timezone(tz: &str) -> Option<u64> {
    match tz {
        "" => return Some(TZ_NONE),
        "Z" => return Some(TZ_UTC_Z),
        _ => {},
    }
    let sign = match tz.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    if tz.len() != 6 || tz.as_bytes()[3] != b':' {
        return None;
    }
    let hours = i64::from(parse_two_digits(&tz[1..3])?);
    let minutes = i64::from(parse_two_digits(&tz[4..6])?);
    if minutes % 15 != 0 || minutes > 45 {
        return None;
    }
    let quarters = sign * (hours * 4 + minutes / 15);
    if !(-TZ_BIAS..=TZ_BIAS).contains(&quarters) {
        return None;
    }
    Some((quarters + TZ_BIAS) as u64)
}

fn render_timezone(code: u64) -> Option<String> {
    match code {
        TZ_NONE => Some(String::new()),
        TZ_UTC_Z => Some("Z".to_string()),
        c if c <= (2 * TZ_BIAS) as u64 => {
            let quarters = c as i64 - TZ_BIAS;
            let sign = if quarters < 0 { '-' } else { '+' };
            let abs = quarters.unsigned_abs();
            Some(format!("{sign}{:02}:{:02}", abs / 4, (abs % 4) * 15))
        },
        _ => None,
    }
}

fn parse_two_digits(s: &str) -> Option<u32> {
    if s.len() != 2 || !all_digits(s) {
        return None;
    }
    s.parse().ok()
}

fn valid_month_day(month: u32, day: u32) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// xsd:boolean
// ---------------------------------------------------------------------------

fn encode_boolean(lexical: &str) -> Option<u64> {
    match lexical {
        "true" => Some(1),
        "false" => Some(0),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn round_trip(term: &Term) -> Option<Term> {
        encode(term).and_then(decode)
    }

    #[test]
    fn test_integers_inline() {
        for v in [0i64, 1, -1, 42, INTEGER_MAX, INTEGER_MIN] {
            let term = Term::integer(v);
            let id = encode(&term).expect("inline");
            assert_eq!(id.tag(), Some(NodeTag::Integer));
            assert_eq!(decode(id), Some(term));
        }
    }

    #[test]
    fn test_integer_out_of_range_is_not_inline() {
        assert!(encode(&Term::integer(INTEGER_MAX + 1)).is_none());
        assert!(encode(&Term::integer(INTEGER_MIN - 1)).is_none());
        assert!(encode(&Term::integer(i64::MAX)).is_none());
    }

    #[test]
    fn test_non_canonical_integers_are_not_inline() {
        for lex in ["042", "+42", "-0", " 1", "1e3", ""] {
            assert!(encode(&Term::typed(lex, xsd::INTEGER)).is_none(), "{lex:?}");
        }
    }

    #[test]
    fn test_decimals() {
        for lex in ["1.5", "-1.5", "0.0", "1.50", "123", "-0.001", "99999.99"] {
            let term = Term::typed(lex, xsd::DECIMAL);
            assert_eq!(round_trip(&term), Some(term.clone()), "{lex}");
        }
        for lex in ["-0.0", "01.5", ".5", "1.", "1.2.3", "abc", "+1.0"] {
            assert!(encode(&Term::typed(lex, xsd::DECIMAL)).is_none(), "{lex:?}");
        }
    }

    #[test]
    fn test_decimal_out_of_range_is_not_inline() {
        let big = format!("{}.0", DECIMAL_MAX);
        assert!(encode(&Term::typed(big, xsd::DECIMAL)).is_none());
    }

    #[test]
    fn test_dates() {
        for lex in ["2024-02-29", "0001-01-01", "9999-12-31Z", "2020-06-15+05:30", "2020-06-15-14:00"]
        {
            let term = Term::typed(lex, xsd::DATE);
            assert_eq!(round_trip(&term), Some(term.clone()), "{lex}");
        }
        for lex in ["2024-13-01", "2024-00-10", "2024-1-01", "2024-01-01+15:00", "2024-01-01-00:00"]
        {
            assert!(encode(&Term::typed(lex, xsd::DATE)).is_none(), "{lex:?}");
        }
    }

    #[test]
    fn test_utc_designators_stay_distinct() {
        let z = encode(&Term::typed("2020-01-01Z", xsd::DATE)).expect("inline");
        let plus = encode(&Term::typed("2020-01-01+00:00", xsd::DATE)).expect("inline");
        assert_ne!(z, plus);
    }

    #[test]
    fn test_date_times() {
        for lex in [
            "2024-01-01T00:00:00",
            "2024-01-01T23:59:59.999Z",
            "1999-12-31T12:30:05.250+01:00",
            "8191-12-31T00:00:00",
        ] {
            let term = Term::typed(lex, xsd::DATE_TIME);
            assert_eq!(round_trip(&term), Some(term.clone()), "{lex}");
        }
        for lex in [
            "2024-01-01T24:00:00",
            "2024-01-01T00:00:00.000",
            "2024-01-01T00:00:00.5",
            "8192-01-01T00:00:00",
            "2024-01-01 00:00:00",
        ] {
            assert!(encode(&Term::typed(lex, xsd::DATE_TIME)).is_none(), "{lex:?}");
        }
    }

    #[test]
    fn test_booleans() {
        assert_eq!(round_trip(&Term::boolean(true)), Some(Term::boolean(true)));
        assert_eq!(round_trip(&Term::boolean(false)), Some(Term::boolean(false)));
        assert!(encode(&Term::typed("1", xsd::BOOLEAN)).is_none());
    }

    #[test]
    fn test_other_terms_are_not_inline() {
        assert!(encode(&Term::uri("http://example/")).is_none());
        assert!(encode(&Term::plain("42")).is_none());
        assert!(encode(&Term::Literal(crate::Literal::new(
            "42",
            Some("en".into()),
            Some(xsd::INTEGER.into())
        )))
        .is_none());
        assert!(encode(&Term::typed("42", xsd::STRING)).is_none());
        assert!(encode(&Term::Any).is_none());
    }

    #[test]
    fn test_decode_rejects_non_inline_ids() {
        assert!(decode(NodeId::from_offset(0).unwrap()).is_none());
        assert!(decode(NodeId::DOES_NOT_EXIST).is_none());
        assert!(decode(NodeId::ANY).is_none());
        assert!(decode(NodeId::from_parts(NodeTag::Boolean, 2)).is_none());
    }

    proptest! {
        #[test]
        fn prop_inline_integers_round_trip(v in INTEGER_MIN..=INTEGER_MAX) {
            let term = Term::integer(v);
            let id = encode(&term).expect("in range");
            prop_assert_eq!(decode(id), Some(term));
        }

        #[test]
        fn prop_encode_then_decode_is_identity(lex in "[-0-9.:TZ+]{0,24}") {
            for dt in [xsd::INTEGER, xsd::DECIMAL, xsd::DATE, xsd::DATE_TIME] {
                let term = Term::typed(lex.clone(), dt);
                if let Some(id) = encode(&term) {
                    prop_assert_eq!(decode(id), Some(term));
                }
            }
        }
    }
}
