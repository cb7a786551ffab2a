//! Base62 codec (C1).
//!
//! Injects a non-negative integer into the 62-symbol alphabet `[0-9A-Za-z]` and back.
//! Decoding is not required by the external caller surface but is kept for tests and
//! future audit tooling.

use crate::error::{CoreError, CoreResult};

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u64 = 62;

/// Encodes `n` into a Base62 string. `encode(0) == "0"`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidUrl`]-adjacent [`CoreError::IntegrityError`] is never
/// produced here; a negative input is a contract violation and yields
/// [`CoreError::Config`] since this codec has no request-scoped error variant of its
/// own -- callers pass validated, non-negative sequence values.
pub fn encode(n: i64) -> CoreResult<String> {
    if n < 0 {
        return Err(CoreError::Config(format!(
            "base62 encode requires n >= 0, got {n}"
        )));
    }
    if n == 0 {
        return Ok("0".to_string());
    }

    let mut value = n as u64;
    let mut digits = Vec::new();
    while value > 0 {
        let rem = (value % BASE) as usize;
        digits.push(ALPHABET[rem]);
        value /= BASE;
    }
    digits.reverse();
    Ok(String::from_utf8(digits).expect("alphabet is ASCII"))
}

/// Decodes a Base62 string back into its integer value.
pub fn decode(s: &str) -> CoreResult<i64> {
    if s.is_empty() {
        return Err(CoreError::Config("base62 decode requires a non-empty string".into()));
    }

    let mut value: i64 = 0;
    for c in s.bytes() {
        let digit = ALPHABET
            .iter()
            .position(|&b| b == c)
            .ok_or_else(|| CoreError::Config(format!("invalid base62 character: {}", c as char)))?;
        value = value
            .checked_mul(BASE as i64)
            .and_then(|v| v.checked_add(digit as i64))
            .ok_or_else(|| CoreError::Config("base62 value overflows i64".into()))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_zero_is_single_zero_digit() {
        assert_eq!(encode(0).unwrap(), "0");
    }

    #[test]
    fn encode_rejects_negative() {
        assert!(encode(-1).is_err());
    }

    #[test]
    fn round_trips_known_values() {
        for n in [1, 61, 62, 63, 3843, 1_000_000, i64::from(u32::MAX)] {
            let encoded = encode(n).unwrap();
            assert_eq!(decode(&encoded).unwrap(), n);
        }
    }

    proptest! {
        #[test]
        fn encode_is_injective(a in 0i64..10_000_000, b in 0i64..10_000_000) {
            if a != b {
                prop_assert_ne!(encode(a).unwrap(), encode(b).unwrap());
            }
        }

        #[test]
        fn round_trip_holds_for_any_non_negative(n in 0i64..i64::MAX / 2) {
            let encoded = encode(n).unwrap();
            prop_assert_eq!(decode(&encoded).unwrap(), n);
        }
    }
}
