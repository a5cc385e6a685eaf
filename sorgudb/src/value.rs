//! Plaintext scalar values and their canonical byte encoding.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

const TAG_TEXT: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_DECIMAL: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;
const TAG_TIMESTAMP: u8 = 0x05;

/// A plaintext scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Integer(i64),
    /// Binary floating point number
    Decimal(f64),
    /// UTF-8 string
    Text(String),
    /// Seconds since the Unix epoch
    Timestamp(i64),
}

impl FieldValue {
    /// Returns the name of the value's type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Returns the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the value as a float, if numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(n) => Some(*n as f64),
            Self::Decimal(n) => Some(*n),
            _ => None,
        }
    }

    /// Canonical byte encoding used as deterministic-encryption input.
    ///
    /// `[tag:1][payload]`: numbers are fixed-width big-endian (decimals as
    /// their IEEE-754 bits with `-0.0` folded into `0.0`), text is its exact
    /// UTF-8 bytes. No trimming, case folding or normalization is applied.
    ///
    /// # Errors
    ///
    /// Returns a static reason for `Null` and `NaN`, which have no canonical
    /// form.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, &'static str> {
        let mut out = Vec::with_capacity(9);
        match self {
            Self::Null => return Err("null values cannot be encrypted"),
            Self::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Self::Integer(n) => {
                out.push(TAG_INTEGER);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Self::Decimal(n) => {
                if n.is_nan() {
                    return Err("NaN cannot be encrypted");
                }
                let n = if *n == 0.0 { 0.0_f64 } else { *n };
                out.push(TAG_DECIMAL);
                out.extend_from_slice(&n.to_bits().to_be_bytes());
            }
            Self::Text(s) => {
                out.reserve(s.len());
                out.push(TAG_TEXT);
                out.extend_from_slice(s.as_bytes());
            }
            Self::Timestamp(t) => {
                out.push(TAG_TIMESTAMP);
                out.extend_from_slice(&t.to_be_bytes());
            }
        }
        Ok(out)
    }

    /// Parses a canonical encoding produced by [`FieldValue::to_canonical_bytes`].
    #[must_use]
    pub fn from_canonical_bytes(bytes: &[u8]) -> Option<Self> {
        let (&tag, payload) = bytes.split_first()?;
        match tag {
            TAG_BOOL => match payload {
                [0] => Some(Self::Bool(false)),
                [1] => Some(Self::Bool(true)),
                _ => None,
            },
            TAG_INTEGER => Some(Self::Integer(i64::from_be_bytes(payload.try_into().ok()?))),
            TAG_DECIMAL => {
                let n = f64::from_bits(u64::from_be_bytes(payload.try_into().ok()?));
                (!n.is_nan()).then_some(Self::Decimal(n))
            }
            TAG_TEXT => String::from_utf8(payload.to_vec()).ok().map(Self::Text),
            TAG_TIMESTAMP => Some(Self::Timestamp(i64::from_be_bytes(payload.try_into().ok()?))),
            _ => None,
        }
    }

    /// Compares two values of compatible types.
    ///
    /// Integers and decimals compare numerically with each other; any other
    /// pair of distinct types is incomparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => {
                Some(a.cmp(b))
            }
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(n) | Self::Timestamp(n) => write!(f, "{n}"),
            Self::Decimal(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_integer_is_fixed_width_big_endian() {
        let bytes = FieldValue::Integer(258).to_canonical_bytes().unwrap();
        assert_eq!(hex::encode(bytes), "020000000000000102");
    }

    #[test]
    fn test_text_is_exact_bytes() {
        let bytes = FieldValue::from(" Alice ").to_canonical_bytes().unwrap();
        assert_eq!(&bytes[1..], b" Alice ");
        assert_ne!(
            FieldValue::from("alice").to_canonical_bytes().unwrap(),
            FieldValue::from("Alice").to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_negative_zero_folded() {
        assert_eq!(
            FieldValue::Decimal(-0.0).to_canonical_bytes().unwrap(),
            FieldValue::Decimal(0.0).to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_uncanonical_values_rejected() {
        assert!(FieldValue::Null.to_canonical_bytes().is_err());
        assert!(FieldValue::Decimal(f64::NAN).to_canonical_bytes().is_err());
    }

    #[test]
    fn test_type_tag_separates_types() {
        let text = FieldValue::from("1").to_canonical_bytes().unwrap();
        let int = FieldValue::Integer(1).to_canonical_bytes().unwrap();
        assert_ne!(text, int);
        assert!(FieldValue::from_canonical_bytes(&[0x7f, 1]).is_none());
        assert!(FieldValue::from_canonical_bytes(&[]).is_none());
    }

    #[test]
    fn test_compare_mixed_numeric() {
        let a = FieldValue::Integer(100);
        let b = FieldValue::Decimal(99.99);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
        assert_eq!(FieldValue::from("x").compare(&a), None);
    }

    proptest! {
        #[test]
        fn prop_canonical_round_trip_text(s in ".*") {
            let value = FieldValue::Text(s);
            let bytes = value.to_canonical_bytes().unwrap();
            prop_assert_eq!(FieldValue::from_canonical_bytes(&bytes), Some(value));
        }

        #[test]
        fn prop_canonical_round_trip_integer(n in any::<i64>()) {
            let value = FieldValue::Integer(n);
            let bytes = value.to_canonical_bytes().unwrap();
            prop_assert_eq!(bytes.len(), 9);
            prop_assert_eq!(FieldValue::from_canonical_bytes(&bytes), Some(value));
        }
    }
}
