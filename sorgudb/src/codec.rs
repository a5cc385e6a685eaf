//! Strategy-polymorphic field codec.
//!
//! [`FieldCodec::encode`] and [`FieldCodec::decode`] dispatch on the field's
//! [`Strategy`] with a single `match`; adding a strategy means adding an arm
//! here and a tag in [`crate::header`].

use tracing::debug;

use crate::context::{EncryptionContext, FieldRef, KeyId};
use crate::deterministic::DeterministicCipher;
use crate::document::StoredValue;
use crate::error::Error;
use crate::header::{EncryptedValue, StrategyTag};
use crate::kdf::{derive_subkey, KeyPurpose};
use crate::key_manager::{DataEncryptionKey, KeyManager};
use crate::ope::{OrderPreservingEncoder, TOKEN_SIZE};
use crate::randomized::RandomizedCipher;
use crate::schema::{FieldSchema, RangeDomain, Rounding, ScaleError, Strategy};
use crate::value::FieldValue;

const RANGE_KIND_INTEGER: u8 = 0x02;
const RANGE_KIND_DECIMAL: u8 = 0x03;
const RANGE_PAYLOAD_LEN: usize = 2 + 3 * 8;

/// Encodes and decodes single field values under their declared strategy.
///
/// The codec holds no state of its own; it borrows the key manager to
/// resolve keys, so it is cheap to create per call and safe to share.
#[derive(Debug, Clone, Copy)]
pub struct FieldCodec<'a> {
    keys: &'a KeyManager,
}

impl<'a> FieldCodec<'a> {
    /// Creates a codec resolving keys through `keys`.
    #[must_use]
    pub const fn new(keys: &'a KeyManager) -> Self {
        Self { keys }
    }

    /// Encodes a plaintext value with the field's active key.
    ///
    /// `Strategy::None` passes the value through unchanged.
    ///
    /// # Errors
    ///
    /// - `Error::KeyUnavailable` if the field has no active key
    /// - `Error::ValueOutOfDomain` if a range value lies outside `[min, max]`
    /// - `Error::EncodingError` if the value cannot be canonicalized
    pub fn encode(&self, value: &FieldValue, schema: &FieldSchema) -> Result<StoredValue, Error> {
        if !schema.strategy().is_encrypted() {
            return Ok(StoredValue::Plain(value.clone()));
        }
        let dek = self.keys.get_active_key(schema)?;
        encode_with_key(value, schema, &dek).map(StoredValue::Encrypted)
    }

    /// Computes the search token of a query literal under the field's
    /// active key, together with that key's id.
    ///
    /// Range literals are moved onto the precision grid with `rounding`.
    /// With [`Rounding::Exact`] a literal between two grid values has no
    /// token and `Ok(None)` is returned. Equality literals ignore
    /// `rounding`.
    ///
    /// # Errors
    ///
    /// - `Error::KeyUnavailable` if the field has no active key
    /// - `Error::ValueOutOfDomain` if a range literal lies outside the domain
    /// - `Error::EncodingError` if the literal cannot be canonicalized, or
    ///   the field's strategy has no tokens
    pub fn search_token(
        &self,
        literal: &FieldValue,
        schema: &FieldSchema,
        rounding: Rounding,
    ) -> Result<Option<(KeyId, Vec<u8>)>, Error> {
        let field = schema.field_ref();
        match schema.strategy() {
            Strategy::Equality => {
                let dek = self.keys.get_active_key(schema)?;
                let value = encode_with_key(literal, schema, &dek)?;
                Ok(Some((dek.key_id().clone(), value.token().to_vec())))
            }
            Strategy::Range(domain) => {
                let (_, number) = range_number(literal, field)?;
                let scaled = match domain.scale_with(number, rounding) {
                    Ok(scaled) => scaled,
                    Err(ScaleError::Inexact) => return Ok(None),
                    Err(err) => return Err(scale_error(err, field)),
                };
                let dek = self.keys.get_active_key(schema)?;
                let context = EncryptionContext::new(field, dek.key_id());
                let token = range_token(&dek, &context, domain, scaled)?;
                Ok(Some((dek.key_id().clone(), token.to_vec())))
            }
            Strategy::None | Strategy::Randomized => Err(Error::EncodingError {
                field: field.to_string(),
                reason: "field has no search token",
            }),
        }
    }

    /// Decodes a stored value back to plaintext.
    ///
    /// Range values decode to the value rounded to the field's precision.
    ///
    /// # Errors
    ///
    /// - `Error::KeyNotFound` if the value's key id cannot be resolved
    /// - `Error::DecryptionFailed` if the ciphertext is malformed or does not
    ///   authenticate under the resolved key
    /// - `Error::SchemaMismatch` if the stored form disagrees with the schema
    pub fn decode(&self, stored: &StoredValue, schema: &FieldSchema) -> Result<FieldValue, Error> {
        let field = schema.field_ref();
        match (stored, schema.strategy()) {
            (StoredValue::Plain(value), Strategy::None) => Ok(value.clone()),
            (StoredValue::Plain(_), strategy) => Err(Error::schema_mismatch(
                field,
                format!("stored in clear, schema says {}", strategy.name()),
            )),
            (StoredValue::Encrypted(_), Strategy::None) => Err(Error::schema_mismatch(
                field,
                "stored encrypted, schema says none",
            )),
            (StoredValue::Encrypted(value), strategy) => {
                if Some(value.strategy()) != expected_tag(strategy) {
                    return Err(Error::schema_mismatch(
                        field,
                        format!(
                            "stored as {}, schema says {}",
                            value.strategy().name(),
                            strategy.name()
                        ),
                    ));
                }
                if value.key_id().field() != field {
                    return Err(Error::schema_mismatch(
                        field,
                        "value was encrypted for another field",
                    ));
                }
                let dek = self.keys.get_key(value.key_id())?;
                decode_with_key(value, schema, &dek).map_err(|err| {
                    debug!(field = %field, kind = ?err.kind(), "field decode failed");
                    err
                })
            }
        }
    }
}

fn expected_tag(strategy: &Strategy) -> Option<StrategyTag> {
    match strategy {
        Strategy::None => None,
        Strategy::Equality => Some(StrategyTag::Equality),
        Strategy::Range(_) => Some(StrategyTag::Range),
        Strategy::Randomized => Some(StrategyTag::Randomized),
    }
}

/// Encodes a value with an explicit key.
///
/// # Errors
///
/// See [`FieldCodec::encode`]. Fails with `Error::EncodingError` for
/// `Strategy::None`, which has no encrypted form.
pub fn encode_with_key(
    value: &FieldValue,
    schema: &FieldSchema,
    dek: &DataEncryptionKey,
) -> Result<EncryptedValue, Error> {
    let field = schema.field_ref();
    let key_id = dek.key_id();
    let context = EncryptionContext::new(field, key_id);
    let encoding_error = |reason| Error::EncodingError {
        field: field.to_string(),
        reason,
    };

    match schema.strategy() {
        Strategy::None => Err(encoding_error("field has no encryption strategy")),
        Strategy::Equality => {
            let plaintext = value.to_canonical_bytes().map_err(encoding_error)?;
            let subkey = derive_subkey(dek.material(), KeyPurpose::Equality, &context)?;
            let cipher = DeterministicCipher::new(subkey)?;
            let ciphertext = cipher.encrypt(&plaintext, &context)?;
            Ok(EncryptedValue::new(
                StrategyTag::Equality,
                key_id.clone(),
                ciphertext.clone(),
                ciphertext,
            ))
        }
        Strategy::Range(domain) => {
            let (kind, number) = range_number(value, field)?;
            let scaled = domain
                .scale(number)
                .map_err(|err| scale_error(err, field))?;

            let token = range_token(dek, &context, domain, scaled)?;

            let payload = range_payload(kind, domain, scaled);
            let subkey = derive_subkey(dek.material(), KeyPurpose::RangeCiphertext, &context)?;
            let cipher = DeterministicCipher::new(subkey)?;
            let ciphertext = cipher.encrypt(&payload, &context)?;
            Ok(EncryptedValue::new(
                StrategyTag::Range,
                key_id.clone(),
                token.to_vec(),
                ciphertext,
            ))
        }
        Strategy::Randomized => {
            let plaintext = value.to_canonical_bytes().map_err(encoding_error)?;
            let subkey = derive_subkey(dek.material(), KeyPurpose::Randomized, &context)?;
            let cipher = RandomizedCipher::new(subkey)?;
            let ciphertext = cipher.encrypt(&plaintext, &context)?;
            Ok(EncryptedValue::new(
                StrategyTag::Randomized,
                key_id.clone(),
                Vec::new(),
                ciphertext,
            ))
        }
    }
}

/// Decodes a value with an explicit key.
///
/// # Errors
///
/// See [`FieldCodec::decode`].
pub fn decode_with_key(
    value: &EncryptedValue,
    schema: &FieldSchema,
    dek: &DataEncryptionKey,
) -> Result<FieldValue, Error> {
    let field = schema.field_ref();
    let context = EncryptionContext::new(field, value.key_id());
    let decryption_failed = || Error::DecryptionFailed {
        field: field.to_string(),
    };

    if dek.key_id() != value.key_id() {
        return Err(decryption_failed());
    }

    match (schema.strategy(), value.strategy()) {
        (Strategy::Equality, StrategyTag::Equality) => {
            if value.token() != value.ciphertext() {
                return Err(decryption_failed());
            }
            let subkey = derive_subkey(dek.material(), KeyPurpose::Equality, &context)?;
            let cipher = DeterministicCipher::new(subkey)?;
            let plaintext = cipher.decrypt(value.ciphertext(), &context)?;
            FieldValue::from_canonical_bytes(&plaintext)
                .ok_or_else(decryption_failed)
        }
        (Strategy::Range(domain), StrategyTag::Range) => {
            let subkey = derive_subkey(dek.material(), KeyPurpose::RangeCiphertext, &context)?;
            let cipher = DeterministicCipher::new(subkey)?;
            let payload = cipher.decrypt(value.ciphertext(), &context)?;
            let Some((kind, stored_domain, scaled)) = parse_range_payload(&payload) else {
                return Err(decryption_failed());
            };

            let declared = (domain.precision(), domain.scaled_min(), domain.scaled_max());
            if stored_domain != declared {
                return Err(Error::schema_mismatch(
                    field,
                    "range domain or precision changed",
                ));
            }
            if !domain.contains_scaled(scaled) {
                return Err(decryption_failed());
            }
            if range_token(dek, &context, domain, scaled)?.as_slice() != value.token() {
                return Err(decryption_failed());
            }

            match kind {
                RANGE_KIND_INTEGER => {
                    let factor = 10i64.pow(domain.precision());
                    Ok(FieldValue::Integer(scaled / factor))
                }
                RANGE_KIND_DECIMAL => Ok(FieldValue::Decimal(domain.unscale(scaled))),
                _ => Err(decryption_failed()),
            }
        }
        (Strategy::Randomized, StrategyTag::Randomized) => {
            let subkey = derive_subkey(dek.material(), KeyPurpose::Randomized, &context)?;
            let cipher = RandomizedCipher::new(subkey)?;
            let plaintext = cipher.decrypt(value.ciphertext(), &context)?;
            FieldValue::from_canonical_bytes(&plaintext)
                .ok_or_else(decryption_failed)
        }
        (strategy, tag) => Err(Error::schema_mismatch(
            field,
            format!("stored as {}, schema says {}", tag.name(), strategy.name()),
        )),
    }
}

/// Returns the payload kind and numeric value of a range plaintext.
fn range_number(value: &FieldValue, field: &FieldRef) -> Result<(u8, f64), Error> {
    let kind = match value {
        FieldValue::Integer(_) => RANGE_KIND_INTEGER,
        FieldValue::Decimal(_) => RANGE_KIND_DECIMAL,
        _ => 0,
    };
    match value.as_f64() {
        Some(number) if kind != 0 => Ok((kind, number)),
        _ => Err(Error::EncodingError {
            field: field.to_string(),
            reason: "range fields take numeric values",
        }),
    }
}

fn scale_error(err: ScaleError, field: &FieldRef) -> Error {
    match err {
        ScaleError::OutOfDomain => Error::ValueOutOfDomain {
            field: field.to_string(),
        },
        ScaleError::NotFinite => Error::EncodingError {
            field: field.to_string(),
            reason: "value is not finite",
        },
        ScaleError::Inexact => Error::EncodingError {
            field: field.to_string(),
            reason: "value is finer than the field precision",
        },
    }
}

fn range_token(
    dek: &DataEncryptionKey,
    context: &EncryptionContext<'_>,
    domain: &RangeDomain,
    scaled: i64,
) -> Result<[u8; TOKEN_SIZE], Error> {
    let subkey = derive_subkey(dek.material(), KeyPurpose::RangeToken, context)?;
    let encoder = OrderPreservingEncoder::new(&subkey)?;
    encoder
        .encode(domain.offset(scaled), domain.size())
        .ok_or_else(|| Error::EncodingError {
            field: context.field().to_string(),
            reason: "scaled value overflows the token width",
        })
}

/// `[kind:1][precision:1][scaled_min:8][scaled_max:8][scaled:8]`
#[allow(clippy::cast_possible_truncation)]
fn range_payload(kind: u8, domain: &RangeDomain, scaled: i64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(RANGE_PAYLOAD_LEN);
    payload.push(kind);
    // precision is at most MAX_PRECISION.
    payload.push(domain.precision() as u8);
    payload.extend_from_slice(&domain.scaled_min().to_be_bytes());
    payload.extend_from_slice(&domain.scaled_max().to_be_bytes());
    payload.extend_from_slice(&scaled.to_be_bytes());
    payload
}

fn parse_range_payload(payload: &[u8]) -> Option<(u8, (u32, i64, i64), i64)> {
    if payload.len() != RANGE_PAYLOAD_LEN {
        return None;
    }
    let read = |at: usize| payload[at..at + 8].try_into().ok().map(i64::from_be_bytes);
    let domain = (u32::from(payload[1]), read(2)?, read(10)?);
    Some((payload[0], domain, read(18)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::{KeyProvider, LocalKeyProvider};
    use crate::key_vault::{KeyVault, MemoryKeyVault};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn keys() -> KeyManager {
        let provider = LocalKeyProvider::new();
        provider.create_kek().unwrap();
        let vault: Arc<dyn KeyVault> = Arc::new(MemoryKeyVault::new());
        KeyManager::new(Arc::new(provider), vault)
    }

    fn balance() -> FieldSchema {
        let domain = RangeDomain::new(0.0, 10_000_000.0, 2).unwrap();
        FieldSchema::range("accounts", "balance", domain)
    }

    fn ssn() -> FieldSchema {
        FieldSchema::equality("accounts", "ssn")
    }

    fn encrypt(codec: &FieldCodec<'_>, value: &FieldValue, schema: &FieldSchema) -> EncryptedValue {
        match codec.encode(value, schema).unwrap() {
            StoredValue::Encrypted(value) => value,
            StoredValue::Plain(_) => panic!("expected an encrypted value"),
        }
    }

    fn balance_token(codec: &FieldCodec<'_>, value: f64, rounding: Rounding) -> Option<Vec<u8>> {
        codec
            .search_token(&FieldValue::Decimal(value), &balance(), rounding)
            .unwrap()
            .map(|(_, token)| token)
    }

    #[test]
    fn test_balance_scenario() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        let stored = codec
            .encode(&FieldValue::Decimal(50_000.00), &balance())
            .unwrap();
        assert_eq!(
            codec.decode(&stored, &balance()).unwrap(),
            FieldValue::Decimal(50_000.00)
        );

        let low = codec.encode(&FieldValue::Decimal(-1.0), &balance());
        assert!(
            matches!(low, Err(Error::ValueOutOfDomain { field }) if field == "accounts.balance")
        );

        let high = codec.encode(&FieldValue::Decimal(10_000_000.01), &balance());
        assert!(matches!(high, Err(Error::ValueOutOfDomain { .. })));
    }

    #[test]
    fn test_range_domain_edges_accepted() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        for edge in [0.0, 10_000_000.0] {
            let stored = codec
                .encode(&FieldValue::Decimal(edge), &balance())
                .unwrap();
            assert_eq!(
                codec.decode(&stored, &balance()).unwrap(),
                FieldValue::Decimal(edge)
            );
        }
    }

    #[test]
    fn test_range_rounds_to_precision() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        let stored = codec
            .encode(&FieldValue::Decimal(123.456), &balance())
            .unwrap();
        assert_eq!(
            codec.decode(&stored, &balance()).unwrap(),
            FieldValue::Decimal(123.46)
        );
    }

    #[test]
    fn test_range_integer_keeps_type() {
        let keys = keys();
        let domain = RangeDomain::new(0.0, 150.0, 0).unwrap();
        let schema = FieldSchema::range("accounts", "age", domain);
        keys.rotate_key(&schema).unwrap();
        let codec = FieldCodec::new(&keys);

        let stored = codec.encode(&FieldValue::Integer(42), &schema).unwrap();
        assert_eq!(
            codec.decode(&stored, &schema).unwrap(),
            FieldValue::Integer(42)
        );
    }

    #[test]
    fn test_range_rejects_non_numeric() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        let result = codec.encode(&FieldValue::from("100"), &balance());
        assert!(matches!(result, Err(Error::EncodingError { .. })));
        let result = codec.encode(&FieldValue::Decimal(f64::NAN), &balance());
        assert!(matches!(result, Err(Error::EncodingError { .. })));
    }

    #[test]
    fn test_search_token_matches_stored_token() {
        let keys = keys();
        let dek = keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        let stored = encrypt(&codec, &FieldValue::Decimal(100.0), &balance());
        let (key_id, token) = codec
            .search_token(&FieldValue::Decimal(100.0), &balance(), Rounding::Exact)
            .unwrap()
            .unwrap();
        assert_eq!(&key_id, dek.key_id());
        assert_eq!(token, stored.token());
    }

    #[test]
    fn test_search_token_directed_rounding() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        let at_100 = balance_token(&codec, 100.0, Rounding::Exact);
        let at_100_01 = balance_token(&codec, 100.01, Rounding::Exact);
        assert_eq!(balance_token(&codec, 100.004, Rounding::Floor), at_100);
        assert_eq!(balance_token(&codec, 100.004, Rounding::Ceil), at_100_01);
        assert_eq!(balance_token(&codec, 100.004, Rounding::Exact), None);
    }

    #[test]
    fn test_search_token_rejects_unqueryable_fields() {
        let keys = keys();
        let cvv = FieldSchema::randomized("transactions", "cvv");
        keys.rotate_key(&cvv).unwrap();
        let codec = FieldCodec::new(&keys);

        let result = codec.search_token(&FieldValue::from("123"), &cvv, Rounding::Exact);
        assert!(matches!(result, Err(Error::EncodingError { .. })));
    }

    #[test]
    fn test_equality_deterministic_and_token_is_ciphertext() {
        let keys = keys();
        keys.rotate_key(&ssn()).unwrap();
        let codec = FieldCodec::new(&keys);
        let value = FieldValue::from("123-45-6789");

        let a = encrypt(&codec, &value, &ssn());
        let b = encrypt(&codec, &value, &ssn());
        assert_eq!(a, b);
        assert_eq!(a.token(), a.ciphertext());
        assert_eq!(
            codec.decode(&StoredValue::Encrypted(a), &ssn()).unwrap(),
            value
        );
    }

    #[test]
    fn test_randomized_round_trip_not_deterministic() {
        let keys = keys();
        let cvv = FieldSchema::randomized("transactions", "cvv");
        keys.rotate_key(&cvv).unwrap();
        let codec = FieldCodec::new(&keys);
        let value = FieldValue::from("123");

        let a = encrypt(&codec, &value, &cvv);
        let b = encrypt(&codec, &value, &cvv);
        assert_ne!(a.ciphertext(), b.ciphertext());
        assert!(a.token().is_empty());
        assert_eq!(
            codec.decode(&StoredValue::Encrypted(a), &cvv).unwrap(),
            value
        );
    }

    #[test]
    fn test_none_is_identity() {
        let keys = keys();
        let codec = FieldCodec::new(&keys);
        let email = FieldSchema::plain("accounts", "email");
        let value = FieldValue::from("a@example.com");

        let stored = codec.encode(&value, &email).unwrap();
        assert_eq!(stored, StoredValue::Plain(value.clone()));
        assert_eq!(codec.decode(&stored, &email).unwrap(), value);
    }

    #[test]
    fn test_encode_without_key_is_unavailable() {
        let keys = keys();
        let codec = FieldCodec::new(&keys);
        let result = codec.encode(&FieldValue::from("x"), &ssn());
        assert!(matches!(result, Err(Error::KeyUnavailable { .. })));
    }

    #[test]
    fn test_decode_unknown_key() {
        let keys = keys();
        keys.rotate_key(&ssn()).unwrap();
        let codec = FieldCodec::new(&keys);

        let value = encrypt(&codec, &FieldValue::from("x"), &ssn());
        let forged = EncryptedValue::new(
            value.strategy(),
            KeyId::new(ssn().field_ref().clone(), 9),
            value.token().to_vec(),
            value.ciphertext().to_vec(),
        );
        let result = codec.decode(&StoredValue::Encrypted(forged), &ssn());
        assert!(matches!(result, Err(Error::KeyNotFound { .. })));
    }

    #[test]
    fn test_decode_tampered_ciphertext() {
        let keys = keys();
        keys.rotate_key(&ssn()).unwrap();
        let codec = FieldCodec::new(&keys);

        let value = FieldValue::from("123-45-6789");
        let value = encrypt(&codec, &value, &ssn());
        let mut ciphertext = value.ciphertext().to_vec();
        ciphertext[0] ^= 0x01;
        let tampered = EncryptedValue::new(
            value.strategy(),
            value.key_id().clone(),
            ciphertext.clone(),
            ciphertext,
        );

        let result = codec.decode(&StoredValue::Encrypted(tampered), &ssn());
        assert!(matches!(result, Err(Error::DecryptionFailed { .. })));
    }

    #[test]
    fn test_decode_tampered_range_token() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);

        let value = encrypt(&codec, &FieldValue::Decimal(10.0), &balance());
        let mut token = value.token().to_vec();
        token[7] ^= 0x01;
        let tampered = EncryptedValue::new(
            value.strategy(),
            value.key_id().clone(),
            token,
            value.ciphertext().to_vec(),
        );
        let result = codec.decode(&StoredValue::Encrypted(tampered), &balance());
        assert!(matches!(result, Err(Error::DecryptionFailed { .. })));
    }

    #[test]
    fn test_decode_after_precision_change_is_schema_mismatch() {
        let keys = keys();
        keys.rotate_key(&balance()).unwrap();
        let codec = FieldCodec::new(&keys);
        let stored = codec
            .encode(&FieldValue::Decimal(10.0), &balance())
            .unwrap();

        let domain = RangeDomain::new(0.0, 10_000_000.0, 3).unwrap();
        let migrated = FieldSchema::range("accounts", "balance", domain);
        let result = codec.decode(&stored, &migrated);
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn test_decode_strategy_mismatch() {
        let keys = keys();
        keys.rotate_key(&ssn()).unwrap();
        let codec = FieldCodec::new(&keys);
        let stored = codec.encode(&FieldValue::from("x"), &ssn()).unwrap();

        let as_randomized = FieldSchema::randomized("accounts", "ssn");
        let result = codec.decode(&stored, &as_randomized);
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));

        let as_plain = FieldSchema::plain("accounts", "ssn");
        let result = codec.decode(&stored, &as_plain);
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));

        let clear = StoredValue::Plain(FieldValue::from("x"));
        let result = codec.decode(&clear, &ssn());
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn test_decode_value_from_other_field() {
        let keys = keys();
        let number = FieldSchema::equality("accounts", "accountNumber");
        keys.rotate_key(&ssn()).unwrap();
        keys.rotate_key(&number).unwrap();
        let codec = FieldCodec::new(&keys);

        let stored = codec.encode(&FieldValue::from("x"), &ssn()).unwrap();
        let result = codec.decode(&stored, &number);
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_range_round_trip_and_order(
            a in 0.0f64..10_000_000.0,
            b in 0.0f64..10_000_000.0,
        ) {
            let keys = keys();
            keys.rotate_key(&balance()).unwrap();
            let codec = FieldCodec::new(&keys);

            let ea = encrypt(&codec, &FieldValue::Decimal(a), &balance());
            let eb = encrypt(&codec, &FieldValue::Decimal(b), &balance());

            let rounded = |x: f64| (x * 100.0).round() / 100.0;
            let da = codec
                .decode(&StoredValue::Encrypted(ea.clone()), &balance())
                .unwrap();
            prop_assert_eq!(da, FieldValue::Decimal(rounded(a)));

            if rounded(a) <= rounded(b) {
                prop_assert!(ea.token() <= eb.token());
            } else {
                prop_assert!(ea.token() > eb.token());
            }
        }

        #[test]
        fn prop_equality_round_trip(s in "[ -~]{0,40}") {
            let keys = keys();
            keys.rotate_key(&ssn()).unwrap();
            let codec = FieldCodec::new(&keys);
            let value = FieldValue::Text(s);

            let stored = codec.encode(&value, &ssn()).unwrap();
            prop_assert_eq!(codec.decode(&stored, &ssn()).unwrap(), value);
        }
    }
}
