//! Field references, key identifiers and the encryption context.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifies one encrypted field slot: a `(collection, field)` pair.
///
/// Exactly one DEK is active per slot at any time.
///
/// # Example
///
/// ```
/// use sorgudb::context::FieldRef;
///
/// let field = FieldRef::new("accounts", "balance");
/// assert_eq!(field.to_string(), "accounts.balance");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    collection: String,
    field: String,
}

impl FieldRef {
    /// Creates a new field reference.
    #[must_use]
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.field)
    }
}

/// Identifier of a data encryption key: the field slot plus a version.
///
/// Versions start at 1 and increase by one on every rotation. The textual
/// form `collection.field.vN` is what gets embedded in encrypted values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId {
    field: FieldRef,
    version: u32,
}

impl KeyId {
    /// Creates a key id for the given slot and version.
    #[must_use]
    pub const fn new(field: FieldRef, version: u32) -> Self {
        Self { field, version }
    }

    /// Returns the field slot this key belongs to.
    #[must_use]
    pub const fn field(&self) -> &FieldRef {
        &self.field
    }

    /// Returns the key version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Returns the id of the key that would replace this one on rotation.
    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            field: self.field.clone(),
            version: self.version + 1,
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}", self.field, self.version)
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let not_found = || Error::KeyNotFound {
            key_id: s.to_string(),
        };

        let (slot, version) = s.rsplit_once(".v").ok_or_else(not_found)?;
        let version: u32 = version.parse().map_err(|_| not_found())?;
        let (collection, field) = slot.split_once('.').ok_or_else(not_found)?;
        if collection.is_empty() || field.is_empty() || field.contains('.') || version == 0 {
            return Err(not_found());
        }

        Ok(Self::new(FieldRef::new(collection, field), version))
    }
}

/// Context bound into every ciphertext and every derived subkey.
///
/// Binding the field and key id means a ciphertext copied into another field,
/// or replayed under another key, fails authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionContext<'a> {
    field: &'a FieldRef,
    key_id: &'a KeyId,
}

impl<'a> EncryptionContext<'a> {
    /// Creates a context for the given field and key.
    #[must_use]
    pub const fn new(field: &'a FieldRef, key_id: &'a KeyId) -> Self {
        Self { field, key_id }
    }

    /// Returns the field reference.
    #[must_use]
    pub const fn field(&self) -> &FieldRef {
        self.field
    }

    /// Returns the key id.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        self.key_id
    }
}

impl fmt::Display for EncryptionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.field.collection(), self.field.field(), self.key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_display() {
        let key_id = KeyId::new(FieldRef::new("accounts", "ssn"), 3);
        assert_eq!(key_id.to_string(), "accounts.ssn.v3");
    }

    #[test]
    fn test_key_id_parse_round_trip() {
        let key_id: KeyId = "transactions.amount.v12".parse().unwrap();
        assert_eq!(key_id.field(), &FieldRef::new("transactions", "amount"));
        assert_eq!(key_id.version(), 12);
        assert_eq!(key_id.to_string(), "transactions.amount.v12");
    }

    #[test]
    fn test_key_id_parse_rejects_garbage() {
        let garbage = [
            "",
            "accounts",
            "accounts.ssn",
            "accounts.ssn.vx",
            ".ssn.v1",
            "accounts.ssn.v0",
        ];
        for bad in garbage {
            let result = bad.parse::<KeyId>();
            assert!(matches!(result, Err(Error::KeyNotFound { .. })), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_key_id_next() {
        let key_id = KeyId::new(FieldRef::new("accounts", "balance"), 1);
        let next = key_id.next();
        assert_eq!(next.version(), 2);
        assert_eq!(next.field(), key_id.field());
        assert!(next > key_id);
    }

    #[test]
    fn test_encryption_context_display() {
        let field = FieldRef::new("accounts", "balance");
        let key_id = KeyId::new(field.clone(), 2);
        let ctx = EncryptionContext::new(&field, &key_id);
        assert_eq!(ctx.to_string(), "accounts|balance|accounts.balance.v2");
    }
}
