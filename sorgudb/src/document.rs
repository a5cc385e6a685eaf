//! Whole-document encryption on top of the field codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::FieldCodec;
use crate::context::KeyId;
use crate::error::Error;
use crate::header::EncryptedValue;
use crate::key_manager::KeyManager;
use crate::schema::{CollectionSchema, FieldSchema, SchemaRegistry};
use crate::value::FieldValue;

/// Plaintext field map of one document, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A document type whose fields are declared in the schema registry.
pub trait Entity: Sized {
    /// Collection the entity is stored in.
    const COLLECTION: &'static str;

    /// Field declarations for the collection.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` if a declaration is invalid, for
    /// example a malformed range domain.
    fn field_schemas() -> Result<Vec<FieldSchema>, Error>;

    /// Document identifier. Stored in clear.
    fn id(&self) -> &str;

    /// Flattens the entity into plaintext fields.
    fn to_fields(&self) -> FieldMap;

    /// Rebuilds the entity from decrypted fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if a field is missing or has the wrong
    /// type.
    fn from_fields(id: &str, fields: FieldMap) -> Result<Self, Error>;
}

/// A field as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
    /// Clear-text value of a field without an encryption strategy.
    Plain(FieldValue),
    /// Encrypted value.
    Encrypted(EncryptedValue),
}

impl StoredValue {
    /// Returns true for encrypted values.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    /// Returns the clear-text value, if stored in clear.
    #[must_use]
    pub const fn as_plain(&self) -> Option<&FieldValue> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Encrypted(_) => None,
        }
    }

    /// Returns the encrypted value, if encrypted.
    #[must_use]
    pub const fn as_encrypted(&self) -> Option<&EncryptedValue> {
        match self {
            Self::Encrypted(value) => Some(value),
            Self::Plain(_) => None,
        }
    }
}

/// Storage representation of a document.
///
/// Every encrypted field is stamped in `key_ids` with the key it was
/// encrypted under, so a reader can check the stamp before resolving keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedDocument {
    collection: String,
    id: String,
    fields: BTreeMap<String, StoredValue>,
    key_ids: BTreeMap<String, KeyId>,
}

impl EncryptedDocument {
    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the document id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a stored field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&StoredValue> {
        self.fields.get(name)
    }

    /// Iterates over stored fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &StoredValue)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the key a field was encrypted under.
    #[must_use]
    pub fn key_id(&self, field: &str) -> Option<&KeyId> {
        self.key_ids.get(field)
    }

    /// Iterates over the per-field key stamps.
    pub fn key_ids(&self) -> impl Iterator<Item = (&str, &KeyId)> {
        self.key_ids
            .iter()
            .map(|(name, key_id)| (name.as_str(), key_id))
    }

    /// Assembles a document from its stored parts, as a storage backend
    /// would after reading it back.
    #[must_use]
    pub const fn from_parts(
        collection: String,
        id: String,
        fields: BTreeMap<String, StoredValue>,
        key_ids: BTreeMap<String, KeyId>,
    ) -> Self {
        Self {
            collection,
            id,
            fields,
            key_ids,
        }
    }
}

/// Applies a [`SchemaRegistry`] to whole documents.
#[derive(Debug, Clone, Copy)]
pub struct DocumentTransformer<'a> {
    registry: &'a SchemaRegistry,
    codec: FieldCodec<'a>,
}

impl<'a> DocumentTransformer<'a> {
    /// Creates a transformer.
    #[must_use]
    pub const fn new(registry: &'a SchemaRegistry, keys: &'a KeyManager) -> Self {
        Self {
            registry,
            codec: FieldCodec::new(keys),
        }
    }

    /// Encrypts an entity for storage.
    ///
    /// # Errors
    ///
    /// See [`DocumentTransformer::encrypt_fields`].
    pub fn to_storage<E: Entity>(&self, entity: &E) -> Result<EncryptedDocument, Error> {
        self.encrypt_fields(E::COLLECTION, entity.id(), entity.to_fields())
    }

    /// Decrypts a stored document into an entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if the document belongs to another
    /// collection, plus every error of
    /// [`DocumentTransformer::decrypt_fields`].
    pub fn from_storage<E: Entity>(&self, document: &EncryptedDocument) -> Result<E, Error> {
        if document.collection != E::COLLECTION {
            return Err(Error::schema_mismatch(
                &document.collection,
                format!("document does not belong to {}", E::COLLECTION),
            ));
        }
        E::from_fields(&document.id, self.decrypt_fields(document)?)
    }

    /// Encrypts a plaintext field map. Undeclared fields are stored in clear.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` for an unregistered collection or a
    /// declared encrypted field missing from `fields`, and any codec error
    /// for the declared fields.
    pub fn encrypt_fields(
        &self,
        collection: &str,
        id: &str,
        fields: FieldMap,
    ) -> Result<EncryptedDocument, Error> {
        let schema = self.registry.collection(collection)?;
        require_encrypted_fields(schema, |name| fields.contains_key(name))?;

        let mut stored = BTreeMap::new();
        let mut key_ids = BTreeMap::new();
        for (name, value) in fields {
            let value = match schema.field(&name) {
                Some(field) => self.codec.encode(&value, field).map_err(|err| {
                    let field = field.field_ref();
                    warn!(field = %field, kind = ?err.kind(), "field encryption failed");
                    err
                })?,
                None => StoredValue::Plain(value),
            };
            if let StoredValue::Encrypted(encrypted) = &value {
                key_ids.insert(name.clone(), encrypted.key_id().clone());
            }
            stored.insert(name, value);
        }

        Ok(EncryptedDocument {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: stored,
            key_ids,
        })
    }

    /// Decrypts every field of a stored document.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` when the document disagrees with the
    /// current schema: unknown collection, a declared encrypted field that
    /// is absent, a key stamp that is missing or differs from the value's
    /// key id, or a codec-level mismatch. Key and decryption errors
    /// propagate from the codec.
    pub fn decrypt_fields(&self, document: &EncryptedDocument) -> Result<FieldMap, Error> {
        let schema = self.registry.collection(&document.collection)?;
        require_encrypted_fields(schema, |name| document.fields.contains_key(name))?;

        for (name, key_id) in &document.key_ids {
            let stored = document.fields.get(name);
            if !stored.is_some_and(StoredValue::is_encrypted) {
                return Err(Error::schema_mismatch(
                    format!("{}.{name}", document.collection),
                    format!("key stamp {key_id} without an encrypted value"),
                ));
            }
        }

        let mut fields = FieldMap::new();
        for (name, stored) in &document.fields {
            let undeclared;
            let field = match schema.field(name) {
                Some(field) => field,
                None => {
                    undeclared = FieldSchema::plain(&document.collection, name.as_str());
                    &undeclared
                }
            };

            if let StoredValue::Encrypted(encrypted) = stored {
                if document.key_ids.get(name) != Some(encrypted.key_id()) {
                    return Err(Error::schema_mismatch(
                        field.field_ref(),
                        "key stamp does not match the value's key id",
                    ));
                }
            }

            let value = self.codec.decode(stored, field).map_err(|err| {
                let field = field.field_ref();
                warn!(field = %field, kind = ?err.kind(), "field decryption failed");
                err
            })?;
            fields.insert(name.clone(), value);
        }
        Ok(fields)
    }
}

fn require_encrypted_fields(
    schema: &CollectionSchema,
    present: impl Fn(&str) -> bool,
) -> Result<(), Error> {
    let mut fields = schema.encrypted_fields();
    match fields.find(|field| !present(field.name())) {
        Some(field) => Err(Error::schema_mismatch(
            field.field_ref(),
            "declared encrypted field is missing",
        )),
        None => Ok(()),
    }
}

/// Typed, consuming access to a decrypted [`FieldMap`] for
/// [`Entity::from_fields`] implementations.
#[derive(Debug)]
pub struct FieldReader {
    collection: &'static str,
    fields: FieldMap,
}

impl FieldReader {
    /// Wraps the decrypted fields of a document in `collection`.
    #[must_use]
    pub const fn new(collection: &'static str, fields: FieldMap) -> Self {
        Self { collection, fields }
    }

    /// Takes a text field.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if the field is missing or not text.
    pub fn text(&mut self, name: &str) -> Result<String, Error> {
        match self.take(name)? {
            FieldValue::Text(text) => Ok(text),
            other => Err(self.wrong_type(name, "text", &other)),
        }
    }

    /// Takes a numeric field as `f64`; integers are widened.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if the field is missing or not numeric.
    pub fn decimal(&mut self, name: &str) -> Result<f64, Error> {
        let value = self.take(name)?;
        value
            .as_f64()
            .ok_or_else(|| self.wrong_type(name, "decimal", &value))
    }

    /// Takes a timestamp field (seconds since the Unix epoch).
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if the field is missing or not a
    /// timestamp.
    pub fn timestamp(&mut self, name: &str) -> Result<i64, Error> {
        match self.take(name)? {
            FieldValue::Timestamp(seconds) => Ok(seconds),
            other => Err(self.wrong_type(name, "timestamp", &other)),
        }
    }

    fn take(&mut self, name: &str) -> Result<FieldValue, Error> {
        let field = format!("{}.{name}", self.collection);
        self.fields
            .remove(name)
            .ok_or_else(|| Error::schema_mismatch(field, "field is missing"))
    }

    fn wrong_type(&self, name: &str, expected: &str, found: &FieldValue) -> Error {
        Error::schema_mismatch(
            format!("{}.{name}", self.collection),
            format!("expected {expected}, found {}", found.type_name()),
        )
    }
}
