//! Entry point tying schema, keys, documents and queries together.

use tracing::info;

use crate::codec::FieldCodec;
use crate::context::KeyId;
use crate::document::{DocumentTransformer, EncryptedDocument, Entity, FieldMap};
use crate::error::Error;
use crate::key_manager::KeyManager;
use crate::query::{PredicateRewriter, QueryPredicate, StoragePredicate};
use crate::schema::{FieldSchema, SchemaRegistry};
use crate::store::DocumentStore;

/// Queryable field-level encryption engine.
///
/// All operations take `&self`; an engine is meant to be shared behind an
/// `Arc` by every request handler of a process.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sorgudb::prelude::*;
///
/// let provider = LocalKeyProvider::new();
/// provider.create_kek().unwrap();
/// let keys = KeyManager::new(Arc::new(provider), Arc::new(MemoryKeyVault::new()));
/// let engine = EncryptionEngine::new(financial_schema().unwrap(), keys);
/// engine.provision_keys().unwrap();
///
/// let account = Account::new(
///     "a1",
///     "John Doe",
///     "1234567890",
///     50_000.0,
///     "123-45-6789",
///     "john@example.com",
/// );
/// let document = engine.encrypt_entity(&account).unwrap();
/// let restored: Account = engine.decrypt_entity(&document).unwrap();
/// assert_eq!(restored, account);
///
/// let query = QueryPredicate::between("balance", 100.0, 60_000.0);
/// let predicate = engine.rewrite_predicate(&query, "accounts").unwrap();
/// assert!(sorgudb::store::matches(&predicate, &document));
/// ```
#[derive(Debug)]
pub struct EncryptionEngine {
    registry: SchemaRegistry,
    keys: KeyManager,
}

impl EncryptionEngine {
    /// Creates an engine over a validated registry.
    #[must_use]
    pub const fn new(registry: SchemaRegistry, keys: KeyManager) -> Self {
        Self { registry, keys }
    }

    /// Returns the schema registry.
    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Returns the key manager.
    #[must_use]
    pub const fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Returns a field codec bound to this engine's keys.
    #[must_use]
    pub const fn codec(&self) -> FieldCodec<'_> {
        FieldCodec::new(&self.keys)
    }

    const fn transformer(&self) -> DocumentTransformer<'_> {
        DocumentTransformer::new(&self.registry, &self.keys)
    }

    /// Encrypts an entity for storage.
    ///
    /// # Errors
    ///
    /// See [`DocumentTransformer::encrypt_fields`].
    pub fn encrypt_entity<E: Entity>(&self, entity: &E) -> Result<EncryptedDocument, Error> {
        self.transformer().to_storage(entity)
    }

    /// Decrypts a stored document into an entity.
    ///
    /// # Errors
    ///
    /// See [`DocumentTransformer::from_storage`].
    pub fn decrypt_entity<E: Entity>(&self, document: &EncryptedDocument) -> Result<E, Error> {
        self.transformer().from_storage(document)
    }

    /// Encrypts a plaintext field map of `collection`.
    ///
    /// # Errors
    ///
    /// See [`DocumentTransformer::encrypt_fields`].
    pub fn encrypt_document(
        &self,
        collection: &str,
        id: &str,
        fields: FieldMap,
    ) -> Result<EncryptedDocument, Error> {
        self.transformer().encrypt_fields(collection, id, fields)
    }

    /// Decrypts a stored document into its plaintext field map.
    ///
    /// # Errors
    ///
    /// See [`DocumentTransformer::decrypt_fields`].
    pub fn decrypt_document(&self, document: &EncryptedDocument) -> Result<FieldMap, Error> {
        self.transformer().decrypt_fields(document)
    }

    /// Rewrites a plaintext predicate into a storage predicate.
    ///
    /// # Errors
    ///
    /// See [`PredicateRewriter::rewrite`].
    pub fn rewrite_predicate(
        &self,
        predicate: &QueryPredicate,
        collection: &str,
    ) -> Result<StoragePredicate, Error> {
        let rewriter = PredicateRewriter::new(&self.registry, &self.keys);
        rewriter.rewrite(predicate, collection)
    }

    /// Provisions a new active key for a field.
    ///
    /// # Errors
    ///
    /// See [`KeyManager::rotate_key`].
    pub fn rotate_key(&self, schema: &FieldSchema) -> Result<KeyId, Error> {
        Ok(self.keys.rotate_key(schema)?.key_id().clone())
    }

    /// Rotates the key of a registered field by name.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if the field is not registered, plus
    /// the errors of [`KeyManager::rotate_key`].
    pub fn rotate_field(&self, collection: &str, field: &str) -> Result<KeyId, Error> {
        let unknown = || {
            Error::schema_mismatch(format!("{collection}.{field}"), "field is not registered")
        };
        let schema = self
            .registry
            .collection(collection)?
            .field(field)
            .ok_or_else(unknown)?;
        self.rotate_key(schema)
    }

    /// Provisions a first key for every encrypted field that has none.
    /// Returns the newly created key ids.
    ///
    /// # Errors
    ///
    /// Returns a provider error if a key cannot be created or stored.
    pub fn provision_keys(&self) -> Result<Vec<KeyId>, Error> {
        let mut provisioned = Vec::new();
        for schema in self.registry.encrypted_fields() {
            provisioned.extend(self.keys.ensure_key(schema)?);
        }
        info!(provisioned = provisioned.len(), "key provisioning complete");
        Ok(provisioned)
    }

    /// Encrypts an entity and writes it to `store`.
    ///
    /// # Errors
    ///
    /// Returns encryption errors, or a provider error if the store rejects
    /// the write.
    pub fn save<E: Entity>(&self, store: &dyn DocumentStore, entity: &E) -> Result<(), Error> {
        store.insert(self.encrypt_entity(entity)?)?;
        Ok(())
    }

    /// Runs a plaintext query against `store` and decrypts the matches.
    ///
    /// # Errors
    ///
    /// Returns rewrite or decryption errors, or a provider error if the
    /// store cannot be read.
    pub fn find<E: Entity>(
        &self,
        store: &dyn DocumentStore,
        predicate: &QueryPredicate,
    ) -> Result<Vec<E>, Error> {
        let predicate = self.rewrite_predicate(predicate, E::COLLECTION)?;
        store
            .find(E::COLLECTION, &predicate)?
            .iter()
            .map(|document| self.decrypt_entity(document))
            .collect()
    }

    /// Returns the first match of a query, if any.
    ///
    /// # Errors
    ///
    /// See [`EncryptionEngine::find`].
    pub fn find_one<E: Entity>(
        &self,
        store: &dyn DocumentStore,
        predicate: &QueryPredicate,
    ) -> Result<Option<E>, Error> {
        Ok(self.find(store, predicate)?.into_iter().next())
    }

    /// Decrypts every document of the entity's collection.
    ///
    /// # Errors
    ///
    /// Returns decryption errors, or a provider error if the store cannot be
    /// read.
    pub fn all<E: Entity>(&self, store: &dyn DocumentStore) -> Result<Vec<E>, Error> {
        store
            .all(E::COLLECTION)?
            .iter()
            .map(|document| self.decrypt_entity(document))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{financial_schema, Account, Transaction};
    use crate::key_provider::{KeyProvider, LocalKeyProvider};
    use crate::key_vault::MemoryKeyVault;
    use crate::store::MemoryDocumentStore;
    use crate::value::FieldValue;
    use std::sync::Arc;

    fn engine() -> EncryptionEngine {
        let provider = LocalKeyProvider::new();
        provider.create_kek().unwrap();
        let keys = KeyManager::new(Arc::new(provider), Arc::new(MemoryKeyVault::new()));
        EncryptionEngine::new(financial_schema().unwrap(), keys)
    }

    fn account_fields() -> FieldMap {
        FieldMap::from([
            ("customerName".to_string(), FieldValue::from("Ada")),
            ("accountNumber".to_string(), FieldValue::from("1234567890")),
            ("balance".to_string(), FieldValue::Decimal(250.5)),
            ("ssn".to_string(), FieldValue::from("123-45-6789")),
            ("email".to_string(), FieldValue::from("ada@example.com")),
        ])
    }

    #[test]
    fn test_provision_keys_is_idempotent() {
        let engine = engine();
        let first = engine.provision_keys().unwrap();
        assert_eq!(first.len(), 8);
        assert!(first.iter().all(|key_id| key_id.version() == 1));
        assert!(engine.provision_keys().unwrap().is_empty());
    }

    #[test]
    fn test_provision_keys_skips_rotated_fields() {
        let engine = engine();
        engine.provision_keys().unwrap();
        engine.rotate_field("accounts", "ssn").unwrap();

        assert!(engine.provision_keys().unwrap().is_empty());
        let ssn = engine.registry().field("accounts", "ssn").unwrap();
        let active = engine.key_manager().get_active_key(ssn).unwrap();
        assert_eq!(active.key_id().version(), 2);
    }

    #[test]
    fn test_encrypt_before_provisioning_fails() {
        let engine = engine();
        let account = Account::new("a1", "n", "1", 1.0, "s", "e");
        let result = engine.encrypt_entity(&account);
        assert!(matches!(result, Err(Error::KeyUnavailable { .. })));
    }

    #[test]
    fn test_field_map_documents_round_trip() {
        let engine = engine();
        engine.provision_keys().unwrap();

        let document = engine
            .encrypt_document("accounts", "a1", account_fields())
            .unwrap();
        assert_eq!(document.id(), "a1");
        assert!(document.field("ssn").unwrap().is_encrypted());
        assert!(document.field("balance").unwrap().is_encrypted());
        let name = document.field("customerName").unwrap().as_plain();
        assert_eq!(name, Some(&FieldValue::from("Ada")));

        assert_eq!(engine.decrypt_document(&document).unwrap(), account_fields());
    }

    #[test]
    fn test_field_map_documents_check_the_schema() {
        let engine = engine();
        engine.provision_keys().unwrap();

        let mut fields = account_fields();
        fields.remove("ssn");
        let result = engine.encrypt_document("accounts", "a1", fields);
        assert!(matches!(
            result,
            Err(Error::SchemaMismatch { field, .. }) if field == "accounts.ssn"
        ));

        let result = engine.encrypt_document("ghosts", "g1", account_fields());
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn test_rotate_field_by_name() {
        let engine = engine();
        engine.provision_keys().unwrap();
        let key_id = engine.rotate_field("accounts", "ssn").unwrap();
        assert_eq!(key_id.to_string(), "accounts.ssn.v2");

        let unknown = engine.rotate_field("accounts", "nope");
        assert!(matches!(unknown, Err(Error::SchemaMismatch { .. })));
        let plain = engine.rotate_field("accounts", "email");
        assert!(matches!(plain, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_save_and_find() {
        let engine = engine();
        engine.provision_keys().unwrap();
        let store = MemoryDocumentStore::new();

        let transaction = Transaction::new(
            "t1",
            "1234567890",
            1_500.0,
            "withdrawal",
            "ATM withdrawal",
            "Local ATM",
        )
        .with_card("4111111111111111", "123", "12/25");
        engine.save(&store, &transaction).unwrap();

        let query = QueryPredicate::eq(Transaction::ACCOUNT_NUMBER, "1234567890");
        let found: Vec<Transaction> = engine.find(&store, &query).unwrap();
        assert_eq!(found, [transaction.clone()]);

        let query = QueryPredicate::eq(Transaction::ACCOUNT_NUMBER, "0000000000");
        let none: Option<Transaction> = engine.find_one(&store, &query).unwrap();
        assert!(none.is_none());

        let all: Vec<Transaction> = engine.all(&store).unwrap();
        assert_eq!(all.len(), 1);
        assert!(engine.all::<Account>(&store).unwrap().is_empty());
    }
}
