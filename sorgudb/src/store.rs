//! Storage collaborator interface and an in-memory reference store.
//!
//! A store only ever sees [`EncryptedDocument`]s and [`StoragePredicate`]s.
//! Encrypted fields are matched on their tokens by byte equality and
//! unsigned lexicographic order, which is what an index over the token
//! bytes of a real database provides.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::document::{EncryptedDocument, StoredValue};
use crate::error::KeyProviderError;
use crate::query::{Predicate, StorageOperand, StoragePredicate};

/// Persists encrypted documents and answers storage predicates.
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces a document, keyed by collection and id.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Storage` if the backend rejects the write.
    fn insert(&self, document: EncryptedDocument) -> Result<(), KeyProviderError>;

    /// Returns the documents of `collection` matching `predicate`, in id
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Storage` if the backend cannot be read.
    fn find(
        &self,
        collection: &str,
        predicate: &StoragePredicate,
    ) -> Result<Vec<EncryptedDocument>, KeyProviderError>;

    /// Returns every document of `collection`, in id order.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Storage` if the backend cannot be read.
    fn all(&self, collection: &str) -> Result<Vec<EncryptedDocument>, KeyProviderError>;
}

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<(String, String), EncryptedDocument>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns `true` if the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn insert(&self, document: EncryptedDocument) -> Result<(), KeyProviderError> {
        let key = (document.collection().to_string(), document.id().to_string());
        self.documents.write().insert(key, document);
        Ok(())
    }

    fn find(
        &self,
        collection: &str,
        predicate: &StoragePredicate,
    ) -> Result<Vec<EncryptedDocument>, KeyProviderError> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|document| document.collection() == collection)
            .filter(|document| matches(predicate, document))
            .cloned()
            .collect())
    }

    fn all(&self, collection: &str) -> Result<Vec<EncryptedDocument>, KeyProviderError> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|document| document.collection() == collection)
            .cloned()
            .collect())
    }
}

/// Evaluates a storage predicate against a document without keys.
///
/// A comparison on a missing field, between a token and a clear-text value,
/// or against a value encrypted under another key than the token's, does not
/// match.
#[must_use]
pub fn matches(predicate: &StoragePredicate, document: &EncryptedDocument) -> bool {
    match predicate {
        Predicate::And(children) => children.iter().all(|child| matches(child, document)),
        Predicate::Or(children) => children.iter().any(|child| matches(child, document)),
        Predicate::Compare { field, op, value } => {
            let ordering = compare(document.field(field), value);
            ordering.is_some_and(|ordering| op.holds(ordering))
        }
        Predicate::Between { field, low, high } => {
            let stored = document.field(field);
            compare(stored, low).is_some_and(Ordering::is_ge)
                && compare(stored, high).is_some_and(Ordering::is_le)
        }
    }
}

fn compare(stored: Option<&StoredValue>, operand: &StorageOperand) -> Option<Ordering> {
    match (stored?, operand) {
        (StoredValue::Plain(value), StorageOperand::Plain(literal)) => value.compare(literal),
        (StoredValue::Encrypted(value), StorageOperand::Token { key_id, bytes }) => {
            let comparable = value.key_id() == key_id && !value.token().is_empty();
            comparable.then(|| value.token().cmp(bytes.as_slice()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FieldRef, KeyId};
    use crate::header::{EncryptedValue, StrategyTag};
    use crate::value::FieldValue;

    fn balance_key(version: u32) -> KeyId {
        KeyId::new(FieldRef::new("accounts", "balance"), version)
    }

    fn document(id: &str, token: &[u8], name: &str, version: u32) -> EncryptedDocument {
        let key_id = balance_key(version);
        let balance = EncryptedValue::new(
            StrategyTag::Range,
            key_id.clone(),
            token.to_vec(),
            vec![0; 4],
        );
        let fields = BTreeMap::from([
            ("balance".to_string(), StoredValue::Encrypted(balance)),
            ("name".to_string(), StoredValue::Plain(FieldValue::from(name))),
        ]);
        let key_ids = BTreeMap::from([("balance".to_string(), key_id)]);
        EncryptedDocument::from_parts("accounts".into(), id.into(), fields, key_ids)
    }

    fn store() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        store.insert(document("a", &[0, 1], "Ada", 1)).unwrap();
        store.insert(document("b", &[0, 2], "Bob", 1)).unwrap();
        store.insert(document("c", &[1, 0], "Cy", 1)).unwrap();
        store
    }

    fn token(bytes: &[u8]) -> StorageOperand {
        StorageOperand::Token {
            key_id: balance_key(1),
            bytes: bytes.to_vec(),
        }
    }

    fn plain(value: &str) -> StorageOperand {
        StorageOperand::Plain(FieldValue::from(value))
    }

    fn ids(documents: &[EncryptedDocument]) -> Vec<&str> {
        documents.iter().map(EncryptedDocument::id).collect()
    }

    #[test]
    fn test_token_comparisons_are_lexicographic() {
        let store = store();

        let gte = StoragePredicate::gte("balance", token(&[0, 2]));
        assert_eq!(ids(&store.find("accounts", &gte).unwrap()), ["b", "c"]);

        let lt = StoragePredicate::lt("balance", token(&[0, 2]));
        assert_eq!(ids(&store.find("accounts", &lt).unwrap()), ["a"]);

        let between = StoragePredicate::between("balance", token(&[0, 1]), token(&[0, 2]));
        assert_eq!(ids(&store.find("accounts", &between).unwrap()), ["a", "b"]);
    }

    #[test]
    fn test_tokens_only_match_values_under_their_key() {
        let store = store();
        store.insert(document("d", &[0, 3], "Di", 2)).unwrap();

        let gte = StoragePredicate::gte("balance", token(&[0, 0]));
        assert_eq!(ids(&store.find("accounts", &gte).unwrap()), ["a", "b", "c"]);

        let rotated = StorageOperand::Token {
            key_id: balance_key(2),
            bytes: vec![0, 0],
        };
        let gte = StoragePredicate::gte("balance", rotated);
        assert_eq!(ids(&store.find("accounts", &gte).unwrap()), ["d"]);
    }

    #[test]
    fn test_plain_comparisons() {
        let store = store();
        let eq = StoragePredicate::eq("name", plain("Bob"));
        assert_eq!(ids(&store.find("accounts", &eq).unwrap()), ["b"]);
    }

    #[test]
    fn test_mixed_operand_kinds_never_match() {
        let store = store();
        let token_on_plain = StoragePredicate::eq("name", token(b"Bob"));
        assert!(store.find("accounts", &token_on_plain).unwrap().is_empty());

        let plain_on_token = StoragePredicate::gte("balance", plain(""));
        assert!(store.find("accounts", &plain_on_token).unwrap().is_empty());

        let missing = StoragePredicate::eq("nope", StorageOperand::Plain(FieldValue::Null));
        assert!(store.find("accounts", &missing).unwrap().is_empty());
    }

    #[test]
    fn test_boolean_structure() {
        let store = store();
        let predicate = StoragePredicate::or([
            StoragePredicate::eq("name", plain("Ada")),
            StoragePredicate::and([
                StoragePredicate::gt("balance", token(&[0, 2])),
                StoragePredicate::eq("name", plain("Cy")),
            ]),
        ]);
        assert_eq!(ids(&store.find("accounts", &predicate).unwrap()), ["a", "c"]);

        let everything = store.find("accounts", &StoragePredicate::and([])).unwrap();
        assert_eq!(everything.len(), 3);
        let nothing = store.find("accounts", &StoragePredicate::or([])).unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn test_collections_are_separate() {
        let store = store();
        assert_eq!(store.len(), 3);
        assert_eq!(store.all("accounts").unwrap().len(), 3);
        assert!(store.all("transactions").unwrap().is_empty());
    }

    #[test]
    fn test_insert_replaces_by_id() {
        let store = store();
        store.insert(document("a", &[9], "Ann", 1)).unwrap();
        assert_eq!(store.len(), 3);
        let eq = StoragePredicate::eq("name", plain("Ann"));
        assert_eq!(ids(&store.find("accounts", &eq).unwrap()), ["a"]);
    }
}
