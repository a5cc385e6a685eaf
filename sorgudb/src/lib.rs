//! # `SorguDB`
//!
//! Queryable field-level encryption for document stores.
//!
//! Fields are declared per collection with a strategy. Equality fields are
//! encrypted deterministically so storage can match them, range fields carry
//! an order-preserving token next to a reversible ciphertext, and randomized
//! fields are plain authenticated encryption. Predicates written against
//! plaintext are rewritten into predicates over tokens, so a storage backend
//! answers queries without ever holding a key.
//!
//! ## Features
//!
//! - Deterministic encryption (AES-SIV) for equality queries
//! - Keyed order-preserving tokens for range queries
//! - Randomized encryption (ChaCha20-Poly1305) for non-queryable fields
//! - Envelope encryption with KEK/DEK separation and per-field key slots
//! - Key rotation without re-encryption of stored data
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sorgudb::prelude::*;
//! use sorgudb_key_file::{FileKeyProvider, FileKeyVault};
//!
//! let provider = FileKeyProvider::new("./keys")?;
//! let vault = FileKeyVault::new("./keys")?;
//! let keys = KeyManager::new(Arc::new(provider), Arc::new(vault));
//! let engine = EncryptionEngine::new(financial_schema()?, keys);
//! engine.provision_keys()?;
//!
//! let document = engine.encrypt_entity(&account)?;
//! let query = QueryPredicate::gte("balance", 50_000.0);
//! let predicate = engine.rewrite_predicate(&query, "accounts")?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod config;
pub mod context;
pub mod deterministic;
pub mod document;
pub mod engine;
pub mod entities;
pub mod error;
pub mod header;
pub mod kdf;
pub mod key_manager;
pub mod key_provider;
pub mod key_vault;
pub mod ope;
pub mod query;
pub mod randomized;
pub mod schema;
pub mod store;
pub mod value;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::config::SchemaConfig;
    pub use crate::context::{FieldRef, KeyId};
    pub use crate::document::{EncryptedDocument, Entity, FieldMap, StoredValue};
    pub use crate::engine::EncryptionEngine;
    pub use crate::entities::{financial_schema, Account, Transaction};
    pub use crate::error::{Error, ErrorKind, KeyProviderError};
    pub use crate::header::{EncryptedValue, StrategyTag};
    pub use crate::key_manager::KeyManager;
    pub use crate::key_provider::{KeyProvider, LocalKeyProvider};
    pub use crate::key_vault::{KeyVault, MemoryKeyVault, WrappedKey};
    pub use crate::query::{Comparison, QueryPredicate, StorageOperand, StoragePredicate};
    pub use crate::schema::{FieldSchema, RangeDomain, SchemaRegistry, Strategy};
    pub use crate::store::{DocumentStore, MemoryDocumentStore};
    pub use crate::value::FieldValue;
}
