//! Error types for `SorguDB` operations.
//!
//! Messages carry the field reference and the failure kind only. Plaintext
//! values, tokens and key material never appear in an error payload.

use std::fmt;

/// Coarse classification of an [`Error`], suitable for mapping onto caller
/// responses (for example a 4xx status in a service layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No active key has been provisioned for the field.
    KeyUnavailable,
    /// A referenced key id cannot be resolved.
    KeyNotFound,
    /// A range value lies outside the declared domain.
    ValueOutOfDomain,
    /// A value cannot be canonicalized or scaled.
    EncodingError,
    /// A ciphertext is malformed or does not authenticate.
    DecryptionFailed,
    /// A stored document disagrees with the current schema.
    SchemaMismatch,
    /// The field's strategy cannot answer the requested comparison.
    UnsupportedPredicate,
    /// A schema declaration failed validation.
    InvalidSchema,
    /// The serialized value layout is corrupt or from an unknown version.
    InvalidHeader,
    /// The key provider or key vault failed.
    KeyProvider,
}

/// Main error type for `SorguDB` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No active DEK has been provisioned for the field
    #[error("no active key provisioned for {field}")]
    KeyUnavailable {
        /// Field reference (`collection.field`)
        field: String,
    },

    /// The key id is unknown to the key manager and the vault
    #[error("key not found: {key_id}")]
    KeyNotFound {
        /// The unresolved key id
        key_id: String,
    },

    /// Range value outside `[min, max]`
    #[error("value out of domain for {field}")]
    ValueOutOfDomain {
        /// Field reference (`collection.field`)
        field: String,
    },

    /// The value cannot be encoded under the field's strategy
    #[error("encoding failed for {field}: {reason}")]
    EncodingError {
        /// Field reference (`collection.field`)
        field: String,
        /// Static description of the failure (never the value itself)
        reason: &'static str,
    },

    /// Ciphertext is malformed or failed authentication
    #[error("decryption failed for {field}")]
    DecryptionFailed {
        /// Field reference (`collection.field`)
        field: String,
    },

    /// Stored document does not match the current schema
    #[error("schema mismatch for {field}: {reason}")]
    SchemaMismatch {
        /// Field reference (`collection.field`), or the collection alone
        field: String,
        /// Description of the mismatch
        reason: String,
    },

    /// Predicate not supported by the field's strategy
    #[error("predicate `{op}` not supported on {field}")]
    UnsupportedPredicate {
        /// Field reference (`collection.field`)
        field: String,
        /// The offending comparison
        op: String,
    },

    /// Schema declaration failed validation
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Encrypted value layout parsing failed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Unsupported layout version
    #[error("unsupported version: {version} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found in the encoded value
        version: u8,
        /// Supported versions
        supported: String,
    },

    /// A key had an unexpected length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Key provider operation failed
    #[error("key provider error: {0}")]
    KeyProvider(#[from] KeyProviderError),
}

impl Error {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyUnavailable { .. } => ErrorKind::KeyUnavailable,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::ValueOutOfDomain { .. } => ErrorKind::ValueOutOfDomain,
            Self::EncodingError { .. } => ErrorKind::EncodingError,
            Self::DecryptionFailed { .. } | Self::InvalidKeyLength { .. } | Self::KeyDerivation => {
                ErrorKind::DecryptionFailed
            }
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::UnsupportedPredicate { .. } => ErrorKind::UnsupportedPredicate,
            Self::InvalidSchema(_) => ErrorKind::InvalidSchema,
            Self::InvalidHeader(_) | Self::UnsupportedVersion { .. } => ErrorKind::InvalidHeader,
            Self::KeyProvider(_) => ErrorKind::KeyProvider,
        }
    }

    pub(crate) fn schema_mismatch(field: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors specific to key provider and key vault operations.
#[derive(Debug)]
pub enum KeyProviderError {
    /// KEK not found
    KekNotFound(String),

    /// KEK creation failed
    CreationFailed(String),

    /// No active KEK configured
    NoActiveKek,

    /// DEK wrapping failed
    WrapFailed(String),

    /// DEK unwrapping failed
    UnwrapFailed(String),

    /// Key vault storage failed
    Storage(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KekNotFound(id) => write!(f, "KEK not found: {id}"),
            Self::CreationFailed(msg) => write!(f, "KEK creation failed: {msg}"),
            Self::NoActiveKek => write!(f, "no active KEK configured"),
            Self::WrapFailed(msg) => write!(f, "DEK wrap failed: {msg}"),
            Self::UnwrapFailed(msg) => write!(f, "DEK unwrap failed: {msg}"),
            Self::Storage(msg) => write!(f, "key vault storage failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
