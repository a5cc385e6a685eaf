//! Serialized layout of an encrypted field value.
//!
//! The layout is what storage sees and indexes, so it must stay stable
//! across versions to remain query-compatible:
//!
//! ```text
//! [version:1][strategy:1][key_id_len:1][key_id:N][token_len:2][token:T][ct_len:2][ciphertext:C]
//! ```

use serde::{Deserialize, Serialize};

use crate::context::KeyId;
use crate::error::Error;

/// Layout version for the encoded value format.
pub const PROTOCOL_VERSION: u8 = 1;

/// Strategy tag stored in the second byte of the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StrategyTag {
    /// Deterministic equality encryption
    Equality = 1,
    /// Order-preserving token plus reversible ciphertext
    Range = 2,
    /// Randomized, non-queryable encryption
    Randomized = 3,
}

impl StrategyTag {
    /// Returns the raw tag byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a raw tag byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Equality),
            2 => Some(Self::Range),
            3 => Some(Self::Randomized),
            _ => None,
        }
    }

    /// Returns the tag name, matching [`crate::schema::Strategy::name`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Equality => "equality",
            Self::Range => "range",
            Self::Randomized => "randomized",
        }
    }
}

/// An encrypted field value.
///
/// `token` is what a storage backend matches and orders on; `ciphertext` is
/// what gets decrypted. For equality values the two coincide, randomized
/// values carry an empty token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    strategy: StrategyTag,
    key_id: KeyId,
    token: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl EncryptedValue {
    /// Creates an encrypted value.
    #[must_use]
    pub const fn new(
        strategy: StrategyTag,
        key_id: KeyId,
        token: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self {
            strategy,
            key_id,
            token,
            ciphertext,
        }
    }

    /// Returns the strategy tag.
    #[must_use]
    pub const fn strategy(&self) -> StrategyTag {
        self.strategy
    }

    /// Returns the id of the key this value was encrypted under.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Returns the searchable token.
    #[must_use]
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Returns the reversible ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serializes the value to its stable byte layout.
    ///
    /// # Errors
    ///
    /// Returns error if the key id is too long (> 255 bytes) or if the token
    /// or ciphertext is too long (> 65535 bytes).
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let key_id = self.key_id.to_string();
        let key_id_len = u8::try_from(key_id.len()).map_err(|_| {
            Error::InvalidHeader(format!("key id too long: {} bytes (max: 255)", key_id.len()))
        })?;
        let token_len = u16::try_from(self.token.len()).map_err(|_| {
            Error::InvalidHeader(format!("token too long: {} bytes (max: 65535)", self.token.len()))
        })?;
        let ciphertext_len = u16::try_from(self.ciphertext.len()).map_err(|_| {
            Error::InvalidHeader(format!(
                "ciphertext too long: {} bytes (max: 65535)",
                self.ciphertext.len()
            ))
        })?;

        let capacity = 7 + key_id.len() + self.token.len() + self.ciphertext.len();
        let mut bytes = Vec::with_capacity(capacity);
        bytes.push(PROTOCOL_VERSION);
        bytes.push(self.strategy.as_u8());
        bytes.push(key_id_len);
        bytes.extend_from_slice(key_id.as_bytes());
        bytes.extend_from_slice(&token_len.to_be_bytes());
        bytes.extend_from_slice(&self.token);
        bytes.extend_from_slice(&ciphertext_len.to_be_bytes());
        bytes.extend_from_slice(&self.ciphertext);

        Ok(bytes)
    }

    /// Parses a value from its byte layout. The input must contain exactly
    /// one value.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The data is truncated or has trailing bytes
    /// - The version is not supported
    /// - The strategy tag or key id is malformed
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut reader = Reader { data, pos: 0 };

        let version = reader.u8("version")?;
        if version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion {
                version,
                supported: PROTOCOL_VERSION.to_string(),
            });
        }

        let tag = reader.u8("strategy tag")?;
        let strategy = StrategyTag::from_u8(tag)
            .ok_or_else(|| Error::InvalidHeader(format!("unknown strategy tag {tag}")))?;

        let key_id_len = usize::from(reader.u8("key id length")?);
        let key_id = std::str::from_utf8(reader.take(key_id_len, "key id")?)
            .map_err(|_| Error::InvalidHeader("key id is not UTF-8".to_string()))?
            .parse::<KeyId>()
            .map_err(|_| Error::InvalidHeader("malformed key id".to_string()))?;

        let token_len = usize::from(reader.u16("token length")?);
        let token = reader.take(token_len, "token")?.to_vec();

        let ciphertext_len = usize::from(reader.u16("ciphertext length")?);
        let ciphertext = reader.take(ciphertext_len, "ciphertext")?.to_vec();

        if reader.pos != data.len() {
            return Err(Error::InvalidHeader(format!(
                "{} trailing bytes",
                data.len() - reader.pos
            )));
        }

        Ok(Self {
            strategy,
            key_id,
            token,
            ciphertext,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], Error> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(Error::InvalidHeader(format!("{what} truncated")));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, Error> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, Error> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}
