//! Keyed order-preserving encoding for range tokens.
//!
//! The domain `[0, size)` is mapped into the 64-bit token space by recursive
//! bisection. At every node the domain is split at its midpoint and the
//! current token interval is split at a point chosen by HMAC-SHA256 over the
//! node coordinates, constrained so both halves keep at least as many token
//! values as domain values. A value's token is a keyed pseudorandom point in
//! the leaf interval it reaches.
//!
//! Two values share a path until the node that separates them, where the
//! smaller one goes left of the split and the larger one right, so the map is
//! strictly increasing: `a < b` implies `token(a) < token(b)`. Tokens are
//! big-endian, so byte-lexicographic order equals numeric order.
//!
//! Tokens reveal order (and, like any order-preserving scheme, approximate
//! distance). Recovering a value from a token requires the key.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Width of a range token in bytes.
pub const TOKEN_SIZE: usize = 8;

/// HMAC key size for the transform.
pub const OPE_KEY_SIZE: usize = 32;

const DOMAIN_LABEL: &[u8] = b"sorgudb-ope-v1";

/// Order-preserving encoder bound to one subkey.
#[derive(Clone)]
pub struct OrderPreservingEncoder {
    mac: HmacSha256,
}

impl OrderPreservingEncoder {
    /// Creates an encoder from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is not 32 bytes.
    pub fn new(key: &SecretVec<u8>) -> Result<Self, Error> {
        let key = key.expose_secret();
        let invalid_length = || Error::InvalidKeyLength {
            expected: OPE_KEY_SIZE,
            actual: key.len(),
        };
        if key.len() != OPE_KEY_SIZE {
            return Err(invalid_length());
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| invalid_length())?;
        Ok(Self { mac })
    }

    /// Encodes `offset` from a domain of `size` values.
    ///
    /// Returns `None` if the domain is empty or `offset` lies outside it.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, offset: u64, size: u64) -> Option<[u8; TOKEN_SIZE]> {
        if size == 0 || offset >= size {
            return None;
        }

        let x = u128::from(offset);
        let mut node = Node {
            d_lo: 0,
            d_hi: u128::from(size - 1),
            r_lo: 0,
            r_hi: u128::from(u64::MAX),
        };

        while node.d_lo < node.d_hi {
            let d_mid = node.d_lo + (node.d_hi - node.d_lo) / 2;
            let left = d_mid - node.d_lo + 1;
            let right = node.d_hi - d_mid;

            // The split is the last token of the left half.
            let s_lo = node.r_lo + left - 1;
            let s_hi = node.r_hi - right;
            let split = s_lo + self.prf(&node) % (s_hi - s_lo + 1);

            if x <= d_mid {
                node.d_hi = d_mid;
                node.r_hi = split;
            } else {
                node.d_lo = d_mid + 1;
                node.r_lo = split + 1;
            }
        }

        let token = node.r_lo + self.prf(&node) % (node.r_hi - node.r_lo + 1);
        // r_hi never exceeds u64::MAX.
        Some((token as u64).to_be_bytes())
    }

    fn prf(&self, node: &Node) -> u128 {
        let mut mac = self.mac.clone();
        mac.update(DOMAIN_LABEL);
        mac.update(&node.d_lo.to_be_bytes());
        mac.update(&node.d_hi.to_be_bytes());
        mac.update(&node.r_lo.to_be_bytes());
        mac.update(&node.r_hi.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        u128::from_be_bytes(head)
    }
}

/// Current domain interval and token interval, both inclusive.
struct Node {
    d_lo: u128,
    d_hi: u128,
    r_lo: u128,
    r_hi: u128,
}
