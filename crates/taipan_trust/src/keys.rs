//! Total conversions between hex strings and key or signature bytes.

use thiserror::Error;

/// An error converting hex to key or signature bytes. Returned, never
/// thrown: length mismatches and bad hex are expected inputs when
/// processing untrusted metadata.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum KeyError {
    /// The input does not have the expected number of hex characters.
    #[error("expected {expected} hex characters, found {actual}")]
    InvalidLength {
        /// The expected number of hex characters.
        expected: usize,
        /// The number of characters found.
        actual: usize,
    },

    /// The input contains characters that are not hex digits.
    #[error("invalid hex encoding")]
    InvalidHex,
}

fn hex_to_bytes<const N: usize>(hex: &str) -> Result<[u8; N], KeyError> {
    if hex.len() != N * 2 {
        return Err(KeyError::InvalidLength {
            expected: N * 2,
            actual: hex.len(),
        });
    }
    let mut bytes = [0u8; N];
    hex::decode_to_slice(hex, &mut bytes).map_err(|_| KeyError::InvalidHex)?;
    Ok(bytes)
}

/// Converts a hex string to a 32-byte public key.
pub fn hex_to_key(hex: &str) -> Result<[u8; 32], KeyError> {
    hex_to_bytes(hex)
}

/// Converts a hex string to a 64-byte signature.
pub fn hex_to_signature(hex: &str) -> Result<[u8; 64], KeyError> {
    hex_to_bytes(hex)
}
