//! The role metadata model: `signed` + `signatures` envelopes with
//! delegations, thresholds and expiry timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{keys, TrustError};

/// A single signature inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Signature {
    /// Hex encoded Ed25519 signature bytes.
    pub signature: String,

    /// For GPG-wrapped signatures: hex encoded extra header data that
    /// participates in the signed digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_headers: Option<String>,
}

/// The kind of a role file.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    /// The root of trust.
    Root,
    /// The key manager, delegated to by the root.
    KeyMgr,
    /// The package manager, delegated to by the key manager. Its keys
    /// sign the repodata.
    PkgMgr,
}

/// A delegation: the public keys of a role and how many of them must
/// sign.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Delegation {
    /// The hex encoded public keys the role may use.
    pub pubkeys: Vec<String>,

    /// How many of the keys must produce a valid signature.
    pub threshold: u32,
}

/// The signed payload of a role file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePayload {
    /// The delegations this role grants, keyed by role name.
    pub delegations: BTreeMap<String, Delegation>,

    /// When this metadata expires, RFC3339 UTC (`YYYY-MM-DDThh:mm:ssZ`).
    #[serde(with = "expiration_format")]
    pub expiration: DateTime<Utc>,

    /// The version of the metadata format.
    pub metadata_spec_version: String,

    /// When this metadata was created.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_expiration_format")]
    pub timestamp: Option<DateTime<Utc>>,

    /// The role kind.
    #[serde(rename = "type")]
    pub role_type: RoleType,

    /// The version of this role file; rotation requires it to increase
    /// strictly.
    pub version: u32,
}

/// A role file: the signed payload plus the signatures over its
/// canonical serialization, keyed by the hex public key that produced
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEnvelope {
    /// The signatures over the canonical form of `signed`.
    pub signatures: BTreeMap<String, Signature>,

    /// The signed payload.
    pub signed: RolePayload,
}

impl RolePayload {
    /// The delegation this payload grants to the named role.
    pub fn delegation(&self, role: &str) -> Result<&Delegation, TrustError> {
        self.delegations
            .get(role)
            .ok_or_else(|| TrustError::MissingDelegation {
                role: role.to_owned(),
            })
    }
}

impl RoleEnvelope {
    /// Parses a role envelope from JSON text.
    pub fn from_json(role: &str, json: &str) -> Result<Self, TrustError> {
        serde_json::from_str(json).map_err(|source| TrustError::Malformed {
            role: role.to_owned(),
            reason: source.to_string(),
        })
    }

    /// Counts the valid signatures over the payload made by keys of the
    /// given delegation and checks them against its threshold.
    pub fn check_threshold(&self, role: &str, delegation: &Delegation) -> Result<(), TrustError> {
        let serialized = canonical_json(&serde_json::to_value(&self.signed).map_err(|e| {
            TrustError::Malformed {
                role: role.to_owned(),
                reason: e.to_string(),
            }
        })?);

        let valid = delegation
            .pubkeys
            .iter()
            .filter(|pubkey| {
                self.signatures
                    .get(*pubkey)
                    .is_some_and(|signature| verify_signature(pubkey, &serialized, signature))
            })
            .count() as u32;

        if valid < delegation.threshold {
            return Err(TrustError::ThresholdNotMet {
                role: role.to_owned(),
                threshold: delegation.threshold,
                valid,
            });
        }
        Ok(())
    }
}

/// Serializes a JSON value into the canonical byte form that gets
/// signed: pretty-printed with two-space indentation and object keys in
/// sorted order.
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_string_pretty(value)
        .expect("serializing a Value cannot fail")
        .into_bytes()
}

/// Verifies a single Ed25519 signature over the serialized payload.
///
/// When `other_headers` is present, the signature is GPG-wrapped: the
/// signed message is the SHA-256 of payload ‖ headers ‖ `\x04\xff` ‖
/// `be32(len(headers))` per RFC4880 §5.2.4.
pub fn verify_signature(pubkey_hex: &str, serialized: &[u8], signature: &Signature) -> bool {
    let Ok(public_key_bytes) = keys::hex_to_key(pubkey_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key_bytes) else {
        return false;
    };
    let Ok(signature_bytes) = keys::hex_to_signature(&signature.signature) else {
        return false;
    };
    let ed_signature = Ed25519Signature::from_bytes(&signature_bytes);

    if let Some(other_headers) = &signature.other_headers {
        let Ok(additional_header_data) = hex::decode(other_headers) else {
            return false;
        };

        let mut hasher = Sha256::new();
        hasher.update(serialized);
        hasher.update(&additional_header_data);
        hasher.update(b"\x04\xff");
        hasher.update((additional_header_data.len() as u32).to_be_bytes());
        let combined_hash = hasher.finalize();

        verifying_key.verify(&combined_hash, &ed_signature).is_ok()
    } else {
        verifying_key.verify(serialized, &ed_signature).is_ok()
    }
}

pub(crate) mod expiration_format {
    //! The expiry format of role metadata: RFC3339 UTC restricted to
    //! `YYYY-MM-DDThh:mm:ssZ`.

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }

    pub fn parse(text: &str) -> Result<DateTime<Utc>, String> {
        NaiveDateTime::parse_from_str(text, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid expiration timestamp '{text}': {e}"))
    }
}

pub(crate) mod optional_expiration_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::expiration_format;

    pub fn serialize<S: Serializer>(
        timestamp: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match timestamp {
            Some(timestamp) => serializer
                .serialize_some(&timestamp.format(expiration_format::FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(text) => expiration_format::parse(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{expiration_format, RoleEnvelope};

    #[test]
    fn expiration_format_is_strict() {
        assert!(expiration_format::parse("2031-01-01T00:00:00Z").is_ok());
        assert!(expiration_format::parse("2031-01-01T00:00:00+00:00").is_err());
        assert!(expiration_format::parse("2031-01-01 00:00:00").is_err());
    }

    #[test]
    fn envelope_parses() {
        let json = r#"{
            "signatures": {
                "d0c9b2d0c9b2d0c9b2d0c9b2d0c9b2d0c9b2d0c9b2d0c9b2d0c9b2d0c9b2d0c9": {
                    "signature": "00"
                }
            },
            "signed": {
                "delegations": {
                    "key_mgr": {"pubkeys": ["aa"], "threshold": 1},
                    "root": {"pubkeys": ["bb"], "threshold": 1}
                },
                "expiration": "2031-01-01T00:00:00Z",
                "metadata_spec_version": "0.6.0",
                "type": "root",
                "version": 1
            }
        }"#;

        let envelope = RoleEnvelope::from_json("root", json).unwrap();
        assert_eq!(envelope.signed.version, 1);
        assert_eq!(envelope.signed.delegations.len(), 2);
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        assert!(RoleEnvelope::from_json("root", "{}").is_err());
    }
}
