//! Serde adapters that (de)serialize digests as lowercase hex strings.
//!
//! Use them with `#[serde(with = "taipan_digest::serde::sha256")]` (or
//! the `md5` sibling) on `Option<Sha256Hash>` / `Option<Md5Hash>` fields.

macro_rules! hex_digest_module {
    ($name:ident, $algo:ty) => {
        /// Hex (de)serialization for an optional digest of this algorithm.
        pub mod $name {
            use serde::{Deserialize, Deserializer, Serializer};

            use crate::parse_digest_from_hex;

            /// Serializes the digest as a lowercase hex string.
            pub fn serialize<S: Serializer>(
                digest: &Option<digest::Output<$algo>>,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                match digest {
                    Some(digest) => serializer.serialize_some(&format!("{digest:x}")),
                    None => serializer.serialize_none(),
                }
            }

            /// Deserializes a lowercase hex string into a digest.
            pub fn deserialize<'de, D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Option<digest::Output<$algo>>, D::Error> {
                let hex = Option::<String>::deserialize(deserializer)?;
                match hex {
                    None => Ok(None),
                    Some(hex) => parse_digest_from_hex::<$algo>(&hex)
                        .map(Some)
                        .ok_or_else(|| {
                            serde::de::Error::custom(format!("invalid {} digest: {hex}", stringify!($name)))
                        }),
                }
            }
        }
    };
}

hex_digest_module!(sha256, crate::Sha256);
hex_digest_module!(md5, crate::Md5);
