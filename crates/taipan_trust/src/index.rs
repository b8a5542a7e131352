//! Verification of repodata documents and individual package records
//! against a pinned key set.

use std::collections::BTreeMap;

use taipan_conda_types::{PackageSignature, RepoData};
use tracing::warn;

use crate::{
    model::{canonical_json, verify_signature, Signature},
    TrustError,
};

/// Checks repodata and package signatures against the pinned key set of
/// the package manager role.
#[derive(Debug, Clone)]
pub struct RepoIndexChecker {
    pubkeys: Vec<String>,
    threshold: u32,
}

impl RepoIndexChecker {
    /// Creates a checker bound to the given hex public keys and
    /// threshold.
    pub fn new(pubkeys: Vec<String>, threshold: u32) -> Self {
        Self { pubkeys, threshold }
    }

    /// Verifies a `(signed_data, signatures)` pair: at least the
    /// configured threshold of pinned keys must have produced a valid
    /// signature over the canonical serialization of the data.
    pub fn verify_package(
        &self,
        package: &str,
        signed_data: &serde_json::Value,
        signatures: &BTreeMap<String, PackageSignature>,
    ) -> Result<(), TrustError> {
        let serialized = canonical_json(signed_data);

        let valid = self
            .pubkeys
            .iter()
            .filter(|pubkey| {
                signatures.get(*pubkey).is_some_and(|signature| {
                    verify_signature(
                        pubkey,
                        &serialized,
                        &Signature {
                            signature: signature.signature.clone(),
                            other_headers: signature.other_headers.clone(),
                        },
                    )
                })
            })
            .count() as u32;

        if valid < self.threshold {
            return Err(TrustError::ThresholdNotMet {
                role: format!("package {package}"),
                threshold: self.threshold,
                valid,
            });
        }
        Ok(())
    }

    /// Verifies the signature envelopes of a whole repodata document.
    /// Every package entry must carry a valid threshold of signatures;
    /// a repodata without a `signatures` section fails outright. A
    /// document that fails verification must not be ingested into the
    /// pool.
    pub fn verify_index(&self, repo_data: &RepoData) -> Result<(), TrustError> {
        let Some(signatures) = &repo_data.signatures else {
            return Err(TrustError::ThresholdNotMet {
                role: "repodata".to_owned(),
                threshold: self.threshold,
                valid: 0,
            });
        };

        for (filename, record) in repo_data.packages.iter().chain(&repo_data.conda_packages) {
            let Some(package_signatures) = signatures.get(filename) else {
                warn!("repodata entry {filename} carries no signatures");
                return Err(TrustError::ThresholdNotMet {
                    role: format!("package {filename}"),
                    threshold: self.threshold,
                    valid: 0,
                });
            };
            self.verify_package(filename, &record.to_signable(), package_signatures)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ed25519_dalek::{Signer, SigningKey};
    use taipan_conda_types::{PackageSignature, RepoData};

    use super::RepoIndexChecker;
    use crate::model::canonical_json;

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn pubkey_hex(key: &SigningKey) -> String {
        hex::encode(key.verifying_key().to_bytes())
    }

    fn sign(key: &SigningKey, payload: &serde_json::Value) -> PackageSignature {
        let serialized = canonical_json(payload);
        PackageSignature {
            signature: hex::encode(key.sign(&serialized).to_bytes()),
            other_headers: None,
        }
    }

    const REPODATA: &str = r#"{
        "info": {"subdir": "linux-64"},
        "packages": {
            "a-1.0-0.tar.bz2": {
                "build": "0",
                "build_number": 0,
                "depends": [],
                "name": "a",
                "subdir": "linux-64",
                "version": "1.0"
            }
        },
        "packages.conda": {}
    }"#;

    fn signed_repodata(key: &SigningKey) -> RepoData {
        let mut repodata: RepoData = serde_json::from_str(REPODATA).unwrap();
        let record = &repodata.packages["a-1.0-0.tar.bz2"];
        let signature = sign(key, &record.to_signable());
        let mut signatures = fxhash_map();
        signatures.insert(
            "a-1.0-0.tar.bz2".to_owned(),
            BTreeMap::from([(pubkey_hex(key), signature)]),
        );
        repodata.signatures = Some(signatures);
        repodata
    }

    fn fxhash_map<V>() -> fxhash::FxHashMap<String, V> {
        fxhash::FxHashMap::default()
    }

    #[test]
    fn accepts_a_properly_signed_index() {
        let key = signing_key(1);
        let checker = RepoIndexChecker::new(vec![pubkey_hex(&key)], 1);
        checker.verify_index(&signed_repodata(&key)).unwrap();
    }

    #[test]
    fn rejects_an_index_signed_by_an_unpinned_key() {
        let signing = signing_key(1);
        let pinned = signing_key(2);
        let checker = RepoIndexChecker::new(vec![pubkey_hex(&pinned)], 1);
        let error = checker.verify_index(&signed_repodata(&signing)).unwrap_err();
        assert!(
            matches!(error, crate::TrustError::ThresholdNotMet { .. }),
            "{error}"
        );
    }

    #[test]
    fn rejects_an_unsigned_index() {
        let key = signing_key(1);
        let checker = RepoIndexChecker::new(vec![pubkey_hex(&key)], 1);
        let repodata: RepoData = serde_json::from_str(REPODATA).unwrap();
        assert!(checker.verify_index(&repodata).is_err());
    }

    #[test]
    fn rejects_a_tampered_record() {
        let key = signing_key(1);
        let checker = RepoIndexChecker::new(vec![pubkey_hex(&key)], 1);
        let mut repodata = signed_repodata(&key);
        repodata
            .packages
            .get_mut("a-1.0-0.tar.bz2")
            .unwrap()
            .build_number = 99;
        assert!(checker.verify_index(&repodata).is_err());
    }

    #[test]
    fn threshold_requires_multiple_keys() {
        let key1 = signing_key(1);
        let key2 = signing_key(2);
        let checker = RepoIndexChecker::new(vec![pubkey_hex(&key1), pubkey_hex(&key2)], 2);

        // Only one of the two pinned keys signed.
        let error = checker.verify_index(&signed_repodata(&key1)).unwrap_err();
        assert!(
            matches!(error, crate::TrustError::ThresholdNotMet { .. }),
            "{error}"
        );

        // Both keys signing satisfies the threshold.
        let mut repodata = signed_repodata(&key1);
        let record = &repodata.packages["a-1.0-0.tar.bz2"];
        let second = sign(&key2, &record.to_signable());
        repodata
            .signatures
            .as_mut()
            .unwrap()
            .get_mut("a-1.0-0.tar.bz2")
            .unwrap()
            .insert(pubkey_hex(&key2), second);
        checker.verify_index(&repodata).unwrap();
    }
}
