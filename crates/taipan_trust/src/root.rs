//! Loading and rotating the root of trust, and walking the delegation
//! chain down to the package manager role.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    index::RepoIndexChecker,
    model::{RoleEnvelope, RoleType},
    TrustError,
};

/// The configurable file names of the role metadata.
#[derive(Debug, Clone)]
pub struct RoleNames {
    /// The key manager role name (and file stem), `key_mgr` by default.
    pub key_mgr: String,
    /// The package manager role name (and file stem), `pkg_mgr` by
    /// default.
    pub pkg_mgr: String,
}

impl Default for RoleNames {
    fn default() -> Self {
        Self {
            key_mgr: "key_mgr".to_owned(),
            pkg_mgr: "pkg_mgr".to_owned(),
        }
    }
}

/// The verified trust chain of a channel.
pub struct TrustStore {
    root: RoleEnvelope,
    key_mgr: RoleEnvelope,
    pkg_mgr: RoleEnvelope,
    names: RoleNames,
}

fn read_role_file(path: &Path, role: &str) -> Result<RoleEnvelope, TrustError> {
    let json = std::fs::read_to_string(path).map_err(|source| TrustError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    RoleEnvelope::from_json(role, &json)
}

/// Loads the reference `root.json` from the directory, follows any
/// `root.N.json` rotation chain found next to it, and verifies it.
///
/// Every rotation step must satisfy the threshold of the current root
/// *and* the threshold the candidate declares for itself; versions must
/// increase strictly by one. Expiration is checked on the final root
/// only, against the supplied time reference.
pub fn load_root(trust_dir: &Path, time_ref: DateTime<Utc>) -> Result<RoleEnvelope, TrustError> {
    let root_path = trust_dir.join("root.json");
    let mut root = read_role_file(&root_path, "root")?;

    if root.signed.role_type != RoleType::Root {
        return Err(TrustError::UnexpectedRoleType {
            role: "root".to_owned(),
        });
    }

    // The reference root must be self-signed under its own declared
    // keys.
    root.check_threshold("root", root.signed.delegation("root")?)?;

    // Follow the rotation chain.
    loop {
        let next_version = root.signed.version + 1;
        let candidate_path = trust_dir.join(format!("root.{next_version}.json"));
        if !candidate_path.exists() {
            break;
        }

        debug!("rotating root of trust to version {next_version}");
        let candidate = read_role_file(&candidate_path, "root")?;

        if candidate.signed.role_type != RoleType::Root {
            return Err(TrustError::UnexpectedRoleType {
                role: "root".to_owned(),
            });
        }
        if candidate.signed.version != next_version {
            return Err(TrustError::VersionNotIncreasing {
                role: "root".to_owned(),
                current: root.signed.version,
                found: candidate.signed.version,
            });
        }

        // Signed by the keys we already trust...
        candidate.check_threshold("root", root.signed.delegation("root")?)?;
        // ... and by the keys it declares for itself.
        candidate.check_threshold("root", candidate.signed.delegation("root")?)?;

        root = candidate;
    }

    // Expiration only matters for the root we end up trusting.
    if root.signed.expiration <= time_ref {
        return Err(TrustError::Expired {
            role: "root".to_owned(),
            expiration: root.signed.expiration,
        });
    }

    Ok(root)
}

impl TrustStore {
    /// Loads and verifies the whole trust chain from a directory
    /// holding `root.json` (plus any `root.N.json`), `key_mgr.json` and
    /// `pkg_mgr.json`.
    pub fn load(trust_dir: &Path, time_ref: DateTime<Utc>) -> Result<Self, TrustError> {
        Self::load_with_names(trust_dir, time_ref, RoleNames::default())
    }

    /// Like [`TrustStore::load`] but with configurable role names.
    pub fn load_with_names(
        trust_dir: &Path,
        time_ref: DateTime<Utc>,
        names: RoleNames,
    ) -> Result<Self, TrustError> {
        let root = load_root(trust_dir, time_ref)?;

        let key_mgr = read_role_file(
            &trust_dir.join(format!("{}.json", names.key_mgr)),
            &names.key_mgr,
        )?;
        if key_mgr.signed.role_type != RoleType::KeyMgr {
            return Err(TrustError::UnexpectedRoleType {
                role: names.key_mgr.clone(),
            });
        }
        key_mgr.check_threshold(&names.key_mgr, root.signed.delegation(&names.key_mgr)?)?;
        if key_mgr.signed.expiration <= time_ref {
            return Err(TrustError::Expired {
                role: names.key_mgr.clone(),
                expiration: key_mgr.signed.expiration,
            });
        }

        let pkg_mgr = read_role_file(
            &trust_dir.join(format!("{}.json", names.pkg_mgr)),
            &names.pkg_mgr,
        )?;
        if pkg_mgr.signed.role_type != RoleType::PkgMgr {
            return Err(TrustError::UnexpectedRoleType {
                role: names.pkg_mgr.clone(),
            });
        }
        pkg_mgr.check_threshold(&names.pkg_mgr, key_mgr.signed.delegation(&names.pkg_mgr)?)?;
        if pkg_mgr.signed.expiration <= time_ref {
            return Err(TrustError::Expired {
                role: names.pkg_mgr.clone(),
                expiration: pkg_mgr.signed.expiration,
            });
        }

        Ok(Self {
            root,
            key_mgr,
            pkg_mgr,
            names,
        })
    }

    /// The verified root envelope.
    pub fn root(&self) -> &RoleEnvelope {
        &self.root
    }

    /// The verified key manager envelope.
    pub fn key_mgr(&self) -> &RoleEnvelope {
        &self.key_mgr
    }

    /// The verified package manager envelope.
    pub fn pkg_mgr(&self) -> &RoleEnvelope {
        &self.pkg_mgr
    }

    /// Instantiates the index checker bound to the pinned package
    /// manager key set.
    pub fn index_checker(&self) -> Result<RepoIndexChecker, TrustError> {
        let delegation = self.key_mgr.signed.delegation(&self.names.pkg_mgr)?;
        Ok(RepoIndexChecker::new(
            delegation.pubkeys.clone(),
            delegation.threshold,
        ))
    }
}
