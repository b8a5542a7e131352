#![deny(missing_docs)]

//! `taipan_trust` implements the repository trust pipeline: loading and
//! rotating the root of trust, validating the role metadata chain
//! (`root` → `key_mgr` → `pkg_mgr`), and verifying repodata and
//! per-package signatures against the pinned key set.

mod index;
mod keys;
mod model;
mod root;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use index::RepoIndexChecker;
pub use keys::{hex_to_key, hex_to_signature, KeyError};
pub use model::{
    canonical_json, verify_signature, Delegation, RoleEnvelope, RolePayload, RoleType, Signature,
};
pub use root::{load_root, RoleNames, TrustStore};

/// An error in the trust pipeline. The role name identifies which part
/// of the chain failed.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Not enough valid signatures.
    #[error("role '{role}': only {valid} of the required {threshold} signatures are valid")]
    ThresholdNotMet {
        /// The role whose signatures were checked.
        role: String,
        /// How many valid signatures are required.
        threshold: u32,
        /// How many were found.
        valid: u32,
    },

    /// The role metadata has expired.
    #[error("role '{role}' expired at {expiration}")]
    Expired {
        /// The expired role.
        role: String,
        /// When it expired.
        expiration: DateTime<Utc>,
    },

    /// A rotation candidate does not increase the version.
    #[error("role '{role}': version {found} does not increase on {current}")]
    VersionNotIncreasing {
        /// The role being rotated.
        role: String,
        /// The currently trusted version.
        current: u32,
        /// The version the candidate declares.
        found: u32,
    },

    /// The role does not delegate to the requested sub-role.
    #[error("no delegation for role '{role}'")]
    MissingDelegation {
        /// The missing delegation.
        role: String,
    },

    /// The file declares a different role type than its position in the
    /// chain requires.
    #[error("unexpected role type in '{role}' metadata")]
    UnexpectedRoleType {
        /// The role whose file was inspected.
        role: String,
    },

    /// A role file could not be read.
    #[error("failed to read trust file {path}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A role file is not valid metadata.
    #[error("malformed metadata for role '{role}': {reason}")]
    Malformed {
        /// The role whose file was parsed.
        role: String,
        /// What went wrong.
        reason: String,
    },
}
