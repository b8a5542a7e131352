#![deny(missing_docs)]

//! `taipan_conda_types` contains the data types used by the taipan
//! package manager: versions and version specs, match specs, repodata
//! records, channels and platforms.

mod archive;
mod build_number_spec;
mod channel;
mod match_spec;
mod no_arch_type;
mod platform;
mod repo_data;
mod string_matcher;
mod utils;
mod version;
mod version_spec;

pub use archive::{ArchiveIdentifier, ArchiveType};
pub use build_number_spec::{BuildNumber, BuildNumberSpec, OrdOperator, ParseBuildNumberSpecError};
pub use channel::{
    default_platforms, Channel, ChannelConfig, ChannelSpec, ChannelSpecType, ParseChannelError,
};
pub use match_spec::{MatchSpec, NamelessMatchSpec, ParseMatchSpecError};
pub use no_arch_type::NoArchType;
pub use platform::{ParsePlatformError, Platform};
pub use repo_data::{
    compute_package_url, sort_topologically, ChannelInfo, PackageRecord, PackageSignature,
    PackageSignatures, ReadRepoDataError, RepoData, RepoDataRecord,
};
pub use string_matcher::{StringMatcher, StringMatcherParseError};
pub use version::{Component, ParseVersionError, ParseVersionErrorKind, Version};
pub use version_spec::{
    EqualityOperator, IntervalBound, LogicalOperator, ParseConstraintError,
    ParseVersionSpecError, RangeOperator, StrictRangeOperator, VersionInterval, VersionOperators,
    VersionSpec,
};

/// URL helpers used across the workspace: UNC normalization, secret
/// redaction, file path conversion.
pub mod url_utils {
    pub use crate::utils::url::{
        add_trailing_slash, directory_path_to_url, file_path_to_url, file_uri_unc2_to_unc4,
        file_uri_unc4_to_unc2, log_safe_str, parse_scheme, redact_known_secrets_from_url,
        url_to_path, FileUrlError, DEFAULT_REDACTION_STR,
    };
}

/// Path helpers.
pub mod path_utils {
    pub use crate::utils::path::{absolute_path, is_path, normalize_path};
}
