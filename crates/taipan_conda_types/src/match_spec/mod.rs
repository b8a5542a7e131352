//! Match specs: the requirement grammar users type, e.g.
//! `conda-forge::python >=3.8[build_number=1]`.

pub(crate) mod parse;

use std::fmt::{Display, Formatter, Write as _};

use serde::{Deserialize, Serialize};
use taipan_digest::{Md5Hash, Sha256Hash};
use url::Url;

pub use parse::ParseMatchSpecError;

use crate::{
    build_number_spec::BuildNumberSpec, string_matcher::StringMatcher, PackageRecord,
    RepoDataRecord, VersionSpec,
};

/// An immutable bundle of constraints that a package must satisfy.
///
/// Every field is optional; an empty match spec matches everything.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct MatchSpec {
    /// The channel the package must come from.
    pub channel: Option<String>,

    /// The subdir (platform tag) the package must come from.
    pub subdir: Option<String>,

    /// The namespace of the package (reserved for future ecosystems).
    pub namespace: Option<String>,

    /// A matcher for the package name; globs are allowed.
    pub name: Option<StringMatcher>,

    /// The version constraint.
    pub version: Option<VersionSpec>,

    /// A matcher for the build string.
    pub build: Option<StringMatcher>,

    /// A constraint on the build number.
    pub build_number: Option<BuildNumberSpec>,

    /// The MD5 hash the package archive must have.
    pub md5: Option<Md5Hash>,

    /// The SHA256 hash the package archive must have.
    pub sha256: Option<Sha256Hash>,

    /// The license the package must carry.
    pub license: Option<String>,

    /// Track features the package must carry.
    pub track_features: Option<Vec<String>>,

    /// Legacy feature set the package must carry.
    pub features: Option<String>,

    /// An explicit download URL; a spec with a URL matches only that
    /// exact artifact.
    pub url: Option<Url>,

    /// The exact archive filename.
    pub file_name: Option<String>,

    /// Marks the spec as optional (from the `(optional)` parenthesis
    /// group); optional specs constrain but do not force installation.
    pub optional: bool,
}

impl MatchSpec {
    /// Returns whether the given record satisfies every constraint of
    /// this spec except the repository-level ones (`channel`, `url`,
    /// `fn`), which require a [`RepoDataRecord`].
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(name) = &self.name {
            if !name.matches(&record.name) {
                return false;
            }
        }
        if let Some(spec) = &self.version {
            if !spec.matches(&record.version) {
                return false;
            }
        }
        if let Some(build) = &self.build {
            if !build.matches(&record.build) {
                return false;
            }
        }
        if let Some(build_number) = &self.build_number {
            if !build_number.matches(&record.build_number) {
                return false;
            }
        }
        if let Some(md5) = &self.md5 {
            if record.md5.as_ref() != Some(md5) {
                return false;
            }
        }
        if let Some(sha256) = &self.sha256 {
            if record.sha256.as_ref() != Some(sha256) {
                return false;
            }
        }
        if let Some(license) = &self.license {
            if record.license.as_deref() != Some(license.as_str()) {
                return false;
            }
        }
        if let Some(track_features) = &self.track_features {
            if !track_features
                .iter()
                .all(|feature| record.track_features.contains(feature))
            {
                return false;
            }
        }
        if let Some(subdir) = &self.subdir {
            if &record.subdir != subdir {
                return false;
            }
        }
        true
    }

    /// Returns whether the given repodata record satisfies this spec,
    /// including the repository-level constraints.
    pub fn matches_record(&self, record: &RepoDataRecord) -> bool {
        if let Some(file_name) = &self.file_name {
            if &record.file_name != file_name {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if &record.url != url {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if !record.channel.trim_end_matches('/').ends_with(channel) {
                return false;
            }
        }
        self.matches(&record.package_record)
    }

    /// Renders the spec in the three-field form used by build tools:
    /// `"{name}"`, `"{name} {version}"` or `"{name} {version} {build}"`
    /// depending on which parts are constrained.
    pub fn conda_build_form(&self) -> String {
        let name = self
            .name
            .as_ref()
            .map_or_else(|| "*".to_owned(), ToString::to_string);
        match (&self.version, &self.build) {
            (Some(version), Some(build)) => format!("{name} {version} {build}"),
            (Some(version), None) => format!("{name} {version}"),
            (None, Some(build)) => format!("{name} * {build}"),
            (None, None) => name,
        }
    }
}

/// A [`MatchSpec`] without the name constraint: the form the pool interns
/// dependencies in, keyed by the name they apply to.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct NamelessMatchSpec {
    /// The version constraint.
    pub version: Option<VersionSpec>,
    /// A matcher for the build string.
    pub build: Option<StringMatcher>,
    /// A constraint on the build number.
    pub build_number: Option<BuildNumberSpec>,
    /// The MD5 hash the archive must have.
    pub md5: Option<Md5Hash>,
    /// The SHA256 hash the archive must have.
    pub sha256: Option<Sha256Hash>,
    /// The subdir the package must come from.
    pub subdir: Option<String>,
    /// The channel the package must come from.
    pub channel: Option<String>,
}

impl NamelessMatchSpec {
    /// Returns whether the given record satisfies these constraints.
    pub fn matches(&self, record: &PackageRecord) -> bool {
        MatchSpec {
            version: self.version.clone(),
            build: self.build.clone(),
            build_number: self.build_number.clone(),
            md5: self.md5,
            sha256: self.sha256,
            subdir: self.subdir.clone(),
            ..MatchSpec::default()
        }
        .matches(record)
    }
}

impl From<MatchSpec> for NamelessMatchSpec {
    fn from(spec: MatchSpec) -> Self {
        Self {
            version: spec.version,
            build: spec.build,
            build_number: spec.build_number,
            md5: spec.md5,
            sha256: spec.sha256,
            subdir: spec.subdir,
            channel: spec.channel,
        }
    }
}

impl Display for NamelessMatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{version}")?,
            None => write!(f, "*")?,
        }
        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        let mut brackets = Vec::new();
        if let Some(build_number) = &self.build_number {
            brackets.push(("build_number", build_number.to_string()));
        }
        if let Some(md5) = &self.md5 {
            brackets.push(("md5", format!("{md5:x}")));
        }
        if let Some(sha256) = &self.sha256 {
            brackets.push(("sha256", format!("{sha256:x}")));
        }
        if let Some(subdir) = &self.subdir {
            brackets.push(("subdir", subdir.clone()));
        }
        if let Some(channel) = &self.channel {
            brackets.push(("channel", channel.clone()));
        }
        if !brackets.is_empty() {
            f.write_char('[')?;
            for (i, (key, value)) in brackets.iter().enumerate() {
                if i > 0 {
                    f.write_char(',')?;
                }
                write_bracket_value(f, key, value)?;
            }
            f.write_char(']')?;
        }
        Ok(())
    }
}

/// Quotes a bracket value when it contains characters that would confuse
/// the parser.
fn write_bracket_value(f: &mut Formatter<'_>, key: &str, value: &str) -> std::fmt::Result {
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ',' | '=' | '[' | ']' | '(' | ')' | '\''))
    {
        write!(f, "{key}=\"{value}\"")
    } else {
        write!(f, "{key}={value}")
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}")?;
            // The channel-embedded subdir is the canonical position.
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}:")?;
        }

        match &self.name {
            Some(name) => write!(f, "{name}")?,
            None => write!(f, "*")?,
        }

        match (&self.version, &self.build) {
            (Some(version), Some(build)) => write!(f, " {version} {build}")?,
            (Some(version), None) => write!(f, " {version}")?,
            (None, Some(build)) => write!(f, " * {build}")?,
            (None, None) => {}
        }

        // Everything else goes into a bracket section.
        let mut brackets = Vec::new();
        if let Some(build_number) = &self.build_number {
            brackets.push(("build_number", build_number.to_string()));
        }
        if let Some(md5) = &self.md5 {
            brackets.push(("md5", format!("{md5:x}")));
        }
        if let Some(sha256) = &self.sha256 {
            brackets.push(("sha256", format!("{sha256:x}")));
        }
        if let Some(license) = &self.license {
            brackets.push(("license", license.clone()));
        }
        if let Some(track_features) = &self.track_features {
            brackets.push(("track_features", track_features.join(",")));
        }
        if let Some(features) = &self.features {
            brackets.push(("features", features.clone()));
        }
        if let Some(url) = &self.url {
            brackets.push(("url", url.to_string()));
        }
        if let Some(file_name) = &self.file_name {
            brackets.push(("fn", file_name.clone()));
        }
        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                brackets.push(("subdir", subdir.clone()));
            }
        }

        if !brackets.is_empty() {
            f.write_char('[')?;
            for (i, (key, value)) in brackets.iter().enumerate() {
                if i > 0 {
                    f.write_char(',')?;
                }
                write_bracket_value(f, key, value)?;
            }
            f.write_char(']')?;
        }

        if self.optional {
            write!(f, "(optional)")?;
        }

        Ok(())
    }
}

impl Serialize for MatchSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for MatchSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}
