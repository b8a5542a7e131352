//! Defines [`RepoData`], the index of all packages available in one
//! subdirectory of a channel, and [`PackageRecord`], the canonical
//! normalized package record.

mod topological_sort;

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    path::Path,
};

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use taipan_digest::{Md5Hash, Sha256Hash};
use thiserror::Error;
use url::Url;

pub use topological_sort::sort_topologically;

use crate::{
    build_number_spec::BuildNumber, utils::url::add_trailing_slash, Channel, NoArchType, Version,
};

/// An index of the package binaries available in a subdirectory of a
/// channel. Unknown top-level keys are ignored.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct RepoData {
    /// The channel information contained in the repodata.json file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ChannelInfo>,

    /// The tar.bz2 packages contained in the repodata.json file.
    #[serde(default, serialize_with = "sort_map_alphabetically")]
    pub packages: FxHashMap<String, PackageRecord>,

    /// The conda packages contained in the repodata.json file (under a
    /// different key for backwards compatibility).
    #[serde(
        default,
        rename = "packages.conda",
        serialize_with = "sort_map_alphabetically"
    )]
    pub conda_packages: FxHashMap<String, PackageRecord>,

    /// Removed packages: their files are still accessible but they must
    /// not be offered as solver candidates.
    #[serde(
        default,
        serialize_with = "sort_set_alphabetically",
        skip_serializing_if = "FxHashSet::is_empty"
    )]
    pub removed: FxHashSet<String>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version", skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    /// Per-package signature envelopes, keyed by filename and then by
    /// the hex public key that produced the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<FxHashMap<String, PackageSignatures>>,
}

/// The signatures attached to a single package, keyed by hex public key.
pub type PackageSignatures = BTreeMap<String, PackageSignature>;

/// A single signature over the signable form of a package record.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PackageSignature {
    /// The hex encoded Ed25519 signature.
    pub signature: String,

    /// For GPG-wrapped signatures, the hex encoded extra header data
    /// that is mixed into the signed digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_headers: Option<String>,
}

/// Information about the subdirectory of the channel this repodata
/// belongs to.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The channel's subdirectory.
    pub subdir: String,

    /// The base url for all package urls, absolute or relative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single record in the repodata: one binary distribution of a
/// package. The serialized field order is the canonical one used for
/// signing.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone, Hash)]
pub struct PackageRecord {
    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    pub build_number: BuildNumber,

    /// Soft compatibility bounds on co-installed packages. `None` when
    /// the source document did not carry the key at all; round-tripping
    /// preserves the distinction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constrains: Option<Vec<String>>,

    /// Specs of the packages this package needs at run time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends: Option<Vec<String>>,

    /// The license of the package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// MD5 hash of the package archive.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "taipan_digest::serde::md5"
    )]
    pub md5: Option<Md5Hash>,

    /// The name of the package.
    pub name: String,

    /// In what way the package is independent of architecture, if any.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// SHA256 hash of the package archive.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "taipan_digest::serde::sha256"
    )]
    pub sha256: Option<Sha256Hash>,

    /// The size of the package archive in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// The subdirectory this package is published under.
    #[serde(default)]
    pub subdir: String,

    /// When this entry was created, in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Tracked features; only used to down-weight packages during
    /// candidate ordering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: Version,
}

impl PackageRecord {
    /// A helper that constructs a record with the minimum required
    /// fields.
    pub fn new(name: impl Into<String>, version: Version, build: impl Into<String>) -> Self {
        Self {
            build: build.into(),
            build_number: 0,
            constrains: None,
            depends: None,
            license: None,
            md5: None,
            name: name.into(),
            noarch: NoArchType::default(),
            sha256: None,
            size: None,
            subdir: String::new(),
            timestamp: None,
            track_features: Vec::new(),
            version,
        }
    }

    /// The run-time dependency specs of this package.
    pub fn depends(&self) -> &[String] {
        self.depends.as_deref().unwrap_or(&[])
    }

    /// The compatibility constraints of this package.
    pub fn constrains(&self) -> &[String] {
        self.constrains.as_deref().unwrap_or(&[])
    }

    /// The canonical signable form of this record: a JSON object with
    /// keys in canonical (sorted) order, `depends`/`constrains` emitted
    /// as empty arrays when the source document carried the key, and
    /// `noarch` omitted when the package is architecture dependent. The
    /// output is byte-stable for any given input.
    pub fn to_signable(&self) -> Value {
        let mut signable = serde_json::Map::new();
        signable.insert("build".into(), json!(self.build));
        signable.insert("build_number".into(), json!(self.build_number));
        if let Some(constrains) = &self.constrains {
            signable.insert("constrains".into(), json!(constrains));
        }
        if let Some(depends) = &self.depends {
            signable.insert("depends".into(), json!(depends));
        }
        if let Some(license) = &self.license {
            signable.insert("license".into(), json!(license));
        }
        if let Some(md5) = &self.md5 {
            signable.insert("md5".into(), json!(format!("{md5:x}")));
        }
        signable.insert("name".into(), json!(self.name));
        if !self.noarch.is_none() {
            signable.insert(
                "noarch".into(),
                serde_json::to_value(self.noarch).expect("noarch is serializable"),
            );
        }
        if let Some(sha256) = &self.sha256 {
            signable.insert("sha256".into(), json!(format!("{sha256:x}")));
        }
        if let Some(size) = &self.size {
            signable.insert("size".into(), json!(size));
        }
        if !self.subdir.is_empty() {
            signable.insert("subdir".into(), json!(self.subdir));
        }
        if let Some(timestamp) = &self.timestamp {
            signable.insert("timestamp".into(), json!(timestamp.timestamp_millis()));
        }
        if !self.track_features.is_empty() {
            signable.insert("track_features".into(), json!(self.track_features));
        }
        signable.insert("version".into(), json!(self.version.to_string()));
        Value::Object(signable)
    }
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{} {}", self.name, self.version)
        } else {
            write!(f, "{}={}={}", self.name, self.version, self.build)
        }
    }
}

/// A [`PackageRecord`] together with the channel it came from, its
/// filename and the URL it can be downloaded from.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RepoDataRecord {
    /// The repodata record.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package archive.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The canonical download URL of the package archive.
    pub url: Url,

    /// The canonical name of the channel the package came from.
    pub channel: String,
}

impl RepoDataRecord {
    /// Reads the records of all packages extracted into a package
    /// cache directory: every `<pkg>/info/repodata_record.json` found
    /// one level below `packages_dir`. This is how an installed prefix
    /// is re-hydrated.
    pub fn collect_from_package_cache(
        packages_dir: &Path,
    ) -> Result<Vec<RepoDataRecord>, ReadRepoDataError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(packages_dir)? {
            let record_path = entry?.path().join("info").join("repodata_record.json");
            if !record_path.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(&record_path)?;
            records.push(serde_json::from_str(&content)?);
        }
        records.sort_by(|a: &RepoDataRecord, b: &RepoDataRecord| a.file_name.cmp(&b.file_name));
        Ok(records)
    }
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

/// An error that can occur when reading repodata from disk.
#[derive(Debug, Error)]
pub enum ReadRepoDataError {
    /// Reading the file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file is not valid repodata JSON.
    #[error("malformed repodata: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RepoData {
    /// Parses [`RepoData`] from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReadRepoDataError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the `base_url` specified in the repodata, if any.
    pub fn base_url(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_url.as_deref())
    }

    /// Builds the list of [`RepoDataRecord`]s from this repodata, given
    /// the channel it was fetched from. Records listed under `removed`
    /// are skipped.
    pub fn into_repo_data_records(self, channel: &Channel) -> Vec<RepoDataRecord> {
        let channel_name = channel.canonical_name();
        let base_url = self.base_url().map(ToOwned::to_owned);
        let RepoData {
            packages,
            conda_packages,
            removed,
            ..
        } = self;

        let mut records = Vec::with_capacity(packages.len() + conda_packages.len());
        for (filename, package_record) in packages
            .into_iter()
            .chain(conda_packages)
            .filter(|(filename, _)| !removed.contains(filename))
        {
            records.push(RepoDataRecord {
                url: compute_package_url(
                    &channel
                        .base_url()
                        .join(&format!("{}/", package_record.subdir))
                        .expect("subdir is a valid url fragment"),
                    base_url.as_deref(),
                    &filename,
                ),
                channel: channel_name.clone(),
                package_record,
                file_name: filename,
            });
        }
        records
    }
}

/// Computes the download URL for a package from the repodata base url,
/// an optional `base_url` override from the repodata `info` section, and
/// the filename.
pub fn compute_package_url(
    repo_data_base_url: &Url,
    base_url: Option<&str>,
    filename: &str,
) -> Url {
    let absolute_url = match base_url {
        None => repo_data_base_url.clone(),
        Some(base_url) => match Url::parse(base_url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) if !base_url.starts_with('/') => {
                add_trailing_slash(repo_data_base_url)
                    .join(base_url)
                    .expect("relative base_url must join with the repodata url")
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut url = repo_data_base_url.clone();
                url.set_path(base_url);
                url
            }
            Err(e) => unreachable!("{e}"),
        },
    };

    add_trailing_slash(&absolute_url)
        .join(filename)
        .expect("filename must join with the base url")
}

fn sort_map_alphabetically<T: Serialize, S: Serializer>(
    value: &FxHashMap<String, T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<BTreeMap<_, _>>()
        .serialize(serializer)
}

fn sort_set_alphabetically<S: Serializer>(
    value: &FxHashSet<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<std::collections::BTreeSet<_>>()
        .serialize(serializer)
}

mod timestamp {
    //! Timestamps are stored as milliseconds since the epoch. Some very
    //! old repodata entries stored seconds; values that are too small to
    //! be milliseconds are interpreted as seconds.

    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        timestamp: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match timestamp {
            Some(timestamp) => serializer.serialize_some(&timestamp.timestamp_millis()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(mut value) = Option::<i64>::deserialize(deserializer)? else {
            return Ok(None);
        };
        // Anything before ~2001 in milliseconds is assumed to be seconds.
        if value < 1_000_000_000_000 {
            value *= 1000;
        }
        Ok(Some(Utc.timestamp_millis_opt(value).single().ok_or_else(
            || serde::de::Error::custom("timestamp out of range"),
        )?))
    }
}
