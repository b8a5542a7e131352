//! Package archive file names: `<name>-<version>-<build>.<ext>`.

use std::fmt::{Display, Formatter};

/// The known package archive formats.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ArchiveType {
    /// The older `.tar.bz2` format.
    TarBz2,
    /// The newer `.conda` format.
    Conda,
}

impl ArchiveType {
    /// Tries to determine the type of a package archive from its
    /// filename.
    pub fn try_from(path: &str) -> Option<ArchiveType> {
        Self::split_str(path).map(|(_, t)| t)
    }

    /// Splits the path into the part without the archive extension and
    /// the archive type.
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else {
            path.strip_suffix(".tar.bz2")
                .map(|path| (path, ArchiveType::TarBz2))
        }
    }

    /// The file extension of this archive type, including the leading
    /// dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }
}

/// The parts of a package archive filename.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArchiveIdentifier {
    /// The package name.
    pub name: String,
    /// The version string.
    pub version: String,
    /// The build string.
    pub build_string: String,
    /// The archive type.
    pub archive_type: ArchiveType,
}

impl ArchiveIdentifier {
    /// Parses an archive filename of the form
    /// `<name>-<version>-<build>.<ext>`. The name itself may contain
    /// dashes; version and build may not.
    pub fn try_from_filename(filename: &str) -> Option<ArchiveIdentifier> {
        let (stem, archive_type) = ArchiveType::split_str(filename)?;
        let (rest, build_string) = stem.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(ArchiveIdentifier {
            name: name.to_owned(),
            version: version.to_owned(),
            build_string: build_string.to_owned(),
            archive_type,
        })
    }

    /// Parses the last path segment of a URL or path as an archive
    /// filename.
    pub fn try_from_path(path: &str) -> Option<ArchiveIdentifier> {
        let filename = path.rsplit(['/', '\\']).next()?;
        Self::try_from_filename(filename)
    }
}

impl Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}{}",
            self.name,
            self.version,
            self.build_string,
            self.archive_type.extension()
        )
    }
}
