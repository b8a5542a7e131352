//! The `noarch` field of a package record.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Describes how a package is independent of the architecture, if at all.
///
/// The repodata encodes this as an absent key (`None`), the string
/// `"generic"` or `true` (`GenericV1`/`GenericV2` in older documents),
/// or the string `"python"`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NoArchType {
    /// The package is architecture dependent.
    #[default]
    No,
    /// The package is architecture independent but carries no special
    /// link semantics.
    Generic,
    /// The package is a pure-python package whose entry points and
    /// `site-packages` files are rewritten at link time.
    Python,
}

impl NoArchType {
    /// Returns true if the package is architecture dependent.
    pub fn is_none(&self) -> bool {
        matches!(self, NoArchType::No)
    }

    /// Returns true if this is a pure-python noarch package.
    pub fn is_python(&self) -> bool {
        matches!(self, NoArchType::Python)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum RawNoArchType {
    /// Old-style boolean noarch, equivalent to `generic`.
    Old(bool),
    New(String),
}

impl Serialize for NoArchType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NoArchType::No => serializer.serialize_none(),
            NoArchType::Generic => serializer.serialize_str("generic"),
            NoArchType::Python => serializer.serialize_str("python"),
        }
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<RawNoArchType>::deserialize(deserializer)?;
        Ok(match raw {
            None | Some(RawNoArchType::Old(false)) => NoArchType::No,
            Some(RawNoArchType::Old(true)) => NoArchType::Generic,
            Some(RawNoArchType::New(value)) => match value.as_str() {
                "generic" => NoArchType::Generic,
                "python" => NoArchType::Python,
                _ => {
                    return Err(serde::de::Error::custom(format!(
                        "invalid noarch type '{value}'"
                    )))
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::NoArchType;

    #[test]
    fn deserialize() {
        assert_eq!(
            serde_json::from_str::<NoArchType>("\"python\"").unwrap(),
            NoArchType::Python
        );
        assert_eq!(
            serde_json::from_str::<NoArchType>("\"generic\"").unwrap(),
            NoArchType::Generic
        );
        assert_eq!(
            serde_json::from_str::<NoArchType>("true").unwrap(),
            NoArchType::Generic
        );
        assert_eq!(
            serde_json::from_str::<NoArchType>("null").unwrap(),
            NoArchType::No
        );
        assert!(serde_json::from_str::<NoArchType>("\"quantum\"").is_err());
    }
}
