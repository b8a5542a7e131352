//! A specification for build numbers, e.g. `>=3` or `2`.

use std::{
    fmt::{Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The build number of a package.
pub type BuildNumber = u64;

/// An operator to compare build numbers with.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrdOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

/// A build number specification: an operator and an operand.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct BuildNumberSpec {
    op: OrdOperator,
    rhs: BuildNumber,
}

impl BuildNumberSpec {
    /// Constructs a new spec from an operator and an operand.
    pub fn new(op: OrdOperator, rhs: BuildNumber) -> Self {
        Self { op, rhs }
    }

    /// Returns whether the given build number satisfies this spec.
    pub fn matches(&self, build_number: &BuildNumber) -> bool {
        match self.op {
            OrdOperator::Gt => build_number > &self.rhs,
            OrdOperator::Ge => build_number >= &self.rhs,
            OrdOperator::Lt => build_number < &self.rhs,
            OrdOperator::Le => build_number <= &self.rhs,
            OrdOperator::Eq => build_number == &self.rhs,
            OrdOperator::Ne => build_number != &self.rhs,
        }
    }
}

/// An error that occurred while parsing a build number spec.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildNumberSpecError {
    /// The operator prefix is not recognized.
    #[error("invalid build number operator '{0}'")]
    InvalidOperator(String),

    /// The operand is not a number.
    #[error("invalid build number: {0}")]
    InvalidBuildNumber(#[from] ParseIntError),
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let operator_len = s
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '!'))
            .unwrap_or(s.len());
        let (operator_str, number) = s.split_at(operator_len);
        let op = match operator_str {
            "" | "=" | "==" => OrdOperator::Eq,
            "!=" => OrdOperator::Ne,
            ">" => OrdOperator::Gt,
            ">=" => OrdOperator::Ge,
            "<" => OrdOperator::Lt,
            "<=" => OrdOperator::Le,
            _ => {
                return Err(ParseBuildNumberSpecError::InvalidOperator(
                    operator_str.to_owned(),
                ))
            }
        };
        Ok(BuildNumberSpec::new(op, number.trim().parse()?))
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            OrdOperator::Gt => ">",
            OrdOperator::Ge => ">=",
            OrdOperator::Lt => "<",
            OrdOperator::Le => "<=",
            OrdOperator::Eq => "",
            OrdOperator::Ne => "!=",
        };
        write!(f, "{op}{}", self.rhs)
    }
}

impl Serialize for BuildNumberSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BuildNumberSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildNumberSpec, OrdOperator};

    #[test]
    fn parse_and_match() {
        let spec: BuildNumberSpec = ">=3".parse().unwrap();
        assert_eq!(spec, BuildNumberSpec::new(OrdOperator::Ge, 3));
        assert!(spec.matches(&3));
        assert!(spec.matches(&4));
        assert!(!spec.matches(&2));

        let spec: BuildNumberSpec = "2".parse().unwrap();
        assert!(spec.matches(&2));
        assert!(!spec.matches(&3));

        assert!("<>1".parse::<BuildNumberSpec>().is_err());
        assert!(">=x".parse::<BuildNumberSpec>().is_err());
    }

    #[test]
    fn display_roundtrip() {
        for source in [">=3", "2", "!=0", "<10"] {
            let spec: BuildNumberSpec = source.parse().unwrap();
            assert_eq!(spec.to_string(), source);
        }
    }
}
