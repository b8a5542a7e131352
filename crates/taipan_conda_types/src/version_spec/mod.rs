//! Version specifications: the boolean expression tree over version
//! constraints that forms the version part of a match spec, e.g.
//! `>=3.4,<4.0` or `1.0|>=2,<3`.

pub(crate) mod interval;
pub(crate) mod parse;

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub use interval::{IntervalBound, VersionInterval};
pub use parse::ParseConstraintError;

use crate::Version;

/// An operator that compares two versions by the total order.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RangeOperator {
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
}

impl RangeOperator {
    /// Returns the complement of the current operator.
    pub fn complement(self) -> Self {
        match self {
            RangeOperator::Greater => RangeOperator::LessEquals,
            RangeOperator::GreaterEquals => RangeOperator::Less,
            RangeOperator::Less => RangeOperator::GreaterEquals,
            RangeOperator::LessEquals => RangeOperator::Greater,
        }
    }
}

/// An operator that compares versions by structure rather than order:
/// dotted-prefix matching and compatible release.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum StrictRangeOperator {
    StartsWith,
    NotStartsWith,
    Compatible,
    NotCompatible,
}

impl StrictRangeOperator {
    /// Returns the complement of the current operator.
    pub fn complement(self) -> Self {
        match self {
            StrictRangeOperator::StartsWith => StrictRangeOperator::NotStartsWith,
            StrictRangeOperator::NotStartsWith => StrictRangeOperator::StartsWith,
            StrictRangeOperator::Compatible => StrictRangeOperator::NotCompatible,
            StrictRangeOperator::NotCompatible => StrictRangeOperator::Compatible,
        }
    }
}

/// Exact equality and inequality.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum EqualityOperator {
    Equals,
    NotEquals,
}

impl EqualityOperator {
    /// Returns the complement of the current operator.
    pub fn complement(self) -> Self {
        match self {
            EqualityOperator::Equals => EqualityOperator::NotEquals,
            EqualityOperator::NotEquals => EqualityOperator::Equals,
        }
    }
}

/// All version operators combined.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VersionOperators {
    /// An order comparison.
    Range(RangeOperator),
    /// A structural comparison.
    StrictRange(StrictRangeOperator),
    /// An exact comparison.
    Exact(EqualityOperator),
}

/// The logical operator that joins the children of a group: `,` is AND,
/// `|` is OR.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum LogicalOperator {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
}

impl LogicalOperator {
    /// Returns the complement of the operator.
    pub fn complement(self) -> Self {
        match self {
            LogicalOperator::And => LogicalOperator::Or,
            LogicalOperator::Or => LogicalOperator::And,
        }
    }
}

/// A version specification: a boolean expression tree whose leaves are
/// single version constraints.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum VersionSpec {
    /// Matches no version.
    None,
    /// Matches every version (`*`).
    Any,
    /// An order comparison, e.g. `>=1.2.3`.
    Range(RangeOperator, Version),
    /// A structural comparison, e.g. `1.2.*` or `~=1.2.3`.
    StrictRange(StrictRangeOperator, Version),
    /// An exact comparison, e.g. `==1.2.3`.
    Exact(EqualityOperator, Version),
    /// A group of specifications joined by a logical operator.
    Group(LogicalOperator, Vec<VersionSpec>),
}

impl VersionSpec {
    /// Returns whether the version matches the specification. Group
    /// evaluation short-circuits.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::None => false,
            VersionSpec::Any => true,
            VersionSpec::Exact(EqualityOperator::Equals, limit) => {
                VersionInterval::singleton(limit.clone()).contains(version)
            }
            VersionSpec::Exact(EqualityOperator::NotEquals, limit) => limit != version,
            VersionSpec::Range(op, limit) => range_interval(*op, limit).contains(version),
            VersionSpec::StrictRange(StrictRangeOperator::StartsWith, limit) => {
                version.starts_with(limit)
            }
            VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, limit) => {
                !version.starts_with(limit)
            }
            VersionSpec::StrictRange(StrictRangeOperator::Compatible, limit) => {
                compatible_interval(limit).contains(version) && version.epoch() == limit.epoch()
            }
            VersionSpec::StrictRange(StrictRangeOperator::NotCompatible, limit) => {
                !VersionSpec::StrictRange(StrictRangeOperator::Compatible, limit.clone())
                    .matches(version)
            }
            VersionSpec::Group(LogicalOperator::And, group) => {
                group.iter().all(|spec| spec.matches(version))
            }
            VersionSpec::Group(LogicalOperator::Or, group) => {
                group.iter().any(|spec| spec.matches(version))
            }
        }
    }
}

/// Lowers an order comparison to the interval it denotes.
pub(crate) fn range_interval(op: RangeOperator, limit: &Version) -> VersionInterval {
    match op {
        RangeOperator::Greater => {
            VersionInterval::lower_bounded(limit.clone(), IntervalBound::Open)
        }
        RangeOperator::GreaterEquals => {
            VersionInterval::lower_bounded(limit.clone(), IntervalBound::Closed)
        }
        RangeOperator::Less => VersionInterval::upper_bounded(limit.clone(), IntervalBound::Open),
        RangeOperator::LessEquals => {
            VersionInterval::upper_bounded(limit.clone(), IntervalBound::Closed)
        }
    }
}

/// Lowers a compatible-release constraint to its interval: at least the
/// base version, below the series obtained by dropping the base's last
/// segment and bumping. A single-segment base has no upper bound.
pub(crate) fn compatible_interval(limit: &Version) -> VersionInterval {
    match limit.strip_last_segment() {
        Some(prefix) => VersionInterval::make_bounded(
            limit.clone(),
            IntervalBound::Closed,
            prefix.bump_last(),
            IntervalBound::Open,
        ),
        None => VersionInterval::lower_bounded(limit.clone(), IntervalBound::Closed),
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionSpecError {
    #[error("invalid version constraint: {0}")]
    InvalidConstraint(#[from] ParseConstraintError),

    #[error("found unexpected '{0}'")]
    UnexpectedToken(char),

    #[error("expected a closing ')'")]
    UnclosedGroup,

    #[error("empty version spec")]
    Empty,
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_version_spec(s)
    }
}

impl TryFrom<String> for VersionSpec {
    type Error = ParseVersionSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VersionSpec::from_str(&value)
    }
}

impl Display for VersionOperators {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionOperators::Range(r) => write!(f, "{r}"),
            VersionOperators::StrictRange(r) => write!(f, "{r}"),
            VersionOperators::Exact(r) => write!(f, "{r}"),
        }
    }
}

impl Display for RangeOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeOperator::Greater => write!(f, ">"),
            RangeOperator::GreaterEquals => write!(f, ">="),
            RangeOperator::Less => write!(f, "<"),
            RangeOperator::LessEquals => write!(f, "<="),
        }
    }
}

impl Display for StrictRangeOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StrictRangeOperator::StartsWith => write!(f, "="),
            StrictRangeOperator::NotStartsWith => write!(f, "!=startswith"),
            StrictRangeOperator::Compatible => write!(f, "~="),
            StrictRangeOperator::NotCompatible => write!(f, "!~="),
        }
    }
}

impl Display for EqualityOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals => write!(f, "=="),
            Self::NotEquals => write!(f, "!="),
        }
    }
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOperator::And => write!(f, ","),
            LogicalOperator::Or => write!(f, "|"),
        }
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn write(
            spec: &VersionSpec,
            f: &mut Formatter<'_>,
            parent_op: Option<LogicalOperator>,
        ) -> std::fmt::Result {
            match spec {
                VersionSpec::Any => write!(f, "*"),
                VersionSpec::StrictRange(op, version) => match op {
                    StrictRangeOperator::StartsWith => write!(f, "{version}.*"),
                    StrictRangeOperator::NotStartsWith => write!(f, "!={version}.*"),
                    op => write!(f, "{op}{version}"),
                },
                VersionSpec::Range(op, version) => write!(f, "{op}{version}"),
                VersionSpec::Exact(op, version) => write!(f, "{op}{version}"),
                VersionSpec::Group(op, group) => {
                    // Only an OR group nested in an AND group needs
                    // parenthesis; `,` binds tighter than `|`.
                    let requires_parenthesis = matches!(
                        (op, parent_op),
                        (LogicalOperator::Or, Some(LogicalOperator::And))
                    );

                    if requires_parenthesis {
                        write!(f, "(")?;
                    }
                    for (i, spec) in group.iter().enumerate() {
                        if i > 0 {
                            write!(f, "{op}")?;
                        }
                        write(spec, f, Some(*op))?;
                    }
                    if requires_parenthesis {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                VersionSpec::None => write!(f, "!"),
            }
        }

        write(self, f, None)
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{self}"))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::{EqualityOperator, LogicalOperator, RangeOperator, VersionSpec};
    use crate::Version;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn simple() {
        assert_eq!(
            VersionSpec::from_str("1.2.3"),
            Ok(VersionSpec::Exact(EqualityOperator::Equals, v("1.2.3")))
        );
        assert_eq!(
            VersionSpec::from_str(">=1.2.3"),
            Ok(VersionSpec::Range(RangeOperator::GreaterEquals, v("1.2.3")))
        );
    }

    #[test]
    fn group() {
        assert_eq!(
            VersionSpec::from_str(">=1.2.3,<2.0.0"),
            Ok(VersionSpec::Group(
                LogicalOperator::And,
                vec![
                    VersionSpec::Range(RangeOperator::GreaterEquals, v("1.2.3")),
                    VersionSpec::Range(RangeOperator::Less, v("2.0.0")),
                ],
            ))
        );
        assert_eq!(
            VersionSpec::from_str(">=1.2.3|<1.0.0"),
            Ok(VersionSpec::Group(
                LogicalOperator::Or,
                vec![
                    VersionSpec::Range(RangeOperator::GreaterEquals, v("1.2.3")),
                    VersionSpec::Range(RangeOperator::Less, v("1.0.0")),
                ],
            ))
        );
        assert_eq!(
            VersionSpec::from_str("((>=1.2.3)|<1.0.0)"),
            VersionSpec::from_str(">=1.2.3|<1.0.0")
        );
    }

    #[test]
    fn matches() {
        let spec = VersionSpec::from_str(">=1.2.3,<2.0.0").unwrap();
        assert!(!spec.matches(&v("1.2.0")));
        assert!(spec.matches(&v("1.2.3")));
        assert!(!spec.matches(&v("1!1.2.3")));

        let epoch_spec = VersionSpec::from_str(">=1!1.2,<1!2").unwrap();
        assert!(epoch_spec.matches(&v("1!1.2.3")));

        // A bare version is an exact comparison, which still equates
        // trailing-zero variants.
        let bare = VersionSpec::from_str("1.2").unwrap();
        assert!(bare.matches(&v("1.2.0")));
        assert!(!bare.matches(&v("1.2.3")));
    }

    #[test]
    fn boolean_tree() {
        let spec = VersionSpec::from_str("1.0|>=2,<3").unwrap();
        assert!(spec.matches(&v("1.0")));
        assert!(spec.matches(&v("2.5")));
        assert!(!spec.matches(&v("3.0")));
        assert!(!spec.matches(&v("1.1")));
    }

    #[test]
    fn compatible_release() {
        let spec = VersionSpec::from_str("~=2.4").unwrap();
        assert!(!spec.matches(&v("3.1")));
        assert!(spec.matches(&v("2.4")));
        assert!(spec.matches(&v("2.5")));
        assert!(!spec.matches(&v("2.1")));
    }

    #[rstest]
    #[case("2.38.*", true)]
    #[case("2.38.0.*", true)]
    #[case("2.38.0.1*", false)]
    #[case("2.38.0a.*", false)]
    fn starts_with_globs(#[case] spec: &str, #[case] expected: bool) {
        let spec = VersionSpec::from_str(spec).unwrap();
        assert_eq!(spec.matches(&v("2.38")), expected);
    }

    #[test]
    fn adjacent_constraints_require_a_separator() {
        assert!(VersionSpec::from_str(">=3.8<3.9").is_err());
    }

    #[rstest]
    #[case("(>=1,<2)|>3", ">=1,<2|>3")]
    #[case("(>=1|<2),>3", "(>=1|<2),>3")]
    #[case("(>=1|<2)|>3", ">=1|<2|>3")]
    #[case("(>=1,<2),>3", ">=1,<2,>3")]
    #[case("((>=1|>2),(>3|>4))|(>5,<6)", "(>=1|>2),(>3|>4)|>5,<6")]
    fn canonical_printing(#[case] source: &str, #[case] canonical: &str) {
        let spec = VersionSpec::from_str(source).unwrap();
        assert_eq!(spec.to_string(), canonical);
        assert_eq!(VersionSpec::from_str(canonical).unwrap(), spec);
    }

    #[rstest]
    #[case("1.2.3")]
    #[case(">=1.2.3,<2")]
    #[case("1.0|>=2,<3")]
    #[case("~=2.4")]
    #[case("1.2.*")]
    #[case("*")]
    fn display_reparses(#[case] source: &str) {
        let spec = VersionSpec::from_str(source).unwrap();
        assert_eq!(VersionSpec::from_str(&spec.to_string()).unwrap(), spec);
    }
}
