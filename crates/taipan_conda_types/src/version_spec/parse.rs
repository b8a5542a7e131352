//! Parsing of version specifications.
//!
//! Parsing happens in two phases: the input is first split into a tree of
//! raw terms according to the `,`/`|`/parenthesis grammar, then each term
//! is typed as a single constraint.

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, verify},
    error::ParseError,
    multi::separated_list1,
    sequence::delimited,
    IResult,
};
use thiserror::Error;

use super::{
    EqualityOperator, LogicalOperator, ParseVersionSpecError, RangeOperator, StrictRangeOperator,
    VersionSpec,
};
use crate::{version::ParseVersionError, Version};

/// An error that occurred while typing a single constraint term.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseConstraintError {
    /// The version in the constraint is malformed.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] ParseVersionError),

    /// The operator prefix is not one of the known operators.
    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    /// A `*` occurs somewhere other than a trailing glob.
    #[error("regex constraints are not supported")]
    RegexConstraintsNotSupported,

    /// A `^` without a closing `$`.
    #[error("unterminated regex constraint")]
    UnterminatedRegex,

    /// A glob version cannot be combined with this operator.
    #[error("the operator '{0}' cannot be combined with a glob version")]
    GlobVersionIncompatibleWithOperator(String),

    /// The term was empty.
    #[error("empty version constraint")]
    Empty,
}

/// The raw term tree before the constraints are typed.
#[derive(Debug, Eq, PartialEq)]
enum VersionTree<'a> {
    Term(&'a str),
    Group(LogicalOperator, Vec<VersionTree<'a>>),
}

fn whitespace_enclosed<'a, F, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

/// Flattens nested groups with the same operator and unwraps singleton
/// groups.
fn flatten_group(operator: LogicalOperator, args: Vec<VersionTree<'_>>) -> VersionTree<'_> {
    if args.len() == 1 {
        return args.into_iter().next().unwrap();
    }
    let mut result = Vec::new();
    for term in args {
        match term {
            VersionTree::Group(op, mut others) if op == operator => result.append(&mut others),
            term => result.push(term),
        }
    }
    VersionTree::Group(operator, result)
}

fn parse_term(input: &str) -> IResult<&str, VersionTree<'_>> {
    alt((
        delimited(
            whitespace_enclosed(char('(')),
            parse_or_group,
            whitespace_enclosed(char(')')),
        ),
        map(
            verify(
                take_while1(|c: char| !matches!(c, ',' | '|' | '(' | ')')),
                |term: &str| !term.trim().is_empty(),
            ),
            |term: &str| VersionTree::Term(term.trim()),
        ),
    ))(input)
}

fn parse_and_group(input: &str) -> IResult<&str, VersionTree<'_>> {
    map(
        separated_list1(whitespace_enclosed(char(',')), parse_term),
        |terms| flatten_group(LogicalOperator::And, terms),
    )(input)
}

fn parse_or_group(input: &str) -> IResult<&str, VersionTree<'_>> {
    map(
        separated_list1(whitespace_enclosed(char('|')), parse_and_group),
        |terms| flatten_group(LogicalOperator::Or, terms),
    )(input)
}

/// Types a single raw term as a version constraint.
pub(crate) fn constraint_from_str(term: &str) -> Result<VersionSpec, ParseConstraintError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(ParseConstraintError::Empty);
    }

    // Extract the leading run of operator characters and match it as a
    // whole, so that `<>` or `=!` are rejected rather than half-parsed.
    let operator_len = term
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '!' | '~'))
        .unwrap_or(term.len());
    let (operator_str, version_part) = term.split_at(operator_len);
    let operator = match operator_str {
        "" => None,
        ">" => Some(Operator::Range(RangeOperator::Greater)),
        ">=" => Some(Operator::Range(RangeOperator::GreaterEquals)),
        "<" => Some(Operator::Range(RangeOperator::Less)),
        "<=" => Some(Operator::Range(RangeOperator::LessEquals)),
        "==" => Some(Operator::Exact(EqualityOperator::Equals)),
        "!=" => Some(Operator::Exact(EqualityOperator::NotEquals)),
        "=" => Some(Operator::StartsWith),
        "~=" => Some(Operator::Compatible),
        _ => return Err(ParseConstraintError::InvalidOperator(operator_str.into())),
    };
    let version_part = version_part.trim();

    if version_part.starts_with('^') || version_part.ends_with('$') {
        return if version_part.starts_with('^') && !version_part.ends_with('$') {
            Err(ParseConstraintError::UnterminatedRegex)
        } else {
            Err(ParseConstraintError::RegexConstraintsNotSupported)
        };
    }

    // A pure glob matches anything; only operators that keep that meaning
    // may prefix it.
    if version_part == "*" || version_part == "*.*" {
        return match operator {
            None
            | Some(Operator::StartsWith)
            | Some(Operator::Compatible)
            | Some(Operator::Exact(EqualityOperator::Equals))
            | Some(Operator::Range(RangeOperator::GreaterEquals))
            | Some(Operator::Range(RangeOperator::LessEquals)) => Ok(VersionSpec::Any),
            _ => Err(ParseConstraintError::GlobVersionIncompatibleWithOperator(
                operator_str.into(),
            )),
        };
    }

    // Trailing `.*`, `*` (and sloppy `.*.` variants) turn a constraint
    // into a glob; a `*` anywhere else would be a regex.
    let version_str = version_part.trim_end_matches(['.', '*']);
    let glob = version_part[version_str.len()..].contains('*');
    if version_str.contains('*') {
        return Err(ParseConstraintError::RegexConstraintsNotSupported);
    }

    let version: Version = version_str.parse()?;

    let spec = match (operator, glob) {
        (None, false) => VersionSpec::Exact(EqualityOperator::Equals, version),
        (None, true) | (Some(Operator::StartsWith), _) => {
            VersionSpec::StrictRange(StrictRangeOperator::StartsWith, version)
        }
        (Some(Operator::Exact(EqualityOperator::NotEquals)), true) => {
            VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, version)
        }
        (Some(Operator::Exact(op)), _) => VersionSpec::Exact(op, version),
        // `>1.2.*` means "any of the 1.2 series or above", which is
        // `>=1.2`; the other range operators keep their meaning on the
        // stripped version.
        (Some(Operator::Range(RangeOperator::Greater)), true) => {
            VersionSpec::Range(RangeOperator::GreaterEquals, version)
        }
        (Some(Operator::Range(op)), _) => VersionSpec::Range(op, version),
        (Some(Operator::Compatible), _) => {
            VersionSpec::StrictRange(StrictRangeOperator::Compatible, version)
        }
    };
    Ok(spec)
}

enum Operator {
    Range(RangeOperator),
    Exact(EqualityOperator),
    StartsWith,
    Compatible,
}

/// Parses a complete version specification.
pub(crate) fn parse_version_spec(input: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    fn convert(tree: VersionTree<'_>) -> Result<VersionSpec, ParseVersionSpecError> {
        match tree {
            VersionTree::Term(term) => {
                constraint_from_str(term).map_err(ParseVersionSpecError::InvalidConstraint)
            }
            VersionTree::Group(op, children) => Ok(VersionSpec::Group(
                op,
                children
                    .into_iter()
                    .map(convert)
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseVersionSpecError::Empty);
    }

    match all_consuming(parse_or_group)(trimmed) {
        Ok((_, tree)) => convert(tree),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            let unbalanced = trimmed.matches('(').count() != trimmed.matches(')').count();
            if unbalanced {
                Err(ParseVersionSpecError::UnclosedGroup)
            } else {
                Err(ParseVersionSpecError::UnexpectedToken(
                    e.input.chars().next().unwrap_or(' '),
                ))
            }
        }
        Err(nom::Err::Incomplete(_)) => unreachable!("parser is not streaming"),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::{constraint_from_str, ParseConstraintError};
    use crate::{
        version_spec::{EqualityOperator, RangeOperator, StrictRangeOperator},
        Version, VersionSpec,
    };
    use std::str::FromStr;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn empty() {
        assert_matches!(constraint_from_str(""), Err(ParseConstraintError::Empty));
    }

    #[test]
    fn any() {
        assert_eq!(constraint_from_str("*"), Ok(VersionSpec::Any));
        assert_eq!(constraint_from_str("*.*"), Ok(VersionSpec::Any));
    }

    #[rstest]
    #[case("<>1.2.3", "<>")]
    #[case("=!1.2.3", "=!")]
    #[case("<!=1.2.3", "<!=")]
    #[case("!=!1.2.3", "!=!")]
    #[case("<=>1.2.3", "<=>")]
    #[case("=>1.2.3", "=>")]
    fn invalid_operator(#[case] input: &str, #[case] operator: &str) {
        assert_eq!(
            constraint_from_str(input),
            Err(ParseConstraintError::InvalidOperator(operator.to_owned()))
        );
    }

    #[test]
    fn operators() {
        assert_eq!(
            constraint_from_str(">1.2.3"),
            Ok(VersionSpec::Range(RangeOperator::Greater, v("1.2.3")))
        );
        assert_eq!(
            constraint_from_str("=1.2.3"),
            Ok(VersionSpec::StrictRange(
                StrictRangeOperator::StartsWith,
                v("1.2.3")
            ))
        );
        assert_eq!(
            constraint_from_str("==1.2.3"),
            Ok(VersionSpec::Exact(EqualityOperator::Equals, v("1.2.3")))
        );
        assert_eq!(
            constraint_from_str("!=1.2.3"),
            Ok(VersionSpec::Exact(EqualityOperator::NotEquals, v("1.2.3")))
        );
        assert_eq!(
            constraint_from_str("~=1.2.3"),
            Ok(VersionSpec::StrictRange(
                StrictRangeOperator::Compatible,
                v("1.2.3")
            ))
        );
        assert_eq!(
            constraint_from_str(">=1!1.2"),
            Ok(VersionSpec::Range(RangeOperator::GreaterEquals, v("1!1.2")))
        );
    }

    #[rstest]
    #[case("=1.2.*", VersionSpec::StrictRange(StrictRangeOperator::StartsWith, v("1.2")))]
    #[case("!=1.2.*", VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, v("1.2")))]
    #[case(">=1.2.*", VersionSpec::Range(RangeOperator::GreaterEquals, v("1.2")))]
    #[case("==1.2.*", VersionSpec::Exact(EqualityOperator::Equals, v("1.2")))]
    #[case(">1.2.*", VersionSpec::Range(RangeOperator::GreaterEquals, v("1.2")))]
    #[case("<=1.2.*", VersionSpec::Range(RangeOperator::LessEquals, v("1.2")))]
    #[case("<1.2.*", VersionSpec::Range(RangeOperator::Less, v("1.2")))]
    #[case("1.2.*", VersionSpec::StrictRange(StrictRangeOperator::StartsWith, v("1.2")))]
    fn globs(#[case] input: &str, #[case] expected: VersionSpec) {
        assert_eq!(constraint_from_str(input), Ok(expected));
    }

    #[test]
    fn sloppy_globs() {
        assert_eq!(
            constraint_from_str("2023.*.*"),
            constraint_from_str("2023.*")
        );
        assert_eq!(
            constraint_from_str("0.2.18.*."),
            constraint_from_str("0.2.18.*")
        );
        assert_matches!(
            constraint_from_str("2023.*.0"),
            Err(ParseConstraintError::RegexConstraintsNotSupported)
        );
    }

    #[test]
    fn star_with_operator() {
        for input in [">=*", "==*", "=*", "~=*", "<=*"] {
            assert_eq!(constraint_from_str(input), Ok(VersionSpec::Any), "{input}");
        }
        for (input, operator) in [(">*", ">"), ("!=*", "!="), ("<*", "<")] {
            assert_eq!(
                constraint_from_str(input),
                Err(ParseConstraintError::GlobVersionIncompatibleWithOperator(
                    operator.to_owned()
                )),
                "{input}"
            );
        }
    }

    #[test]
    fn regexes_are_rejected() {
        assert_matches!(
            constraint_from_str("^1.2.3"),
            Err(ParseConstraintError::UnterminatedRegex)
        );
        assert_matches!(
            constraint_from_str("1.2.3$"),
            Err(ParseConstraintError::RegexConstraintsNotSupported)
        );
        assert_matches!(
            constraint_from_str("1.*.3"),
            Err(ParseConstraintError::RegexConstraintsNotSupported)
        );
    }

    #[test]
    fn bare_version_is_exact() {
        assert_eq!(
            constraint_from_str("1.2.3"),
            Ok(VersionSpec::Exact(EqualityOperator::Equals, v("1.2.3")))
        );
    }
}
