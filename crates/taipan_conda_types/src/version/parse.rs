//! The nom parser that turns a version string into a [`Version`].

use std::{num::ParseIntError, str::FromStr};

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while},
    character::complete::{alpha1, char, digit1, one_of},
    combinator::{eof, map, opt, value},
    error::{ErrorKind, ParseError},
    sequence::terminated,
    IResult,
};
use thiserror::Error;

use super::{Component, ComponentVec, Segment, Version};

/// An error that occurred while parsing a version string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("malformed version string '{version}' at offset {offset}: {kind}")]
pub struct ParseVersionError {
    /// The original input of the parser.
    pub version: String,

    /// One-based byte offset of the position where parsing failed.
    pub offset: usize,

    /// The kind of error.
    pub kind: ParseVersionErrorKind,
}

/// The kind of failure while parsing a version string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionErrorKind {
    /// The input was empty.
    #[error("empty string")]
    Empty,
    /// The epoch was not a number that fits an `u64`.
    #[error("epoch is not a number: {0}")]
    EpochMustBeInteger(ParseIntError),
    /// A numeral did not fit an `u64`.
    #[error("invalid numeral: {0}")]
    InvalidNumeral(ParseIntError),
    /// Expected a version component.
    #[error("expected a version component e.g. `2` or `rc`")]
    ExpectedComponent,
    /// Expected a segment separator or the end of the string.
    #[error("expected '.', '-', or '_'")]
    ExpectedSegmentSeparator,
    /// Both dashes and underscores appear as separators.
    #[error("cannot use both underscores and dashes as version segment separators")]
    CannotMixAndMatchDashesAndUnderscores,
    /// The local part after `+` is empty or malformed.
    #[error("expected a version component after '+'")]
    EmptyLocalVersion,
    /// An uncategorized parse failure.
    #[error("parse error")]
    Other,
}

/// Internal nom error type that remembers where in the input the failure
/// happened so the public error can report a one-based offset.
#[derive(Debug)]
pub(crate) struct PositionedError<'i> {
    pub(crate) remaining: &'i str,
    pub(crate) kind: ParseVersionErrorKind,
}

impl<'i> PositionedError<'i> {
    fn new(remaining: &'i str, kind: ParseVersionErrorKind) -> Self {
        Self { remaining, kind }
    }
}

impl<'i> ParseError<&'i str> for PositionedError<'i> {
    fn from_error_kind(input: &'i str, _: ErrorKind) -> Self {
        Self::new(input, ParseVersionErrorKind::Other)
    }

    fn append(_: &'i str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

type ParseResult<'i, T> = IResult<&'i str, T, PositionedError<'i>>;

/// Parses the epoch: a number followed by `!`.
fn epoch_parser(input: &str) -> ParseResult<'_, u64> {
    let (rest, digits) = terminated(digit1, char('!'))(input)?;
    let epoch = digits.parse().map_err(|e| {
        nom::Err::Failure(PositionedError::new(
            input,
            ParseVersionErrorKind::EpochMustBeInteger(e),
        ))
    })?;
    Ok((rest, epoch))
}

/// Parses a single version component.
fn component_parser(input: &str) -> ParseResult<'_, Component> {
    alt((
        map(digit1, |digits: &str| {
            digits
                .parse()
                .map(Component::Numeral)
                .map_err(ParseVersionErrorKind::InvalidNumeral)
        }),
        value(Ok(Component::Post), tag_no_case("post")),
        value(Ok(Component::Dev), tag_no_case("dev")),
        map(alpha1, |alpha: &str| {
            Ok(Component::Iden(alpha.to_lowercase().into_boxed_str()))
        }),
        // A trailing underscore is a valid identifier component; this is
        // the escape hatch for openssl-style versions like `1.0.1_`.
        map(terminated(char('_'), eof), |_| {
            Ok(Component::Iden(String::from("_").into_boxed_str()))
        }),
    ))(input)
    .and_then(|(rest, component)| match component {
        Ok(component) => Ok((rest, component)),
        Err(kind) => Err(nom::Err::Failure(PositionedError::new(input, kind))),
    })
}

/// Parses one segment: a run of components with an implicit leading zero
/// when the source starts with a letter.
fn segment_parser(separator: Option<char>) -> impl FnMut(&str) -> ParseResult<'_, Segment> {
    move |input| {
        let (mut rest, first) = component_parser(input).map_err(|e| match e {
            nom::Err::Error(_) => nom::Err::Error(PositionedError::new(
                input,
                ParseVersionErrorKind::ExpectedComponent,
            )),
            e => e,
        })?;

        let has_implicit_default = first.as_number().is_none();
        let mut components = ComponentVec::new();
        if has_implicit_default {
            components.push(Component::zero());
        }
        components.push(first);

        loop {
            match opt(component_parser)(rest)? {
                (remaining, Some(component)) => {
                    components.push(component);
                    rest = remaining;
                }
                (remaining, None) => {
                    break Ok((
                        remaining,
                        Segment {
                            components,
                            separator,
                            has_implicit_default,
                        },
                    ));
                }
            }
        }
    }
}

/// Parses a full part (the common part or the local part) into segments,
/// keeping track of the dash/underscore separator exclusivity.
fn part_parser<'i>(
    input: &'i str,
    segments: &mut Vec<Segment>,
    dash_or_underscore: &mut Option<char>,
) -> ParseResult<'i, ()> {
    let (mut rest, first) = segment_parser(None)(input)?;
    segments.push(first);

    loop {
        let (after, separator) = match alt((map(one_of("-._"), Some), value(None, eof)))(rest) {
            Ok((after, separator)) => (after, separator),
            Err(nom::Err::Error(_)) => {
                return Err(nom::Err::Error(PositionedError::new(
                    rest,
                    ParseVersionErrorKind::ExpectedSegmentSeparator,
                )))
            }
            Err(e) => return Err(e),
        };

        let Some(separator) = separator else {
            return Ok((rest, ()));
        };

        match (*dash_or_underscore, separator) {
            (None, '-' | '_') => *dash_or_underscore = Some(separator),
            (Some('-'), '_') | (Some('_'), '-') => {
                return Err(nom::Err::Failure(PositionedError::new(
                    rest,
                    ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores,
                )))
            }
            _ => {}
        }

        let (after, segment) = segment_parser(Some(separator))(after)?;
        segments.push(segment);
        rest = after;
    }
}

/// Parses a complete version. Returns the unconsumed remainder so callers
/// can embed this in larger grammars.
pub(crate) fn version_parser(input: &str) -> ParseResult<'_, Version> {
    if input.is_empty() {
        return Err(nom::Err::Error(PositionedError::new(
            input,
            ParseVersionErrorKind::Empty,
        )));
    }

    let (rest, epoch) = opt(epoch_parser)(input)?;

    // Scan off the region that can belong to segments so that trailing
    // input (e.g. a `,` in a version spec) is left untouched.
    let (rest, common_part) = recognize_segments(rest)?;
    let (rest, local_part) = opt(nom::sequence::preceded(
        char('+'),
        nom::combinator::cut(recognize_segments),
    ))(rest)?;

    let mut segments = Vec::new();
    let mut local = Vec::new();
    let mut dash_or_underscore = None;

    part_parser(common_part, &mut segments, &mut dash_or_underscore)?;
    if let Some(local_part) = local_part {
        if local_part.is_empty() {
            return Err(nom::Err::Failure(PositionedError::new(
                rest,
                ParseVersionErrorKind::EmptyLocalVersion,
            )));
        }
        part_parser(local_part, &mut local, &mut dash_or_underscore)?;
    }

    Ok((rest, Version::new(epoch, segments, local)))
}

fn recognize_segments(input: &str) -> ParseResult<'_, &str> {
    take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')(input)
}

/// Parses a version, requiring the entire input to be consumed.
pub(crate) fn final_version_parser(input: &str) -> Result<Version, ParseVersionError> {
    use nom::Offset;

    // The error's remaining slice always borrows from `input`, so the
    // offset can be recovered even when the failure happened inside a
    // sub-slice of the original string.
    let build_error = |remaining: &str, kind| ParseVersionError {
        version: input.to_owned(),
        offset: input.offset(remaining) + 1,
        kind,
    };

    match version_parser(input) {
        Ok(("", version)) => Ok(version),
        Ok((rest, _)) => Err(build_error(
            rest,
            ParseVersionErrorKind::ExpectedSegmentSeparator,
        )),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(build_error(e.remaining, e.kind)),
        Err(nom::Err::Incomplete(_)) => {
            unreachable!("not streaming, so no other error possible")
        }
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        final_version_parser(s)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::{ParseVersionErrorKind, Version};

    #[rstest]
    #[case("1.2.3")]
    #[case("1!1.2a.3-rc1")]
    #[case("1-2-3")]
    #[case("1_2_3")]
    #[case("1.0.1_")]
    #[case("1.0.1post.za")]
    #[case("1+2")]
    #[case("1.2+3.2.1")]
    fn valid(#[case] input: &str) {
        let version = Version::from_str(input).unwrap();
        assert_eq!(version.to_string(), input);
    }

    #[rstest]
    #[case("", ParseVersionErrorKind::Empty, 1)]
    #[case("$", ParseVersionErrorKind::ExpectedComponent, 1)]
    #[case(".", ParseVersionErrorKind::ExpectedComponent, 1)]
    #[case("1@2", ParseVersionErrorKind::ExpectedSegmentSeparator, 2)]
    #[case("1+", ParseVersionErrorKind::EmptyLocalVersion, 3)]
    #[case("1+$", ParseVersionErrorKind::EmptyLocalVersion, 3)]
    #[case("1-2_3", ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores, 4)]
    fn invalid(
        #[case] input: &str,
        #[case] kind: ParseVersionErrorKind,
        #[case] offset: usize,
    ) {
        let error = Version::from_str(input).unwrap_err();
        assert_eq!(error.kind, kind, "kind for {input:?}");
        assert_eq!(error.offset, offset, "offset for {input:?}");
    }

    #[test]
    fn trailing_underscores() {
        // `1_` ends in an underscore component, `1__` in an underscore
        // separator followed by an underscore component. A third
        // underscore has nothing left to attach to.
        assert!(Version::from_str("1_").is_ok());
        assert!(Version::from_str("1__").is_ok());
        assert!(Version::from_str("1___").is_err());
    }
}
