//! The match spec parser: five concentric layers applied in order.
//!
//! 1. Archive URLs and paths dispatch to the exact-artifact parser.
//! 2. A trailing `#comment` is stripped.
//! 3. One `[...]` bracket group and one `(...)` parenthesis group are
//!    extracted; both carry comma separated `key=value` pairs, the
//!    parenthesis group additionally the bare `optional` token.
//! 4. The head is split on `::` and `:` into channel, namespace and
//!    name spec.
//! 5. The remainder is split into the version and build constraints,
//!    and the typed attribute overrides are applied on top.

use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_until, take_while1},
    character::complete::{char, multispace0, one_of},
    combinator::{opt, recognize},
    error::ParseError,
    multi::{separated_list0, separated_list1},
    sequence::{delimited, pair, separated_pair, terminated},
    Finish, IResult,
};
use smallvec::SmallVec;
use thiserror::Error;
use url::Url;

use super::MatchSpec;
use crate::{
    build_number_spec::ParseBuildNumberSpecError,
    utils::{path::is_path, url::file_path_to_url},
    version_spec::ParseVersionSpecError,
    ArchiveIdentifier, ArchiveType, Platform, VersionSpec,
};

/// An error that occurred while parsing a match spec.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseMatchSpecError {
    /// A package archive reference that is neither a url nor a path.
    #[error("invalid package path or url")]
    InvalidPackagePathOrUrl,

    /// The bracket section is malformed.
    #[error("invalid bracket")]
    InvalidBracket,

    /// More than one bracket section.
    #[error("multiple bracket sections not allowed")]
    MultipleBracketSectionsNotAllowed,

    /// Too many `:` separators in the head.
    #[error("invalid number of colons")]
    InvalidNumberOfColons,

    /// An unrecognized key inside a bracket section.
    #[error("invalid bracket key: {0}")]
    InvalidBracketKey(String),

    /// The same key appears twice with incompatible values.
    #[error("duplicate bracket key with incompatible values: {0}")]
    DuplicateBracketKey(String),

    /// The spec has no package name.
    #[error("missing package name")]
    MissingPackageName,

    /// The version and build part could not be split.
    #[error("unable to parse version and build from '{0}'")]
    InvalidVersionAndBuild(String),

    /// The version constraint is malformed.
    #[error("invalid version spec: {0}")]
    InvalidVersionSpec(#[from] ParseVersionSpecError),

    /// The build number constraint is malformed.
    #[error("invalid build number spec: {0}")]
    InvalidBuildNumber(#[from] ParseBuildNumberSpecError),

    /// A hash attribute is not valid hex of the right length.
    #[error("invalid hash digest: {0}")]
    InvalidHashDigest(String),

    /// A url attribute is malformed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The build string matcher is malformed.
    #[error("invalid build string matcher")]
    InvalidStringMatcher,
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
        parse(input)
    }
}

/// Splits the input into the spec and an optional trailing comment.
fn strip_comment(input: &str) -> (&str, Option<&str>) {
    input
        .split_once('#')
        .map_or((input, None), |(spec, comment)| (spec, Some(comment)))
}

/// Returns true if the input refers to a package archive.
fn is_package_file(input: &str) -> bool {
    ArchiveType::try_from(input).is_some()
}

/// Returns true if the character may start a version constraint.
pub(crate) fn is_start_of_version_constraint(c: char) -> bool {
    matches!(c, '>' | '<' | '=' | '!' | '~')
}

type KeyValueVec<'a> = SmallVec<[(&'a str, &'a str); 2]>;

fn whitespace_enclosed<'a, F, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

/// Parses the contents of a bracket or parenthesis list, e.g.
/// `[version="1.2.3", build_number=1]`.
fn parse_key_value_list(input: &str) -> Result<KeyValueVec<'_>, ParseMatchSpecError> {
    fn parse_key(input: &str) -> IResult<&str, &str> {
        whitespace_enclosed(take_while1(|c: char| {
            c.is_alphanumeric() || c == '_' || c == '-'
        }))(input)
    }

    fn parse_value(input: &str) -> IResult<&str, &str> {
        whitespace_enclosed(alt((
            delimited(char('"'), take_until("\""), char('"')),
            delimited(char('\''), take_until("'"), char('\'')),
            take_till1(|c: char| matches!(c, ',' | ']' | ')' | '\'' | '"')),
        )))(input)
    }

    fn parse_entry(input: &str) -> IResult<&str, (&str, &str)> {
        alt((
            separated_pair(parse_key, char('='), parse_value),
            // A bare token like `optional` becomes a key with an empty
            // value.
            nom::combinator::map(parse_key, |key| (key, "")),
        ))(input)
    }

    fn parse_list(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        nom::combinator::all_consuming(separated_list0(
            whitespace_enclosed(char(',')),
            parse_entry,
        ))(input)
    }

    match parse_list(input).finish() {
        Ok((_, values)) => Ok(values.into()),
        Err(nom::error::Error { .. }) => Err(ParseMatchSpecError::InvalidBracket),
    }
}

/// Strips one trailing delimited group from the input and parses its
/// contents as key-value pairs.
fn strip_group<'a>(
    input: &'a str,
    open: char,
    close: char,
) -> Result<(&'a str, KeyValueVec<'a>), ParseMatchSpecError> {
    let trimmed = input.trim_end();
    if !trimmed.ends_with(close) {
        return Ok((input, SmallVec::new()));
    }
    let Some(open_idx) = trimmed.rfind(open) else {
        return Err(ParseMatchSpecError::InvalidBracket);
    };
    let contents = &trimmed[open_idx + 1..trimmed.len() - 1];
    Ok((&trimmed[..open_idx], parse_key_value_list(contents)?))
}

/// Splits a version-and-build string such as `>=1.0,<2.0 py34_0` into
/// its version and build parts.
fn split_version_and_build(input: &str) -> Result<(&str, Option<&str>), ParseMatchSpecError> {
    fn parse_operator(input: &str) -> IResult<&str, &str> {
        alt((
            tag(">="),
            tag("<="),
            tag("~="),
            tag("=="),
            tag("!="),
            tag("="),
            tag("<"),
            tag(">"),
        ))(input)
    }

    fn parse_constraint(input: &str) -> IResult<&str, &str> {
        recognize(pair(
            whitespace_enclosed(opt(parse_operator)),
            take_till1(|c: char| {
                is_start_of_version_constraint(c)
                    || c.is_whitespace()
                    || matches!(c, ',' | '|' | ')' | '(')
            }),
        ))(input)
    }

    fn parse_version_constraint_or_group(input: &str) -> IResult<&str, &str> {
        alt((
            delimited(tag("("), parse_version_group, tag(")")),
            parse_constraint,
        ))(input)
    }

    fn parse_version_group(input: &str) -> IResult<&str, &str> {
        recognize(separated_list1(
            whitespace_enclosed(one_of(",|")),
            parse_version_constraint_or_group,
        ))(input)
    }

    fn parse_version_and_build_separator(input: &str) -> IResult<&str, &str> {
        terminated(parse_version_group, opt(one_of(" =")))(input)
    }

    match parse_version_and_build_separator(input).finish() {
        Ok((rest, version)) => {
            let build_string = rest.trim();
            Ok((
                version.trim(),
                (!build_string.is_empty()).then_some(build_string),
            ))
        }
        Err(nom::error::Error { .. }) => Err(ParseMatchSpecError::InvalidVersionAndBuild(
            input.to_owned(),
        )),
    }
}

/// Applies one `key=value` pair onto the spec. `overwrite` controls
/// whether an already-present field is replaced (bracket keys win over
/// positional and parenthesis values).
fn apply_key_value(
    spec: &mut MatchSpec,
    key: &str,
    value: &str,
    overwrite: bool,
) -> Result<(), ParseMatchSpecError> {
    macro_rules! set {
        ($field:ident, $value:expr) => {{
            if spec.$field.is_none() || overwrite {
                spec.$field = Some($value);
            }
        }};
    }

    match key {
        "version" => set!(version, VersionSpec::from_str(value)?),
        "build" => set!(
            build,
            value
                .parse()
                .map_err(|_| ParseMatchSpecError::InvalidStringMatcher)?
        ),
        "build_number" => set!(build_number, value.parse()?),
        "fn" => set!(file_name, value.to_owned()),
        "url" => {
            let url = if is_path(value) {
                file_path_to_url(value)
                    .map_err(|_| ParseMatchSpecError::InvalidUrl(value.to_owned()))?
            } else {
                Url::parse(value).map_err(|_| ParseMatchSpecError::InvalidUrl(value.to_owned()))?
            };
            set!(url, url)
        }
        "md5" => set!(
            md5,
            taipan_digest::parse_digest_from_hex::<taipan_digest::Md5>(value)
                .ok_or_else(|| ParseMatchSpecError::InvalidHashDigest(value.to_owned()))?
        ),
        "sha256" => set!(
            sha256,
            taipan_digest::parse_digest_from_hex::<taipan_digest::Sha256>(value)
                .ok_or_else(|| ParseMatchSpecError::InvalidHashDigest(value.to_owned()))?
        ),
        "license" => set!(license, value.to_owned()),
        "features" => set!(features, value.to_owned()),
        "track_features" => set!(
            track_features,
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        ),
        "subdir" => set!(subdir, value.to_owned()),
        "channel" => set!(channel, value.to_owned()),
        "optional" if value.is_empty() => spec.optional = true,
        _ => return Err(ParseMatchSpecError::InvalidBracketKey(key.to_owned())),
    }
    Ok(())
}

/// Applies a group of key-value pairs, rejecting duplicate keys with
/// incompatible values.
fn apply_key_values(
    spec: &mut MatchSpec,
    key_values: &KeyValueVec<'_>,
    overwrite: bool,
) -> Result<(), ParseMatchSpecError> {
    for (idx, (key, value)) in key_values.iter().enumerate() {
        if key_values[..idx]
            .iter()
            .any(|(prev_key, prev_value)| prev_key == key && prev_value != value)
        {
            return Err(ParseMatchSpecError::DuplicateBracketKey((*key).to_owned()));
        }
        apply_key_value(spec, key, value, overwrite)?;
    }
    Ok(())
}

/// Parses a spec that refers to a concrete package archive by url or
/// path.
fn parse_url(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
    let url = match Url::parse(input) {
        Ok(url) => url,
        Err(_) if is_path(input) => {
            file_path_to_url(input).map_err(|_| ParseMatchSpecError::InvalidPackagePathOrUrl)?
        }
        Err(_) => return Err(ParseMatchSpecError::InvalidPackagePathOrUrl),
    };

    let identifier = ArchiveIdentifier::try_from_path(url.path())
        .ok_or(ParseMatchSpecError::InvalidPackagePathOrUrl)?;

    let mut spec = MatchSpec {
        name: Some(
            identifier
                .name
                .parse()
                .map_err(|_| ParseMatchSpecError::MissingPackageName)?,
        ),
        file_name: Some(identifier.to_string()),
        url: Some(url),
        ..MatchSpec::default()
    };
    if let Ok(version) = VersionSpec::from_str(&format!("=={}", identifier.version)) {
        spec.version = Some(version);
    }
    spec.build = identifier.build_string.parse().ok();
    Ok(spec)
}

/// Parses a full match spec.
fn parse(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
    // Layer 1: a trailing comment never participates in the grammar.
    let (input, _comment) = strip_comment(input);
    let input = input.trim();

    // Layer 0: concrete archive references take a different path
    // entirely.
    if is_package_file(input) {
        return parse_url(input);
    }

    // Layer 2: bracket and parenthesis groups. A trailing `(...)` that
    // does not parse as key-value pairs is left in place: it may be a
    // parenthesized version group instead.
    let (input, brackets) = strip_group(input, '[', ']')?;
    let (input, parens) = match strip_group(input.trim_end(), '(', ')') {
        Ok(stripped) => stripped,
        Err(_) => (input, SmallVec::new()),
    };

    // Layer 3: channel and namespace.
    let (channel_str, head) = match input.split_once("::") {
        Some((channel, rest)) => (Some(channel.trim()), rest),
        None => (None, input),
    };
    let (namespace, head) = match head.split_once(':') {
        Some((namespace, rest)) => (Some(namespace.trim()), rest),
        None => (None, head),
    };
    if head.contains(':') {
        return Err(ParseMatchSpecError::InvalidNumberOfColons);
    }

    let mut spec = MatchSpec {
        namespace: namespace
            .filter(|namespace| !namespace.is_empty())
            .map(str::to_owned),
        ..MatchSpec::default()
    };

    // A subdir embedded in the channel (`conda-forge/linux-64`) is kept
    // apart so it can take precedence over a bracket `subdir=` key.
    let mut channel_embedded_subdir = None;
    if let Some(channel_str) = channel_str {
        match channel_str.rsplit_once('/') {
            Some((channel, subdir)) if subdir.parse::<Platform>().is_ok() => {
                spec.channel = Some(channel.to_owned());
                channel_embedded_subdir = Some(subdir.to_owned());
            }
            _ => spec.channel = Some(channel_str.to_owned()),
        }
    }

    // Layer 4: package name.
    let head = head.trim();
    let name_end = head
        .find(|c: char| c.is_whitespace() || is_start_of_version_constraint(c))
        .unwrap_or(head.len());
    let (name, version_and_build) = head.split_at(name_end);
    let name = name.trim();
    if name.is_empty() {
        return Err(ParseMatchSpecError::MissingPackageName);
    }
    if name != "*" {
        spec.name = Some(
            name.parse()
                .map_err(|_| ParseMatchSpecError::MissingPackageName)?,
        );
    }

    // Layer 5: positional version and build.
    let version_and_build = version_and_build.trim();
    if !version_and_build.is_empty() {
        if version_and_build.contains('[') {
            return Err(ParseMatchSpecError::MultipleBracketSectionsNotAllowed);
        }

        let (version_str, build_str) = split_version_and_build(version_and_build)?;
        let version_str = if version_str.contains(char::is_whitespace) {
            std::borrow::Cow::Owned(version_str.replace(char::is_whitespace, ""))
        } else {
            std::borrow::Cow::Borrowed(version_str)
        };
        spec.version = Some(VersionSpec::from_str(&version_str)?);

        if let Some(build_str) = build_str {
            spec.build = Some(
                build_str
                    .parse()
                    .map_err(|_| ParseMatchSpecError::InvalidStringMatcher)?,
            );
        }
    }

    // Attribute precedence: parenthesis values fill gaps, bracket values
    // override everything, the channel-embedded subdir wins last.
    apply_key_values(&mut spec, &parens, false)?;
    apply_key_values(&mut spec, &brackets, true)?;
    if let Some(subdir) = channel_embedded_subdir {
        spec.subdir = Some(subdir);
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::{split_version_and_build, ParseMatchSpecError};
    use crate::{MatchSpec, StringMatcher, VersionSpec};

    #[test]
    fn split_version_build() {
        assert_eq!(
            split_version_and_build("=1.2.3 0"),
            Ok(("=1.2.3", Some("0")))
        );
        assert_eq!(split_version_and_build("1.2.3=0"), Ok(("1.2.3", Some("0"))));
        assert_eq!(
            split_version_and_build(">=1.0 , < 2.0 py34_0"),
            Ok((">=1.0 , < 2.0", Some("py34_0")))
        );
        assert_eq!(
            split_version_and_build(">=1.0 , < 2.0 =py34_0"),
            Ok((">=1.0 , < 2.0", Some("=py34_0")))
        );
        assert_eq!(split_version_and_build("=1.2.3 "), Ok(("=1.2.3", None)));
        assert_eq!(
            split_version_and_build(">1.8,<2|==1.7"),
            Ok((">1.8,<2|==1.7", None))
        );
        assert_eq!(
            split_version_and_build("* openblas_0"),
            Ok(("*", Some("openblas_0")))
        );
        assert_eq!(split_version_and_build("* *"), Ok(("*", Some("*"))));
    }

    #[test]
    fn positional_forms() {
        let spec = MatchSpec::from_str("python 3.8.* *_cpython").unwrap();
        assert_eq!(spec.name, Some(StringMatcher::Exact("python".into())));
        assert_eq!(spec.version, Some(VersionSpec::from_str("3.8.*").unwrap()));
        assert_eq!(spec.build, Some(StringMatcher::Glob("*_cpython".into())));

        let spec = MatchSpec::from_str("foo=1.0=py27_0").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("1.0.*").unwrap()));
        assert_eq!(spec.build, Some(StringMatcher::Exact("py27_0".into())));

        let spec = MatchSpec::from_str("foo==1.0=py27_0").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("==1.0").unwrap()));
        assert_eq!(spec.build, Some(StringMatcher::Exact("py27_0".into())));
    }

    #[test]
    fn brackets() {
        let spec = MatchSpec::from_str(r#"conda-forge::foo[version="1.0.*"]"#).unwrap();
        assert_eq!(spec.name, Some(StringMatcher::Exact("foo".into())));
        assert_eq!(spec.version, Some(VersionSpec::from_str("1.0.*").unwrap()));
        assert_eq!(spec.channel, Some("conda-forge".to_owned()));

        // Unquoted values with dots are fine.
        let spec = MatchSpec::from_str("foo[version=1.0.3]").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("1.0.3").unwrap()));

        // Bracket values override the positional parse.
        let spec = MatchSpec::from_str("foo >=2[version=1.0]").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("1.0").unwrap()));
    }

    #[test]
    fn bracket_errors() {
        assert_matches!(
            MatchSpec::from_str(r#"foo[version="1.0, build_number=1]"#),
            Err(ParseMatchSpecError::InvalidBracket)
        );
        assert_matches!(
            MatchSpec::from_str("foo[flavor=vanilla]"),
            Err(ParseMatchSpecError::InvalidBracketKey(_))
        );
        assert_matches!(
            MatchSpec::from_str("foo[version=1.0,version=2.0]"),
            Err(ParseMatchSpecError::DuplicateBracketKey(_))
        );
        assert_matches!(
            MatchSpec::from_str("foo >=1 [build=0]extra[build=1]"),
            Err(_)
        );
        assert_matches!(
            MatchSpec::from_str("[version=1.0]"),
            Err(ParseMatchSpecError::MissingPackageName)
        );
    }

    #[test]
    fn duplicate_keys_with_equal_values_are_fine() {
        let spec = MatchSpec::from_str("foo[version=1.0,version=1.0]").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("1.0").unwrap()));
    }

    #[test]
    fn channel_namespace_name() {
        let spec = MatchSpec::from_str("conda-forge::ns:python >=3").unwrap();
        assert_eq!(spec.channel, Some("conda-forge".to_owned()));
        assert_eq!(spec.namespace, Some("ns".to_owned()));
        assert_eq!(spec.name, Some(StringMatcher::Exact("python".into())));

        assert_matches!(
            MatchSpec::from_str("a::b:c:d"),
            Err(ParseMatchSpecError::InvalidNumberOfColons)
        );
    }

    #[test]
    fn channel_embedded_subdir_wins_over_bracket() {
        let spec = MatchSpec::from_str("conda-forge/linux-64::zlib[subdir=osx-64]").unwrap();
        assert_eq!(spec.channel, Some("conda-forge".to_owned()));
        assert_eq!(spec.subdir, Some("linux-64".to_owned()));
    }

    #[test]
    fn parenthesis_group() {
        let spec = MatchSpec::from_str("zlib >=1.2(optional)").unwrap();
        assert!(spec.optional);
        assert_eq!(spec.version, Some(VersionSpec::from_str(">=1.2").unwrap()));

        let spec = MatchSpec::from_str("zlib(optional, build_number=1)").unwrap();
        assert!(spec.optional);
        assert!(spec.build_number.is_some());

        // Brackets win over parens.
        let spec = MatchSpec::from_str("zlib(version=1.0)[version=2.0]").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("2.0").unwrap()));
    }

    #[test]
    fn comments_are_stripped() {
        let spec = MatchSpec::from_str("zlib >=1.2  # needed for compression").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str(">=1.2").unwrap()));
    }

    #[test]
    fn archive_urls() {
        let spec = MatchSpec::from_str(
            "https://repo.example.com/conda-forge/linux-64/zlib-1.2.13-h166bdaf_4.tar.bz2",
        )
        .unwrap();
        assert_eq!(spec.name, Some(StringMatcher::Exact("zlib".into())));
        assert_eq!(
            spec.file_name,
            Some("zlib-1.2.13-h166bdaf_4.tar.bz2".to_owned())
        );
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str("==1.2.13").unwrap())
        );
        assert!(spec.url.is_some());

        let spec = MatchSpec::from_str("/opt/pkgs/zlib-1.2.13-h166bdaf_4.conda").unwrap();
        assert_eq!(spec.url.unwrap().scheme(), "file");

        assert_matches!(
            MatchSpec::from_str("relative/zlib-1.2.13-0.conda"),
            Err(ParseMatchSpecError::InvalidPackagePathOrUrl)
        );
    }
}
