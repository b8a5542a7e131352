//! Matching of build strings: either an exact comparison or a glob where
//! `*` matches any run of characters.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A matcher for strings, used for build strings in match specs.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum StringMatcher {
    /// The string must match exactly.
    Exact(String),
    /// The string must match the glob, `*` matching any run of
    /// characters.
    Glob(String),
}

impl StringMatcher {
    /// Returns whether the given string matches.
    pub fn matches(&self, other: &str) -> bool {
        match self {
            StringMatcher::Exact(exact) => exact == other,
            StringMatcher::Glob(glob) => glob_matches(glob, other),
        }
    }
}

/// Matches a glob pattern by anchoring the pieces between `*`s in order.
fn glob_matches(pattern: &str, haystack: &str) -> bool {
    let mut pieces = pattern.split('*');
    let first = pieces.next().expect("split yields at least one piece");

    let Some(mut rest) = haystack.strip_prefix(first) else {
        return false;
    };

    let mut pieces = pieces.peekable();
    while let Some(piece) = pieces.next() {
        if pieces.peek().is_none() {
            // The last piece must anchor at the end.
            return piece.is_empty() || rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(idx) => rest = &rest[idx + piece.len()..],
            None => return false,
        }
    }

    // No `*` in the pattern at all: the prefix match must be total.
    rest.is_empty()
}

/// An error that occurred when parsing a [`StringMatcher`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StringMatcherParseError {
    /// The matcher was empty.
    #[error("empty string matcher")]
    Empty,
}

impl FromStr for StringMatcher {
    type Err = StringMatcherParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(StringMatcherParseError::Empty);
        }
        if s.contains('*') {
            Ok(StringMatcher::Glob(s.to_owned()))
        } else {
            Ok(StringMatcher::Exact(s.to_owned()))
        }
    }
}

impl Display for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StringMatcher::Exact(s) | StringMatcher::Glob(s) => write!(f, "{s}"),
        }
    }
}

impl Serialize for StringMatcher {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StringMatcher {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}
