//! The version type and its total order.
//!
//! A version string is split into an optional epoch (an integer followed
//! by `!`), a sequence of segments separated by `.`, `-` or `_`, and an
//! optional local part after `+`. Each segment is split into runs of
//! numerals and non-numerals; non-numeral runs are lowercased. A segment
//! that starts with a letter gets an implicit leading `0` so that numbers
//! and strings stay in phase (`1.1.a1 == 1.1.0a1`).
//!
//! Comparison is lexicographic over the padded component lists:
//!
//! * numerals compare numerically,
//! * identifiers compare lexicographically and sort below numerals,
//! * `dev` sorts below everything else, `post` above everything else,
//! * a missing component counts as the numeral `0`, so `1.1 == 1.1.0`.
//!
//! The local part only participates when the common parts compare equal,
//! which gives `1.0 < 1.0+local`.

use std::{
    cmp::Ordering,
    fmt,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use itertools::{EitherOrBoth, Itertools};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

pub(crate) mod parse;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

/// A single component of a version segment.
///
/// The derived ordering is the component order of the version algebra:
/// `Dev` sorts below identifiers, identifiers below numerals, and `Post`
/// above everything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// The `dev` tag, which sorts below any other component.
    Dev,
    /// A lowercased alphabetic run, e.g. `alpha`, `rc`, `g`.
    Iden(Box<str>),
    /// A numeric run.
    Numeral(u64),
    /// The `post` tag, which sorts above any other component.
    Post,
}

impl Component {
    fn zero() -> Component {
        Component::Numeral(0)
    }

    /// Returns the numeral value if this component is numeric.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Component::Numeral(n) => Some(*n),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        matches!(self, Component::Numeral(0))
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Component::Dev => write!(f, "dev"),
            Component::Iden(s) => write!(f, "{s}"),
            Component::Numeral(n) => write!(f, "{n}"),
            Component::Post => write!(f, "post"),
        }
    }
}

type ComponentVec = SmallVec<[Component; 2]>;

/// A version segment: the run of components between two separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Segment {
    /// The components of this segment, always starting with a numeral
    /// (possibly the implicit default).
    pub(crate) components: ComponentVec,

    /// The separator that preceded this segment in the source, `None`
    /// for the first segment of a part.
    pub(crate) separator: Option<char>,

    /// True if the leading numeral was inserted because the source
    /// segment started with a letter.
    pub(crate) has_implicit_default: bool,
}

impl Segment {
    pub(crate) fn zero() -> Segment {
        Segment {
            components: smallvec::smallvec![Component::zero()],
            separator: None,
            has_implicit_default: false,
        }
    }

    /// The components that are visible in the source string.
    fn visible_components(&self) -> &[Component] {
        if self.has_implicit_default {
            &self.components[1..]
        } else {
            &self.components
        }
    }
}

/// A version in the ordering described by the [module documentation](self).
///
/// `Display` output round-trips: parsing it yields an equal version with
/// the same textual form.
#[derive(Debug, Clone)]
pub struct Version {
    /// The epoch, if the version carried an explicit `N!` prefix.
    epoch: Option<u64>,

    /// The segments of the common (upstream) part.
    segments: Vec<Segment>,

    /// The segments of the local part (after `+`), empty when absent.
    local: Vec<Segment>,
}

impl Version {
    pub(crate) fn new(epoch: Option<u64>, segments: Vec<Segment>, local: Vec<Segment>) -> Self {
        Self {
            epoch,
            segments,
            local,
        }
    }

    /// Constructs a version with just a major component, e.g. `1`.
    pub fn major(major: u64) -> Version {
        Version {
            epoch: None,
            segments: vec![Segment {
                components: smallvec::smallvec![Component::Numeral(major)],
                separator: None,
                has_implicit_default: false,
            }],
            local: Vec::new(),
        }
    }

    /// Returns the epoch of the version, `0` when not specified.
    pub fn epoch(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Returns true if the version carries an explicit epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns true if the version has a local part (after `+`).
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// The number of segments in the common part.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if any component of the version is the `dev` tag.
    pub fn is_dev(&self) -> bool {
        self.segments
            .iter()
            .flat_map(|segment| segment.components.iter())
            .any(|component| matches!(component, Component::Dev))
    }

    /// Returns true if this version starts with the other version: epochs
    /// are equal and the other's segments are a componentwise prefix of
    /// this version's segments (missing segments count as `0`).
    pub fn starts_with(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && segments_start_with(&self.segments, &other.segments)
            && segments_start_with(&self.local, &other.local)
    }

    /// Returns true if this version is a compatible release of `other`:
    /// at least `other`, same epoch, and within the series obtained by
    /// dropping `other`'s last segment.
    pub fn compatible_with(&self, other: &Self) -> bool {
        self >= other && self.epoch() == other.epoch() && {
            let prefix = Version {
                epoch: other.epoch,
                segments: other.segments[..other.segments.len().saturating_sub(1)].to_vec(),
                local: other.local.clone(),
            };
            segments_start_with(&self.segments, &prefix.segments)
                && segments_start_with(&self.local, &prefix.local)
        }
    }

    /// Returns the version without its last segment, or `None` when only
    /// one segment is left.
    pub fn strip_last_segment(&self) -> Option<Version> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Version {
            epoch: self.epoch,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            local: Vec::new(),
        })
    }

    /// Returns the version whose last segment's leading numeral is
    /// incremented, with any trailing components of that segment dropped.
    /// Used to compute the open upper bound of a compatible release.
    pub fn bump_last(&self) -> Version {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            let numeral = last.components[0].as_number().unwrap_or(0);
            last.components = smallvec::smallvec![Component::Numeral(numeral + 1)];
            last.has_implicit_default = false;
        }
        Version {
            epoch: self.epoch,
            segments,
            local: Vec::new(),
        }
    }

    /// The canonical component lists used for equality and hashing:
    /// trailing zero components and trailing zero segments are
    /// insignificant.
    fn canonical_parts(part: &[Segment]) -> Vec<&[Component]> {
        let mut canonical: Vec<&[Component]> = part
            .iter()
            .map(|segment| {
                let components = segment.components.as_slice();
                let significant = components
                    .iter()
                    .rposition(|c| !c.is_zero())
                    .map_or(1, |idx| idx + 1);
                &components[..significant]
            })
            .collect();
        while canonical.len() > 1
            && canonical
                .last()
                .is_some_and(|components| components.iter().all(Component::is_zero))
        {
            canonical.pop();
        }
        canonical
    }
}

/// Compares two segment lists, padding the shorter side with zeros.
fn compare_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let zero = Segment::zero();
    for pair in a.iter().zip_longest(b.iter()) {
        let (left, right) = match pair {
            EitherOrBoth::Both(left, right) => (left, right),
            EitherOrBoth::Left(left) => (left, &zero),
            EitherOrBoth::Right(right) => (&zero, right),
        };

        for component_pair in left.components.iter().zip_longest(right.components.iter()) {
            let ordering = match component_pair {
                EitherOrBoth::Both(l, r) => l.cmp(r),
                EitherOrBoth::Left(l) => l.cmp(&Component::zero()),
                EitherOrBoth::Right(r) => Component::zero().cmp(r),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
    }
    Ordering::Equal
}

/// Returns true if `segments` starts with `prefix`, comparing the last
/// prefix segment componentwise and every earlier one exactly (modulo
/// zero padding).
fn segments_start_with(segments: &[Segment], prefix: &[Segment]) -> bool {
    let zero = Segment::zero();
    for (idx, prefix_segment) in prefix.iter().enumerate() {
        let segment = segments.get(idx).unwrap_or(&zero);
        let is_last = idx == prefix.len() - 1;

        for pair in prefix_segment
            .components
            .iter()
            .zip_longest(segment.components.iter())
        {
            match pair {
                EitherOrBoth::Both(p, s) => {
                    if p != s {
                        return false;
                    }
                }
                // The prefix asks for more components than the segment
                // has: pad the segment with zeros.
                EitherOrBoth::Left(p) => {
                    if !p.is_zero() {
                        return false;
                    }
                }
                // Extra components in the version are only allowed in the
                // last prefix segment.
                EitherOrBoth::Right(s) => {
                    if !is_last && !s.is_zero() {
                        return false;
                    }
                    break;
                }
            }
        }
    }
    true
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| compare_segments(&self.segments, &other.segments))
            .then_with(|| compare_segments(&self.local, &other.local))
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch().hash(state);
        Self::canonical_parts(&self.segments).hash(state);
        Self::canonical_parts(&self.local).hash(state);
    }
}

fn write_part(f: &mut Formatter<'_>, part: &[Segment]) -> fmt::Result {
    for segment in part {
        if let Some(separator) = segment.separator {
            write!(f, "{separator}")?;
        }
        for component in segment.visible_components() {
            write!(f, "{component}")?;
        }
    }
    Ok(())
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{epoch}!")?;
        }
        write_part(f, &self.segments)?;
        if !self.local.is_empty() {
            write!(f, "+")?;
            write_part(f, &self.local)?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Version::from_str(&source).map_err(D::Error::custom)
    }
}
