//! Intervals over the version order.
//!
//! A [`VersionInterval`] is the evaluated form of a single range
//! constraint. The resolver interns dependencies as `(name, relation,
//! version)` triples and lowers the relation to an interval before
//! matching candidates.

use crate::Version;

/// Whether a numeric bound includes its endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum IntervalBound {
    /// The endpoint itself is excluded.
    Open,
    /// The endpoint itself is included.
    Closed,
}

/// An interval over versions. Equality is structural: `Singleton(v)` and
/// `Bounded[v, v]` are distinct values even though they contain the same
/// versions, which is why the constructors normalize.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum VersionInterval {
    /// Contains no version at all.
    Empty,
    /// Contains every version.
    Free,
    /// Contains exactly one version (and everything comparing equal to
    /// it).
    Singleton(Version),
    /// Contains every version above the bound.
    LowerBounded(Version, IntervalBound),
    /// Contains every version below the bound.
    UpperBounded(Version, IntervalBound),
    /// Contains the versions between the two bounds. Invariant:
    /// `lb < ub`; intervals with equal endpoints are collapsed by
    /// [`VersionInterval::make_bounded`].
    Bounded {
        /// The lower endpoint.
        lb: Version,
        /// Whether the lower endpoint is included.
        lb_kind: IntervalBound,
        /// The upper endpoint.
        ub: Version,
        /// Whether the upper endpoint is included.
        ub_kind: IntervalBound,
    },
}

impl VersionInterval {
    /// The empty interval.
    pub fn empty() -> Self {
        VersionInterval::Empty
    }

    /// The interval containing every version.
    pub fn free() -> Self {
        VersionInterval::Free
    }

    /// The interval containing exactly `version`.
    pub fn singleton(version: Version) -> Self {
        VersionInterval::Singleton(version)
    }

    /// The interval of versions above `lb`.
    pub fn lower_bounded(lb: Version, kind: IntervalBound) -> Self {
        VersionInterval::LowerBounded(lb, kind)
    }

    /// The interval of versions below `ub`.
    pub fn upper_bounded(ub: Version, kind: IntervalBound) -> Self {
        VersionInterval::UpperBounded(ub, kind)
    }

    /// Constructs the interval between `lb` and `ub`.
    ///
    /// Equal endpoints collapse: to a singleton when both bounds are
    /// closed, to the empty interval otherwise. A lower bound above the
    /// upper bound yields the empty interval.
    pub fn make_bounded(
        lb: Version,
        lb_kind: IntervalBound,
        ub: Version,
        ub_kind: IntervalBound,
    ) -> Self {
        if lb > ub {
            return VersionInterval::Empty;
        }
        if lb == ub {
            return if lb_kind == IntervalBound::Closed && ub_kind == IntervalBound::Closed {
                VersionInterval::Singleton(lb)
            } else {
                VersionInterval::Empty
            };
        }
        VersionInterval::Bounded {
            lb,
            lb_kind,
            ub,
            ub_kind,
        }
    }

    /// Returns true if the interval contains the given version.
    pub fn contains(&self, version: &Version) -> bool {
        fn above(version: &Version, lb: &Version, kind: IntervalBound) -> bool {
            match kind {
                IntervalBound::Open => version > lb,
                IntervalBound::Closed => version >= lb,
            }
        }
        fn below(version: &Version, ub: &Version, kind: IntervalBound) -> bool {
            match kind {
                IntervalBound::Open => version < ub,
                IntervalBound::Closed => version <= ub,
            }
        }

        match self {
            VersionInterval::Empty => false,
            VersionInterval::Free => true,
            VersionInterval::Singleton(point) => version == point,
            VersionInterval::LowerBounded(lb, kind) => above(version, lb, *kind),
            VersionInterval::UpperBounded(ub, kind) => below(version, ub, *kind),
            VersionInterval::Bounded {
                lb,
                lb_kind,
                ub,
                ub_kind,
            } => above(version, lb, *lb_kind) && below(version, ub, *ub_kind),
        }
    }
}
