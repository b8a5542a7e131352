//! The candidate order: which of two solvables of the same name should
//! be preferred.

use std::cmp::Ordering;

use taipan_conda_types::Version;

use crate::{pool::Pool, solvable::SolvableId};

/// Returns the preference order of two candidates of the same package:
/// `Less` means `a` is preferred over `b`.
///
/// Candidates without tracked features beat candidates with them, then
/// higher versions, then higher build numbers, then the candidate whose
/// dependencies resolve to fresher versions, and finally the younger
/// timestamp.
pub(crate) fn compare_candidates(pool: &Pool, a: SolvableId, b: SolvableId) -> Ordering {
    let a_record = &pool.resolve_solvable(a).record.package_record;
    let b_record = &pool.resolve_solvable(b).record.package_record;

    // A package with track features is penalized.
    let a_has_track_features = !a_record.track_features.is_empty();
    let b_has_track_features = !b_record.track_features.is_empty();
    match a_has_track_features.cmp(&b_has_track_features) {
        Ordering::Equal => {}
        ordering => return ordering,
    }

    // Higher versions are preferred.
    match b_record.version.cmp(&a_record.version) {
        Ordering::Equal => {}
        ordering => return ordering,
    }

    // Higher build numbers are preferred.
    match b_record.build_number.cmp(&a_record.build_number) {
        Ordering::Equal => {}
        ordering => return ordering,
    }

    // Compare the shared dependencies: the variant whose specs select
    // the fresher versions wins.
    let a_deps = pool.resolve_solvable(a).dependencies();
    let b_deps = pool.resolve_solvable(b).dependencies();

    let mut total_score = 0i32;
    for &a_dep in a_deps {
        let a_dependency = pool.resolve_dependency(a_dep);
        for &b_dep in b_deps {
            let b_dependency = pool.resolve_dependency(b_dep);
            if a_dependency.name != b_dependency.name || a_dep == b_dep {
                continue;
            }

            let (Some(highest_a), Some(highest_b)) =
                (find_highest_version(pool, a_dep), find_highest_version(pool, b_dep))
            else {
                continue;
            };

            total_score += match highest_a.cmp(&highest_b) {
                Ordering::Less => 1,
                Ordering::Equal => 0,
                Ordering::Greater => -1,
            };
        }
    }
    match total_score.cmp(&0) {
        Ordering::Equal => {}
        ordering => return ordering,
    }

    // Otherwise, prefer the younger entry.
    b_record.timestamp.cmp(&a_record.timestamp)
}

/// The highest version any candidate satisfying the dependency has.
fn find_highest_version(pool: &Pool, dep: crate::pool::DependencyId) -> Option<Version> {
    let mut highest: Option<Version> = None;
    pool.for_each_whatprovides(dep, |solvable_id| {
        let version = &pool
            .resolve_solvable(solvable_id)
            .record
            .package_record
            .version;
        match &highest {
            Some(current) if current >= version => {}
            _ => highest = Some(version.clone()),
        }
    });
    highest
}
