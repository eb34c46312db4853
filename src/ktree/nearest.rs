//! Nearest-representative selection shared by insertion, queries and two-means.

use ordered_float::OrderedFloat; // Total order over f64 distances

use crate::vector_value::VectorValue;

/// Ranking of one candidate: nearer first, then the lighter-loaded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    distance: OrderedFloat<f64>,
    load: usize,
}

/// Index of the candidate nearest to `target`.
///
/// Each candidate is a representative value paired with its current load
/// (member count or child size). Exact distance ties go to the smaller load,
/// and remaining ties to the lowest index. NaN distances rank last.
pub(crate) fn nearest<'a, T, I>(target: &T, candidates: I) -> Option<usize>
where
    T: VectorValue + 'a,
    I: IntoIterator<Item = (&'a T, usize)>,
{
    candidates
        .into_iter()
        .enumerate()
        .min_by_key(|(_, (value, load))| Candidate {
            distance: OrderedFloat(target.distance(value)),
            load: *load,
        })
        .map(|(index, _)| index)
}
