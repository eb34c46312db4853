//! Two-way Lloyd's clustering used to split an overfull node.

use std::cmp::Ordering;

use rand::Rng;
use rand::seq::SliceRandom; // For random seed selection
use tracing::warn;

use super::nearest::nearest;
use crate::error::{KTreeError, Result};
use crate::vector_value::{VectorValue, mean_of};

/// One side of a two-way partition.
///
/// Members are positions into the partitioned input, kept in input order.
/// `previous` holds last round's assignment so convergence can be detected.
#[derive(Debug, Clone)]
pub struct Cluster<T> {
    mean: T,
    members: Vec<usize>,
    previous: Vec<usize>,
}

impl<T: VectorValue> Cluster<T> {
    fn new(seed: T) -> Self {
        Cluster {
            mean: seed,
            members: Vec::new(),
            previous: Vec::new(),
        }
    }

    pub fn mean(&self) -> &T {
        &self.mean
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn into_parts(self) -> (T, Vec<usize>) {
        (self.mean, self.members)
    }

    fn assignment_changed(&self) -> bool {
        self.members != self.previous
    }

    /// Recomputes the mean from the current members. An empty cluster keeps
    /// its previous mean.
    fn update_mean(&mut self, values: &[T]) {
        if let Some(mean) = mean_of(self.members.iter().map(|&index| &values[index])) {
            self.mean = mean;
        }
    }

    fn start_round(&mut self) {
        self.previous = std::mem::take(&mut self.members);
    }
}

/// Lloyd's algorithm restricted to two clusters.
#[derive(Debug, Clone)]
pub struct TwoMeans {
    max_iterations: usize,
}

impl TwoMeans {
    pub const K: usize = 2;

    pub fn new(max_iterations: usize) -> Self {
        TwoMeans {
            max_iterations: max_iterations.max(1),
        }
    }

    /// Partitions `values` into exactly two clusters.
    ///
    /// Cluster 0 grows from the first random seed and cluster 1 from the
    /// second. Every input position ends up in exactly one cluster. With the
    /// same input and the same RNG state the result is identical.
    pub fn partition<T, R>(&self, values: &[T], rng: &mut R) -> Result<[Cluster<T>; 2]>
    where
        T: VectorValue,
        R: Rng,
    {
        if values.len() < Self::K {
            return Err(KTreeError::TooFewElements { found: values.len() });
        }

        let (first, second) = Self::choose_seeds(values, rng)?;
        let mut clusters = [Cluster::new(values[first].clone()), Cluster::new(values[second].clone())];

        let mut rounds = 0;
        loop {
            rounds += 1;
            Self::assign(values, &mut clusters);

            if !clusters.iter().any(Cluster::assignment_changed) {
                // Means were computed from this exact assignment last round.
                break;
            }

            if rounds >= self.max_iterations {
                warn!(
                    rounds,
                    elements = values.len(),
                    "two-means did not converge, keeping last assignment"
                );
                for cluster in clusters.iter_mut() {
                    cluster.update_mean(values);
                }
                break;
            }

            for cluster in clusters.iter_mut() {
                cluster.update_mean(values);
                cluster.start_round();
            }
        }

        Ok(clusters)
    }

    /// Picks two seed positions without replacement. The second seed is
    /// drawn from positions whose value differs from the first seed's, unless
    /// every value is equal.
    fn choose_seeds<T, R>(values: &[T], rng: &mut R) -> Result<(usize, usize)>
    where
        T: VectorValue,
        R: Rng,
    {
        let too_few = || KTreeError::TooFewElements { found: values.len() };

        let first = rng.gen_range(0..values.len());
        let distinct: Vec<usize> = (0..values.len())
            .filter(|&index| values[index].compare(&values[first]) != Ordering::Equal)
            .collect();
        let pool = if distinct.is_empty() {
            (0..values.len()).filter(|&index| index != first).collect()
        } else {
            distinct
        };
        let second = *pool.choose(rng).ok_or_else(too_few)?;
        Ok((first, second))
    }

    fn assign<T: VectorValue>(values: &[T], clusters: &mut [Cluster<T>; 2]) {
        for (index, value) in values.iter().enumerate() {
            let target = nearest(value, clusters.iter().map(|c| (&c.mean, c.members.len()))).unwrap_or(0); // never empty
            clusters[target].members.push(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::Point2D;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const EPSILON: f64 = 1e-9;

    fn all_members(clusters: &[Cluster<f64>; 2]) -> Vec<usize> {
        let mut members: Vec<usize> = clusters.iter().flat_map(|c| c.members().to_vec()).collect();
        members.sort_unstable();
        members
    }

    #[test]
    fn test_too_few_elements() {
        let mut rng = StdRng::seed_from_u64(1);
        let two_means = TwoMeans::new(10);
        let err = two_means.partition(&[1.0_f64], &mut rng).unwrap_err();
        assert!(matches!(err, KTreeError::TooFewElements { found: 1 }));
        let err = two_means.partition::<f64, _>(&[], &mut rng).unwrap_err();
        assert!(matches!(err, KTreeError::TooFewElements { found: 0 }));
    }

    #[test]
    fn test_two_elements_split_apart() {
        let mut rng = StdRng::seed_from_u64(3);
        let values = [1.0_f64, 9.0];
        let clusters = TwoMeans::new(10).partition(&values, &mut rng).unwrap();
        assert_eq!(clusters[0].len(), 1);
        assert_eq!(clusters[1].len(), 1);
        assert_eq!(all_members(&clusters), vec![0, 1]);
    }

    #[test]
    fn test_separates_well_separated_groups() {
        let values = [1.0_f64, 2.0, 3.0, 100.0, 101.0, 102.0];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let clusters = TwoMeans::new(TwoMeans::K * 100).partition(&values, &mut rng).unwrap();

            let mut groups: Vec<Vec<usize>> = clusters.iter().map(|c| c.members().to_vec()).collect();
            groups.sort();
            assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4, 5]], "seed {seed}");

            for cluster in &clusters {
                let expected = if cluster.members()[0] == 0 { 2.0 } else { 101.0 };
                assert!((cluster.mean() - expected).abs() < EPSILON);
            }
        }
    }

    #[test]
    fn test_completeness() {
        let values: Vec<f64> = (0..25).map(|i| ((i * 37) % 11) as f64).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let clusters = TwoMeans::new(300).partition(&values, &mut rng).unwrap();
        assert_eq!(all_members(&clusters), (0..values.len()).collect::<Vec<_>>());
        assert!(!clusters[0].is_empty());
        assert!(!clusters[1].is_empty());
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let values: Vec<Point2D> = (0..16)
            .map(|i| Point2D::new((i % 4) as f64 * 3.0, (i / 4) as f64 * 2.0))
            .collect();
        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            TwoMeans::new(300)
                .partition(&values, &mut rng)
                .unwrap()
                .map(|c| (c.mean().to_string(), c.members().to_vec()))
        };
        assert_eq!(run(42), run(42));
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_identical_values_are_balanced() {
        let values = [5.0_f64; 4];
        let mut rng = StdRng::seed_from_u64(0);
        let clusters = TwoMeans::new(300).partition(&values, &mut rng).unwrap();
        // Every distance ties, so elements alternate between the clusters.
        assert_eq!(clusters[0].members(), &[0, 2]);
        assert_eq!(clusters[1].members(), &[1, 3]);
        assert_eq!(*clusters[0].mean(), 5.0);
    }

    #[test]
    fn test_seeds_prefer_distinct_values() {
        // Only one value differs, so it must be one of the two seeds and
        // therefore sit alone or nearly alone in its cluster.
        let values = [0.0_f64, 0.0, 0.0, 0.0, 50.0];
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let clusters = TwoMeans::new(300).partition(&values, &mut rng).unwrap();
            let holder = clusters.iter().find(|c| c.members().contains(&4)).unwrap();
            assert_eq!(holder.members(), &[4], "seed {seed}");
        }
    }

    #[test]
    fn test_iteration_cap_returns_consistent_means() {
        let values: Vec<f64> = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let mut rng = StdRng::seed_from_u64(5);
        let clusters = TwoMeans::new(1).partition(&values, &mut rng).unwrap();
        assert_eq!(all_members(&clusters), (0..values.len()).collect::<Vec<_>>());
        for cluster in clusters.iter().filter(|c| !c.is_empty()) {
            let expected = mean_of(cluster.members().iter().map(|&i| &values[i])).unwrap();
            assert!((cluster.mean() - expected).abs() < EPSILON);
        }
    }

    #[test]
    fn test_empty_cluster_keeps_its_mean() {
        let values = [1.0_f64, 2.0, 3.0];
        let mut cluster = Cluster::new(42.0_f64);
        cluster.update_mean(&values);
        assert!(cluster.is_empty());
        assert_eq!(*cluster.mean(), 42.0);

        cluster.members = vec![0, 2];
        cluster.update_mean(&values);
        assert!((cluster.mean() - 2.0).abs() < EPSILON);

        cluster.start_round();
        cluster.update_mean(&values);
        assert!((cluster.mean() - 2.0).abs() < EPSILON);
        assert!(cluster.assignment_changed());
    }

    #[test]
    fn test_into_parts() {
        let mut rng = StdRng::seed_from_u64(9);
        let [left, right] = TwoMeans::new(10).partition(&[0.0_f64, 10.0], &mut rng).unwrap();
        let (left_mean, left_members) = left.into_parts();
        let (right_mean, right_members) = right.into_parts();
        assert_eq!(left_members.len() + right_members.len(), 2);
        assert_ne!(left_mean, right_mean);
    }
}
