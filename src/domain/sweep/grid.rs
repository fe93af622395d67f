//! Exhaustive grid search, optionally shuffled and capped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{CandidateParameterSet, ParameterSpace, ScoredCandidate, SweepTechnique};

/// Largest space whose shuffled order is drawn up front as a table. Bigger
/// spaces walk a seeded affine permutation computed per position.
const SHUFFLE_TABLE_LIMIT: usize = 1 << 20;

#[derive(Debug)]
enum VisitOrder {
    Sequential,
    Table(Vec<usize>),
    /// `index = (mul * pos + add) mod total`, with `mul` coprime to `total`.
    Affine { mul: u128, add: u128, total: u128 },
}

impl VisitOrder {
    fn shuffled(seed: u64, total: usize, limit: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        if total <= SHUFFLE_TABLE_LIMIT {
            return VisitOrder::Table(rand::seq::index::sample(&mut rng, total, limit).into_vec());
        }
        VisitOrder::affine(&mut rng, total)
    }

    fn affine(rng: &mut StdRng, total: usize) -> Self {
        let n = total as u128;
        let mut mul = rng.gen_range(1..n);
        while gcd(mul, n) != 1 {
            mul = if mul + 1 >= n { 1 } else { mul + 1 };
        }
        VisitOrder::Affine {
            mul,
            add: rng.gen_range(0..n),
            total: n,
        }
    }

    fn index(&self, pos: usize) -> usize {
        match self {
            VisitOrder::Sequential => pos,
            VisitOrder::Table(order) => order[pos],
            // mul, pos and add are all below 2^64, so the sum fits in u128
            VisitOrder::Affine { mul, add, total } => ((mul * pos as u128 + add) % total) as usize,
        }
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

pub struct GridSearch {
    space: ParameterSpace,
    order: VisitOrder,
    limit: usize,
    cursor: usize,
    batch_size: usize,
}

impl GridSearch {
    /// `shuffle_seed` visits combinations in a seeded random order;
    /// `max_samples` caps how many are visited.
    pub fn new(
        space: ParameterSpace,
        batch_size: usize,
        shuffle_seed: Option<u64>,
        max_samples: Option<usize>,
    ) -> Self {
        let total = space.total();
        let limit = max_samples.map_or(total, |m| m.min(total));
        let order = match shuffle_seed {
            Some(seed) => VisitOrder::shuffled(seed, total, limit),
            None => VisitOrder::Sequential,
        };
        Self {
            space,
            order,
            limit,
            cursor: 0,
            batch_size: batch_size.max(1),
        }
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.cursor
    }
}

impl SweepTechnique for GridSearch {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn next_batch(&mut self) -> Option<Vec<CandidateParameterSet>> {
        if self.cursor >= self.limit {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.limit);
        let batch = (self.cursor..end)
            .map(|pos| self.space.combination_at(self.order.index(pos)))
            .collect();
        self.cursor = end;
        Some(batch)
    }

    fn observe(&mut self, _results: &[ScoredCandidate]) {}
}

#[cfg(test)]
mod tests {
    use super::super::testing::space_2x3;
    use super::super::Axis;
    use super::*;
    use std::collections::HashSet;

    fn drain(grid: &mut GridSearch) -> Vec<usize> {
        let mut seen = Vec::new();
        while let Some(batch) = grid.next_batch() {
            seen.extend(batch.into_iter().map(|c| c.index));
        }
        seen
    }

    #[test]
    fn visits_every_combination_in_order() {
        let mut grid = GridSearch::new(space_2x3(), 4, None, None);
        assert_eq!(drain(&mut grid), vec![0, 1, 2, 3, 4, 5]);
        assert!(grid.next_batch().is_none());
    }

    #[test]
    fn shuffled_is_a_seeded_permutation() {
        let a = drain(&mut GridSearch::new(space_2x3(), 2, Some(7), None));
        let b = drain(&mut GridSearch::new(space_2x3(), 5, Some(7), None));
        assert_eq!(a, b);
        let set: HashSet<usize> = a.iter().copied().collect();
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn sample_cap_limits_visits() {
        let mut grid = GridSearch::new(space_2x3(), 10, Some(1), Some(4));
        assert_eq!(grid.remaining(), 4);
        let seen = drain(&mut grid);
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|&i| i < 6));

        let capped = drain(&mut GridSearch::new(space_2x3(), 10, None, Some(100)));
        assert_eq!(capped.len(), 6);
    }

    #[test]
    fn affine_order_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        let order = VisitOrder::affine(&mut rng, 1_000);
        let set: HashSet<usize> = (0..1_000).map(|pos| order.index(pos)).collect();
        assert_eq!(set.len(), 1_000);
        assert!(set.iter().all(|&i| i < 1_000));
    }

    #[test]
    fn huge_shuffled_grid_is_walked_lazily() {
        let axes = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|name| Axis::new(*name, (0..100).map(f64::from).collect()))
            .collect();
        let space = ParameterSpace::new(axes);
        let total = space.total();
        assert_eq!(total, 1_000_000_000_000);

        let mut grid = GridSearch::new(space.clone(), 8, Some(11), None);
        assert_eq!(grid.remaining(), total);
        let first: Vec<usize> = grid.next_batch().unwrap().into_iter().map(|c| c.index).collect();
        assert_eq!(first.len(), 8);
        assert!(first.iter().all(|&i| i < total));
        let distinct: HashSet<usize> = first.iter().copied().collect();
        assert_eq!(distinct.len(), 8);

        let again = GridSearch::new(space, 8, Some(11), None).next_batch().unwrap();
        assert_eq!(again.into_iter().map(|c| c.index).collect::<Vec<_>>(), first);
    }
}
