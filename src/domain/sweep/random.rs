//! Random search over unseen combinations.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{CandidateParameterSet, ParameterSpace, ScoredCandidate, SweepTechnique};

pub struct RandomSearch {
    space: ParameterSpace,
    rng: StdRng,
    seen: HashSet<usize>,
    batch_size: usize,
    max_iterations: usize,
    deadline: Option<Instant>,
}

impl RandomSearch {
    /// Stops after `max_iterations` candidates, once `time_budget` has
    /// elapsed, or when the space is exhausted, whichever comes first.
    pub fn new(
        space: ParameterSpace,
        batch_size: usize,
        max_iterations: usize,
        time_budget: Option<Duration>,
        seed: u64,
    ) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
            seen: HashSet::new(),
            batch_size: batch_size.max(1),
            max_iterations,
            deadline: time_budget.map(|d| Instant::now() + d),
        }
    }

    pub fn issued(&self) -> usize {
        self.seen.len()
    }

    fn unseen_remaining(&self) -> Vec<usize> {
        (0..self.space.total())
            .filter(|i| !self.seen.contains(i))
            .collect()
    }
}

impl SweepTechnique for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn next_batch(&mut self) -> Option<Vec<CandidateParameterSet>> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return None;
        }
        let total = self.space.total();
        let remaining = total - self.seen.len();
        let budget = self.max_iterations.saturating_sub(self.seen.len());
        let want = self.batch_size.min(remaining).min(budget);
        if want == 0 {
            return None;
        }

        let picks: Vec<usize> = if remaining <= want.saturating_mul(4) {
            // nearly exhausted: pick from what is left instead of rejection sampling
            let mut left = self.unseen_remaining();
            left.shuffle(&mut self.rng);
            left.truncate(want);
            left
        } else {
            let mut picks = Vec::with_capacity(want);
            while picks.len() < want {
                let i = self.rng.gen_range(0..total);
                if !self.seen.contains(&i) && !picks.contains(&i) {
                    picks.push(i);
                }
            }
            picks
        };

        self.seen.extend(picks.iter().copied());
        Some(
            picks
                .into_iter()
                .map(|i| self.space.combination_at(i))
                .collect(),
        )
    }

    fn observe(&mut self, _results: &[ScoredCandidate]) {}
}
