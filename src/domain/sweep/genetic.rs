//! Genetic search over axis-value genomes.
//!
//! Each generation keeps the top `elite` genomes unchanged and fills the rest
//! with tournament-selected, uniformly crossed and mutated children. Scores are
//! cached by flat index so a genome is dispatched at most once; a generation
//! made entirely of cached genomes advances without a dispatch.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{CandidateParameterSet, ParameterSpace, ScoredCandidate, SweepTechnique};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneticConfig {
    pub population: usize,
    pub generations: usize,
    pub elite: usize,
    pub tournament: usize,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    /// Generations without a best-fitness improvement before stopping.
    pub patience: usize,
    /// Stop once the unexplored share of the space is at or below this.
    pub min_remaining_fraction: f64,
    pub seed: u64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population: 20,
            generations: 30,
            elite: 2,
            tournament: 3,
            crossover_rate: 0.8,
            mutation_rate: 0.1,
            patience: 5,
            min_remaining_fraction: 0.0,
            seed: 42,
        }
    }
}

type Genome = Vec<usize>;

pub struct GeneticSearch {
    space: ParameterSpace,
    cfg: GeneticConfig,
    rng: StdRng,
    cache: HashMap<usize, f64>,
    population: Vec<Genome>,
    generation: usize,
    best: f64,
    stale: usize,
    history: Vec<f64>,
    done: bool,
}

impl GeneticSearch {
    pub fn new(space: ParameterSpace, cfg: GeneticConfig) -> Self {
        let done = space.total() == 0 || cfg.generations == 0;
        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            space,
            cfg,
            cache: HashMap::new(),
            population: Vec::new(),
            generation: 0,
            best: f64::NEG_INFINITY,
            stale: 0,
            history: Vec::new(),
            done,
        }
    }

    /// Best score of each completed generation.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn generations_run(&self) -> usize {
        self.generation
    }

    pub fn evaluated(&self) -> usize {
        self.cache.len()
    }

    fn population_size(&self) -> usize {
        self.cfg.population.max(1).min(self.space.total())
    }

    fn seed_population(&mut self) -> Vec<Genome> {
        let total = self.space.total();
        let size = self.population_size();
        let indices: Vec<usize> = if total <= size {
            (0..total).collect()
        } else {
            rand::seq::index::sample(&mut self.rng, total, size).into_vec()
        };
        indices.into_iter().map(|i| self.space.genes_at(i)).collect()
    }

    fn uncached(&self) -> Vec<CandidateParameterSet> {
        let mut seen = HashSet::new();
        self.population
            .iter()
            .map(|g| self.space.index_of(g))
            .filter(|i| !self.cache.contains_key(i) && seen.insert(*i))
            .map(|i| self.space.combination_at(i))
            .collect()
    }

    fn finish_generation(&mut self) {
        let mut scored: Vec<(Genome, usize, f64)> = self
            .population
            .drain(..)
            .map(|g| {
                let index = self.space.index_of(&g);
                let score = self.cache.get(&index).copied().unwrap_or(f64::NEG_INFINITY);
                (g, index, score)
            })
            .collect();
        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)));

        let generation_best = scored.first().map_or(f64::NEG_INFINITY, |s| s.2);
        if generation_best > self.best {
            self.best = generation_best;
            self.stale = 0;
        } else {
            self.stale += 1;
        }
        self.history.push(generation_best);
        self.generation += 1;

        let total = self.space.total();
        let remaining = total.saturating_sub(self.cache.len()) as f64 / total as f64;
        debug!(
            generation = self.generation,
            best = self.best,
            stale = self.stale,
            remaining,
            "generation done"
        );

        if self.generation >= self.cfg.generations
            || self.stale >= self.cfg.patience.max(1)
            || remaining <= self.cfg.min_remaining_fraction
        {
            self.done = true;
            return;
        }
        self.population = self.breed(&scored);
    }

    fn breed(&mut self, ranked: &[(Genome, usize, f64)]) -> Vec<Genome> {
        let size = self.population_size();
        let mut next: Vec<Genome> = ranked
            .iter()
            .take(self.cfg.elite.min(size))
            .map(|(g, _, _)| g.clone())
            .collect();
        while next.len() < size {
            let a = self.tournament(ranked);
            let b = self.tournament(ranked);
            let mut child = if self.rng.r#gen::<f64>() < self.cfg.crossover_rate {
                ranked[a]
                    .0
                    .iter()
                    .zip(ranked[b].0.iter())
                    .map(|(&x, &y)| if self.rng.r#gen::<bool>() { x } else { y })
                    .collect()
            } else {
                ranked[a].0.clone()
            };
            self.mutate(&mut child);
            next.push(child);
        }
        next
    }

    /// Position in `ranked` of the winner; lower is fitter.
    fn tournament(&mut self, ranked: &[(Genome, usize, f64)]) -> usize {
        let rounds = self.cfg.tournament.max(1);
        (0..rounds)
            .map(|_| self.rng.gen_range(0..ranked.len()))
            .min()
            .unwrap_or(0)
    }

    fn mutate(&mut self, genome: &mut Genome) {
        for (gene, axis) in genome.iter_mut().zip(self.space.axes().iter()) {
            if axis.len() > 1 && self.rng.r#gen::<f64>() < self.cfg.mutation_rate {
                *gene = self.rng.gen_range(0..axis.len());
            }
        }
    }
}

impl SweepTechnique for GeneticSearch {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn next_batch(&mut self) -> Option<Vec<CandidateParameterSet>> {
        loop {
            if self.done {
                return None;
            }
            if self.population.is_empty() {
                self.population = self.seed_population();
            }
            let batch = self.uncached();
            if !batch.is_empty() {
                return Some(batch);
            }
            self.finish_generation();
        }
    }

    fn observe(&mut self, results: &[ScoredCandidate]) {
        for r in results {
            self.cache.insert(r.candidate.index, r.score);
        }
        let complete = self
            .population
            .iter()
            .all(|g| self.cache.contains_key(&self.space.index_of(g)));
        if complete && !self.population.is_empty() {
            self.finish_generation();
        }
    }
}
