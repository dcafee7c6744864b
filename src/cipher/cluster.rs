//! Acoustic partitioning of key presses by simulated annealing
//!
//! The partition score rewards putting acoustically similar presses in the
//! same cluster: for a pair threshold tau,
//! `pClusters = sum over i<j of [same(i,j) ? cc(i,j) - tau : tau - cc(i,j)]`.
//! Tau sits halfway between the median and the maximum off-diagonal cc,
//! nudged down so that a map of indistinguishable presses still prefers a
//! single cluster. A randomized local search over reassign/swap/merge/split
//! proposals climbs the score under a cooling temperature schedule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::cipher::Clustering;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::similarity::SimilarityMap;

/// Partition search over a fixed similarity map
pub struct Clusterer<'a> {
    sim: &'a SimilarityMap,
    tau: f64,
}

impl<'a> Clusterer<'a> {
    pub fn new(sim: &'a SimilarityMap) -> Self {
        let tau = if sim.len() < 2 {
            0.0
        } else {
            let (_, max) = sim.min_max_off_diagonal();
            0.5 * (sim.median_off_diagonal() + max) - 1e-3
        };
        debug!("Clusterer pair threshold tau = {:.4}", tau);
        Self { sim, tau }
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Full from-scratch partition score
    pub fn score(&self, clusters: &[u32]) -> f64 {
        let n = clusters.len();
        let mut total = 0.0;
        for i in 0..n {
            for j in i + 1..n {
                let cc = self.sim.cc(i, j);
                if clusters[i] == clusters[j] {
                    total += cc - self.tau;
                } else {
                    total += self.tau - cc;
                }
            }
        }
        total
    }

    /// Run independent annealing restarts and return their best partitions,
    /// sorted by `p_clusters` descending.
    ///
    /// Restarts are seeded individually from `config.seed` and the cluster
    /// budget, so results are reproducible and independent of scheduling.
    pub fn clusterings(
        &self,
        config: &ClusterConfig,
        max_clusters: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<Clustering>> {
        let restarts = config.clusterings_per_iteration;

        let mut results: Vec<Clustering> = (0..restarts)
            .into_par_iter()
            .map(|restart| {
                let seed = config
                    .seed
                    .wrapping_mul(0x9e3779b97f4a7c15)
                    .wrapping_add((max_clusters as u64) << 24)
                    .wrapping_add(restart as u64);
                self.anneal(config, max_clusters, seed, cancel)
            })
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|a, b| {
            b.p_clusters
                .total_cmp(&a.p_clusters)
                .then_with(|| a.clusters.cmp(&b.clusters))
        });

        Ok(results)
    }

    /// One annealing restart: random initial partition, proposal loop with
    /// cooling, best state kept aside and rescored from scratch at the end.
    fn anneal(
        &self,
        config: &ClusterConfig,
        max_clusters: usize,
        seed: u64,
        cancel: &CancelToken,
    ) -> Result<Clustering> {
        let n = self.sim.len();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut clusters: Vec<u32> = (0..n)
            .map(|_| rng.gen_range(0..max_clusters) as u32)
            .collect();
        let mut score = self.score(&clusters);

        let mut best = clusters.clone();
        let mut best_score = score;

        let iters = config.mcmc_iterations;
        let t0 = config.temperature_start;
        let t1 = config.temperature_end;

        for iter in 0..iters {
            if iter % 256 == 0 {
                cancel.check()?;
            }

            let temperature = t0 * (t1 / t0).powf(iter as f64 / iters as f64);

            let delta = match rng.gen_range(0..100) {
                0..=69 => self.propose_reassign(&mut clusters, max_clusters, &mut rng, temperature),
                70..=84 => self.propose_swap(&mut clusters, &mut rng, temperature),
                85..=92 => self.propose_merge(&mut clusters, &mut rng, temperature),
                _ => self.propose_split(&mut clusters, max_clusters, &mut rng, temperature),
            };

            score += delta;

            if score > best_score {
                best_score = score;
                best.copy_from_slice(&clusters);
            }
        }

        // incremental deltas drift; the stored score is always exact
        let final_score = self.score(&best);
        Ok(Clustering::new(best, max_clusters, final_score))
    }

    fn accept(&self, delta: f64, temperature: f64, rng: &mut StdRng) -> bool {
        delta >= 0.0 || rng.gen::<f64>() < (delta / temperature).exp()
    }

    /// Score change from moving press `i` from its cluster to `target`
    fn delta_reassign(&self, clusters: &[u32], i: usize, target: u32) -> f64 {
        let current = clusters[i];
        let mut delta = 0.0;
        for (j, &cj) in clusters.iter().enumerate() {
            if j == i {
                continue;
            }
            let cc = self.sim.cc(i, j);
            if cj == current {
                delta += 2.0 * (self.tau - cc);
            } else if cj == target {
                delta += 2.0 * (cc - self.tau);
            }
        }
        delta
    }

    /// (a) move one press to a different cluster (possibly an empty one)
    fn propose_reassign(
        &self,
        clusters: &mut [u32],
        max_clusters: usize,
        rng: &mut StdRng,
        temperature: f64,
    ) -> f64 {
        let n = clusters.len();
        let i = rng.gen_range(0..n);
        let target = rng.gen_range(0..max_clusters) as u32;
        if target == clusters[i] {
            return 0.0;
        }

        let delta = self.delta_reassign(clusters, i, target);
        if self.accept(delta, temperature, rng) {
            clusters[i] = target;
            delta
        } else {
            0.0
        }
    }

    /// (b) exchange the cluster labels of two presses
    fn propose_swap(&self, clusters: &mut [u32], rng: &mut StdRng, temperature: f64) -> f64 {
        let n = clusters.len();
        let i = rng.gen_range(0..n);
        let j = rng.gen_range(0..n);
        let (ci, cj) = (clusters[i], clusters[j]);
        if ci == cj {
            return 0.0;
        }

        let d1 = self.delta_reassign(clusters, i, cj);
        clusters[i] = cj;
        let d2 = self.delta_reassign(clusters, j, ci);
        clusters[j] = ci;

        let delta = d1 + d2;
        if self.accept(delta, temperature, rng) {
            delta
        } else {
            clusters[i] = ci;
            clusters[j] = cj;
            0.0
        }
    }

    /// (c) relabel one cluster into another
    fn propose_merge(&self, clusters: &mut [u32], rng: &mut StdRng, temperature: f64) -> f64 {
        let n = clusters.len();
        let a = clusters[rng.gen_range(0..n)];
        let b = clusters[rng.gen_range(0..n)];
        if a == b {
            return 0.0;
        }

        let mut delta = 0.0;
        for i in 0..n {
            if clusters[i] != a {
                continue;
            }
            for (j, &cj) in clusters.iter().enumerate() {
                if cj == b {
                    delta += 2.0 * (self.sim.cc(i, j) - self.tau);
                }
            }
        }

        if self.accept(delta, temperature, rng) {
            for c in clusters.iter_mut() {
                if *c == a {
                    *c = b;
                }
            }
            delta
        } else {
            0.0
        }
    }

    /// (d) split a cluster along two seed presses, members following the
    /// seed they correlate with more strongly
    fn propose_split(
        &self,
        clusters: &mut [u32],
        max_clusters: usize,
        rng: &mut StdRng,
        temperature: f64,
    ) -> f64 {
        let n = clusters.len();
        let a = clusters[rng.gen_range(0..n)];
        let members: Vec<usize> = (0..n).filter(|&i| clusters[i] == a).collect();
        if members.len() < 2 {
            return 0.0;
        }

        let mut used = vec![false; max_clusters];
        for &c in clusters.iter() {
            used[c as usize] = true;
        }
        let free = match (0..max_clusters).find(|&c| !used[c]) {
            Some(c) => c as u32,
            None => return 0.0,
        };

        let s1 = members[rng.gen_range(0..members.len())];
        let s2 = members[rng.gen_range(0..members.len())];
        if s1 == s2 {
            return 0.0;
        }

        let moved: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&m| m != s1 && (m == s2 || self.sim.cc(m, s2) > self.sim.cc(m, s1)))
            .collect();
        if moved.is_empty() || moved.len() == members.len() {
            return 0.0;
        }

        let mut delta = 0.0;
        for &i in &moved {
            for &j in &members {
                if !moved.contains(&j) {
                    delta += 2.0 * (self.tau - self.sim.cc(i, j));
                }
            }
        }

        if self.accept(delta, temperature, rng) {
            for &m in &moved {
                clusters[m] = free;
            }
            delta
        } else {
            0.0
        }
    }
}
