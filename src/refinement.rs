//! Expected-match accumulation and BLOSUM-style re-estimation of ingredient costs.
//!
//! One cycle runs `TreeDistance → RecipeDistances → Neighbors → ExpectedMatches →
//! RefinedDistance`:
//!
//! 1. EMD between every pair of recipes under the current ingredient costs
//! 2. k-NN per recipe with Boltzmann weights
//! 3. for every (recipe, neighbour) pair, the optimal transport plan scaled by the
//!    neighbour weight is added into an `n×n` expected co-occurrence matrix
//! 4. the M-step turns co-occurrence into log-odds and rescales the costs
//!
//! Iterations are strictly sequential and each takes the previous matrix as an
//! explicit input. The loop stops on the iteration budget, on convergence
//! (Frobenius delta below threshold) or when the cancellation flag is raised;
//! neighbours and recipe distances returned always match the final cost matrix.
//!
//! ## M-step
//!
//! With expected matches `E` and reference costs `D₀` (the tree distances or the
//! warm start the loop began from):
//!
//! ```text
//! C    = (E + Eᵀ)/2 + β          β = pseudocount · ΣE / n²
//! q_ij = C_ij / ΣC               p_i = Σ_j q_ij
//! s_ij = clip(log2(q_ij / (p_i p_j)), ±max_log_odds)
//! D'_ij = D₀_ij · 2^(−s_ij)       D'_ii = 0
//! ```
//!
//! Every iteration re-scores against `D₀` rather than the previous iterate, so
//! refined costs stay within `D₀ · 2^(±max_log_odds)` and the loop settles as
//! soon as the expected matches stop changing. Uniform counts give `s = 0` and
//! return `D₀`. Pairs transported more often than chance get cheaper, pairs
//! never matched get dearer. Unlike the tree metric, `D'` need not satisfy the
//! triangle inequality.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::{Array, Array2, MutArray};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::config::{validate_k, validate_temperature, EngineConfig};
use crate::distance::frobenius_delta;
use crate::emd::{emd_matrix, emd_sparse};
use crate::error::{Result, SimilarityError};
use crate::neighbors::{knn_matrix, neighbor_weight_matrix, NeighborList};
use crate::volume::Distribution;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementStage {
    TreeDistance,
    RecipeDistances,
    Neighbors,
    ExpectedMatches,
    RefinedDistance,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MStepParams {
    pub pseudocount: f64,
    pub max_log_odds: f64,
}

impl Default for MStepParams {
    fn default() -> Self {
        Self {
            pseudocount: 0.1,
            max_log_odds: 4.0,
        }
    }
}

/// Accumulate `weight · plan[i][j]` over every (recipe, neighbour) pair.
///
/// Plans are computed in parallel per recipe and summed sequentially in
/// recipe order, so the result does not depend on thread scheduling.
pub fn expected_match_matrix(
    distributions: &[Distribution],
    cost: &DenseMatrix<f64>,
    neighbors: &[NeighborList],
    weights: &[Vec<f64>],
) -> Result<DenseMatrix<f64>> {
    let m = distributions.len();
    if neighbors.len() != m || weights.len() != m {
        return Err(SimilarityError::DimensionMismatch {
            expected: m,
            actual: neighbors.len().min(weights.len()),
        });
    }
    let n = cost.shape().0;
    info!("Accumulating expected matches over {} recipes", m);

    let contributions: Vec<Vec<(usize, usize, f64)>> = (0..m)
        .into_par_iter()
        .map(|r| {
            let mut local = Vec::new();
            for (nb, &w) in neighbors[r].iter().zip(&weights[r]) {
                let result = emd_sparse(&distributions[r], &distributions[nb.index], cost, true)?;
                let plan = result.plan.unwrap_or_default();
                local.extend(plan.into_iter().map(|(i, j, mass)| (i, j, w * mass)));
            }
            Ok(local)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut expected = DenseMatrix::<f64>::zeros(n, n);
    let mut total = 0.0f64;
    for (i, j, v) in contributions.into_iter().flatten() {
        let cur = *expected.get((i, j));
        expected.set((i, j), cur + v);
        total += v;
    }
    debug!("Expected-match mass: {:.6}", total);
    Ok(expected)
}

/// Re-estimate the cost matrix from expected matches by rescaling `reference`
/// (see module docs). Without any observed matches `reference` comes back unchanged.
pub fn m_step_blosum(
    expected: &DenseMatrix<f64>,
    reference: &DenseMatrix<f64>,
    params: &MStepParams,
) -> Result<DenseMatrix<f64>> {
    let (n, cols) = expected.shape();
    if n != cols {
        return Err(SimilarityError::DimensionMismatch {
            expected: n,
            actual: cols,
        });
    }
    if reference.shape() != (n, n) {
        return Err(SimilarityError::DimensionMismatch {
            expected: n,
            actual: reference.shape().0,
        });
    }

    let mut observed = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            observed += *expected.get((i, j));
        }
    }
    if observed <= 0.0 {
        warn!("No expected matches observed; keeping reference distance matrix");
        return Ok(reference.clone());
    }

    let beta = params.pseudocount * observed / (n * n) as f64;
    let mut counts = vec![vec![0.0f64; n]; n];
    let mut total = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            let c = (*expected.get((i, j)) + *expected.get((j, i))) / 2.0 + beta;
            counts[i][j] = c;
            total += c;
        }
    }

    let marginals: Vec<f64> = counts
        .iter()
        .map(|row| row.iter().sum::<f64>() / total)
        .collect();

    let mut refined = DenseMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let q = counts[i][j] / total;
            let odds = (q / (marginals[i] * marginals[j])).log2();
            let score = odds.clamp(-params.max_log_odds, params.max_log_odds);
            refined.set((i, j), *reference.get((i, j)) * (-score).exp2());
        }
    }
    trace!("M-step: beta={:.3e}, total count={:.6}", beta, total);
    Ok(refined)
}

/// Totals reported alongside the final matrices.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RefinementSummary {
    pub iterations: usize,
    pub converged: bool,
    pub cancelled: bool,
    /// Frobenius norm of the change made by each iteration.
    pub deltas: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct RefinementOutcome {
    pub ingredient_distances: DenseMatrix<f64>,
    pub recipe_distances: DenseMatrix<f64>,
    pub neighbors: Vec<NeighborList>,
    pub weights: Vec<Vec<f64>>,
    pub summary: RefinementSummary,
}

/// The outer EM loop over a fixed set of recipe distributions.
pub struct Refiner<'a> {
    distributions: &'a [Distribution],
    k: usize,
    temperature: f64,
    max_iterations: usize,
    convergence_threshold: f64,
    m_step: MStepParams,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Refiner<'a> {
    pub fn new(distributions: &'a [Distribution], config: &EngineConfig) -> Self {
        Self {
            distributions,
            k: config.k,
            temperature: config.temperature,
            max_iterations: config.max_refinement_iterations,
            convergence_threshold: config.convergence_threshold,
            m_step: MStepParams {
                pseudocount: config.pseudocount,
                max_log_odds: config.max_log_odds,
            },
            cancel: None,
        }
    }

    /// Raising the flag stops the loop before its next iteration starts.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run from `initial` (tree distances or a warm start) until budget,
    /// convergence or cancellation. `initial` is also the reference every
    /// M-step rescales.
    pub fn run(&self, initial: DenseMatrix<f64>) -> Result<RefinementOutcome> {
        validate_k(self.k, self.distributions.len())?;
        validate_temperature(self.temperature)?;

        let mut stage = RefinementStage::TreeDistance;
        let mut distances = initial.clone();
        let reference = initial;
        let mut summary = RefinementSummary::default();
        info!(
            "Starting refinement: {} recipes, k={}, T={}, max iterations={}",
            self.distributions.len(),
            self.k,
            self.temperature,
            self.max_iterations
        );

        loop {
            stage = advance(stage, RefinementStage::RecipeDistances);
            let recipe_distances = emd_matrix(self.distributions, &distances)?;

            stage = advance(stage, RefinementStage::Neighbors);
            let neighbors = knn_matrix(&recipe_distances, self.k)?;
            let weights = neighbor_weight_matrix(&neighbors, self.temperature)?;

            let stop = if summary.converged {
                Some("converged")
            } else if summary.iterations >= self.max_iterations {
                Some("iteration budget exhausted")
            } else if self.cancelled() {
                summary.cancelled = true;
                Some("cancelled")
            } else {
                None
            };
            if let Some(reason) = stop {
                info!(
                    "Refinement finished after {} iteration(s): {}",
                    summary.iterations, reason
                );
                return Ok(RefinementOutcome {
                    ingredient_distances: distances,
                    recipe_distances,
                    neighbors,
                    weights,
                    summary,
                });
            }

            stage = advance(stage, RefinementStage::ExpectedMatches);
            let expected =
                expected_match_matrix(self.distributions, &distances, &neighbors, &weights)?;

            stage = advance(stage, RefinementStage::RefinedDistance);
            let refined = m_step_blosum(&expected, &reference, &self.m_step)?;
            let delta = frobenius_delta(&refined, &distances)?;

            summary.iterations += 1;
            summary.deltas.push(delta);
            summary.converged = delta < self.convergence_threshold;
            info!(
                "Refinement iteration {}: Frobenius delta {:.6e}",
                summary.iterations, delta
            );
            distances = refined;
        }
    }
}

fn advance(from: RefinementStage, to: RefinementStage) -> RefinementStage {
    debug!("Refinement stage {:?} -> {:?}", from, to);
    to
}
