//! Exact k-nearest neighbours and Boltzmann neighbour weights.
//!
//! - `knn_matrix`: per row, the k smallest off-diagonal entries, ordered by
//!   (distance asc, index asc). Exact, since refinement depends on neighbour identity.
//! - `neighbor_weight_matrix`: per row, `exp(-d/T) / Σ exp(-d/T)` over the row's
//!   neighbours. The row minimum is subtracted before exponentiating; the
//!   result is unchanged and large distances cannot underflow every term.

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::config::{validate_k, validate_temperature};
use crate::error::{Result, SimilarityError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// Neighbours of one row, ascending distance.
pub type NeighborList = Vec<Neighbor>;

/// Top-k neighbours for every row of a square distance matrix.
///
/// Fails with `InvalidK` unless `1 <= k < n`.
pub fn knn_matrix(distances: &DenseMatrix<f64>, k: usize) -> Result<Vec<NeighborList>> {
    let (n, cols) = distances.shape();
    if n != cols {
        return Err(SimilarityError::DimensionMismatch {
            expected: n,
            actual: cols,
        });
    }
    validate_k(k, n)?;
    info!("Extracting {}-NN for {} rows", k, n);

    let lists: Vec<NeighborList> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<Neighbor> = (0..n)
                .filter(|&j| j != i)
                .map(|j| Neighbor {
                    index: j,
                    distance: *distances.get((i, j)),
                })
                .collect();

            candidates.sort_unstable_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then_with(|| a.index.cmp(&b.index))
            });
            candidates.truncate(k);
            candidates
        })
        .collect();

    debug!("k-NN extraction produced {} lists", lists.len());
    Ok(lists)
}

/// Softmax of `-distance / temperature` for each neighbour list.
///
/// Rows sum to 1; an empty list yields an empty row.
pub fn neighbor_weight_matrix(neighbors: &[NeighborList], temperature: f64) -> Result<Vec<Vec<f64>>> {
    validate_temperature(temperature)?;
    Ok(neighbors
        .iter()
        .map(|row| boltzmann_weights(row, temperature))
        .collect())
}

fn boltzmann_weights(row: &[Neighbor], temperature: f64) -> Vec<f64> {
    let Some(min) = row.iter().map(|nb| nb.distance).min_by(|a, b| a.total_cmp(b)) else {
        return Vec::new();
    };
    let energies: Vec<f64> = row
        .iter()
        .map(|nb| (-(nb.distance - min) / temperature).exp())
        .collect();
    let z: f64 = energies.iter().sum();
    energies.into_iter().map(|e| e / z).collect()
}
