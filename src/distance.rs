//! Dense ingredient-to-ingredient distance matrix.
//!
//! The tree metric from [`crate::taxonomy`] is evaluated for every unordered pair
//! and scattered into a symmetric `n×n` [`DenseMatrix`]. Rows are computed in
//! parallel; each worker returns its upper-triangle row and the caller writes
//! both `(i, j)` and `(j, i)` so every cell has exactly one writer.
//!
//! [`DistanceSnapshot`] is the serializable, id-keyed form of a matrix used as
//! the run artifact and as a warm start for the next run.

use std::path::Path;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::{Array, Array2, MutArray};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{Result, SimilarityError};
use crate::registry::IndexRegistry;
use crate::taxonomy::IngredientTree;
use crate::EntityId;

/// Build the symmetric tree-distance matrix. Deterministic, zero diagonal.
pub fn ingredient_distance_matrix(tree: &IngredientTree) -> DenseMatrix<f64> {
    let n = tree.len();
    info!("Computing {}×{} ingredient distance matrix", n, n);

    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| ((i + 1)..n).map(|j| tree.distance(i, j)).collect())
        .collect();

    let matrix = symmetric_from_upper(n, &upper);
    debug!("Ingredient distance matrix filled ({} pairs)", n * n.saturating_sub(1) / 2);
    matrix
}

/// Scatter strict upper-triangle rows (`upper[i][j - i - 1]`) into a symmetric matrix.
pub(crate) fn symmetric_from_upper(n: usize, upper: &[Vec<f64>]) -> DenseMatrix<f64> {
    let mut matrix = DenseMatrix::<f64>::zeros(n, n);
    for (i, row) in upper.iter().enumerate() {
        for (offset, &d) in row.iter().enumerate() {
            let j = i + 1 + offset;
            matrix.set((i, j), d);
            matrix.set((j, i), d);
        }
    }
    matrix
}

/// Frobenius norm of `a - b`.
pub fn frobenius_delta(a: &DenseMatrix<f64>, b: &DenseMatrix<f64>) -> Result<f64> {
    let (n, m) = a.shape();
    if b.shape() != (n, m) {
        return Err(SimilarityError::DimensionMismatch {
            expected: n * m,
            actual: b.shape().0 * b.shape().1,
        });
    }
    let mut acc = 0.0f64;
    for i in 0..n {
        for j in 0..m {
            let d = *a.get((i, j)) - *b.get((i, j));
            acc += d * d;
        }
    }
    Ok(acc.sqrt())
}

/// Matrix rows as owned vectors, in index order.
pub fn to_rows(matrix: &DenseMatrix<f64>) -> Vec<Vec<f64>> {
    let (n, m) = matrix.shape();
    (0..n)
        .map(|i| (0..m).map(|j| *matrix.get((i, j))).collect())
        .collect()
}

/// Absolute and relative tolerance for the zero diagonal and symmetry of a snapshot.
const SNAPSHOT_TOLERANCE: f64 = 1e-9;

/// Id-keyed ingredient distance matrix, stable across runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DistanceSnapshot {
    pub ingredient_ids: Vec<EntityId>,
    pub values: Vec<Vec<f64>>,
}

impl DistanceSnapshot {
    pub fn from_matrix(registry: &IndexRegistry<EntityId>, matrix: &DenseMatrix<f64>) -> Self {
        Self {
            ingredient_ids: registry.ids().to_vec(),
            values: to_rows(matrix),
        }
    }

    /// Checks that `values` is a square, symmetric, non-negative matrix over
    /// `ingredient_ids` with a zero diagonal.
    pub fn validate(&self) -> Result<()> {
        let n = self.ingredient_ids.len();
        if self.values.len() != n {
            return Err(SimilarityError::DimensionMismatch {
                expected: n,
                actual: self.values.len(),
            });
        }
        for row in &self.values {
            if row.len() != n {
                return Err(SimilarityError::DimensionMismatch {
                    expected: n,
                    actual: row.len(),
                });
            }
            if row.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(SimilarityError::InvalidConfig(
                    "distance snapshot contains negative or non-finite values".to_string(),
                ));
            }
        }
        for i in 0..n {
            if self.values[i][i].abs() > SNAPSHOT_TOLERANCE {
                return Err(SimilarityError::InvalidConfig(format!(
                    "distance snapshot has non-zero self-distance {} for ingredient {}",
                    self.values[i][i], self.ingredient_ids[i]
                )));
            }
            for j in (i + 1)..n {
                let (a, b) = (self.values[i][j], self.values[j][i]);
                if !approx::relative_eq!(
                    a,
                    b,
                    epsilon = SNAPSHOT_TOLERANCE,
                    max_relative = SNAPSHOT_TOLERANCE
                ) {
                    return Err(SimilarityError::InvalidConfig(format!(
                        "distance snapshot is not symmetric: d({}, {}) = {} but d({}, {}) = {}",
                        self.ingredient_ids[i],
                        self.ingredient_ids[j],
                        a,
                        self.ingredient_ids[j],
                        self.ingredient_ids[i],
                        b
                    )));
                }
            }
        }
        Ok(())
    }

    /// Re-index the snapshot onto the current run's registry.
    ///
    /// Pairs whose ingredients are missing from the snapshot keep the value in
    /// `fallback` (normally the tree distance matrix).
    pub fn align(
        &self,
        registry: &IndexRegistry<EntityId>,
        fallback: &DenseMatrix<f64>,
    ) -> Result<DenseMatrix<f64>> {
        self.validate()?;
        let n = registry.len();
        if fallback.shape() != (n, n) {
            return Err(SimilarityError::DimensionMismatch {
                expected: n,
                actual: fallback.shape().0,
            });
        }

        let snapshot_index = IndexRegistry::from_ids(self.ingredient_ids.iter().copied())
            .map_err(SimilarityError::DuplicateId)?;
        let positions: Vec<Option<usize>> = registry
            .ids()
            .iter()
            .map(|id| snapshot_index.id_to_index(id))
            .collect();
        let missing = positions.iter().filter(|p| p.is_none()).count();
        if missing > 0 {
            warn!(
                "Warm start is missing {} of {} ingredients; using tree distances for them",
                missing, n
            );
        }

        let mut matrix = fallback.clone();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    matrix.set((i, j), 0.0);
                    continue;
                }
                if let (Some(si), Some(sj)) = (positions[i], positions[j]) {
                    matrix.set((i, j), self.values[si][sj]);
                }
            }
        }
        info!("Aligned warm-start matrix onto {} ingredients", n);
        Ok(matrix)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let snapshot: DistanceSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn write_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}
