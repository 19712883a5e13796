//! Earth Mover's Distance between recipe distributions.
//!
//! Each recipe is a probability distribution over ingredients; the ingredient
//! distance matrix is the ground cost. The balanced transport problem
//!
//! ```text
//! minimise   Σ plan[i][j] · cost[i][j]
//! subject to Σ_j plan[i][j] = a[i],  Σ_i plan[i][j] = b[j],  plan ≥ 0
//! ```
//!
//! is handed to the `minilp` simplex solver, restricted to the supports of `a`
//! and `b` (recipes use a handful of ingredients out of hundreds). Because both
//! sides sum to 1, one column constraint is implied by the others and is left
//! out so rounding in the marginals cannot make the system inconsistent.
//!
//! `emd_matrix` evaluates every unordered recipe pair in parallel and scatters
//! the results into a symmetric matrix; each cell is written once.

use log::{debug, info, trace};
use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem};
use rayon::prelude::*;
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::distance::symmetric_from_upper;
use crate::error::{Result, SimilarityError};
use crate::volume::Distribution;

/// Mass below this is treated as zero when reading supports and plans.
const MASS_EPS: f64 = 1e-12;

/// Transport cost plus, when requested, the optimal plan as `(i, j, mass)` triplets.
#[derive(Clone, Debug, PartialEq)]
pub struct EmdResult {
    pub cost: f64,
    pub plan: Option<Vec<(usize, usize, f64)>>,
}

/// EMD between two dense mass vectors over the shared ingredient index space.
///
/// Both vectors are normalized to sum to 1 first. Returns the cost and the plan.
pub fn compute_emd(a: &[f64], b: &[f64], cost: &DenseMatrix<f64>) -> Result<EmdResult> {
    let n = cost.shape().0;
    if cost.shape().1 != n {
        return Err(SimilarityError::DimensionMismatch {
            expected: n,
            actual: cost.shape().1,
        });
    }
    for v in [a, b] {
        if v.len() != n {
            return Err(SimilarityError::DimensionMismatch {
                expected: n,
                actual: v.len(),
            });
        }
    }
    let da = to_distribution(a)?;
    let db = to_distribution(b)?;
    emd_sparse(&da, &db, cost, true)
}

/// Dense vector → normalized sparse distribution.
fn to_distribution(v: &[f64]) -> Result<Distribution> {
    if v.iter().any(|x| !x.is_finite() || *x < 0.0) {
        return Err(SimilarityError::EmdInfeasible(
            "distribution has negative or non-finite mass".to_string(),
        ));
    }
    let total: f64 = v.iter().sum();
    if total <= 0.0 {
        return Err(SimilarityError::EmdInfeasible(
            "distribution has zero total mass".to_string(),
        ));
    }
    Ok(v.iter()
        .enumerate()
        .filter(|&(_, &x)| x > 0.0)
        .map(|(i, &x)| (i, x / total))
        .collect())
}

/// EMD between two sparse distributions that already sum to 1.
pub fn emd_sparse(
    a: &[(usize, f64)],
    b: &[(usize, f64)],
    cost: &DenseMatrix<f64>,
    with_plan: bool,
) -> Result<EmdResult> {
    let a = support(a);
    let b = support(b);
    if a.is_empty() || b.is_empty() {
        return Err(SimilarityError::EmdInfeasible(
            "empty distribution support".to_string(),
        ));
    }
    let n = cost.shape().0;
    if let Some(&(i, _)) = a.iter().chain(b.iter()).find(|&&(i, _)| i >= n) {
        return Err(SimilarityError::DimensionMismatch {
            expected: n,
            actual: i + 1,
        });
    }

    // Closed forms: identical distributions stay put, a point mass has one feasible plan.
    if a == b {
        let plan = with_plan.then(|| a.iter().map(|&(i, m)| (i, i, m)).collect());
        return Ok(EmdResult { cost: 0.0, plan });
    }
    if a.len() == 1 || b.len() == 1 {
        return Ok(point_mass_transport(&a, &b, cost, with_plan));
    }

    solve_transport(&a, &b, cost, with_plan)
}

fn support(d: &[(usize, f64)]) -> Vec<(usize, f64)> {
    d.iter().copied().filter(|&(_, m)| m > MASS_EPS).collect()
}

/// One side is a single ingredient: every unit of mass moves to/from it.
fn point_mass_transport(
    a: &[(usize, f64)],
    b: &[(usize, f64)],
    cost: &DenseMatrix<f64>,
    with_plan: bool,
) -> EmdResult {
    let plan: Vec<(usize, usize, f64)> = if a.len() == 1 {
        let i = a[0].0;
        b.iter().map(|&(j, m)| (i, j, m)).collect()
    } else {
        let j = b[0].0;
        a.iter().map(|&(i, m)| (i, j, m)).collect()
    };
    let total_cost = plan.iter().map(|&(i, j, m)| m * *cost.get((i, j))).sum();
    EmdResult {
        cost: total_cost,
        plan: with_plan.then_some(plan),
    }
}

fn solve_transport(
    a: &[(usize, f64)],
    b: &[(usize, f64)],
    cost: &DenseMatrix<f64>,
    with_plan: bool,
) -> Result<EmdResult> {
    let mut problem = Problem::new(OptimizationDirection::Minimize);
    let mut vars = Vec::with_capacity(a.len() * b.len());
    for &(i, _) in a {
        for &(j, _) in b {
            let c = *cost.get((i, j));
            if !c.is_finite() {
                return Err(SimilarityError::EmdInfeasible(format!(
                    "non-finite ground cost at ({}, {})",
                    i, j
                )));
            }
            vars.push(problem.add_var(c, (0.0, f64::INFINITY)));
        }
    }

    let nb = b.len();
    for (ai, &(_, mass)) in a.iter().enumerate() {
        let mut row = LinearExpr::empty();
        for bj in 0..nb {
            row.add(vars[ai * nb + bj], 1.0);
        }
        problem.add_constraint(row, ComparisonOp::Eq, mass);
    }
    // Last column is implied by the row constraints
    for (bj, &(_, mass)) in b.iter().enumerate().take(nb - 1) {
        let mut col = LinearExpr::empty();
        for ai in 0..a.len() {
            col.add(vars[ai * nb + bj], 1.0);
        }
        problem.add_constraint(col, ComparisonOp::Eq, mass);
    }

    let solution = problem
        .solve()
        .map_err(|e| SimilarityError::EmdInfeasible(e.to_string()))?;
    trace!(
        "Transport LP {}×{} solved, objective {}",
        a.len(),
        nb,
        solution.objective()
    );

    let plan = with_plan.then(|| {
        let mut plan = Vec::new();
        for (ai, &(i, _)) in a.iter().enumerate() {
            for (bj, &(j, _)) in b.iter().enumerate() {
                let m = solution[vars[ai * nb + bj]];
                if m > MASS_EPS {
                    plan.push((i, j, m));
                }
            }
        }
        plan
    });

    Ok(EmdResult {
        cost: solution.objective().max(0.0),
        plan,
    })
}

/// Pairwise EMD for all recipes; symmetric with a zero diagonal.
pub fn emd_matrix(distributions: &[Distribution], cost: &DenseMatrix<f64>) -> Result<DenseMatrix<f64>> {
    let m = distributions.len();
    info!(
        "Computing {}×{} recipe EMD matrix over {} ingredients",
        m,
        m,
        cost.shape().0
    );

    let upper: Vec<Vec<f64>> = (0..m)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..m)
                .map(|j| emd_sparse(&distributions[i], &distributions[j], cost, false).map(|r| r.cost))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let matrix = symmetric_from_upper(m, &upper);
    debug!("EMD matrix filled ({} pairs)", m * m.saturating_sub(1) / 2);
    Ok(matrix)
}
