use approx::assert_relative_eq;
use smartcore::linalg::basic::arrays::Array;

use crate::config::UnitFallback;
use crate::distance::ingredient_distance_matrix;
use crate::emd::{compute_emd, emd_matrix, emd_sparse};
use crate::error::SimilarityError;
use crate::taxonomy::IngredientTree;
use crate::tests::init;
use crate::tests::test_data::*;
use crate::volume::{Distribution, RecipeVolumes, UnitTable};

fn bar_distributions() -> (IngredientTree, Vec<Distribution>) {
    let tree = IngredientTree::build(&bar_taxonomy(), 1.0).unwrap();
    let units = UnitTable::from_rows(&bar_units());
    let (volumes, _) = RecipeVolumes::build(
        &bar_recipe_rows(),
        &bar_recipes(),
        &units,
        &tree.registry,
        UnitFallback::Drop,
    );
    let dists = volumes.distributions().unwrap();
    (tree, dists)
}

#[test]
fn test_single_ingredient_recipes_cost_the_tree_distance() {
    init();
    let tree = IngredientTree::build(&bar_taxonomy(), 1.0).unwrap();
    let cost = ingredient_distance_matrix(&tree);
    let n = tree.len();
    let rum = tree.registry.id_to_index(&RUM).unwrap();
    let light = tree.registry.id_to_index(&LIGHT_RUM).unwrap();

    let mut a = vec![0.0; n];
    let mut b = vec![0.0; n];
    a[rum] = 60.0;
    b[light] = 60.0;
    let result = compute_emd(&a, &b, &cost).unwrap();
    assert_relative_eq!(result.cost, 0.5, epsilon = 1e-9);
    assert_relative_eq!(result.cost, tree.distance(rum, light), epsilon = 1e-9);
    assert_eq!(result.plan.unwrap(), vec![(rum, light, 1.0)]);
}

#[test]
fn test_identity_is_zero() {
    init();
    let (tree, dists) = bar_distributions();
    let cost = ingredient_distance_matrix(&tree);
    for d in &dists {
        let r = emd_sparse(d, d, &cost, true).unwrap();
        assert!(r.cost.abs() < 1e-6);
        let moved: f64 = r.plan.unwrap().iter().map(|&(_, _, m)| m).sum();
        assert_relative_eq!(moved, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_symmetry_over_catalog() {
    init();
    let (tree, dists) = bar_distributions();
    let cost = ingredient_distance_matrix(&tree);
    for a in &dists {
        for b in &dists {
            let ab = emd_sparse(a, b, &cost, false).unwrap().cost;
            let ba = emd_sparse(b, a, &cost, false).unwrap().cost;
            assert_relative_eq!(ab, ba, epsilon = 1e-7);
            assert!(ab >= 0.0);
        }
    }
}

#[test]
fn test_line_transport_uses_lp() {
    init();
    let cost = line_cost(3);
    let a = vec![(0, 0.5), (1, 0.5)];
    let b = vec![(1, 0.5), (2, 0.5)];
    let result = emd_sparse(&a, &b, &cost, true).unwrap();
    assert_relative_eq!(result.cost, 1.0, epsilon = 1e-7);

    // plan marginals reproduce both distributions
    let plan = result.plan.unwrap();
    let mut rows = [0.0; 3];
    let mut cols = [0.0; 3];
    for &(i, j, m) in &plan {
        assert!(m >= 0.0);
        rows[i] += m;
        cols[j] += m;
    }
    assert_relative_eq!(rows[0], 0.5, epsilon = 1e-7);
    assert_relative_eq!(rows[1], 0.5, epsilon = 1e-7);
    assert_relative_eq!(cols[1], 0.5, epsilon = 1e-7);
    assert_relative_eq!(cols[2], 0.5, epsilon = 1e-7);
}

#[test]
fn test_lp_prefers_cheap_routes() {
    init();
    // Each unit moves one step to the right, nothing crosses two steps
    let cost = line_cost(4);
    let a = vec![(0, 0.25), (1, 0.25), (2, 0.5)];
    let b = vec![(1, 0.25), (2, 0.25), (3, 0.5)];
    let result = emd_sparse(&a, &b, &cost, false).unwrap();
    assert_relative_eq!(result.cost, 1.0, epsilon = 1e-7);
}

#[test]
fn test_point_mass_spreads() {
    init();
    let cost = line_cost(3);
    let a = vec![(0, 0.5), (2, 0.5)];
    let b = vec![(1, 1.0)];
    let result = emd_sparse(&a, &b, &cost, true).unwrap();
    assert_relative_eq!(result.cost, 1.0, epsilon = 1e-12);
    assert_eq!(result.plan.unwrap().len(), 2);
}

#[test]
fn test_dense_inputs_are_normalised() {
    init();
    let cost = line_cost(3);
    let r1 = compute_emd(&[1.0, 1.0, 0.0], &[0.0, 1.0, 1.0], &cost).unwrap();
    let r2 = compute_emd(&[30.0, 30.0, 0.0], &[0.0, 2.0, 2.0], &cost).unwrap();
    assert_relative_eq!(r1.cost, r2.cost, epsilon = 1e-7);
}

#[test]
fn test_bad_inputs_are_infeasible_not_approximated() {
    init();
    let cost = line_cost(3);
    assert!(matches!(
        compute_emd(&[0.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &cost),
        Err(SimilarityError::EmdInfeasible(_))
    ));
    assert!(matches!(
        compute_emd(&[1.0, -1.0, 1.0], &[0.0, 1.0, 0.0], &cost),
        Err(SimilarityError::EmdInfeasible(_))
    ));
    assert!(matches!(
        compute_emd(&[1.0, 0.0], &[0.0, 1.0, 0.0], &cost),
        Err(SimilarityError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        emd_sparse(&[], &[(0, 1.0)], &cost, false),
        Err(SimilarityError::EmdInfeasible(_))
    ));
    assert!(matches!(
        emd_sparse(&[(7, 1.0)], &[(0, 1.0)], &cost, false),
        Err(SimilarityError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_emd_matrix_shape_and_symmetry() {
    init();
    let (tree, dists) = bar_distributions();
    let cost = ingredient_distance_matrix(&tree);
    let m = emd_matrix(&dists, &cost).unwrap();
    assert_eq!(m.shape(), (dists.len(), dists.len()));
    for i in 0..dists.len() {
        assert_eq!(*m.get((i, i)), 0.0);
        for j in 0..dists.len() {
            assert_eq!(*m.get((i, j)), *m.get((j, i)));
        }
    }

    // Daiquiri (index 0) vs Bacardi Cocktail (index 1): only the rum share moves, by 0.2
    assert_relative_eq!(*m.get((0, 1)), (60.0 / 105.0) * 0.2, epsilon = 1e-7);
}

#[test]
fn test_emd_matrix_is_deterministic() {
    init();
    let snapshot = synthetic_snapshot(3, 5, 25);
    let tree = IngredientTree::build(&snapshot.ingredients, 1.0).unwrap();
    let units = UnitTable::from_rows(&snapshot.units);
    let (volumes, _) = RecipeVolumes::build(
        &snapshot.recipe_ingredients,
        &snapshot.recipes,
        &units,
        &tree.registry,
        UnitFallback::Drop,
    );
    let dists = volumes.distributions().unwrap();
    let cost = ingredient_distance_matrix(&tree);
    let a = crate::distance::to_rows(&emd_matrix(&dists, &cost).unwrap());
    let b = crate::distance::to_rows(&emd_matrix(&dists, &cost).unwrap());
    assert_eq!(a, b);
}
