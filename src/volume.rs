//! Recipe volume matrix.
//!
//! Each `(recipe, ingredient, amount, unit)` row is converted to a canonical
//! volume (ml) through the externally owned unit table. Rows for the same
//! `(recipe, ingredient)` are summed. The result is a sparse `m×n` CSR matrix
//! (recipes × ingredients) whose rows, renormalized to 1, are the EMD operands.
//!
//! Policy for units without a conversion is explicit ([`UnitFallback`]): drop
//! the row or assume a nominal volume. Recipes left with no volume are excluded
//! and listed in the [`ValidationReport`], never kept as all-zero rows.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::config::UnitFallback;
use crate::error::{Result, SimilarityError};
use crate::registry::IndexRegistry;
use crate::EntityId;

/// Sparse probability (or mass) vector over ingredient indices, ascending by index.
pub type Distribution = Vec<(usize, f64)>;

/// One row of the unit conversion table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnitConversion {
    pub unit_name: String,
    /// ml per unit; null marks a unit with no volume meaning ("dash", "garnish").
    #[serde(default)]
    pub canonical_volume_per_unit: Option<f64>,
}

/// One row of the recipe-ingredient table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecipeIngredientRow {
    pub recipe_id: EntityId,
    pub ingredient_id: EntityId,
    pub amount: f64,
    pub unit_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecipeRecord {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct UnitTable {
    conversions: HashMap<String, Option<f64>>,
}

impl UnitTable {
    pub fn from_rows(rows: &[UnitConversion]) -> Self {
        let conversions = rows
            .iter()
            .map(|u| (Self::normalise(&u.unit_name), u.canonical_volume_per_unit))
            .collect();
        Self { conversions }
    }

    fn normalise(unit: &str) -> String {
        unit.trim().to_lowercase()
    }

    /// ml per unit, `None` if the unit is unknown or explicitly unconvertible.
    pub fn volume_per_unit(&self, unit: &str) -> Option<f64> {
        self.conversions
            .get(&Self::normalise(unit))
            .copied()
            .flatten()
            .filter(|v| v.is_finite() && *v >= 0.0)
    }

    /// Convert `amount` of `unit` under `fallback`; `None` means drop the row.
    pub fn convert(&self, amount: f64, unit: &str, fallback: UnitFallback) -> Option<f64> {
        match (self.volume_per_unit(unit), fallback) {
            (Some(per_unit), _) => Some(amount * per_unit),
            (None, UnitFallback::NominalValue(per_unit)) => Some(amount * per_unit),
            (None, UnitFallback::Drop) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }
}

/// Why an input row was dropped.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    UnconvertibleUnit {
        recipe_id: EntityId,
        ingredient_id: EntityId,
        unit_name: String,
    },
    UnknownIngredient {
        recipe_id: EntityId,
        ingredient_id: EntityId,
    },
    InvalidAmount {
        recipe_id: EntityId,
        ingredient_id: EntityId,
        amount: f64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExcludedRecipe {
    pub recipe_id: EntityId,
    pub reason: String,
}

/// Per-entity problems collected during a run. None of them is fatal.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub excluded_recipes: Vec<ExcludedRecipe>,
    pub dropped_rows: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.excluded_recipes.is_empty() && self.dropped_rows.is_empty()
    }

    pub fn is_excluded(&self, recipe_id: EntityId) -> bool {
        self.excluded_recipes.iter().any(|e| e.recipe_id == recipe_id)
    }

    fn exclude(&mut self, err: SimilarityError) {
        if let SimilarityError::ZeroVolumeRecipe { recipe_id } = err {
            warn!("Excluding recipe {}: {}", recipe_id, err);
            self.excluded_recipes.push(ExcludedRecipe {
                recipe_id,
                reason: err.to_string(),
            });
        }
    }
}

/// Recipes × ingredients volumes (ml) for every recipe with positive volume.
#[derive(Clone, Debug)]
pub struct RecipeVolumes {
    pub registry: IndexRegistry<EntityId>,
    pub matrix: CsMat<f64>,
    pub names: Vec<Option<String>>,
}

impl RecipeVolumes {
    /// Build the volume matrix.
    ///
    /// `recipes` lists known recipes (ids and names); recipes appearing only in
    /// `rows` are included as well. Dense recipe indices follow ascending id.
    pub fn build(
        rows: &[RecipeIngredientRow],
        recipes: &[RecipeRecord],
        units: &UnitTable,
        ingredients: &IndexRegistry<EntityId>,
        fallback: UnitFallback,
    ) -> (Self, ValidationReport) {
        info!(
            "Building recipe volume matrix from {} rows ({} recipe records, {} units)",
            rows.len(),
            recipes.len(),
            units.len()
        );
        let mut report = ValidationReport::default();

        let mut per_recipe: BTreeMap<EntityId, BTreeMap<usize, f64>> = BTreeMap::new();
        let mut names: HashMap<EntityId, String> = HashMap::new();
        for record in recipes {
            per_recipe.entry(record.id).or_default();
            if let Some(name) = &record.name {
                names.entry(record.id).or_insert_with(|| name.clone());
            }
        }

        for row in rows {
            let amounts = per_recipe.entry(row.recipe_id).or_default();

            let Some(ingredient) = ingredients.id_to_index(&row.ingredient_id) else {
                warn!(
                    "Recipe {} references unknown ingredient {}",
                    row.recipe_id, row.ingredient_id
                );
                report.dropped_rows.push(ValidationIssue::UnknownIngredient {
                    recipe_id: row.recipe_id,
                    ingredient_id: row.ingredient_id,
                });
                continue;
            };

            if !row.amount.is_finite() || row.amount < 0.0 {
                warn!(
                    "Recipe {} ingredient {} has invalid amount {}",
                    row.recipe_id, row.ingredient_id, row.amount
                );
                report.dropped_rows.push(ValidationIssue::InvalidAmount {
                    recipe_id: row.recipe_id,
                    ingredient_id: row.ingredient_id,
                    amount: row.amount,
                });
                continue;
            }

            match units.convert(row.amount, &row.unit_name, fallback) {
                Some(volume) => {
                    trace!(
                        "Recipe {} ingredient {}: {} {} -> {} ml",
                        row.recipe_id,
                        row.ingredient_id,
                        row.amount,
                        row.unit_name,
                        volume
                    );
                    *amounts.entry(ingredient).or_insert(0.0) += volume;
                }
                None => {
                    warn!(
                        "Dropping recipe {} ingredient {}: no volume conversion for unit '{}'",
                        row.recipe_id, row.ingredient_id, row.unit_name
                    );
                    report.dropped_rows.push(ValidationIssue::UnconvertibleUnit {
                        recipe_id: row.recipe_id,
                        ingredient_id: row.ingredient_id,
                        unit_name: row.unit_name.clone(),
                    });
                }
            }
        }

        let mut registry = IndexRegistry::new();
        let mut recipe_names = Vec::new();
        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
        for (recipe_id, amounts) in per_recipe {
            if let Err(err) = check_total_volume(recipe_id, amounts.values().sum()) {
                report.exclude(err);
                continue;
            }
            let r = registry.insert(recipe_id);
            recipe_names.push(names.get(&recipe_id).cloned());
            triplets.extend(
                amounts
                    .into_iter()
                    .filter(|&(_, v)| v > 0.0)
                    .map(|(i, v)| (r, i, v)),
            );
        }

        let mut tri = TriMat::new((registry.len(), ingredients.len()));
        for (r, i, v) in triplets {
            tri.add_triplet(r, i, v);
        }
        let matrix: CsMat<f64> = tri.to_csr();

        info!(
            "Recipe volume matrix: {} recipes × {} ingredients, {} non-zeros, {} excluded, {} rows dropped",
            registry.len(),
            ingredients.len(),
            matrix.nnz(),
            report.excluded_recipes.len(),
            report.dropped_rows.len()
        );

        (
            Self {
                registry,
                matrix,
                names: recipe_names,
            },
            report,
        )
    }

    #[inline]
    pub fn n_recipes(&self) -> usize {
        self.matrix.rows()
    }

    #[inline]
    pub fn n_ingredients(&self) -> usize {
        self.matrix.cols()
    }

    /// Raw volumes of recipe `r`, ascending by ingredient index.
    pub fn volumes(&self, r: usize) -> Distribution {
        self.matrix
            .outer_view(r)
            .map(|row| row.iter().map(|(i, &v)| (i, v)).collect())
            .unwrap_or_default()
    }

    pub fn total_volume(&self, r: usize) -> f64 {
        self.volumes(r).iter().map(|&(_, v)| v).sum()
    }

    /// Recipe `r` as a distribution summing to 1.
    pub fn distribution(&self, r: usize) -> Result<Distribution> {
        let recipe_id = *self.registry.require_id(r)?;
        normalise_distribution(recipe_id, &self.volumes(r))
    }

    /// All recipe distributions in index order.
    pub fn distributions(&self) -> Result<Vec<Distribution>> {
        let out = (0..self.n_recipes())
            .map(|r| self.distribution(r))
            .collect::<Result<Vec<_>>>()?;
        debug!("Normalised {} recipe distributions", out.len());
        Ok(out)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).and_then(|n| n.as_deref())
    }
}

fn check_total_volume(recipe_id: EntityId, total: f64) -> Result<()> {
    if total > 0.0 && total.is_finite() {
        Ok(())
    } else {
        Err(SimilarityError::ZeroVolumeRecipe { recipe_id })
    }
}

/// Scale `volumes` to sum to 1. Fails with `ZeroVolumeRecipe` when there is no mass.
pub fn normalise_distribution(recipe_id: EntityId, volumes: &[(usize, f64)]) -> Result<Distribution> {
    let total: f64 = volumes.iter().map(|&(_, v)| v).sum();
    check_total_volume(recipe_id, total)?;
    Ok(volumes
        .iter()
        .filter(|&&(_, v)| v > 0.0)
        .map(|&(i, v)| (i, v / total))
        .collect())
}
