//! Neighbour reports resolved to domain identifiers.
//!
//! Works for any entity set that can map dense indices back to ids and display
//! names ([`NamedEntities`]): recipes ([`RecipeVolumes`]) and ingredients
//! ([`IngredientTree`]) share the same reporting path.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};
use crate::neighbors::NeighborList;
use crate::registry::IndexRegistry;
use crate::taxonomy::IngredientTree;
use crate::volume::RecipeVolumes;
use crate::EntityId;

/// Capability shared by entity collections that can be reported on.
pub trait NamedEntities {
    fn registry(&self) -> &IndexRegistry<EntityId>;

    fn entity_name(&self, index: usize) -> Option<&str>;
}

impl NamedEntities for RecipeVolumes {
    fn registry(&self) -> &IndexRegistry<EntityId> {
        &self.registry
    }

    fn entity_name(&self, index: usize) -> Option<&str> {
        self.name(index)
    }
}

impl NamedEntities for IngredientTree {
    fn registry(&self) -> &IndexRegistry<EntityId> {
        &self.registry
    }

    fn entity_name(&self, index: usize) -> Option<&str> {
        self.name(index)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NeighborEntry {
    pub id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    pub distance: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NeighborReport {
    pub id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    pub neighbors: Vec<NeighborEntry>,
}

/// Resolve neighbour lists and their weights to ids and names, one report per row.
pub fn report_neighbors<E: NamedEntities>(
    entities: &E,
    neighbors: &[NeighborList],
    weights: &[Vec<f64>],
) -> Result<Vec<NeighborReport>> {
    let registry = entities.registry();
    if neighbors.len() != registry.len() {
        return Err(SimilarityError::DimensionMismatch {
            expected: registry.len(),
            actual: neighbors.len(),
        });
    }
    if weights.len() != neighbors.len() {
        return Err(SimilarityError::DimensionMismatch {
            expected: neighbors.len(),
            actual: weights.len(),
        });
    }

    let reports = neighbors
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(row, (list, row_weights))| {
            if list.len() != row_weights.len() {
                return Err(SimilarityError::DimensionMismatch {
                    expected: list.len(),
                    actual: row_weights.len(),
                });
            }
            let entries = list
                .iter()
                .zip(row_weights)
                .map(|(nb, &weight)| {
                    Ok(NeighborEntry {
                        id: *registry.require_id(nb.index)?,
                        name: entities.entity_name(nb.index).map(str::to_owned),
                        distance: nb.distance,
                        weight,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(NeighborReport {
                id: *registry.require_id(row)?,
                name: entities.entity_name(row).map(str::to_owned),
                neighbors: entries,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!("Resolved {} neighbour reports", reports.len());
    Ok(reports)
}
