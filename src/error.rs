//! Error types for similarity runs

use thiserror::Error;

use crate::EntityId;

/// Result type for similarity operations
pub type Result<T> = std::result::Result<T, SimilarityError>;

/// Errors that can occur while building similarity artifacts.
///
/// Structural and configuration errors abort a run. `ZeroVolumeRecipe` is the
/// per-recipe exception: it is collected in the validation report instead.
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// Following parent links did not reach a root within `n` steps
    #[error("Cyclic ingredient hierarchy detected at ingredient {id}")]
    CyclicHierarchy { id: EntityId },

    /// A parent id does not name any ingredient in the table
    #[error("Ingredient {id} references unknown parent {parent_id}")]
    UnknownParent { id: EntityId, parent_id: EntityId },

    /// The same id appears twice in one entity table
    #[error("Duplicate id {0}")]
    DuplicateId(EntityId),

    /// Ingredient table is empty
    #[error("Ingredient taxonomy is empty")]
    EmptyTaxonomy,

    /// Recipe has no convertible volume
    #[error("Recipe {recipe_id} has zero convertible volume")]
    ZeroVolumeRecipe { recipe_id: EntityId },

    /// k outside `[1, n)`
    #[error("Invalid k: {k} (requires 1 <= k < {n})")]
    InvalidK { k: usize, n: usize },

    /// Temperature not strictly positive and finite
    #[error("Invalid temperature: {0} (requires temperature > 0)")]
    InvalidTemperature(f64),

    /// Any other configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport problem could not be solved
    #[error("EMD infeasible: {0}")]
    EmdInfeasible(String),

    /// Operand sizes disagree
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Lookup of an id or index that is not registered
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
