//! # cocktailspace
//!
//! Similarity between cocktail recipes and between the ingredients composing them.
//!
//! The pipeline runs strictly upward:
//!
//! 1. ingredient taxonomy ([`taxonomy`]) → weighted tree distances
//! 2. dense ingredient distance matrix ([`distance`])
//! 3. recipe volume distributions ([`volume`])
//! 4. recipe-to-recipe Earth Mover's Distance ([`emd`])
//! 5. k-nearest neighbours and Boltzmann weights ([`neighbors`])
//! 6. expected-match accumulation and BLOSUM-style re-estimation ([`refinement`])
//!
//! [`builder::SimilarityBuilder`] wires all stages together for a batch run and
//! produces the reports in [`report`].

pub mod builder;
pub mod config;
pub mod distance;
pub mod emd;
pub mod error;
pub mod neighbors;
pub mod refinement;
pub mod registry;
pub mod report;
pub mod taxonomy;
pub mod volume;

pub use error::{Result, SimilarityError};

/// Database key type shared by ingredients and recipes.
pub type EntityId = i64;

#[cfg(test)]
mod tests;
