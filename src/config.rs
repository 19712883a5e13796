//! Run configuration.
//!
//! All knobs of a batch run live in [`EngineConfig`]. It deserializes from JSON
//! with every field optional, so the scheduler only has to spell out what it
//! overrides. Validation happens once, before any computation starts.

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};

/// What to do with an ingredient amount whose unit has no volume conversion.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub enum UnitFallback {
    /// Drop the row and record it in the validation report.
    #[default]
    Drop,
    /// Treat one unit as this many canonical volume units (ml).
    NominalValue(f64),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Neighbours per recipe.
    pub k: usize,
    /// Neighbours per ingredient; `None` reuses `k`.
    pub ingredient_k: Option<usize>,
    /// Boltzmann temperature for neighbour weights.
    pub temperature: f64,
    /// Refinement iterations after the initial pass; 0 = single pass.
    pub max_refinement_iterations: usize,
    /// Stop refining once the Frobenius delta drops below this.
    pub convergence_threshold: f64,
    pub unit_fallback: UnitFallback,
    /// Edge weight for ingredients whose weight is null.
    pub default_edge_weight: f64,
    /// Share of observed expected-match mass spread uniformly as pseudocounts.
    pub pseudocount: f64,
    /// Clip for per-pair log-odds scores in the M-step.
    pub max_log_odds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            k: 5,
            ingredient_k: None,
            temperature: 1.0,
            max_refinement_iterations: 0,
            convergence_threshold: 1e-4,
            unit_fallback: UnitFallback::Drop,
            default_edge_weight: 1.0,
            pseudocount: 0.1,
            max_log_odds: 4.0,
        }
    }
}

// Floats compared with relative tolerance, integers exactly
impl PartialEq for EngineConfig {
    fn eq(&self, other: &Self) -> bool {
        self.k == other.k
            && self.ingredient_k == other.ingredient_k
            && self.max_refinement_iterations == other.max_refinement_iterations
            && approx::relative_eq!(self.temperature, other.temperature)
            && approx::relative_eq!(self.convergence_threshold, other.convergence_threshold)
            && approx::relative_eq!(self.default_edge_weight, other.default_edge_weight)
            && approx::relative_eq!(self.pseudocount, other.pseudocount)
            && approx::relative_eq!(self.max_log_odds, other.max_log_odds)
            && match (self.unit_fallback, other.unit_fallback) {
                (UnitFallback::Drop, UnitFallback::Drop) => true,
                (UnitFallback::NominalValue(a), UnitFallback::NominalValue(b)) => {
                    approx::relative_eq!(a, b)
                }
                _ => false,
            }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        debug!("Parsed configuration: {:?}", config);
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Loading configuration from {}", path.as_ref().display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// k used for the ingredient report.
    pub fn effective_ingredient_k(&self) -> usize {
        self.ingredient_k.unwrap_or(self.k)
    }

    /// Checks every value that does not depend on the data size.
    /// `k < n` is checked once the entity counts are known.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(SimilarityError::InvalidK { k: 0, n: 0 });
        }
        if self.ingredient_k == Some(0) {
            return Err(SimilarityError::InvalidK { k: 0, n: 0 });
        }
        validate_temperature(self.temperature)?;
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(SimilarityError::InvalidConfig(format!(
                "convergence_threshold must be finite and >= 0, got {}",
                self.convergence_threshold
            )));
        }
        if !self.default_edge_weight.is_finite() || self.default_edge_weight < 0.0 {
            return Err(SimilarityError::InvalidConfig(format!(
                "default_edge_weight must be finite and >= 0, got {}",
                self.default_edge_weight
            )));
        }
        if !self.pseudocount.is_finite() || self.pseudocount <= 0.0 {
            return Err(SimilarityError::InvalidConfig(format!(
                "pseudocount must be finite and > 0, got {}",
                self.pseudocount
            )));
        }
        if !self.max_log_odds.is_finite() || self.max_log_odds <= 0.0 {
            return Err(SimilarityError::InvalidConfig(format!(
                "max_log_odds must be finite and > 0, got {}",
                self.max_log_odds
            )));
        }
        if let UnitFallback::NominalValue(v) = self.unit_fallback {
            if !v.is_finite() || v <= 0.0 {
                return Err(SimilarityError::InvalidConfig(format!(
                    "nominal unit volume must be finite and > 0, got {}",
                    v
                )));
            }
        }
        Ok(())
    }
}

/// Temperature must be finite and strictly positive.
pub fn validate_temperature(temperature: f64) -> Result<()> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(())
    } else {
        Err(SimilarityError::InvalidTemperature(temperature))
    }
}

/// `1 <= k < n`.
pub fn validate_k(k: usize, n: usize) -> Result<()> {
    if k >= 1 && k < n {
        Ok(())
    } else {
        Err(SimilarityError::InvalidK { k, n })
    }
}
