use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{validate_k, EngineConfig, UnitFallback};
use crate::distance::{ingredient_distance_matrix, DistanceSnapshot};
use crate::error::Result;
use crate::neighbors::{knn_matrix, neighbor_weight_matrix};
use crate::refinement::{Refiner, RefinementSummary};
use crate::report::{report_neighbors, NeighborReport};
use crate::taxonomy::{IngredientNode, IngredientTree};
use crate::volume::{
    RecipeIngredientRow, RecipeRecord, RecipeVolumes, UnitConversion, UnitTable, ValidationReport,
};

use log::{debug, info, trace};

/// Read-only input tables for one batch run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DataSnapshot {
    pub ingredients: Vec<IngredientNode>,
    #[serde(default)]
    pub units: Vec<UnitConversion>,
    #[serde(default)]
    pub recipe_ingredients: Vec<RecipeIngredientRow>,
    #[serde(default)]
    pub recipes: Vec<RecipeRecord>,
}

impl DataSnapshot {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Everything a run hands to the analytics-serving layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsOutput {
    pub recipe_report: Vec<NeighborReport>,
    pub ingredient_report: Vec<NeighborReport>,
    /// Final (possibly refined) costs; feed back through `with_warm_start`.
    pub ingredient_distances: DistanceSnapshot,
    pub validation: ValidationReport,
    pub refinement: RefinementSummary,
}

impl AnalyticsOutput {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

pub struct SimilarityBuilder {
    config: EngineConfig,
    warm_start: Option<DistanceSnapshot>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for SimilarityBuilder {
    fn default() -> Self {
        debug!("Creating SimilarityBuilder with default parameters");
        Self {
            config: EngineConfig::default(),
            warm_start: None,
            cancel: None,
        }
    }
}

impl SimilarityBuilder {
    pub fn new() -> Self {
        info!("Initializing new SimilarityBuilder");
        Self::default()
    }

    // -------------------- Configuration --------------------

    /// Replace the whole configuration at once (e.g. loaded from JSON).
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        info!("Using configuration: {:?}", config);
        self.config = config;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        info!("Setting recipe k: {}", k);
        self.config.k = k;
        self
    }

    pub fn with_ingredient_k(mut self, k: usize) -> Self {
        info!("Setting ingredient k: {}", k);
        self.config.ingredient_k = Some(k);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        info!("Setting Boltzmann temperature: {}", temperature);
        self.config.temperature = temperature;
        self
    }

    /// 0 keeps the tree distances (single pass).
    pub fn with_refinement(mut self, max_iterations: usize, convergence_threshold: f64) -> Self {
        info!(
            "Configuring refinement: max_iterations={}, threshold={}",
            max_iterations, convergence_threshold
        );
        self.config.max_refinement_iterations = max_iterations;
        self.config.convergence_threshold = convergence_threshold;
        self
    }

    pub fn with_unit_fallback(mut self, fallback: UnitFallback) -> Self {
        info!("Setting unit fallback policy: {:?}", fallback);
        self.config.unit_fallback = fallback;
        self
    }

    pub fn with_default_edge_weight(mut self, weight: f64) -> Self {
        info!("Setting default edge weight: {}", weight);
        self.config.default_edge_weight = weight;
        self
    }

    /// M-step smoothing: pseudocount share and log-odds clip.
    pub fn with_m_step(mut self, pseudocount: f64, max_log_odds: f64) -> Self {
        info!(
            "Configuring M-step: pseudocount={}, max_log_odds={}",
            pseudocount, max_log_odds
        );
        self.config.pseudocount = pseudocount;
        self.config.max_log_odds = max_log_odds;
        self
    }

    /// Start refinement from a matrix produced by an earlier run.
    pub fn with_warm_start(mut self, snapshot: DistanceSnapshot) -> Self {
        info!(
            "Using warm-start distance matrix over {} ingredients",
            snapshot.ingredient_ids.len()
        );
        self.warm_start = Some(snapshot);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------- Build --------------------

    /// Run the whole pipeline on one snapshot.
    ///
    /// Configuration and taxonomy errors abort before any matrix is produced.
    /// Recipes without convertible volume are excluded and listed in
    /// `validation`; the run still succeeds.
    pub fn build(&self, snapshot: &DataSnapshot) -> Result<AnalyticsOutput> {
        self.config.validate()?;
        info!(
            "Building similarity artifacts: {} ingredients, {} recipe rows",
            snapshot.ingredients.len(),
            snapshot.recipe_ingredients.len()
        );
        debug!("Build configuration: {:?}", self.config);

        // 1) taxonomy and tree distances
        let tree = IngredientTree::build(&snapshot.ingredients, self.config.default_edge_weight)?;
        validate_k(self.config.effective_ingredient_k(), tree.len())?;
        let tree_distances = ingredient_distance_matrix(&tree);

        // 2) recipe volumes
        let units = UnitTable::from_rows(&snapshot.units);
        let (volumes, validation) = RecipeVolumes::build(
            &snapshot.recipe_ingredients,
            &snapshot.recipes,
            &units,
            &tree.registry,
            self.config.unit_fallback,
        );
        validate_k(self.config.k, volumes.n_recipes())?;
        let distributions = volumes.distributions()?;

        // 3) starting costs
        let initial = match &self.warm_start {
            Some(snapshot) => snapshot.align(&tree.registry, &tree_distances)?,
            None => tree_distances,
        };

        // 4) recipe distances, neighbours and refinement
        let mut refiner = Refiner::new(&distributions, &self.config);
        if let Some(flag) = &self.cancel {
            refiner = refiner.with_cancel_flag(Arc::clone(flag));
        }
        let outcome = refiner.run(initial)?;

        // 5) reports
        trace!("Resolving recipe neighbour report");
        let recipe_report = report_neighbors(&volumes, &outcome.neighbors, &outcome.weights)?;

        trace!("Resolving ingredient neighbour report");
        let ingredient_neighbors = knn_matrix(
            &outcome.ingredient_distances,
            self.config.effective_ingredient_k(),
        )?;
        let ingredient_weights =
            neighbor_weight_matrix(&ingredient_neighbors, self.config.temperature)?;
        let ingredient_report =
            report_neighbors(&tree, &ingredient_neighbors, &ingredient_weights)?;

        let ingredient_distances =
            DistanceSnapshot::from_matrix(&tree.registry, &outcome.ingredient_distances);

        info!(
            "Similarity build completed: {} recipe reports, {} ingredient reports, {} excluded recipes",
            recipe_report.len(),
            ingredient_report.len(),
            validation.excluded_recipes.len()
        );

        Ok(AnalyticsOutput {
            recipe_report,
            ingredient_report,
            ingredient_distances,
            validation,
            refinement: outcome.summary,
        })
    }
}
