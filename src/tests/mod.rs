mod test_config;
mod test_emd;

use crate::config::EngineConfig;

/// Install the test logger once; later calls are no-ops.
pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const TEST_CONFIG: EngineConfig = EngineConfig {
    k: 3,
    ingredient_k: None,
    temperature: 0.5,
    max_refinement_iterations: 0,
    convergence_threshold: 1e-6,
    unit_fallback: crate::config::UnitFallback::Drop,
    default_edge_weight: 1.0,
    pseudocount: 0.1,
    max_log_odds: 4.0,
};
