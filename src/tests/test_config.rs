use crate::config::{validate_k, validate_temperature, EngineConfig, UnitFallback};
use crate::error::SimilarityError;

#[test]
fn test_default_config_is_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.effective_ingredient_k(), config.k);
    assert_eq!(config.unit_fallback, UnitFallback::Drop);
}

#[test]
fn test_partial_json_keeps_defaults() {
    let config = EngineConfig::from_json_str(
        r#"{"k": 3, "temperature": 0.25, "unit_fallback": {"NominalValue": 0.9}}"#,
    )
    .unwrap();
    assert_eq!(config.k, 3);
    assert_eq!(config.temperature, 0.25);
    assert_eq!(config.unit_fallback, UnitFallback::NominalValue(0.9));
    assert_eq!(config.max_refinement_iterations, 0);
    assert_eq!(config.pseudocount, EngineConfig::default().pseudocount);
}

#[test]
fn test_json_round_trip() {
    let config = EngineConfig {
        k: 4,
        ingredient_k: Some(2),
        max_refinement_iterations: 3,
        ..EngineConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back = EngineConfig::from_json_str(&json).unwrap();
    assert_eq!(config, back);
    assert_eq!(back.effective_ingredient_k(), 2);
}

#[test]
fn test_invalid_values_fail_fast() {
    let cases = [
        EngineConfig { k: 0, ..EngineConfig::default() },
        EngineConfig { ingredient_k: Some(0), ..EngineConfig::default() },
        EngineConfig { temperature: 0.0, ..EngineConfig::default() },
        EngineConfig { temperature: f64::NAN, ..EngineConfig::default() },
        EngineConfig { convergence_threshold: -1.0, ..EngineConfig::default() },
        EngineConfig { default_edge_weight: -0.5, ..EngineConfig::default() },
        EngineConfig { pseudocount: 0.0, ..EngineConfig::default() },
        EngineConfig { max_log_odds: 0.0, ..EngineConfig::default() },
        EngineConfig {
            unit_fallback: UnitFallback::NominalValue(0.0),
            ..EngineConfig::default()
        },
    ];
    for config in cases {
        assert!(config.validate().is_err(), "{:?} should be rejected", config);
    }
}

#[test]
fn test_invalid_temperature_variant() {
    assert!(matches!(
        validate_temperature(-1.0),
        Err(SimilarityError::InvalidTemperature(t)) if t == -1.0
    ));
    assert!(validate_temperature(1e-9).is_ok());
}

#[test]
fn test_k_bounds() {
    assert!(validate_k(1, 2).is_ok());
    assert!(matches!(
        validate_k(0, 5),
        Err(SimilarityError::InvalidK { k: 0, n: 5 })
    ));
    assert!(matches!(
        validate_k(5, 5),
        Err(SimilarityError::InvalidK { k: 5, n: 5 })
    ));
}

#[test]
fn test_malformed_json_is_an_error() {
    assert!(matches!(
        EngineConfig::from_json_str("{ k: "),
        Err(SimilarityError::Json(_))
    ));
}
