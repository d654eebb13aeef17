use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::time_decay::{DecayType, TimeDecayConfig};

pub const DEFAULT_CONFIG_NAME: &str = "default";

const XG_BLEND_EPSILON: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("all RBS weights are zero; at least one stat must be active")]
    AllRbsWeightsZero,

    #[error("RBS weight `{0}` is negative or not finite")]
    NegativeWeight(&'static str),

    #[error("confidence thresholds out of order: low={low}, medium={medium}, high={high}")]
    ThresholdsOutOfOrder { low: u32, medium: u32, high: u32 },

    #[error("confidence bounds invalid: min={min}, max={max} (need 0 <= min < max <= 100)")]
    ConfidenceBoundsInvalid { min: f64, max: f64 },

    #[error("xG blend weights must sum to 1.0, got {sum:.6}")]
    XgBlendNotNormalized { sum: f64 },

    #[error("conversion bounds invalid: min={min}, max={max} (need 0 <= min < max <= 1)")]
    ConversionBoundsInvalid { min: f64, max: f64 },

    #[error("time decay parameter `{name}` invalid: {value}")]
    InvalidDecayParameter { name: &'static str, value: f64 },

    #[error("form window must be at least 1 match")]
    InvalidFormWindow,

    #[error("prediction parameter `{name}` invalid: {value}")]
    InvalidPredictionParameter { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RbsWeights {
    pub yellow_cards: f64,
    pub red_cards: f64,
    pub fouls_committed: f64,
    pub fouls_drawn: f64,
    pub penalties_awarded: f64,
    pub xg_difference: f64,
    pub possession_percentage: f64,
}

impl Default for RbsWeights {
    fn default() -> Self {
        Self {
            yellow_cards: 0.3,
            red_cards: 0.5,
            fouls_committed: 0.1,
            fouls_drawn: 0.1,
            penalties_awarded: 0.4,
            xg_difference: 0.2,
            possession_percentage: 0.02,
        }
    }
}

impl RbsWeights {
    /// Every weight set to zero; used as a base for configs that enable a handful of stats.
    pub fn zero() -> Self {
        Self {
            yellow_cards: 0.0,
            red_cards: 0.0,
            fouls_committed: 0.0,
            fouls_drawn: 0.0,
            penalties_awarded: 0.0,
            xg_difference: 0.0,
            possession_percentage: 0.0,
        }
    }

    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("yellow_cards", self.yellow_cards),
            ("red_cards", self.red_cards),
            ("fouls_committed", self.fouls_committed),
            ("fouls_drawn", self.fouls_drawn),
            ("penalties_awarded", self.penalties_awarded),
            ("xg_difference", self.xg_difference),
            ("possession_percentage", self.possession_percentage),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub min_confidence: f64,
    pub max_confidence: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            low: 3,
            medium: 6,
            high: 10,
            min_confidence: 0.0,
            max_confidence: 95.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RbsConfig {
    pub weights: RbsWeights,
    pub thresholds: ConfidenceThresholds,
}

impl RbsConfig {
    pub fn new(weights: RbsWeights, thresholds: ConfidenceThresholds) -> Result<Self, ConfigError> {
        let cfg = Self {
            weights,
            thresholds,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = self.weights.named();
        for (name, w) in named {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::NegativeWeight(name));
            }
        }
        if named.iter().all(|(_, w)| *w == 0.0) {
            return Err(ConfigError::AllRbsWeightsZero);
        }

        let t = &self.thresholds;
        if !(t.low < t.medium && t.medium < t.high) {
            return Err(ConfigError::ThresholdsOutOfOrder {
                low: t.low,
                medium: t.medium,
                high: t.high,
            });
        }
        let bounds_ok = t.min_confidence.is_finite()
            && t.max_confidence.is_finite()
            && t.min_confidence >= 0.0
            && t.min_confidence < t.max_confidence
            && t.max_confidence <= 100.0;
        if !bounds_ok {
            return Err(ConfigError::ConfidenceBoundsInvalid {
                min: t.min_confidence,
                max: t.max_confidence,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Decay-weighted full-history xG.
    pub xg_weight_season: f64,
    /// Last `form_window` matches.
    pub xg_weight_recent: f64,
    /// Matches officiated by the fixture's referee.
    pub xg_weight_referee: f64,
    pub form_window: usize,
    pub min_conversion_rate: f64,
    pub max_conversion_rate: f64,
    /// Relative xG shift per unit of confidence-scaled RBS.
    pub rbs_xg_impact: f64,
    pub home_advantage_xg: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            xg_weight_season: 0.5,
            xg_weight_recent: 0.3,
            xg_weight_referee: 0.2,
            form_window: 5,
            min_conversion_rate: 0.02,
            max_conversion_rate: 0.40,
            rbs_xg_impact: 0.15,
            home_advantage_xg: 0.10,
        }
    }
}

impl PredictionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let blend = [
            ("xg_weight_season", self.xg_weight_season),
            ("xg_weight_recent", self.xg_weight_recent),
            ("xg_weight_referee", self.xg_weight_referee),
        ];
        for (name, w) in blend {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::InvalidPredictionParameter { name, value: w });
            }
        }
        let sum: f64 = blend.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > XG_BLEND_EPSILON {
            return Err(ConfigError::XgBlendNotNormalized { sum });
        }
        let conv_ok = self.min_conversion_rate >= 0.0
            && self.min_conversion_rate < self.max_conversion_rate
            && self.max_conversion_rate <= 1.0;
        if !conv_ok {
            return Err(ConfigError::ConversionBoundsInvalid {
                min: self.min_conversion_rate,
                max: self.max_conversion_rate,
            });
        }
        if self.form_window == 0 {
            return Err(ConfigError::InvalidFormWindow);
        }
        if !self.rbs_xg_impact.is_finite() || !(0.0..=1.0).contains(&self.rbs_xg_impact) {
            return Err(ConfigError::InvalidPredictionParameter {
                name: "rbs_xg_impact",
                value: self.rbs_xg_impact,
            });
        }
        if !self.home_advantage_xg.is_finite() || self.home_advantage_xg.abs() > 2.0 {
            return Err(ConfigError::InvalidPredictionParameter {
                name: "home_advantage_xg",
                value: self.home_advantage_xg,
            });
        }
        Ok(())
    }
}

pub fn validate_time_decay(cfg: &TimeDecayConfig) -> Result<(), ConfigError> {
    match cfg.decay_type {
        DecayType::Exponential if !(cfg.half_life_months > 0.0) => {
            Err(ConfigError::InvalidDecayParameter {
                name: "half_life_months",
                value: cfg.half_life_months,
            })
        }
        DecayType::Linear if !(cfg.decay_rate_per_month >= 0.0) => {
            Err(ConfigError::InvalidDecayParameter {
                name: "decay_rate_per_month",
                value: cfg.decay_rate_per_month,
            })
        }
        DecayType::Step if !(cfg.cutoff_months >= 0.0) => Err(ConfigError::InvalidDecayParameter {
            name: "cutoff_months",
            value: cfg.cutoff_months,
        }),
        _ => Ok(()),
    }
}

static DEFAULT_RBS: Lazy<RbsConfig> = Lazy::new(RbsConfig::default);
static DEFAULT_PREDICTION: Lazy<PredictionConfig> = Lazy::new(PredictionConfig::default);
static DEFAULT_DECAY: Lazy<TimeDecayConfig> = Lazy::new(TimeDecayConfig::default);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    rbs: HashMap<String, RbsConfig>,
    #[serde(default)]
    prediction: HashMap<String, PredictionConfig>,
    #[serde(default)]
    time_decay: HashMap<String, TimeDecayConfig>,
}

/// Named configs. Lookups never fail: an unknown name resolves to the entry stored under
/// `"default"`, or the built-in default when that is absent too.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    rbs: HashMap<String, RbsConfig>,
    prediction: HashMap<String, PredictionConfig>,
    time_decay: HashMap<String, TimeDecayConfig>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing file → empty store. Any invalid entry rejects the whole file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;

        let mut store = Self::default();
        for (name, cfg) in file.rbs {
            store
                .insert_rbs(&name, cfg)
                .with_context(|| format!("rbs config `{name}`"))?;
        }
        for (name, cfg) in file.prediction {
            store
                .insert_prediction(&name, cfg)
                .with_context(|| format!("prediction config `{name}`"))?;
        }
        for (name, cfg) in file.time_decay {
            store
                .insert_time_decay(&name, cfg)
                .with_context(|| format!("time decay config `{name}`"))?;
        }
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).ok();
        }
        let file = ConfigFile {
            rbs: self.rbs.clone(),
            prediction: self.prediction.clone(),
            time_decay: self.time_decay.clone(),
        };
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&file).context("serialize config store")?;
        fs::write(&tmp, json).context("write config store")?;
        fs::rename(&tmp, path).context("swap config store")?;
        Ok(())
    }

    pub fn insert_rbs(&mut self, name: &str, cfg: RbsConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.rbs.insert(name.to_string(), cfg);
        Ok(())
    }

    pub fn insert_prediction(
        &mut self,
        name: &str,
        cfg: PredictionConfig,
    ) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.prediction.insert(name.to_string(), cfg);
        Ok(())
    }

    pub fn insert_time_decay(
        &mut self,
        name: &str,
        cfg: TimeDecayConfig,
    ) -> Result<(), ConfigError> {
        validate_time_decay(&cfg)?;
        self.time_decay.insert(name.to_string(), cfg);
        Ok(())
    }

    pub fn rbs(&self, name: &str) -> RbsConfig {
        lookup(&self.rbs, name, "rbs").unwrap_or(*DEFAULT_RBS)
    }

    pub fn prediction(&self, name: &str) -> PredictionConfig {
        lookup(&self.prediction, name, "prediction").unwrap_or(*DEFAULT_PREDICTION)
    }

    pub fn time_decay(&self, name: &str) -> TimeDecayConfig {
        lookup(&self.time_decay, name, "time_decay").unwrap_or(*DEFAULT_DECAY)
    }
}

fn lookup<T: Copy>(map: &HashMap<String, T>, name: &str, kind: &str) -> Option<T> {
    if let Some(cfg) = map.get(name) {
        return Some(*cfg);
    }
    tracing::debug!(kind, name, "config name not found, falling back to default");
    map.get(DEFAULT_CONFIG_NAME).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RbsConfig::default().validate().is_ok());
        assert!(PredictionConfig::default().validate().is_ok());
        assert!(validate_time_decay(&TimeDecayConfig::default()).is_ok());
    }

    #[test]
    fn all_zero_weights_rejected() {
        let err = RbsConfig::new(RbsWeights::zero(), ConfidenceThresholds::default()).unwrap_err();
        assert_eq!(err, ConfigError::AllRbsWeightsZero);
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let thresholds = ConfidenceThresholds {
            low: 5,
            medium: 5,
            high: 10,
            ..ConfidenceThresholds::default()
        };
        let err = RbsConfig::new(RbsWeights::default(), thresholds).unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdsOutOfOrder { .. }));
    }

    #[test]
    fn confidence_bounds_checked() {
        let thresholds = ConfidenceThresholds {
            min_confidence: 80.0,
            max_confidence: 20.0,
            ..ConfidenceThresholds::default()
        };
        assert!(RbsConfig::new(RbsWeights::default(), thresholds).is_err());
    }

    #[test]
    fn xg_blend_must_sum_to_one() {
        let cfg = PredictionConfig {
            xg_weight_season: 0.6,
            ..PredictionConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::XgBlendNotNormalized { .. }));
        assert!(err.to_string().contains("1.1"));
    }

    #[test]
    fn conversion_bounds_checked() {
        let cfg = PredictionConfig {
            min_conversion_rate: 0.5,
            max_conversion_rate: 0.5,
            ..PredictionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ConversionBoundsInvalid { .. })
        ));
    }

    #[test]
    fn decay_parameters_checked() {
        assert!(validate_time_decay(&TimeDecayConfig::exponential(0.0)).is_err());
        assert!(validate_time_decay(&TimeDecayConfig::linear(-0.1)).is_err());
        assert!(validate_time_decay(&TimeDecayConfig::step(-1.0)).is_err());
        // Parameters of inactive decay types are not checked.
        let cfg = TimeDecayConfig {
            half_life_months: -3.0,
            ..TimeDecayConfig::none()
        };
        assert!(validate_time_decay(&cfg).is_ok());
    }

    #[test]
    fn store_falls_back_to_defaults() {
        let mut store = ConfigStore::new();
        assert_eq!(store.rbs("missing"), RbsConfig::default());

        let mut weights = RbsWeights::zero();
        weights.red_cards = 1.0;
        let custom = RbsConfig::new(weights, ConfidenceThresholds::default()).unwrap();
        store.insert_rbs(DEFAULT_CONFIG_NAME, custom).unwrap();
        assert_eq!(store.rbs("missing"), custom);
    }

    #[test]
    fn store_rejects_invalid_inserts() {
        let mut store = ConfigStore::new();
        let bad = RbsConfig {
            weights: RbsWeights::zero(),
            thresholds: ConfidenceThresholds::default(),
        };
        assert!(store.insert_rbs("bad", bad).is_err());
        assert_eq!(store.rbs("bad"), RbsConfig::default());
    }

    #[test]
    fn store_round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!("refbias_cfg_{}", std::process::id()));
        let path = dir.join("configs.json");
        let mut store = ConfigStore::new();
        store
            .insert_time_decay("fast", TimeDecayConfig::exponential(3.0))
            .unwrap();
        store.save(&path).unwrap();

        let loaded = ConfigStore::load(&path).unwrap();
        assert_eq!(loaded.time_decay("fast"), TimeDecayConfig::exponential(3.0));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_rejects_invalid_entries() {
        let dir = std::env::temp_dir().join(format!("refbias_badcfg_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("configs.json");
        let raw = r#"{"prediction": {"x": {
            "xg_weight_season": 0.9, "xg_weight_recent": 0.3, "xg_weight_referee": 0.2,
            "form_window": 5, "min_conversion_rate": 0.02, "max_conversion_rate": 0.4,
            "rbs_xg_impact": 0.15, "home_advantage_xg": 0.1}}}"#;
        fs::write(&path, raw).unwrap();
        assert!(ConfigStore::load(&path).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
