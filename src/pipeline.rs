use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{ConfigStore, PredictionConfig, RbsConfig};
use crate::ensemble::{self, CombinedPrediction, ModelOutput, Predictor, TrainingSample};
use crate::features::{ExtractedFeatures, FeatureExtractor};
use crate::history::MatchHistory;
use crate::poisson::{self, DEFAULT_MAX_GOALS, PoissonSimulation};
use crate::time_decay::TimeDecayConfig;

/// Everything a prediction depends on besides the data. Passed explicitly so concurrent
/// callers can run with different configs.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionContext {
    pub rbs: RbsConfig,
    pub prediction: PredictionConfig,
    pub decay: Option<TimeDecayConfig>,
    pub reference_date: NaiveDate,
    pub max_goals: u32,
}

impl Default for PredictionContext {
    fn default() -> Self {
        Self {
            rbs: RbsConfig::default(),
            prediction: PredictionConfig::default(),
            decay: Some(TimeDecayConfig::default()),
            reference_date: Utc::now().date_naive(),
            max_goals: DEFAULT_MAX_GOALS,
        }
    }
}

impl PredictionContext {
    pub fn from_store(
        store: &ConfigStore,
        rbs_name: &str,
        prediction_name: &str,
        decay_name: Option<&str>,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            rbs: store.rbs(rbs_name),
            prediction: store.prediction(prediction_name),
            decay: decay_name.map(|name| store.time_decay(name)),
            reference_date,
            max_goals: DEFAULT_MAX_GOALS,
        }
    }

    pub fn at(&self, reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            ..self.clone()
        }
    }
}

/// Ensemble members with their static base weights.
#[derive(Default)]
pub struct ModelSet {
    models: Vec<Box<dyn Predictor>>,
    base_weights: HashMap<String, f64>,
}

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, model: Box<dyn Predictor>, base_weight: f64) -> Self {
        self.push(model, base_weight);
        self
    }

    pub fn push(&mut self, model: Box<dyn Predictor>, base_weight: f64) {
        self.base_weights.insert(model.id().to_string(), base_weight);
        self.models.push(model);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn base_weights(&self) -> &HashMap<String, f64> {
        &self.base_weights
    }

    pub fn fit(&mut self, samples: &[TrainingSample]) -> Result<()> {
        for model in &mut self.models {
            model.fit(samples)?;
            tracing::debug!(model = model.id(), samples = samples.len(), "model fitted");
        }
        Ok(())
    }

    /// Outputs of every member that produced one. A failing member is logged and skipped.
    pub fn predict_all(
        &self,
        features: &crate::features::MatchFeatures,
    ) -> BTreeMap<String, ModelOutput> {
        let mut out = BTreeMap::new();
        for model in &self.models {
            match model.predict(features) {
                Ok(pred) => {
                    out.insert(model.id().to_string(), pred);
                }
                Err(err) => {
                    tracing::warn!(model = model.id(), error = %err, "predictor failed, skipping");
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchPrediction {
    pub home_team: String,
    pub away_team: String,
    pub referee: String,
    pub reference_date: NaiveDate,
    pub features: ExtractedFeatures,
    pub combined: CombinedPrediction,
    pub simulation: PoissonSimulation,
}

/// Full path from history to a combined, confidence-scored prediction. `None` when either
/// team lacks data or no model produced an output.
pub fn predict_match(
    history: &MatchHistory,
    ctx: &PredictionContext,
    models: &ModelSet,
    home: &str,
    away: &str,
    referee: &str,
) -> Option<MatchPrediction> {
    let extractor = FeatureExtractor::new(history, ctx);
    predict_with(&extractor, ctx, models, home, away, referee)
}

pub fn predict_with(
    extractor: &FeatureExtractor<'_>,
    ctx: &PredictionContext,
    models: &ModelSet,
    home: &str,
    away: &str,
    referee: &str,
) -> Option<MatchPrediction> {
    let Some(features) = extractor.extract(home, away, referee) else {
        tracing::debug!(home, away, referee, "insufficient data for prediction");
        return None;
    };
    let outputs = models.predict_all(&features.features);
    let combined = ensemble::combine(&outputs, models.base_weights())?;
    let simulation = poisson::simulate(combined.home_xg, combined.away_xg, ctx.max_goals);

    Some(MatchPrediction {
        home_team: home.to_string(),
        away_team: away.to_string(),
        referee: referee.to_string(),
        reference_date: ctx.reference_date,
        features,
        combined,
        simulation,
    })
}

/// Leak-free training rows: every match is described by features computed from the history
/// strictly before the first day of its month. Months are processed in parallel.
pub fn training_samples(history: &MatchHistory, ctx: &PredictionContext) -> Vec<TrainingSample> {
    let mut months: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (idx, m) in history.matches().iter().enumerate() {
        let Some(date) = m.parsed_date() else {
            continue;
        };
        let Some(month_start) = NaiveDate::from_ymd_opt(date.year(), date.month(), 1) else {
            continue;
        };
        months.entry(month_start).or_default().push(idx);
    }

    let months: Vec<(NaiveDate, Vec<usize>)> = months.into_iter().collect();
    let mut samples: Vec<(usize, TrainingSample)> = months
        .par_iter()
        .flat_map_iter(|(cutoff, idxs)| {
            let snapshot = history.before(*cutoff);
            let month_ctx = ctx.at(*cutoff);
            let extractor = FeatureExtractor::new(&snapshot, &month_ctx);
            idxs.iter()
                .filter_map(|idx| {
                    let m = &history.matches()[*idx];
                    let extracted = extractor.extract(&m.home_team, &m.away_team, &m.referee)?;
                    Some((
                        *idx,
                        TrainingSample {
                            features: extracted.features,
                            home_goals: m.home_goals,
                            away_goals: m.away_goals,
                        },
                    ))
                })
                .collect::<Vec<_>>()
        })
        .collect();
    samples.sort_by_key(|(idx, _)| *idx);
    samples.into_iter().map(|(_, s)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_from_store_uses_defaults_for_unknown_names() {
        let store = ConfigStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let ctx = PredictionContext::from_store(&store, "x", "y", None, date);
        assert_eq!(ctx.rbs, RbsConfig::default());
        assert_eq!(ctx.prediction, PredictionConfig::default());
        assert!(ctx.decay.is_none());
        assert_eq!(ctx.at(date.succ_opt().unwrap()).reference_date.day(), 2);
    }

    #[test]
    fn empty_history_yields_no_prediction() {
        let history = MatchHistory::default();
        let ctx = PredictionContext::default();
        assert!(predict_match(&history, &ctx, &ModelSet::new(), "A", "B", "R").is_none());
        assert!(training_samples(&history, &ctx).is_empty());
    }
}
