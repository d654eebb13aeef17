use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::calibration::{Prob3, percent_split};
use crate::features::MatchFeatures;
use crate::poisson::OutcomeProbabilities;

const OUTCOME_STD_THRESHOLD: f64 = 0.5;
const GOALS_STD_THRESHOLD: f64 = 2.0;
const UNIFORM_PCT: f64 = 33.33;
const STABILITY_SPAN: f64 = 66.67;

/// What a predictor hands back for one fixture. Probabilities are on the 0..1 scale and
/// ordered home/draw/away.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub outcome_probs: [f64; 3],
    pub home_goals: f64,
    pub away_goals: f64,
    pub home_xg: f64,
    pub away_xg: f64,
}

impl ModelOutput {
    /// Forces the predictor contract: non-negative finite scalars, probabilities summing to 1.
    pub fn sanitized(self) -> Self {
        Self {
            outcome_probs: Prob3::from_array(self.outcome_probs).normalized().to_array(),
            home_goals: non_negative(self.home_goals),
            away_goals: non_negative(self.away_goals),
            home_xg: non_negative(self.home_xg),
            away_xg: non_negative(self.away_xg),
        }
    }

    pub fn confidence(&self) -> f64 {
        self.outcome_probs.iter().copied().fold(0.0, f64::max)
    }

    fn violates_contract(&self) -> bool {
        let sum: f64 = self.outcome_probs.iter().sum();
        (sum - 1.0).abs() > 1e-6
            || self.outcome_probs.iter().any(|p| !(*p >= 0.0))
            || [self.home_goals, self.away_goals, self.home_xg, self.away_xg]
                .iter()
                .any(|v| !(*v >= 0.0))
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: MatchFeatures,
    pub home_goals: u8,
    pub away_goals: u8,
}

/// One ensemble member. Training internals are the implementor's business; the combiner
/// only relies on `predict` honouring the [`ModelOutput`] contract.
pub trait Predictor: Send + Sync {
    fn id(&self) -> &str;
    fn fit(&mut self, samples: &[TrainingSample]) -> Result<()>;
    fn predict(&self, features: &MatchFeatures) -> Result<ModelOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Medium,
    Low,
    #[serde(rename = "Very Low")]
    VeryLow,
}

impl ConfidenceLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLabel::VeryHigh
        } else if score >= 0.65 {
            ConfidenceLabel::High
        } else if score >= 0.5 {
            ConfidenceLabel::Medium
        } else if score >= 0.35 {
            ConfidenceLabel::Low
        } else {
            ConfidenceLabel::VeryLow
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLabel::VeryHigh => "Very High",
            ConfidenceLabel::High => "High",
            ConfidenceLabel::Medium => "Medium",
            ConfidenceLabel::Low => "Low",
            ConfidenceLabel::VeryLow => "Very Low",
        }
    }
}

impl fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBreakdown {
    pub model_id: String,
    pub base_weight: f64,
    pub model_confidence: f64,
    pub effective_weight: f64,
    /// Share of the total effective weight.
    pub weight_share: f64,
    pub outcome_probabilities: OutcomeProbabilities,
    pub home_goals: f64,
    pub away_goals: f64,
    pub home_xg: f64,
    pub away_xg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AgreementMetrics {
    pub outcome_std: f64,
    pub goals_std: f64,
    pub outcome_agreement: f64,
    pub goals_agreement: f64,
    pub overall_agreement: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedPrediction {
    pub home_goals: f64,
    pub away_goals: f64,
    pub home_xg: f64,
    pub away_xg: f64,
    pub outcome_probabilities: OutcomeProbabilities,
    pub model_count: usize,
    pub model_breakdown: Vec<ModelBreakdown>,
    pub agreement: AgreementMetrics,
    pub confidence_score: f64,
    pub confidence_label: ConfidenceLabel,
}

/// Confidence-weighted average of the member outputs. `None` only when there is nothing to
/// combine.
pub fn combine(
    model_predictions: &BTreeMap<String, ModelOutput>,
    base_weights: &HashMap<String, f64>,
) -> Option<CombinedPrediction> {
    if model_predictions.is_empty() {
        return None;
    }

    let members: Vec<(&String, ModelOutput, f64)> = model_predictions
        .iter()
        .map(|(id, raw)| {
            if raw.violates_contract() {
                tracing::warn!(model = %id, "model output outside contract, sanitizing");
            }
            let base = match base_weights.get(id) {
                Some(w) if w.is_finite() && *w >= 0.0 => *w,
                Some(w) => {
                    tracing::warn!(model = %id, weight = *w, "invalid base weight, using 0");
                    0.0
                }
                None => {
                    tracing::debug!(model = %id, "no base weight configured, using 1.0");
                    1.0
                }
            };
            (id, raw.sanitized(), base)
        })
        .collect();

    let mut effective: Vec<f64> = members
        .iter()
        .map(|(_, out, base)| base * (0.5 + out.confidence()))
        .collect();
    let mut total: f64 = effective.iter().sum();
    if !(total > 0.0) {
        tracing::debug!("all ensemble weights are zero, falling back to equal weights");
        effective = vec![1.0; members.len()];
        total = members.len() as f64;
    }

    let mut probs = [0.0_f64; 3];
    let (mut home_goals, mut away_goals, mut home_xg, mut away_xg) = (0.0, 0.0, 0.0, 0.0);
    for ((_, out, _), w) in members.iter().zip(&effective) {
        let share = w / total;
        for (acc, p) in probs.iter_mut().zip(out.outcome_probs) {
            *acc += share * p;
        }
        home_goals += share * out.home_goals;
        away_goals += share * out.away_goals;
        home_xg += share * out.home_xg;
        away_xg += share * out.away_xg;
    }
    let outcome_probabilities = OutcomeProbabilities::from_percent(percent_split(probs));

    let model_breakdown = members
        .iter()
        .zip(&effective)
        .map(|((id, out, base), w)| ModelBreakdown {
            model_id: (*id).clone(),
            base_weight: *base,
            model_confidence: out.confidence(),
            effective_weight: *w,
            weight_share: w / total,
            outcome_probabilities: OutcomeProbabilities::from_percent(percent_split(
                out.outcome_probs,
            )),
            home_goals: out.home_goals,
            away_goals: out.away_goals,
            home_xg: out.home_xg,
            away_xg: out.away_xg,
        })
        .collect::<Vec<_>>();

    let (agreement, confidence_score, confidence_label) = if members.len() < 2 {
        (AgreementMetrics::default(), 0.0, ConfidenceLabel::Low)
    } else {
        let outputs: Vec<ModelOutput> = members.iter().map(|(_, out, _)| *out).collect();
        let agreement = agreement_metrics(&outputs, &outcome_probabilities);
        let score = 0.6 * agreement.overall_agreement + 0.4 * agreement.stability;
        (agreement, score, ConfidenceLabel::from_score(score))
    };

    Some(CombinedPrediction {
        home_goals,
        away_goals,
        home_xg,
        away_xg,
        outcome_probabilities,
        model_count: members.len(),
        model_breakdown,
        agreement,
        confidence_score,
        confidence_label,
    })
}

fn agreement_metrics(outputs: &[ModelOutput], combined: &OutcomeProbabilities) -> AgreementMetrics {
    let outcome_std = (0..3)
        .map(|i| std_dev(outputs.iter().map(|o| o.outcome_probs[i])))
        .sum::<f64>()
        / 3.0;
    let goals_std = (std_dev(outputs.iter().map(|o| o.home_goals))
        + std_dev(outputs.iter().map(|o| o.away_goals)))
        / 2.0;

    let outcome_agreement = (1.0 - outcome_std / OUTCOME_STD_THRESHOLD).max(0.0);
    let goals_agreement = (1.0 - goals_std / GOALS_STD_THRESHOLD).max(0.0);
    let top = combined.as_array().into_iter().fold(0.0, f64::max);
    let stability = ((top - UNIFORM_PCT) / STABILITY_SPAN).clamp(0.0, 1.0);

    AgreementMetrics {
        outcome_std,
        goals_std,
        outcome_agreement,
        goals_agreement,
        overall_agreement: (outcome_agreement + goals_agreement) / 2.0,
        stability,
    }
}

/// Population standard deviation.
fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}
