//! Baseline ensemble members. Each one reads a different slice of the feature vector so the
//! combiner has genuinely different opinions to weigh.

use anyhow::{Result, anyhow};

use crate::calibration::{self, Outcome, Prob3, classify_outcome};
use crate::elo::expected_score;
use crate::ensemble::{ModelOutput, Predictor, TrainingSample};
use crate::features::MatchFeatures;
use crate::poisson::{self, DEFAULT_MAX_GOALS};

const DEFAULT_DRAW_RATE: f64 = 0.26;
const DEFAULT_GOALS_TOTAL: f64 = 2.60;

/// Poisson on the expected-goal features, with per-side scale factors fitted to actual goals.
#[derive(Debug, Clone)]
pub struct XgPoissonModel {
    scale_home: f64,
    scale_away: f64,
    max_goals: u32,
}

impl Default for XgPoissonModel {
    fn default() -> Self {
        Self {
            scale_home: 1.0,
            scale_away: 1.0,
            max_goals: DEFAULT_MAX_GOALS,
        }
    }
}

impl Predictor for XgPoissonModel {
    fn id(&self) -> &str {
        "xg_poisson"
    }

    fn fit(&mut self, samples: &[TrainingSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let n = samples.len() as f64;
        let mean = |f: fn(&TrainingSample) -> f64| samples.iter().map(f).sum::<f64>() / n;
        let pred_h = mean(|s| s.features.home_expected_goals);
        let pred_a = mean(|s| s.features.away_expected_goals);
        let act_h = mean(|s| s.home_goals as f64);
        let act_a = mean(|s| s.away_goals as f64);
        if pred_h > 0.0 {
            self.scale_home = (act_h / pred_h).clamp(0.5, 2.0);
        }
        if pred_a > 0.0 {
            self.scale_away = (act_a / pred_a).clamp(0.5, 2.0);
        }
        Ok(())
    }

    fn predict(&self, f: &MatchFeatures) -> Result<ModelOutput> {
        let lh = f.home_expected_goals * self.scale_home;
        let la = f.away_expected_goals * self.scale_away;
        if !lh.is_finite() || !la.is_finite() {
            return Err(anyhow!("non-finite expected goals ({lh}, {la})"));
        }
        let sim = poisson::simulate(lh, la, self.max_goals);
        let p = Prob3::from_percent(sim.outcome_probabilities.as_array());
        Ok(ModelOutput {
            outcome_probs: p.to_array(),
            home_goals: sim.home_lambda,
            away_goals: sim.away_lambda,
            home_xg: f.home_xg_blend,
            away_xg: f.away_xg_blend,
        })
    }
}

/// Elo expectation split into three outcomes with a fitted draw share.
#[derive(Debug, Clone)]
pub struct EloModel {
    draw_rate: f64,
    goals_total: f64,
    home_adv_pts: f64,
}

impl Default for EloModel {
    fn default() -> Self {
        Self {
            draw_rate: DEFAULT_DRAW_RATE,
            goals_total: DEFAULT_GOALS_TOTAL,
            home_adv_pts: 60.0,
        }
    }
}

impl Predictor for EloModel {
    fn id(&self) -> &str {
        "elo"
    }

    fn fit(&mut self, samples: &[TrainingSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let outcomes = outcomes_of(samples);
        let empirical = calibration::empirical_outcome_probs(&outcomes);
        self.draw_rate = empirical.draw.clamp(0.15, 0.40);
        let goals: f64 = samples
            .iter()
            .map(|s| (s.home_goals + s.away_goals) as f64)
            .sum();
        self.goals_total = (goals / samples.len() as f64).clamp(1.0, 5.0);
        Ok(())
    }

    fn predict(&self, f: &MatchFeatures) -> Result<ModelOutput> {
        let e = expected_score(f.elo_diff + self.home_adv_pts, 0.0);
        let d = self.draw_rate;
        let share = 0.5 + (e - 0.5) * 0.5;
        let home_goals = self.goals_total * share;
        let away_goals = self.goals_total * (1.0 - share);
        Ok(ModelOutput {
            outcome_probs: [(1.0 - d) * e, d, (1.0 - d) * (1.0 - e)],
            home_goals,
            away_goals,
            home_xg: home_goals,
            away_xg: away_goals,
        })
    }
}

/// Softmax over recent form and referee bias differentials. The slope and draw bias are
/// grid-searched on log loss.
#[derive(Debug, Clone)]
pub struct FormModel {
    slope: f64,
    draw_bias: f64,
}

impl Default for FormModel {
    fn default() -> Self {
        Self {
            slope: 0.6,
            draw_bias: 0.0,
        }
    }
}

impl FormModel {
    fn strength(f: &MatchFeatures) -> f64 {
        let form = f.home_form_ppg - f.away_form_ppg;
        let rbs = f.home_rbs_score * f.home_rbs_confidence / 100.0
            - f.away_rbs_score * f.away_rbs_confidence / 100.0;
        form + 2.0 * rbs
    }

    fn probs(slope: f64, draw_bias: f64, strength: f64) -> Prob3 {
        let lh = slope * strength / 2.0;
        let la = -lh;
        let ld = draw_bias;
        let mx = lh.max(la).max(ld);
        let (eh, ed, ea) = ((lh - mx).exp(), (ld - mx).exp(), (la - mx).exp());
        let den = eh + ed + ea;
        Prob3 {
            home: eh / den,
            draw: ed / den,
            away: ea / den,
        }
    }
}

impl Predictor for FormModel {
    fn id(&self) -> &str {
        "form_rbs"
    }

    fn fit(&mut self, samples: &[TrainingSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let outcomes = outcomes_of(samples);
        let strengths: Vec<f64> = samples.iter().map(|s| Self::strength(&s.features)).collect();

        let mut best = (self.slope, self.draw_bias);
        let mut best_loss = f64::INFINITY;
        for slope_step in 0..=40 {
            let slope = slope_step as f64 / 20.0; // 0.0..2.0
            for draw_step in -20..=20 {
                let draw_bias = draw_step as f64 / 20.0; // -1.0..1.0
                let preds: Vec<Prob3> = strengths
                    .iter()
                    .map(|s| Self::probs(slope, draw_bias, *s))
                    .collect();
                let metrics = calibration::evaluate_probs(&preds, &outcomes);
                if metrics.log_loss < best_loss {
                    best_loss = metrics.log_loss;
                    best = (slope, draw_bias);
                }
            }
        }
        (self.slope, self.draw_bias) = best;
        Ok(())
    }

    fn predict(&self, f: &MatchFeatures) -> Result<ModelOutput> {
        let s = Self::strength(f);
        let p = Self::probs(self.slope, self.draw_bias, s);
        let tilt = (0.1 * s).clamp(-0.5, 0.5);
        Ok(ModelOutput {
            outcome_probs: p.to_array(),
            home_goals: (f.home_xg_blend * (1.0 + tilt)).max(0.0),
            away_goals: (f.away_xg_blend * (1.0 - tilt)).max(0.0),
            home_xg: f.home_xg_blend,
            away_xg: f.away_xg_blend,
        })
    }
}

/// The three baselines with their default base weights.
pub fn default_models() -> crate::pipeline::ModelSet {
    crate::pipeline::ModelSet::new()
        .with(Box::new(XgPoissonModel::default()), 0.45)
        .with(Box::new(EloModel::default()), 0.30)
        .with(Box::new(FormModel::default()), 0.25)
}

fn outcomes_of(samples: &[TrainingSample]) -> Vec<Outcome> {
    samples
        .iter()
        .map(|s| classify_outcome(s.home_goals as i32, s.away_goals as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(home_xg: f64, away_xg: f64, elo_diff: f64, form_diff: f64) -> MatchFeatures {
        MatchFeatures {
            home_xg_blend: home_xg,
            away_xg_blend: away_xg,
            home_expected_goals: home_xg,
            away_expected_goals: away_xg,
            home_form_ppg: 1.5 + form_diff / 2.0,
            away_form_ppg: 1.5 - form_diff / 2.0,
            elo_diff,
            ..Default::default()
        }
    }

    fn assert_contract(out: &ModelOutput) {
        let sum: f64 = out.outcome_probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum={sum}");
        assert!(out.outcome_probs.iter().all(|p| *p >= 0.0));
        assert!(out.home_goals >= 0.0 && out.away_goals >= 0.0);
        assert!(out.home_xg >= 0.0 && out.away_xg >= 0.0);
    }

    #[test]
    fn baselines_honour_contract_and_direction() {
        let strong_home = features(2.2, 0.6, 200.0, 1.5);
        for model in [
            Box::new(XgPoissonModel::default()) as Box<dyn Predictor>,
            Box::new(EloModel::default()),
            Box::new(FormModel::default()),
        ] {
            let out = model.predict(&strong_home).unwrap();
            assert_contract(&out);
            assert!(
                out.outcome_probs[0] > out.outcome_probs[2],
                "{} should favour home",
                model.id()
            );
        }
    }

    #[test]
    fn xg_model_scales_toward_actual_goals() {
        let samples: Vec<TrainingSample> = (0..20)
            .map(|_| TrainingSample {
                features: features(1.0, 1.0, 0.0, 0.0),
                home_goals: 2,
                away_goals: 1,
            })
            .collect();
        let mut model = XgPoissonModel::default();
        model.fit(&samples).unwrap();
        let out = model.predict(&features(1.0, 1.0, 0.0, 0.0)).unwrap();
        assert!((out.home_goals - 2.0).abs() < 1e-9);
        assert!((out.away_goals - 1.0).abs() < 1e-9);
    }

    #[test]
    fn elo_model_fits_draw_rate() {
        let samples: Vec<TrainingSample> = (0..10)
            .map(|i| TrainingSample {
                features: features(1.0, 1.0, 0.0, 0.0),
                home_goals: if i < 3 { 1 } else { 2 },
                away_goals: 1,
            })
            .collect();
        let mut model = EloModel::default();
        model.fit(&samples).unwrap();
        let out = model.predict(&features(1.0, 1.0, 0.0, 0.0)).unwrap();
        assert!((out.outcome_probs[1] - 0.30).abs() < 1e-9);
    }

    #[test]
    fn form_model_fit_prefers_informative_slope() {
        let samples: Vec<TrainingSample> = (0..40)
            .map(|i| {
                let home_better = i % 2 == 0;
                TrainingSample {
                    features: features(1.2, 1.2, 0.0, if home_better { 1.5 } else { -1.5 }),
                    home_goals: if home_better { 2 } else { 0 },
                    away_goals: if home_better { 0 } else { 2 },
                }
            })
            .collect();
        let mut model = FormModel::default();
        model.fit(&samples).unwrap();
        assert!(model.slope >= 1.0);
        assert!(model.draw_bias < 0.0);
    }

    #[test]
    fn fitting_on_nothing_keeps_defaults() {
        let mut model = FormModel::default();
        model.fit(&[]).unwrap();
        assert_eq!(model.slope, FormModel::default().slope);
    }
}
