use serde::{Deserialize, Serialize};

use crate::calibration::percent_split;

pub const MIN_LAMBDA: f64 = 0.1;
pub const DEFAULT_MAX_GOALS: u32 = 10;
/// Largest per-side goal count the grid is built for; larger requests are clamped.
pub const MAX_GOALS_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorelineProb {
    pub home_goals: u32,
    pub away_goals: u32,
    pub probability: f64,
}

/// Outcome percentages (0..100, exactly 100.00 in total).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbabilities {
    pub home_win: f64,
    pub draw: f64,
    pub away_win: f64,
}

impl OutcomeProbabilities {
    pub fn from_percent(p: [f64; 3]) -> Self {
        Self {
            home_win: p[0],
            draw: p[1],
            away_win: p[2],
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.home_win, self.draw, self.away_win]
    }

    pub fn total(&self) -> f64 {
        self.home_win + self.draw + self.away_win
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoissonSimulation {
    pub home_lambda: f64,
    pub away_lambda: f64,
    pub max_goals: u32,
    /// Sorted by probability, most likely first.
    pub scoreline_probabilities: Vec<ScorelineProb>,
    pub outcome_probabilities: OutcomeProbabilities,
    pub most_likely_scoreline: ScorelineProb,
}

/// Independent-Poisson scoreline grid over `0..=max_goals` for each side.
pub fn simulate(home_lambda: f64, away_lambda: f64, max_goals: u32) -> PoissonSimulation {
    let home_lambda = floor_lambda(home_lambda);
    let away_lambda = floor_lambda(away_lambda);
    let max_goals = max_goals.clamp(1, MAX_GOALS_LIMIT);

    let pmf_h = poisson_pmf(home_lambda, max_goals);
    let pmf_a = poisson_pmf(away_lambda, max_goals);

    let mut scorelines = Vec::with_capacity(pmf_h.len() * pmf_a.len());
    for (h, p_h) in pmf_h.iter().enumerate() {
        for (a, p_a) in pmf_a.iter().enumerate() {
            scorelines.push(ScorelineProb {
                home_goals: h as u32,
                away_goals: a as u32,
                probability: p_h * p_a,
            });
        }
    }

    // Both win buckets go through the same summation so swapped lambdas mirror bit for bit.
    // Mass beyond `max_goals` is spread proportionally when percent_split renormalizes.
    let draw: f64 = pmf_h.iter().zip(&pmf_a).map(|(h, a)| h * a).sum();
    let buckets = [win_mass(&pmf_h, &pmf_a), draw, win_mass(&pmf_a, &pmf_h)];

    scorelines.sort_by(|x, y| {
        y.probability
            .total_cmp(&x.probability)
            .then(x.home_goals.cmp(&y.home_goals))
            .then(x.away_goals.cmp(&y.away_goals))
    });
    let most_likely_scoreline = scorelines[0];

    PoissonSimulation {
        home_lambda,
        away_lambda,
        max_goals,
        scoreline_probabilities: scorelines,
        outcome_probabilities: OutcomeProbabilities::from_percent(percent_split(buckets)),
        most_likely_scoreline,
    }
}

/// P(winner scores more than loser) over the truncated grid.
fn win_mass(winner: &[f64], loser: &[f64]) -> f64 {
    winner
        .iter()
        .enumerate()
        .map(|(w, p_w)| loser[..w].iter().map(|p_l| p_w * p_l).sum::<f64>())
        .sum()
}

/// Untruncated pmf values for k = 0..=max_k.
pub fn poisson_pmf(lambda: f64, max_k: u32) -> Vec<f64> {
    let max_k = max_k as usize;
    let mut out = vec![0.0; max_k + 1];
    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }
    out
}

fn floor_lambda(lambda: f64) -> f64 {
    if lambda.is_finite() {
        lambda.max(MIN_LAMBDA)
    } else {
        MIN_LAMBDA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::round2;

    #[test]
    fn outcomes_sum_to_exactly_100() {
        for (h, a) in [(0.3, 2.9), (1.5, 1.5), (2.7, 0.4), (4.0, 3.5), (0.1, 0.1)] {
            let sim = simulate(h, a, DEFAULT_MAX_GOALS);
            assert!((sim.outcome_probabilities.total() - 100.0).abs() < 1e-9);
            assert_eq!(round2(sim.outcome_probabilities.total()), 100.0);
        }
    }

    #[test]
    fn equal_lambdas_peak_on_a_draw() {
        let sim = simulate(1.5, 1.5, DEFAULT_MAX_GOALS);
        let top = sim.most_likely_scoreline;
        assert_eq!((top.home_goals, top.away_goals), (1, 1));
        // Strictly ahead of every other scoreline.
        assert!(top.probability > sim.scoreline_probabilities[1].probability);
        let o = sim.outcome_probabilities;
        assert_eq!(o.home_win, o.away_win);
    }

    #[test]
    fn swapping_lambdas_mirrors_outcomes() {
        for i in 1..=100 {
            let l = i as f64 * 0.05;
            let same = simulate(l, l, DEFAULT_MAX_GOALS).outcome_probabilities;
            assert_eq!(same.home_win, same.away_win, "lambda={l}");
            for j in (1..=100).step_by(7) {
                let m = j as f64 * 0.05;
                let a = simulate(l, m, DEFAULT_MAX_GOALS).outcome_probabilities;
                let b = simulate(m, l, DEFAULT_MAX_GOALS).outcome_probabilities;
                assert_eq!(a.home_win, b.away_win, "{l} {m}");
                assert_eq!(a.away_win, b.home_win, "{l} {m}");
                assert_eq!(a.draw, b.draw, "{l} {m}");
            }
        }
    }

    #[test]
    fn oversized_grid_is_clamped() {
        let sim = simulate(1.0, 1.0, 100_000);
        assert_eq!(sim.max_goals, MAX_GOALS_LIMIT);
        let side = MAX_GOALS_LIMIT as usize + 1;
        assert_eq!(sim.scoreline_probabilities.len(), side * side);
        assert_eq!(simulate(1.0, 1.0, u32::MAX).max_goals, MAX_GOALS_LIMIT);
    }

    #[test]
    fn non_positive_lambdas_are_floored() {
        let sim = simulate(0.0, -2.0, 6);
        assert_eq!(sim.home_lambda, MIN_LAMBDA);
        assert_eq!(sim.away_lambda, MIN_LAMBDA);
        assert_eq!(
            (sim.most_likely_scoreline.home_goals, sim.most_likely_scoreline.away_goals),
            (0, 0)
        );
        assert_eq!(sim, simulate(f64::NAN, 0.05, 6));
    }

    #[test]
    fn scorelines_sorted_and_complete() {
        let sim = simulate(2.1, 0.7, 6);
        assert_eq!(sim.scoreline_probabilities.len(), 49);
        for pair in sim.scoreline_probabilities.windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }
        assert_eq!(sim.most_likely_scoreline, sim.scoreline_probabilities[0]);
        assert!(sim.outcome_probabilities.home_win > sim.outcome_probabilities.away_win);
    }

    #[test]
    fn pmf_matches_closed_form() {
        let pmf = poisson_pmf(2.0, 4);
        let expected_3 = 2.0_f64.powi(3) * (-2.0_f64).exp() / 6.0;
        assert!((pmf[3] - expected_3).abs() < 1e-15);
    }
}
