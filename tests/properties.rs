use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};

use refbias::config::{ConfidenceThresholds, RbsConfig};
use refbias::ensemble::{ConfidenceLabel, ModelOutput, combine};
use refbias::fake_history::{self, FakeHistoryConfig};
use refbias::poisson::{DEFAULT_MAX_GOALS, simulate};
use refbias::rbs::{confidence_for, recalculate_all};
use refbias::time_decay::{self, TimeDecayConfig};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn output(probs: [f64; 3], goals: (f64, f64)) -> ModelOutput {
    ModelOutput {
        outcome_probs: probs,
        home_goals: goals.0,
        away_goals: goals.1,
        home_xg: goals.0,
        away_xg: goals.1,
    }
}

#[test]
fn decay_weight_stays_in_bounds() {
    let configs = [
        TimeDecayConfig::exponential(0.5),
        TimeDecayConfig::exponential(12.0),
        TimeDecayConfig::linear(0.3),
        TimeDecayConfig::linear(0.01),
        TimeDecayConfig::step(3.0),
        TimeDecayConfig::none(),
    ];
    let reference = date(2024, 6, 15);
    for cfg in &configs {
        for days in [-400_i64, -1, 0, 1, 29, 45, 200, 365, 2000, 10_000] {
            let observed = reference - Duration::days(days);
            let w = time_decay::weight_between(observed, reference, cfg);
            assert!((0.1..=1.0).contains(&w), "{cfg:?} days={days} w={w}");
        }
    }
}

#[test]
fn half_life_scenario() {
    let cfg = TimeDecayConfig::exponential(4.0);
    let w = time_decay::weight("2023-01-01", "2023-05-01", &cfg);
    assert!((w - 0.5).abs() < 1e-9, "w={w}");
    assert_eq!(time_decay::weight("not a date", "2023-05-01", &cfg), 1.0);
}

#[test]
fn rbs_scores_and_confidence_bounded_on_synthetic_history() {
    let history = fake_history::generate(&FakeHistoryConfig {
        seasons: 3,
        ..Default::default()
    });
    let cfg = RbsConfig::default();
    let decay = TimeDecayConfig::default();
    let results = recalculate_all(&history, &cfg, Some(&decay), date(2025, 6, 1));
    assert!(!results.is_empty());
    for r in &results {
        assert!(r.rbs_score > -1.0 && r.rbs_score < 1.0, "{r:?}");
        assert!(r.confidence >= cfg.thresholds.min_confidence);
        assert!(r.confidence <= cfg.thresholds.max_confidence);
        assert!(r.matches_with_ref >= cfg.thresholds.low as usize);
    }
    for pair in results.windows(2) {
        let a = (&pair[0].team, &pair[0].referee);
        let b = (&pair[1].team, &pair[1].referee);
        assert!(a < b, "results must be sorted and unique");
    }
}

#[test]
fn confidence_is_monotonic_across_breakpoints() {
    let t = ConfidenceThresholds::default();
    let mut prev = f64::NEG_INFINITY;
    for n in 0..40 {
        let c = confidence_for(n, &t);
        assert!(c >= prev, "n={n} c={c} prev={prev}");
        prev = c;
    }
    // Breakpoints, reproduced exactly.
    assert_eq!(confidence_for(2, &t), 20.0);
    assert_eq!(confidence_for(3, &t), 20.0);
    assert_eq!(confidence_for(5, &t), 40.0);
    assert_eq!(confidence_for(6, &t), 50.0);
    assert_eq!(confidence_for(9, &t), 62.0);
    assert_eq!(confidence_for(10, &t), 70.0);
    assert_eq!(confidence_for(14, &t), 80.0);
    assert_eq!(confidence_for(100, &t), 95.0);
}

#[test]
fn simulated_outcomes_always_total_100() {
    let mut lambda_h = 0.05;
    while lambda_h < 5.0 {
        let mut lambda_a = 0.05;
        while lambda_a < 5.0 {
            for max_goals in [6, DEFAULT_MAX_GOALS] {
                let o = simulate(lambda_h, lambda_a, max_goals).outcome_probabilities;
                assert!((o.total() - 100.0).abs() < 1e-9, "{lambda_h} {lambda_a}");
            }
            lambda_a += 0.35;
        }
        lambda_h += 0.35;
    }
}

#[test]
fn simulation_is_symmetric_under_swap() {
    for i in 1..=100 {
        let h = i as f64 * 0.05;
        for j in 1..=100 {
            let a = j as f64 * 0.05;
            let fwd = simulate(h, a, DEFAULT_MAX_GOALS).outcome_probabilities;
            let rev = simulate(a, h, DEFAULT_MAX_GOALS).outcome_probabilities;
            assert_eq!(fwd.home_win, rev.away_win, "{h} {a}");
            assert_eq!(fwd.draw, rev.draw, "{h} {a}");
        }
    }
}

#[test]
fn combined_probabilities_total_100_for_any_membership() {
    let pool = [
        output([0.7, 0.2, 0.1], (2.0, 0.8)),
        output([0.1, 0.3, 0.6], (0.7, 1.9)),
        output([0.34, 0.33, 0.33], (1.2, 1.2)),
        output([0.5, 0.5, 0.0], (1.0, 1.0)),
    ];
    let weight_sets: [&[f64]; 3] = [&[1.0, 1.0, 1.0, 1.0], &[0.9, 0.0, 0.05, 2.0], &[0.0; 4]];
    for n in 1..=pool.len() {
        for weights in weight_sets {
            let mut preds = BTreeMap::new();
            let mut base = HashMap::new();
            for i in 0..n {
                preds.insert(format!("m{i}"), pool[i]);
                base.insert(format!("m{i}"), weights[i]);
            }
            let combined = combine(&preds, &base).unwrap();
            let total = combined.outcome_probabilities.total();
            assert!((total - 100.0).abs() <= 0.01, "n={n} total={total}");
            assert_eq!(combined.model_count, n);
        }
    }
}

#[test]
fn single_model_passes_through() {
    let mut preds = BTreeMap::new();
    preds.insert("solo".to_string(), output([0.5, 0.3, 0.2], (1.4, 0.9)));
    let combined = combine(&preds, &HashMap::new()).unwrap();
    let o = combined.outcome_probabilities;
    assert!((o.home_win - 50.0).abs() < 1e-9);
    assert!((o.draw - 30.0).abs() < 1e-9);
    assert!((o.away_win - 20.0).abs() < 1e-9);
    assert!((combined.home_goals - 1.4).abs() < 1e-12);
    assert_eq!(combined.confidence_label, ConfidenceLabel::Low);
}

#[test]
fn two_opinionated_models_land_in_between() {
    let mut preds = BTreeMap::new();
    preds.insert("a".to_string(), output([0.8, 0.1, 0.1], (2.1, 0.6)));
    preds.insert("b".to_string(), output([0.2, 0.3, 0.5], (0.9, 1.5)));
    let base = HashMap::from([("a".to_string(), 0.5), ("b".to_string(), 0.5)]);
    let combined = combine(&preds, &base).unwrap();
    let home = combined.outcome_probabilities.home_win;
    assert!(home > 20.0 && home < 80.0, "home={home}");
    // Model a is more confident, so it carries more weight.
    assert!(home > 50.0);
    let a = &combined.model_breakdown[0];
    assert_eq!(a.model_id, "a");
    assert!(a.effective_weight > combined.model_breakdown[1].effective_weight);
}
