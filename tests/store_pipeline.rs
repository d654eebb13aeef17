use chrono::NaiveDate;
use rusqlite::Connection;

use refbias::config::RbsConfig;
use refbias::fake_history::{self, FakeHistoryConfig, planted_pair};
use refbias::features::FEATURE_COUNT;
use refbias::historical_dataset::{
    init_schema, latest_rbs_run, load_history, load_rbs_results, replace_rbs_results,
    upsert_history,
};
use refbias::pipeline::{self, ModelSet, PredictionContext};
use refbias::predictors::{EloModel, default_models};
use refbias::rbs;

fn ctx() -> PredictionContext {
    PredictionContext::default().at(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
}

fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[test]
fn history_survives_a_store_round_trip() {
    let history = fake_history::generate(&FakeHistoryConfig::default());
    let mut conn = memory_db();
    let summary = upsert_history(&mut conn, &history).unwrap();
    assert_eq!(summary.matches, history.len());
    assert_eq!(summary.team_stats, 2 * history.len());

    // Upserting twice keeps one row per key.
    upsert_history(&mut conn, &history).unwrap();
    let loaded = load_history(&conn).unwrap();
    assert_eq!(loaded.matches(), history.matches());
    for m in history.matches().iter().take(20) {
        assert_eq!(
            loaded.team_stat(m.match_id, &m.home_team),
            history.team_stat(m.match_id, &m.home_team)
        );
        assert_eq!(
            loaded.player_stats(m.match_id, &m.away_team).len(),
            history.player_stats(m.match_id, &m.away_team).len()
        );
    }
}

#[test]
fn recalculated_results_replace_previous_run() {
    let history = fake_history::generate(&FakeHistoryConfig::default());
    let cfg = RbsConfig::default();
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let results = rbs::recalculate_all(&history, &cfg, None, date);
    assert!(!results.is_empty());

    let mut conn = memory_db();
    let stale = results[..1].to_vec();
    replace_rbs_results(&mut conn, &stale, &cfg, "2023-12-01").unwrap();
    let run_id = replace_rbs_results(&mut conn, &results, &cfg, "2024-01-01").unwrap();

    let stored = load_rbs_results(&conn).unwrap();
    assert_eq!(stored.len(), results.len());
    for (s, r) in stored.iter().zip(&results) {
        assert_eq!((&s.team, &s.referee), (&r.team, &r.referee));
        assert_eq!(s.rbs_score, r.rbs_score);
        assert_eq!(s.matches_with_ref, r.matches_with_ref);
        assert_eq!(s.stats_breakdown.len(), r.stats_breakdown.len());
        for (a, b) in s.stats_breakdown.iter().zip(&r.stats_breakdown) {
            assert_eq!(a.stat, b.stat);
            assert!((a.contribution - b.contribution).abs() < 1e-12);
        }
    }
    let run = latest_rbs_run(&conn).unwrap().unwrap();
    assert_eq!(run.run_id, run_id);
    assert_eq!(run.results_written, results.len());
}

#[test]
fn training_rows_come_from_the_past_only() {
    let history = fake_history::generate(&FakeHistoryConfig::default());
    let samples = pipeline::training_samples(&history, &ctx());
    assert!(!samples.is_empty());
    // The first month has no prior history and produces nothing.
    assert!(samples.len() < history.len());
    for s in &samples {
        assert_eq!(s.features.to_array().len(), FEATURE_COUNT);
        assert!(s.features.to_array().iter().all(|v| v.is_finite()));
    }
}

#[test]
fn end_to_end_prediction_is_well_formed() {
    let history = fake_history::generate(&FakeHistoryConfig::default());
    let ctx = ctx();
    let mut models = default_models();
    models.fit(&pipeline::training_samples(&history, &ctx)).unwrap();

    let (team, referee) = planted_pair();
    let prediction =
        pipeline::predict_match(&history, &ctx, &models, &team, "Team 02", &referee).unwrap();

    let combined = &prediction.combined;
    assert_eq!(combined.model_count, 3);
    assert!((combined.outcome_probabilities.total() - 100.0).abs() <= 0.01);
    assert!((0.0..=1.0).contains(&combined.confidence_score));
    assert!(combined.home_goals >= 0.0 && combined.away_goals >= 0.0);
    assert!((prediction.simulation.outcome_probabilities.total() - 100.0).abs() < 1e-9);

    let home_rbs = prediction.features.home_rbs.as_ref().unwrap();
    assert!(home_rbs.rbs_score < 0.0);
    assert_eq!(prediction.features.features.home_rbs_score, home_rbs.rbs_score);

    let json = serde_json::to_value(&prediction).unwrap();
    assert!(json["combined"]["confidence_label"].is_string());
}

#[test]
fn unknown_team_yields_no_prediction() {
    let history = fake_history::generate(&FakeHistoryConfig::default());
    let models = ModelSet::new().with(Box::new(EloModel::default()), 1.0);
    let ctx = ctx();
    let unknown =
        pipeline::predict_match(&history, &ctx, &models, "Nobody FC", "Team 02", "Referee 2");
    assert!(unknown.is_none());
    let no_models = pipeline::predict_match(
        &history,
        &ctx,
        &ModelSet::new(),
        "Team 01",
        "Team 02",
        "Referee 2",
    );
    assert!(no_models.is_none());
}
