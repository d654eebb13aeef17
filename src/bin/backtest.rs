use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use tracing_subscriber::EnvFilter;

use refbias::calibration::{self, Outcome, Prob3, classify_outcome};
use refbias::fake_history::{self, FakeHistoryConfig};
use refbias::features::FeatureExtractor;
use refbias::historical_dataset;
use refbias::history::MatchHistory;
use refbias::pipeline::{self, PredictionContext};
use refbias::predictors::default_models;

const DEFAULT_WARMUP_MONTHS: usize = 4;

/// Walk-forward evaluation: for every month after the warmup, fit on everything before the
/// month and predict the month's matches from the same snapshot.
fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("refbias=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let history = if args.iter().any(|a| a == "--fake") {
        fake_history::generate(&FakeHistoryConfig::default())
    } else {
        let db_path =
            parse_path_arg(&args, "--db").unwrap_or_else(historical_dataset::default_db_path);
        let conn = historical_dataset::open_db(&db_path)?;
        historical_dataset::load_history(&conn)
            .with_context(|| format!("load history from {}", db_path.display()))?
    };
    let warmup = parse_usize_arg(&args, "--warmup-months").unwrap_or(DEFAULT_WARMUP_MONTHS);

    let report = run(&history, warmup);

    println!("Walk-forward backtest");
    println!("Matches: {}", history.len());
    println!("Evaluated: {}", report.outcomes.len());
    if report.outcomes.is_empty() {
        println!("Not enough history past the warmup window.");
        return Ok(());
    }
    for (label, preds) in [("ensemble", &report.ensemble), ("poisson", &report.simulation)] {
        let m = calibration::evaluate_probs(preds, &report.outcomes);
        println!(
            "{label:>9}: brier={:.4} logloss={:.4} acc={:.3}",
            m.brier, m.log_loss, m.accuracy
        );
    }
    let base = calibration::empirical_outcome_probs(&report.outcomes);
    let baseline = vec![base; report.outcomes.len()];
    let m = calibration::evaluate_probs(&baseline, &report.outcomes);
    println!(
        "{:>9}: brier={:.4} logloss={:.4} acc={:.3}",
        "base_rate", m.brier, m.log_loss, m.accuracy
    );

    println!("Home-win reliability (ensemble):");
    for bin in calibration::calibration_bins(&report.ensemble, &report.outcomes, Outcome::Home, 5) {
        if bin.count == 0 {
            continue;
        }
        println!(
            "  [{:.1}, {:.1}) n={:<4} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }
    Ok(())
}

#[derive(Default)]
struct Report {
    ensemble: Vec<Prob3>,
    simulation: Vec<Prob3>,
    outcomes: Vec<Outcome>,
}

fn run(history: &MatchHistory, warmup_months: usize) -> Report {
    let mut months: Vec<NaiveDate> = history
        .matches()
        .iter()
        .filter_map(|m| m.parsed_date())
        .filter_map(|d| NaiveDate::from_ymd_opt(d.year(), d.month(), 1))
        .collect();
    months.dedup();

    let mut report = Report::default();
    for month in months.into_iter().skip(warmup_months) {
        let snapshot = history.before(month);
        let ctx = PredictionContext::default().at(month);
        let samples = pipeline::training_samples(&snapshot, &ctx);
        let mut models = default_models();
        if let Err(err) = models.fit(&samples) {
            tracing::warn!(%month, error = %err, "fit failed, skipping month");
            continue;
        }

        let extractor = FeatureExtractor::new(&snapshot, &ctx);
        for m in history.matches().iter().filter(|m| {
            m.parsed_date()
                .is_some_and(|d| d.year() == month.year() && d.month() == month.month())
        }) {
            let Some(pred) = pipeline::predict_with(
                &extractor,
                &ctx,
                &models,
                &m.home_team,
                &m.away_team,
                &m.referee,
            ) else {
                continue;
            };
            report.ensemble.push(Prob3::from_percent(
                pred.combined.outcome_probabilities.as_array(),
            ));
            report.simulation.push(Prob3::from_percent(
                pred.simulation.outcome_probabilities.as_array(),
            ));
            report
                .outcomes
                .push(classify_outcome(m.home_goals as i32, m.away_goals as i32));
        }
    }
    report
}

fn parse_path_arg(args: &[String], name: &str) -> Option<PathBuf> {
    parse_arg(args, name).map(PathBuf::from)
}

fn parse_usize_arg(args: &[String], name: &str) -> Option<usize> {
    parse_arg(args, name).and_then(|raw| raw.parse::<usize>().ok())
}

fn parse_arg(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
