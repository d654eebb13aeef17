use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use refbias::aggregate::StatAggregator;
use refbias::config::ConfigStore;
use refbias::fake_history::{self, FakeHistoryConfig};
use refbias::historical_dataset;
use refbias::history::MatchHistory;
use refbias::pipeline::{self, PredictionContext};
use refbias::poisson::{self, DEFAULT_MAX_GOALS, MAX_GOALS_LIMIT};
use refbias::predictors::default_models;
use refbias::rbs;

const USAGE: &str = "usage: refbias <command> [args] [flags]

commands:
  seed                              write a synthetic history to the db
  rbs <team> <referee>              score one team/referee pairing
  recalc                            recompute and store every pairing
  simulate <home_xg> <away_xg>      Poisson scoreline grid
  predict <home> <away> <referee>   ensemble prediction

flags:
  --db PATH            sqlite path (default $REFBIAS_DB or ./refbias.sqlite)
  --config PATH        named config file (default $REFBIAS_CONFIG)
  --rbs-config NAME    --prediction-config NAME    --decay-config NAME|none
  --as-of YYYY-MM-DD   reference date (default today)
  --max-goals N        simulate grid size
  --seed N --seasons N synthetic history shape for `seed`";

struct Args {
    positional: Vec<String>,
    flags: Vec<(String, String)>,
}

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> Result<Self> {
        let raw = raw.collect::<Vec<_>>();
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut idx = 0;
        while idx < raw.len() {
            let arg = &raw[idx];
            if let Some(flag) = arg.strip_prefix("--") {
                if let Some((name, value)) = flag.split_once('=') {
                    flags.push((name.to_string(), value.trim().to_string()));
                } else {
                    let value = raw
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --{flag}"))?;
                    flags.push((flag.to_string(), value.trim().to_string()));
                    idx += 1;
                }
            } else {
                positional.push(arg.clone());
            }
            idx += 1;
        }
        Ok(Self { positional, flags })
    }

    fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .rev()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    fn positional(&self, idx: usize, what: &str) -> Result<&str> {
        self.positional
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("missing <{what}>\n\n{USAGE}"))
    }

    fn db_path(&self) -> PathBuf {
        self.flag("db")
            .map(PathBuf::from)
            .unwrap_or_else(historical_dataset::default_db_path)
    }

    fn as_of(&self) -> Result<NaiveDate> {
        match self.flag("as-of") {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("invalid --as-of date `{raw}`")),
            None => Ok(Utc::now().date_naive()),
        }
    }

    fn context(&self) -> Result<PredictionContext> {
        let config_path = self
            .flag("config")
            .map(str::to_string)
            .or_else(|| std::env::var("REFBIAS_CONFIG").ok())
            .filter(|p| !p.trim().is_empty());
        let store = match config_path {
            Some(path) => ConfigStore::load(&PathBuf::from(path))?,
            None => ConfigStore::new(),
        };
        let decay_name = match self.flag("decay-config") {
            Some("none") => None,
            Some(name) => Some(name),
            None => Some("default"),
        };
        Ok(PredictionContext::from_store(
            &store,
            self.flag("rbs-config").unwrap_or("default"),
            self.flag("prediction-config").unwrap_or("default"),
            decay_name,
            self.as_of()?,
        ))
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let mut argv = std::env::args().skip(1);
    let Some(command) = argv.next() else {
        bail!("{USAGE}");
    };
    let args = Args::parse(argv)?;

    match command.as_str() {
        "seed" => cmd_seed(&args),
        "rbs" => cmd_rbs(&args),
        "recalc" => cmd_recalc(&args),
        "simulate" => cmd_simulate(&args),
        "predict" => cmd_predict(&args),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => Err(anyhow!("unknown command `{other}`\n\n{USAGE}")),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("refbias=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}

fn load_history(args: &Args) -> Result<MatchHistory> {
    let db_path = args.db_path();
    let conn = historical_dataset::open_db(&db_path)?;
    let history = historical_dataset::load_history(&conn)?;
    tracing::info!(db = %db_path.display(), matches = history.len(), "history loaded");
    Ok(history)
}

#[derive(Serialize)]
struct SeedReport {
    db: String,
    matches: usize,
    team_stats: usize,
    player_stats: usize,
}

fn cmd_seed(args: &Args) -> Result<()> {
    let mut cfg = FakeHistoryConfig::default();
    if let Some(raw) = args.flag("seed") {
        cfg.seed = raw.parse().with_context(|| format!("invalid --seed `{raw}`"))?;
    }
    if let Some(raw) = args.flag("seasons") {
        cfg.seasons = raw.parse().with_context(|| format!("invalid --seasons `{raw}`"))?;
    }
    let history = fake_history::generate(&cfg);

    let db_path = args.db_path();
    let mut conn = historical_dataset::open_db(&db_path)?;
    let summary = historical_dataset::upsert_history(&mut conn, &history)?;
    print_json(&SeedReport {
        db: db_path.display().to_string(),
        matches: summary.matches,
        team_stats: summary.team_stats,
        player_stats: summary.player_stats,
    })
}

fn cmd_rbs(args: &Args) -> Result<()> {
    let team = args.positional(0, "team")?;
    let referee = args.positional(1, "referee")?;
    let ctx = args.context()?;
    let history = load_history(args)?;
    let agg = StatAggregator::at(&history, ctx.reference_date);
    let result = rbs::score(&agg, team, referee, &ctx.rbs, ctx.decay.as_ref());
    if result.is_none() {
        tracing::warn!(team, referee, "not enough matches to score this pairing");
    }
    print_json(&result)
}

#[derive(Serialize)]
struct RecalcReport {
    run_id: i64,
    reference_date: NaiveDate,
    results: usize,
}

fn cmd_recalc(args: &Args) -> Result<()> {
    let ctx = args.context()?;
    let db_path = args.db_path();
    let mut conn = historical_dataset::open_db(&db_path)?;
    let history = historical_dataset::load_history(&conn)?;
    let results = rbs::recalculate_all(&history, &ctx.rbs, ctx.decay.as_ref(), ctx.reference_date);
    let run_id = historical_dataset::replace_rbs_results(
        &mut conn,
        &results,
        &ctx.rbs,
        &ctx.reference_date.to_string(),
    )?;
    print_json(&RecalcReport {
        run_id,
        reference_date: ctx.reference_date,
        results: results.len(),
    })
}

fn cmd_simulate(args: &Args) -> Result<()> {
    let parse = |idx: usize, what: &str| -> Result<f64> {
        let raw = args.positional(idx, what)?;
        raw.parse::<f64>()
            .with_context(|| format!("invalid <{what}> `{raw}`"))
    };
    let home_xg = parse(0, "home_xg")?;
    let away_xg = parse(1, "away_xg")?;
    let max_goals = match args.flag("max-goals") {
        Some(raw) => parse_max_goals(raw)?,
        None => DEFAULT_MAX_GOALS,
    };
    print_json(&poisson::simulate(home_xg, away_xg, max_goals))
}

fn parse_max_goals(raw: &str) -> Result<u32> {
    let n = raw
        .parse::<u32>()
        .with_context(|| format!("invalid --max-goals `{raw}`"))?;
    if !(1..=MAX_GOALS_LIMIT).contains(&n) {
        bail!("--max-goals must be between 1 and {MAX_GOALS_LIMIT}, got {n}");
    }
    Ok(n)
}

fn cmd_predict(args: &Args) -> Result<()> {
    let home = args.positional(0, "home")?;
    let away = args.positional(1, "away")?;
    let referee = args.positional(2, "referee")?;
    let ctx = args.context()?;
    let cutoff = ctx.reference_date.succ_opt().unwrap_or(ctx.reference_date);
    let history = load_history(args)?.before(cutoff);

    let samples = pipeline::training_samples(&history, &ctx);
    let mut models = default_models();
    models.fit(&samples)?;
    tracing::info!(samples = samples.len(), models = models.len(), "ensemble fitted");

    let prediction = pipeline::predict_match(&history, &ctx, &models, home, away, referee);
    if prediction.is_none() {
        tracing::warn!(home, away, "no prediction: a team has no qualifying matches");
    }
    print_json(&prediction)
}
