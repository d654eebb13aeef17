use std::env;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::{RefereeFilter, StatAggregator, TeamAverages};
use crate::config::{ConfidenceThresholds, RbsConfig, RbsWeights};
use crate::history::MatchHistory;
use crate::records::StatField;
use crate::time_decay::TimeDecayConfig;

/// `tanh` saturates to exactly 1.0 in f64 for large inputs; scores stay strictly inside (-1, 1).
const MAX_ABS_SCORE: f64 = 1.0 - f64::EPSILON;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RbsStat {
    YellowCards,
    RedCards,
    FoulsCommitted,
    FoulsDrawn,
    PenaltiesAwarded,
    XgDifference,
    PossessionPercentage,
}

impl RbsStat {
    pub const ALL: [RbsStat; 7] = [
        RbsStat::YellowCards,
        RbsStat::RedCards,
        RbsStat::FoulsCommitted,
        RbsStat::FoulsDrawn,
        RbsStat::PenaltiesAwarded,
        RbsStat::XgDifference,
        RbsStat::PossessionPercentage,
    ];

    pub fn field(self) -> StatField {
        match self {
            RbsStat::YellowCards => StatField::YellowCards,
            RbsStat::RedCards => StatField::RedCards,
            RbsStat::FoulsCommitted => StatField::FoulsCommitted,
            RbsStat::FoulsDrawn => StatField::FoulsDrawn,
            RbsStat::PenaltiesAwarded => StatField::PenaltiesAwarded,
            RbsStat::XgDifference => StatField::XgDifference,
            RbsStat::PossessionPercentage => StatField::PossessionPct,
        }
    }

    /// -1 for stats where more is bad for the team (cards, fouls committed).
    pub fn polarity(self) -> f64 {
        match self {
            RbsStat::YellowCards | RbsStat::RedCards | RbsStat::FoulsCommitted => -1.0,
            RbsStat::FoulsDrawn
            | RbsStat::PenaltiesAwarded
            | RbsStat::XgDifference
            | RbsStat::PossessionPercentage => 1.0,
        }
    }

    pub fn weight(self, weights: &RbsWeights) -> f64 {
        match self {
            RbsStat::YellowCards => weights.yellow_cards,
            RbsStat::RedCards => weights.red_cards,
            RbsStat::FoulsCommitted => weights.fouls_committed,
            RbsStat::FoulsDrawn => weights.fouls_drawn,
            RbsStat::PenaltiesAwarded => weights.penalties_awarded,
            RbsStat::XgDifference => weights.xg_difference,
            RbsStat::PossessionPercentage => weights.possession_percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatBreakdown {
    pub stat: RbsStat,
    pub with_ref: Option<f64>,
    pub without_ref: Option<f64>,
    pub difference: Option<f64>,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbsResult {
    pub team: String,
    pub referee: String,
    pub rbs_score: f64,
    pub rbs_raw: f64,
    pub matches_with_ref: usize,
    pub matches_without_ref: usize,
    pub confidence: f64,
    pub stats_breakdown: Vec<StatBreakdown>,
}

/// Piecewise-linear confidence (0..100 scale) for a sample of `n` matches with the referee.
pub fn confidence_for(n: usize, t: &ConfidenceThresholds) -> f64 {
    let n_f = n as f64;
    let low = t.low as f64;
    let medium = t.medium as f64;
    let high = t.high as f64;

    let raw = if n_f < low {
        n_f * 10.0
    } else if n_f < medium {
        20.0 + (n_f - low) * 10.0
    } else if n_f < high {
        50.0 + (n_f - medium) * 4.0
    } else {
        (70.0 + (n_f - high) * 2.5).min(t.max_confidence)
    };
    raw.clamp(t.min_confidence, t.max_confidence)
}

/// Bias score for `team` under `referee`; `None` for pairings without enough data.
pub fn score(
    agg: &StatAggregator<'_>,
    team: &str,
    referee: &str,
    cfg: &RbsConfig,
    decay: Option<&TimeDecayConfig>,
) -> Option<RbsResult> {
    let with = agg.averages(team, RefereeFilter::With(referee), decay)?;
    let without = agg.averages(team, RefereeFilter::Excluding(referee), decay)?;
    if with.match_count < cfg.thresholds.low as usize {
        return None;
    }
    Some(score_from_averages(team, referee, &with, &without, cfg))
}

fn score_from_averages(
    team: &str,
    referee: &str,
    with: &TeamAverages,
    without: &TeamAverages,
    cfg: &RbsConfig,
) -> RbsResult {
    let mut raw = 0.0;
    let mut breakdown = Vec::with_capacity(RbsStat::ALL.len());

    for stat in RbsStat::ALL {
        let weight = stat.weight(&cfg.weights);
        if weight == 0.0 {
            continue;
        }
        let with_ref = with.get(stat.field());
        let without_ref = without.get(stat.field());
        let difference = with_ref.zip(without_ref).map(|(w, wo)| w - wo);
        let contribution = difference.map_or(0.0, |d| stat.polarity() * d * weight);
        raw += contribution;
        breakdown.push(StatBreakdown {
            stat,
            with_ref,
            without_ref,
            difference,
            weight,
            contribution,
        });
    }

    RbsResult {
        team: team.to_string(),
        referee: referee.to_string(),
        rbs_score: raw.tanh().clamp(-MAX_ABS_SCORE, MAX_ABS_SCORE),
        rbs_raw: raw,
        matches_with_ref: with.match_count,
        matches_without_ref: without.match_count,
        confidence: confidence_for(with.match_count, &cfg.thresholds),
        stats_breakdown: breakdown,
    }
}

/// Full recompute for every (team, referee) pairing in `history`. Each pair is scored
/// independently on a bounded rayon pool; results come back sorted by (team, referee).
pub fn recalculate_all(
    history: &MatchHistory,
    cfg: &RbsConfig,
    decay: Option<&TimeDecayConfig>,
    reference_date: NaiveDate,
) -> Vec<RbsResult> {
    let pairs = history.team_referee_pairs();
    let agg = StatAggregator::at(history, reference_date);

    let compute = || {
        pairs
            .par_iter()
            .filter_map(|(team, referee)| score(&agg, team, referee, cfg, decay))
            .collect::<Vec<_>>()
    };
    let pool = build_pool();
    let mut results = match pool.as_ref() {
        Some(pool) => pool.install(compute),
        None => compute(),
    };
    results.sort_by(|a, b| a.team.cmp(&b.team).then_with(|| a.referee.cmp(&b.referee)));

    tracing::info!(
        pairs = pairs.len(),
        scored = results.len(),
        "rbs recalculation finished"
    );
    results
}

fn build_pool() -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size())
        .thread_name(|idx| format!("rbs-worker-{idx}"))
        .build()
        .ok()
}

fn pool_size() -> usize {
    env::var("REFBIAS_THREADS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
        .clamp(1, 64)
}
