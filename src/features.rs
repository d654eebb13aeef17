use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{RefereeFilter, StatAggregator, TeamAverages};
use crate::elo::{self, BASE_RATING, EloConfig};
use crate::history::MatchHistory;
use crate::pipeline::PredictionContext;
use crate::poisson::MIN_LAMBDA;
use crate::rbs::{self, RbsResult};
use crate::records::StatField;

/// Column order of [`MatchFeatures::to_array`]. Training and inference both go through this
/// list, so it must only ever be appended to.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "home_xg_blend",
    "away_xg_blend",
    "home_xg_against",
    "away_xg_against",
    "home_expected_goals",
    "away_expected_goals",
    "home_shot_accuracy",
    "away_shot_accuracy",
    "home_conversion_rate",
    "away_conversion_rate",
    "home_possession",
    "away_possession",
    "home_form_ppg",
    "away_form_ppg",
    "home_cards",
    "away_cards",
    "home_rbs_score",
    "away_rbs_score",
    "home_rbs_confidence",
    "away_rbs_confidence",
    "elo_diff",
];

pub const FEATURE_COUNT: usize = 21;

// Imputation values for fields a team never reported.
const NEUTRAL_SHOT_ACCURACY: f64 = 0.35;
const NEUTRAL_POSSESSION: f64 = 50.0;
const NEUTRAL_CARDS: f64 = 2.0;
const NEUTRAL_CONVERSION: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MatchFeatures {
    pub home_xg_blend: f64,
    pub away_xg_blend: f64,
    pub home_xg_against: f64,
    pub away_xg_against: f64,
    pub home_expected_goals: f64,
    pub away_expected_goals: f64,
    pub home_shot_accuracy: f64,
    pub away_shot_accuracy: f64,
    pub home_conversion_rate: f64,
    pub away_conversion_rate: f64,
    pub home_possession: f64,
    pub away_possession: f64,
    pub home_form_ppg: f64,
    pub away_form_ppg: f64,
    pub home_cards: f64,
    pub away_cards: f64,
    pub home_rbs_score: f64,
    pub away_rbs_score: f64,
    pub home_rbs_confidence: f64,
    pub away_rbs_confidence: f64,
    pub elo_diff: f64,
}

impl MatchFeatures {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.home_xg_blend,
            self.away_xg_blend,
            self.home_xg_against,
            self.away_xg_against,
            self.home_expected_goals,
            self.away_expected_goals,
            self.home_shot_accuracy,
            self.away_shot_accuracy,
            self.home_conversion_rate,
            self.away_conversion_rate,
            self.home_possession,
            self.away_possession,
            self.home_form_ppg,
            self.away_form_ppg,
            self.home_cards,
            self.away_cards,
            self.home_rbs_score,
            self.away_rbs_score,
            self.home_rbs_confidence,
            self.away_rbs_confidence,
            self.elo_diff,
        ]
    }

    pub fn from_array(v: [f64; FEATURE_COUNT]) -> Self {
        Self {
            home_xg_blend: v[0],
            away_xg_blend: v[1],
            home_xg_against: v[2],
            away_xg_against: v[3],
            home_expected_goals: v[4],
            away_expected_goals: v[5],
            home_shot_accuracy: v[6],
            away_shot_accuracy: v[7],
            home_conversion_rate: v[8],
            away_conversion_rate: v[9],
            home_possession: v[10],
            away_possession: v[11],
            home_form_ppg: v[12],
            away_form_ppg: v[13],
            home_cards: v[14],
            away_cards: v[15],
            home_rbs_score: v[16],
            away_rbs_score: v[17],
            home_rbs_confidence: v[18],
            away_rbs_confidence: v[19],
            elo_diff: v[20],
        }
    }

    /// `(name, value)` pairs in schema order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.to_array()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFeatures {
    pub features: MatchFeatures,
    pub home_rbs: Option<RbsResult>,
    pub away_rbs: Option<RbsResult>,
    /// Feature names filled with a neutral value because the team never reported the stat.
    pub imputed: Vec<&'static str>,
}

#[derive(Debug, Clone)]
struct TeamProfile {
    xg_blend: f64,
    xg_against: Option<f64>,
    shot_accuracy: Option<f64>,
    conversion_rate: Option<f64>,
    possession: Option<f64>,
    form_ppg: f64,
    cards: Option<f64>,
    rbs: Option<RbsResult>,
}

pub struct FeatureExtractor<'a> {
    agg: StatAggregator<'a>,
    ctx: &'a PredictionContext,
    elo: HashMap<String, f64>,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(history: &'a MatchHistory, ctx: &'a PredictionContext) -> Self {
        Self {
            agg: StatAggregator::at(history, ctx.reference_date),
            ctx,
            elo: elo::compute_elo(history, EloConfig::default()),
        }
    }

    /// `None` when either team has no qualifying match.
    pub fn extract(&self, home: &str, away: &str, referee: &str) -> Option<ExtractedFeatures> {
        let h = self.profile(home, referee)?;
        let a = self.profile(away, referee)?;
        let cfg = &self.ctx.prediction;

        let home_expected =
            expected_goals(&h, a.xg_against, cfg.rbs_xg_impact) + cfg.home_advantage_xg;
        let away_expected = expected_goals(&a, h.xg_against, cfg.rbs_xg_impact);

        let mut imputed = Vec::new();
        let mut fill = |name: &'static str, v: Option<f64>, neutral: f64| {
            v.unwrap_or_else(|| {
                imputed.push(name);
                neutral
            })
        };
        let bounds = (cfg.min_conversion_rate, cfg.max_conversion_rate);
        let conv = |v: Option<f64>| v.map(|c| c.clamp(bounds.0, bounds.1));
        let neutral_conv = NEUTRAL_CONVERSION.clamp(bounds.0, bounds.1);

        let features = MatchFeatures {
            home_xg_blend: h.xg_blend,
            away_xg_blend: a.xg_blend,
            home_xg_against: fill("home_xg_against", h.xg_against, a.xg_blend),
            away_xg_against: fill("away_xg_against", a.xg_against, h.xg_blend),
            home_expected_goals: home_expected.max(MIN_LAMBDA),
            away_expected_goals: away_expected.max(MIN_LAMBDA),
            home_shot_accuracy: fill(
                "home_shot_accuracy",
                h.shot_accuracy,
                NEUTRAL_SHOT_ACCURACY,
            ),
            away_shot_accuracy: fill(
                "away_shot_accuracy",
                a.shot_accuracy,
                NEUTRAL_SHOT_ACCURACY,
            ),
            home_conversion_rate: fill(
                "home_conversion_rate",
                conv(h.conversion_rate),
                neutral_conv,
            ),
            away_conversion_rate: fill(
                "away_conversion_rate",
                conv(a.conversion_rate),
                neutral_conv,
            ),
            home_possession: fill("home_possession", h.possession, NEUTRAL_POSSESSION),
            away_possession: fill("away_possession", a.possession, NEUTRAL_POSSESSION),
            home_form_ppg: h.form_ppg,
            away_form_ppg: a.form_ppg,
            home_cards: fill("home_cards", h.cards, NEUTRAL_CARDS),
            away_cards: fill("away_cards", a.cards, NEUTRAL_CARDS),
            home_rbs_score: h.rbs.as_ref().map_or(0.0, |r| r.rbs_score),
            away_rbs_score: a.rbs.as_ref().map_or(0.0, |r| r.rbs_score),
            home_rbs_confidence: h.rbs.as_ref().map_or(0.0, |r| r.confidence),
            away_rbs_confidence: a.rbs.as_ref().map_or(0.0, |r| r.confidence),
            elo_diff: self.rating(home) - self.rating(away),
        };

        Some(ExtractedFeatures {
            features,
            home_rbs: h.rbs,
            away_rbs: a.rbs,
            imputed,
        })
    }

    fn rating(&self, team: &str) -> f64 {
        self.elo.get(team).copied().unwrap_or(BASE_RATING)
    }

    fn profile(&self, team: &str, referee: &str) -> Option<TeamProfile> {
        let cfg = &self.ctx.prediction;
        let decay = self.ctx.decay.as_ref();
        let season = self.agg.averages(team, RefereeFilter::Any, decay)?;
        let recent = self.agg.recent(team, cfg.form_window);
        let with_ref = self.agg.averages(team, RefereeFilter::With(referee), decay);

        let season_xg = attack_xg(&season)?;
        let recent_xg = recent.as_ref().and_then(attack_xg).unwrap_or(season_xg);
        let referee_xg = with_ref.as_ref().and_then(attack_xg).unwrap_or(season_xg);
        let xg_blend = cfg.xg_weight_season * season_xg
            + cfg.xg_weight_recent * recent_xg
            + cfg.xg_weight_referee * referee_xg;

        let form_ppg = recent
            .as_ref()
            .and_then(|r| r.get(StatField::Points))
            .or_else(|| season.get(StatField::Points))
            .unwrap_or(0.0);

        Some(TeamProfile {
            xg_blend,
            xg_against: season.get_or(StatField::XgAgainst, StatField::GoalsAgainst),
            shot_accuracy: season.shot_accuracy(),
            conversion_rate: season.conversion_rate(),
            possession: season.get(StatField::PossessionPct),
            form_ppg,
            cards: season.cards(),
            rbs: rbs::score(&self.agg, team, referee, &self.ctx.rbs, decay),
        })
    }
}

fn attack_xg(avg: &TeamAverages) -> Option<f64> {
    avg.get_or(StatField::Xg, StatField::Goals)
}

/// Mean of own attack and opponent's concession, shifted by the referee bias.
fn expected_goals(team: &TeamProfile, opponent_xg_against: Option<f64>, rbs_xg_impact: f64) -> f64 {
    let base = match opponent_xg_against {
        Some(conceded) => (team.xg_blend + conceded) / 2.0,
        None => team.xg_blend,
    };
    let bias = team
        .rbs
        .as_ref()
        .map_or(0.0, |r| r.rbs_score * r.confidence / 100.0);
    base * (1.0 + rbs_xg_impact * bias)
}
