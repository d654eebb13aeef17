use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Upper bound for goals/shots. Kept as a named constant because downstream blends clamp it
/// tighter through `PredictionConfig`.
pub const MAX_CONVERSION_RATE: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    pub match_id: u64,
    pub home_team: String,
    pub away_team: String,
    pub referee: String,
    pub home_goals: u8,
    pub away_goals: u8,
    /// ISO date, `YYYY-MM-DD`, optionally followed by a time part.
    pub date: String,
    #[serde(default)]
    pub season: String,
    #[serde(default)]
    pub competition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

impl MatchRecord {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }

    pub fn side_of(&self, team: &str) -> Option<Side> {
        if self.home_team == team {
            Some(Side::Home)
        } else if self.away_team == team {
            Some(Side::Away)
        } else {
            None
        }
    }

    pub fn opponent(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.away_team,
            Side::Away => &self.home_team,
        }
    }

    /// (goals for, goals against) from the given side's point of view.
    pub fn goals_for_against(&self, side: Side) -> (u8, u8) {
        match side {
            Side::Home => (self.home_goals, self.away_goals),
            Side::Away => (self.away_goals, self.home_goals),
        }
    }

    pub fn points_for(&self, side: Side) -> u8 {
        let (gf, ga) = self.goals_for_against(side);
        if gf > ga {
            3
        } else if gf == ga {
            1
        } else {
            0
        }
    }
}

/// Per-team, per-match counters. `None` means the source never reported the field, which is
/// different from an observed zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TeamMatchStat {
    pub match_id: u64,
    pub team: String,
    #[serde(default)]
    pub yellow_cards: Option<u32>,
    #[serde(default)]
    pub red_cards: Option<u32>,
    #[serde(default)]
    pub fouls_committed: Option<u32>,
    #[serde(default)]
    pub fouls_drawn: Option<u32>,
    #[serde(default)]
    pub shots: Option<u32>,
    #[serde(default)]
    pub shots_on_target: Option<u32>,
    #[serde(default)]
    pub possession_pct: Option<f64>,
    #[serde(default)]
    pub penalties_awarded: Option<u32>,
    #[serde(default)]
    pub penalties_scored: Option<u32>,
    #[serde(default)]
    pub xg: Option<f64>,
}

impl TeamMatchStat {
    pub fn xg_per_shot(&self) -> Option<f64> {
        ratio(self.xg?, self.shots? as f64, 1.0)
    }

    pub fn shot_accuracy(&self) -> Option<f64> {
        ratio(self.shots_on_target? as f64, self.shots? as f64, 1.0)
    }

    pub fn conversion_rate(&self, goals: u8) -> Option<f64> {
        ratio(goals as f64, self.shots? as f64, MAX_CONVERSION_RATE)
    }

    pub fn penalty_conversion_rate(&self) -> Option<f64> {
        ratio(
            self.penalties_scored? as f64,
            self.penalties_awarded? as f64,
            1.0,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerMatchStat {
    pub match_id: u64,
    pub team: String,
    pub player: String,
    #[serde(default)]
    pub minutes: Option<u32>,
    #[serde(default)]
    pub xg: Option<f64>,
    #[serde(default)]
    pub fouls_drawn: Option<u32>,
    #[serde(default)]
    pub penalties_attempted: Option<u32>,
}

/// The fields the aggregator knows how to average. Order is the storage order of
/// [`StatRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatField {
    Goals,
    GoalsAgainst,
    Points,
    Xg,
    XgAgainst,
    XgDifference,
    Shots,
    ShotsOnTarget,
    PossessionPct,
    YellowCards,
    RedCards,
    FoulsCommitted,
    FoulsDrawn,
    PenaltiesAwarded,
    PenaltiesScored,
}

impl StatField {
    pub const COUNT: usize = 15;

    pub const ALL: [StatField; Self::COUNT] = [
        StatField::Goals,
        StatField::GoalsAgainst,
        StatField::Points,
        StatField::Xg,
        StatField::XgAgainst,
        StatField::XgDifference,
        StatField::Shots,
        StatField::ShotsOnTarget,
        StatField::PossessionPct,
        StatField::YellowCards,
        StatField::RedCards,
        StatField::FoulsCommitted,
        StatField::FoulsDrawn,
        StatField::PenaltiesAwarded,
        StatField::PenaltiesScored,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StatField::Goals => "goals",
            StatField::GoalsAgainst => "goals_against",
            StatField::Points => "points",
            StatField::Xg => "xg",
            StatField::XgAgainst => "xg_against",
            StatField::XgDifference => "xg_difference",
            StatField::Shots => "shots",
            StatField::ShotsOnTarget => "shots_on_target",
            StatField::PossessionPct => "possession_pct",
            StatField::YellowCards => "yellow_cards",
            StatField::RedCards => "red_cards",
            StatField::FoulsCommitted => "fouls_committed",
            StatField::FoulsDrawn => "fouls_drawn",
            StatField::PenaltiesAwarded => "penalties_awarded",
            StatField::PenaltiesScored => "penalties_scored",
        }
    }
}

/// One value slot per [`StatField`].
pub type StatRow = [Option<f64>; StatField::COUNT];

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// `num / den` clamped into `[0, max]`; `None` when the denominator is not positive.
pub fn ratio(num: f64, den: f64, max: f64) -> Option<f64> {
    if !(den > 0.0) || !num.is_finite() {
        return None;
    }
    Some((num / den).clamp(0.0, max))
}
