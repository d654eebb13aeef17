use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::history::MatchHistory;
use crate::records::{MatchRecord, Side, StatField, StatRow, TeamMatchStat, ratio};
use crate::time_decay::{self, TimeDecayConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefereeFilter<'a> {
    Any,
    With(&'a str),
    Excluding(&'a str),
}

impl RefereeFilter<'_> {
    fn accepts(&self, m: &MatchRecord) -> bool {
        match self {
            RefereeFilter::Any => true,
            RefereeFilter::With(r) => m.referee == *r,
            RefereeFilter::Excluding(r) => m.referee != *r,
        }
    }
}

/// Weighted per-field means for one team over a set of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAverages {
    pub team: String,
    pub match_count: usize,
    pub weight_sum: f64,
    values: StatRow,
}

impl TeamAverages {
    pub fn get(&self, field: StatField) -> Option<f64> {
        self.values[field.index()]
    }

    pub fn get_or(&self, field: StatField, fallback: StatField) -> Option<f64> {
        self.get(field).or_else(|| self.get(fallback))
    }

    pub fn xg_per_shot(&self) -> Option<f64> {
        ratio(self.get(StatField::Xg)?, self.get(StatField::Shots)?, 1.0)
    }

    pub fn shot_accuracy(&self) -> Option<f64> {
        ratio(
            self.get(StatField::ShotsOnTarget)?,
            self.get(StatField::Shots)?,
            1.0,
        )
    }

    pub fn conversion_rate(&self) -> Option<f64> {
        ratio(
            self.get(StatField::Goals)?,
            self.get(StatField::Shots)?,
            crate::records::MAX_CONVERSION_RATE,
        )
    }

    pub fn penalty_conversion_rate(&self) -> Option<f64> {
        ratio(
            self.get(StatField::PenaltiesScored)?,
            self.get(StatField::PenaltiesAwarded)?,
            1.0,
        )
    }

    pub fn cards(&self) -> Option<f64> {
        match (self.get(StatField::YellowCards), self.get(StatField::RedCards)) {
            (None, None) => None,
            (y, r) => Some(y.unwrap_or(0.0) + r.unwrap_or(0.0)),
        }
    }
}

/// Turns raw match facts into team averages. Stateless apart from the reference date used
/// for time decay.
#[derive(Debug, Clone, Copy)]
pub struct StatAggregator<'a> {
    history: &'a MatchHistory,
    reference_date: NaiveDate,
}

impl<'a> StatAggregator<'a> {
    pub fn new(history: &'a MatchHistory) -> Self {
        Self::at(history, Utc::now().date_naive())
    }

    pub fn at(history: &'a MatchHistory, reference_date: NaiveDate) -> Self {
        Self {
            history,
            reference_date,
        }
    }

    pub fn history(&self) -> &'a MatchHistory {
        self.history
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// `None` when the team has no qualifying match under `filter`.
    pub fn averages(
        &self,
        team: &str,
        filter: RefereeFilter<'_>,
        decay: Option<&TimeDecayConfig>,
    ) -> Option<TeamAverages> {
        let matches = self
            .history
            .matches_for_team(team)
            .filter(|m| filter.accepts(m));
        self.accumulate(team, matches, decay)
    }

    /// Unweighted averages over the team's last `window` qualifying matches.
    pub fn recent(&self, team: &str, window: usize) -> Option<TeamAverages> {
        if window == 0 {
            return None;
        }
        let qualifying: Vec<&MatchRecord> = self
            .history
            .matches_for_team(team)
            .filter(|m| self.history.team_stat(m.match_id, team).is_some())
            .collect();
        let start = qualifying.len().saturating_sub(window);
        self.accumulate(team, qualifying[start..].iter().copied(), None)
    }

    /// Effective per-match row for `team`, with player data folded in.
    pub fn match_row(&self, m: &MatchRecord, team: &str) -> Option<StatRow> {
        let side = m.side_of(team)?;
        let stat = self.history.team_stat(m.match_id, team)?;
        let opponent = m.opponent(side);
        let opponent_xg = self
            .history
            .team_stat(m.match_id, opponent)
            .and_then(|s| self.effective_xg(m.match_id, opponent, s));
        Some(self.build_row(m, side, team, stat, opponent_xg))
    }

    fn accumulate<'m>(
        &self,
        team: &str,
        matches: impl Iterator<Item = &'m MatchRecord>,
        decay: Option<&TimeDecayConfig>,
    ) -> Option<TeamAverages> {
        let mut sums = [0.0_f64; StatField::COUNT];
        let mut weights = [0.0_f64; StatField::COUNT];
        let mut match_count = 0usize;
        let mut weight_sum = 0.0_f64;

        for m in matches {
            let Some(row) = self.match_row(m, team) else {
                continue;
            };
            let w = decay
                .map(|cfg| time_decay::weight_at(&m.date, self.reference_date, cfg))
                .unwrap_or(1.0);
            match_count += 1;
            weight_sum += w;
            for (idx, value) in row.iter().enumerate() {
                if let Some(v) = value {
                    sums[idx] += w * v;
                    weights[idx] += w;
                }
            }
        }

        if match_count == 0 {
            return None;
        }

        let mut values: StatRow = [None; StatField::COUNT];
        for idx in 0..StatField::COUNT {
            if weights[idx] > 0.0 {
                values[idx] = Some(sums[idx] / weights[idx]);
            }
        }

        Some(TeamAverages {
            team: team.to_string(),
            match_count,
            weight_sum,
            values,
        })
    }

    fn build_row(
        &self,
        m: &MatchRecord,
        side: Side,
        team: &str,
        stat: &TeamMatchStat,
        opponent_xg: Option<f64>,
    ) -> StatRow {
        let (gf, ga) = m.goals_for_against(side);
        let players = self.history.player_stats(m.match_id, team);

        let xg = self.effective_xg(m.match_id, team, stat);
        let fouls_drawn = player_override(
            players.iter().filter_map(|p| p.fouls_drawn).map(f64::from),
            stat.fouls_drawn.map(f64::from),
        );
        let penalties_awarded = player_override(
            players
                .iter()
                .filter_map(|p| p.penalties_attempted)
                .map(f64::from),
            stat.penalties_awarded.map(f64::from),
        );

        let mut row: StatRow = [None; StatField::COUNT];
        let mut set = |field: StatField, v: Option<f64>| row[field.index()] = v;
        set(StatField::Goals, Some(gf as f64));
        set(StatField::GoalsAgainst, Some(ga as f64));
        set(StatField::Points, Some(m.points_for(side) as f64));
        set(StatField::Xg, xg);
        set(StatField::XgAgainst, opponent_xg);
        set(
            StatField::XgDifference,
            xg.zip(opponent_xg).map(|(f, a)| f - a),
        );
        set(StatField::Shots, stat.shots.map(f64::from));
        set(StatField::ShotsOnTarget, stat.shots_on_target.map(f64::from));
        set(
            StatField::PossessionPct,
            stat.possession_pct.map(|p| p.clamp(0.0, 100.0)),
        );
        set(StatField::YellowCards, stat.yellow_cards.map(f64::from));
        set(StatField::RedCards, stat.red_cards.map(f64::from));
        set(StatField::FoulsCommitted, stat.fouls_committed.map(f64::from));
        set(StatField::FoulsDrawn, fouls_drawn);
        set(StatField::PenaltiesAwarded, penalties_awarded);
        set(StatField::PenaltiesScored, stat.penalties_scored.map(f64::from));
        row
    }

    fn effective_xg(&self, match_id: u64, team: &str, stat: &TeamMatchStat) -> Option<f64> {
        let players = self.history.player_stats(match_id, team);
        player_override(players.iter().filter_map(|p| p.xg), stat.xg).map(|v| v.max(0.0))
    }
}

/// Player sums win over the team-level value whenever they are non-zero.
fn player_override(
    player_values: impl Iterator<Item = f64>,
    team_value: Option<f64>,
) -> Option<f64> {
    let mut any = false;
    let mut sum = 0.0;
    for v in player_values {
        any = true;
        sum += v;
    }
    if any && sum != 0.0 {
        Some(sum)
    } else {
        team_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PlayerMatchStat;

    fn record(
        id: u64,
        home: &str,
        away: &str,
        referee: &str,
        date: &str,
        hg: u8,
        ag: u8,
    ) -> MatchRecord {
        MatchRecord {
            match_id: id,
            home_team: home.to_string(),
            away_team: away.to_string(),
            referee: referee.to_string(),
            home_goals: hg,
            away_goals: ag,
            date: date.to_string(),
            season: "2023/24".to_string(),
            competition: "L".to_string(),
        }
    }

    fn stat(id: u64, team: &str, yellow: u32, xg: Option<f64>) -> TeamMatchStat {
        TeamMatchStat {
            match_id: id,
            team: team.to_string(),
            yellow_cards: Some(yellow),
            shots: Some(10),
            shots_on_target: Some(4),
            xg,
            ..Default::default()
        }
    }

    fn sample() -> MatchHistory {
        MatchHistory::new(
            vec![
                record(1, "A", "B", "R1", "2024-01-01", 2, 0),
                record(2, "B", "A", "R2", "2024-02-01", 1, 1),
                record(3, "A", "C", "R1", "2024-03-01", 0, 1),
                record(4, "A", "C", "R2", "2024-04-01", 3, 0),
            ],
            vec![
                stat(1, "A", 2, Some(1.5)),
                stat(1, "B", 1, Some(0.5)),
                stat(2, "A", 4, None),
                stat(2, "B", 0, Some(1.0)),
                stat(3, "A", 3, Some(0.8)),
                stat(3, "C", 1, Some(1.2)),
            ],
            Vec::new(),
        )
    }

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn only_matches_with_team_stats_qualify() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        let avg = agg.averages("A", RefereeFilter::Any, None).unwrap();
        assert_eq!(avg.match_count, 3);
        assert!((avg.get(StatField::YellowCards).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn referee_filters_split_population() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        let with = agg.averages("A", RefereeFilter::With("R1"), None).unwrap();
        let without = agg.averages("A", RefereeFilter::Excluding("R1"), None).unwrap();
        assert_eq!(with.match_count, 2);
        assert_eq!(without.match_count, 1);
        assert!((with.get(StatField::YellowCards).unwrap() - 2.5).abs() < 1e-12);
        assert!((without.get(StatField::YellowCards).unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn unobserved_fields_are_absent_not_zero() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        let without = agg.averages("A", RefereeFilter::Excluding("R1"), None).unwrap();
        assert!(without.get(StatField::Xg).is_none());
        assert!(without.get(StatField::XgDifference).is_none());
        assert!(without.get(StatField::RedCards).is_none());
        assert!((without.get(StatField::XgAgainst).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_team_is_absent() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        assert!(agg.averages("Z", RefereeFilter::Any, None).is_none());
        assert!(agg.averages("C", RefereeFilter::With("R2"), None).is_none());
    }

    #[test]
    fn decay_turns_mean_into_weighted_mean() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        let cfg = TimeDecayConfig::exponential(1.0);
        let avg = agg.averages("A", RefereeFilter::Any, Some(&cfg)).unwrap();
        // Weights: Jan 0.1 (4 months, clamped from 0.0625), Feb 0.125, Mar 0.25.
        let expected = (0.1 * 2.0 + 0.125 * 4.0 + 0.25 * 3.0) / (0.1 + 0.125 + 0.25);
        assert!((avg.get(StatField::YellowCards).unwrap() - expected).abs() < 1e-9);
        assert!((avg.weight_sum - 0.475).abs() < 1e-9);
    }

    #[test]
    fn player_data_overrides_team_values() {
        let history = MatchHistory::new(
            vec![record(1, "A", "B", "R1", "2024-01-01", 1, 0)],
            vec![
                TeamMatchStat {
                    match_id: 1,
                    team: "A".to_string(),
                    xg: Some(0.4),
                    fouls_drawn: Some(3),
                    penalties_awarded: Some(0),
                    ..Default::default()
                },
                TeamMatchStat {
                    match_id: 1,
                    team: "B".to_string(),
                    xg: Some(0.9),
                    ..Default::default()
                },
            ],
            vec![
                PlayerMatchStat {
                    match_id: 1,
                    team: "A".to_string(),
                    player: "p1".to_string(),
                    xg: Some(0.7),
                    fouls_drawn: Some(4),
                    penalties_attempted: Some(1),
                    ..Default::default()
                },
                PlayerMatchStat {
                    match_id: 1,
                    team: "A".to_string(),
                    player: "p2".to_string(),
                    xg: Some(0.6),
                    fouls_drawn: Some(2),
                    penalties_attempted: Some(0),
                    ..Default::default()
                },
                PlayerMatchStat {
                    match_id: 1,
                    team: "B".to_string(),
                    player: "p3".to_string(),
                    xg: Some(0.0),
                    ..Default::default()
                },
            ],
        );
        let agg = StatAggregator::at(&history, reference());
        let a = agg.averages("A", RefereeFilter::Any, None).unwrap();
        assert!((a.get(StatField::Xg).unwrap() - 1.3).abs() < 1e-12);
        assert_eq!(a.get(StatField::FoulsDrawn), Some(6.0));
        assert_eq!(a.get(StatField::PenaltiesAwarded), Some(1.0));
        // Player xG summing to zero keeps the team-level value.
        assert!((a.get(StatField::XgAgainst).unwrap() - 0.9).abs() < 1e-12);
        assert!((a.get(StatField::XgDifference).unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn recent_uses_last_window() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        let recent = agg.recent("A", 2).unwrap();
        assert_eq!(recent.match_count, 2);
        // Matches 2 (draw) and 3 (loss).
        assert!((recent.get(StatField::Points).unwrap() - 0.5).abs() < 1e-12);
        assert!(agg.recent("A", 0).is_none());
    }

    #[test]
    fn derived_ratios_are_clamped() {
        let history = sample();
        let agg = StatAggregator::at(&history, reference());
        let avg = agg.averages("A", RefereeFilter::Any, None).unwrap();
        let acc = avg.shot_accuracy().unwrap();
        assert!((acc - 0.4).abs() < 1e-12);
        let conv = avg.conversion_rate().unwrap();
        assert!((0.0..=1.0).contains(&conv));
        assert!(avg.penalty_conversion_rate().is_none());
    }
}
