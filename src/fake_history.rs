use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::calibration::round2;
use crate::history::MatchHistory;
use crate::records::{MatchRecord, PlayerMatchStat, TeamMatchStat};

const MATCHES_PER_WEEK: usize = 4;
const HOME_ADVANTAGE: f64 = 0.25;

/// Knobs for [`generate`]. The same config always yields the same history.
#[derive(Debug, Clone)]
pub struct FakeHistoryConfig {
    pub seed: u64,
    pub teams: usize,
    pub referees: usize,
    pub seasons: usize,
    pub start_date: NaiveDate,
    /// Extra yellow cards the strict referee shows the targeted team.
    pub planted_extra_yellows: f64,
}

impl Default for FakeHistoryConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            teams: 8,
            referees: 4,
            seasons: 2,
            start_date: NaiveDate::from_ymd_opt(2022, 8, 6).unwrap_or_default(),
            planted_extra_yellows: 2.0,
        }
    }
}

pub fn team_name(idx: usize) -> String {
    format!("Team {:02}", idx + 1)
}

pub fn referee_name(idx: usize) -> String {
    format!("Referee {}", idx + 1)
}

/// The (team, referee) pairing that carries the planted bias.
pub fn planted_pair() -> (String, String) {
    (team_name(0), referee_name(0))
}

/// Double round-robin seasons with Poisson scores and noisy box-score stats. The planted
/// referee books the first team harder, draws more fouls against it and never awards it a
/// penalty.
pub fn generate(cfg: &FakeHistoryConfig) -> MatchHistory {
    let teams = cfg.teams.max(2);
    let referees = cfg.referees.max(1);
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let attack: Vec<f64> = (0..teams).map(|_| rng.gen_range(0.9..1.9)).collect();

    let mut matches = Vec::new();
    let mut team_stats = Vec::new();
    let mut player_stats = Vec::new();

    for season in 0..cfg.seasons {
        let mut fixtures: Vec<(usize, usize)> = (0..teams)
            .flat_map(|h| (0..teams).filter(move |a| *a != h).map(move |a| (h, a)))
            .collect();
        fixtures.shuffle(&mut rng);

        let season_start = cfg.start_date + Duration::days(365 * season as i64);
        let label = format!("{}/{}", season_start.year(), season_start.year() + 1);

        for (i, (h, a)) in fixtures.into_iter().enumerate() {
            let match_id = 1000 + matches.len() as u64;
            let date = season_start + Duration::days(7 * (i / MATCHES_PER_WEEK) as i64);
            let referee = if (h == 0 || a == 0) && rng.gen_bool(0.4) {
                0
            } else {
                rng.gen_range(0..referees)
            };
            let planted_side = match (referee, h, a) {
                (0, 0, _) => Some(true),
                (0, _, 0) => Some(false),
                _ => None,
            };

            let lambda_h = attack[h] + HOME_ADVANTAGE;
            let lambda_a = attack[a];
            let home_goals = sample_poisson(&mut rng, lambda_h);
            let away_goals = sample_poisson(&mut rng, lambda_a);

            let home_planted = planted_side == Some(true);
            let away_planted = planted_side == Some(false);
            let home_stat =
                side_stat(&mut rng, cfg, match_id, h, lambda_h, home_goals, home_planted);
            let away_stat =
                side_stat(&mut rng, cfg, match_id, a, lambda_a, away_goals, away_planted);
            let (home_stat, away_stat) = link_sides(home_stat, away_stat, attack[h] - attack[a]);

            if rng.gen_bool(0.5) {
                player_stats.extend(split_players(&home_stat));
                player_stats.extend(split_players(&away_stat));
            }
            team_stats.push(home_stat);
            team_stats.push(away_stat);

            matches.push(MatchRecord {
                match_id,
                home_team: team_name(h),
                away_team: team_name(a),
                referee: referee_name(referee),
                home_goals,
                away_goals,
                date: date.format("%Y-%m-%d").to_string(),
                season: label.clone(),
                competition: "Synthetic League".to_string(),
            });
        }
    }

    MatchHistory::new(matches, team_stats, player_stats)
}

fn side_stat(
    rng: &mut StdRng,
    cfg: &FakeHistoryConfig,
    match_id: u64,
    team: usize,
    lambda: f64,
    goals: u8,
    planted: bool,
) -> TeamMatchStat {
    let xg = (lambda * rng.gen_range(0.75..1.25)).max(0.05);
    let shots = (xg / 0.11 + rng.gen_range(-2.0..2.0)).round().max(goals as f64) as u32;
    let on_target = ((shots as f64) * rng.gen_range(0.25..0.45)).round() as u32;
    let on_target = on_target.max(goals as u32).min(shots);

    let mut yellow = sample_poisson(rng, 1.7) as u32;
    let mut red = u32::from(rng.gen_bool(0.04));
    let mut fouls = sample_poisson(rng, 11.0) as u32;
    let mut penalties = u32::from(rng.gen_bool(0.10));
    if planted {
        yellow += cfg.planted_extra_yellows.round().max(0.0) as u32;
        red += u32::from(rng.gen_bool(0.3));
        fouls += 4;
        penalties = 0;
    }
    let scored = if penalties > 0 {
        u32::from(rng.gen_bool(0.76))
    } else {
        0
    };

    TeamMatchStat {
        match_id,
        team: team_name(team),
        yellow_cards: Some(yellow),
        red_cards: Some(red),
        fouls_committed: Some(fouls),
        fouls_drawn: None,
        shots: Some(shots),
        shots_on_target: Some(on_target),
        possession_pct: None,
        penalties_awarded: Some(penalties),
        penalties_scored: Some(scored),
        // Some feeds never report xG.
        xg: (!rng.gen_bool(0.05)).then_some(round2(xg)),
    }
}

fn link_sides(
    mut home: TeamMatchStat,
    mut away: TeamMatchStat,
    strength_gap: f64,
) -> (TeamMatchStat, TeamMatchStat) {
    home.fouls_drawn = away.fouls_committed;
    away.fouls_drawn = home.fouls_committed;
    let possession = (50.0 + 8.0 * strength_gap).clamp(30.0, 70.0);
    home.possession_pct = Some(round2(possession));
    away.possession_pct = Some(round2(100.0 - possession));
    (home, away)
}

fn split_players(stat: &TeamMatchStat) -> Vec<PlayerMatchStat> {
    let xg = stat.xg.unwrap_or(0.0);
    let drawn = stat.fouls_drawn.unwrap_or(0);
    [("Forward", 0.6, 90), ("Winger", 0.4, 75)]
        .into_iter()
        .enumerate()
        .map(|(i, (role, share, minutes))| PlayerMatchStat {
            match_id: stat.match_id,
            team: stat.team.clone(),
            player: format!("{} {role}", stat.team),
            minutes: Some(minutes),
            xg: Some(round2(xg * share)),
            fouls_drawn: Some(if i == 0 { drawn / 2 } else { drawn - drawn / 2 }),
            penalties_attempted: stat.penalties_awarded.filter(|_| i == 0),
        })
        .collect()
}

/// Knuth's method, capped at 10.
fn sample_poisson(rng: &mut StdRng, lambda: f64) -> u8 {
    let limit = (-lambda).exp();
    let mut k = 0u8;
    let mut p = 1.0_f64;
    loop {
        p *= rng.gen_range(0.0..1.0);
        if p <= limit || k >= 10 {
            return k;
        }
        k += 1;
    }
}
