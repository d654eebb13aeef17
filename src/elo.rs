use std::collections::HashMap;

use crate::history::MatchHistory;

pub const BASE_RATING: f64 = 1500.0;

#[derive(Debug, Clone, Copy)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 60.0,
        }
    }
}

/// Ratings after replaying every match in chronological order.
pub fn compute_elo(history: &MatchHistory, cfg: EloConfig) -> HashMap<String, f64> {
    let mut elo: HashMap<String, f64> = HashMap::new();
    for m in history.matches() {
        let eh = *elo.entry(m.home_team.clone()).or_insert(BASE_RATING);
        let ea = *elo.entry(m.away_team.clone()).or_insert(BASE_RATING);

        let expected_home = expected_score(eh + cfg.home_adv_pts, ea);
        let s_home = if m.home_goals > m.away_goals {
            1.0
        } else if m.home_goals < m.away_goals {
            0.0
        } else {
            0.5
        };

        let delta = cfg.k * (s_home - expected_home);
        elo.insert(m.home_team.clone(), eh + delta);
        elo.insert(m.away_team.clone(), ea - delta);
    }
    elo
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}
