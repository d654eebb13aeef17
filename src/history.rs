use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;

use crate::records::{MatchRecord, PlayerMatchStat, TeamMatchStat};

/// Read-only view over ingested facts, indexed for the lookups the core needs.
///
/// Records are kept sorted by date (then match id) so team/referee indexes iterate
/// chronologically. Nothing in the core mutates a history after it is built.
#[derive(Debug, Clone, Default)]
pub struct MatchHistory {
    matches: Vec<MatchRecord>,
    by_id: HashMap<u64, usize>,
    by_team: HashMap<String, Vec<usize>>,
    by_referee: HashMap<String, Vec<usize>>,
    team_stats: HashMap<(u64, String), TeamMatchStat>,
    player_stats: HashMap<(u64, String), Vec<PlayerMatchStat>>,
}

impl MatchHistory {
    pub fn new(
        mut matches: Vec<MatchRecord>,
        team_stats: Vec<TeamMatchStat>,
        player_stats: Vec<PlayerMatchStat>,
    ) -> Self {
        // One record per match id; the last one supplied wins, as in the store upsert.
        let mut seen = HashSet::with_capacity(matches.len());
        matches.reverse();
        matches.retain(|m| seen.insert(m.match_id));

        // Unparseable dates sort first; string order is fine for ISO dates.
        matches.sort_by(|a, b| {
            a.parsed_date()
                .cmp(&b.parsed_date())
                .then(a.match_id.cmp(&b.match_id))
        });

        let mut by_id = HashMap::with_capacity(matches.len());
        let mut by_team: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_referee: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, m) in matches.iter().enumerate() {
            by_id.insert(m.match_id, idx);
            by_team.entry(m.home_team.clone()).or_default().push(idx);
            by_team.entry(m.away_team.clone()).or_default().push(idx);
            if !m.referee.trim().is_empty() {
                by_referee.entry(m.referee.clone()).or_default().push(idx);
            }
        }

        let team_stats = team_stats
            .into_iter()
            .map(|s| ((s.match_id, s.team.clone()), s))
            .collect();

        let mut grouped: HashMap<(u64, String), Vec<PlayerMatchStat>> = HashMap::new();
        for p in player_stats {
            grouped
                .entry((p.match_id, p.team.clone()))
                .or_default()
                .push(p);
        }

        Self {
            matches,
            by_id,
            by_team,
            by_referee,
            team_stats,
            player_stats: grouped,
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn matches(&self) -> &[MatchRecord] {
        &self.matches
    }

    pub fn match_by_id(&self, match_id: u64) -> Option<&MatchRecord> {
        self.by_id.get(&match_id).map(|idx| &self.matches[*idx])
    }

    pub fn matches_for_team<'a>(
        &'a self,
        team: &str,
    ) -> impl Iterator<Item = &'a MatchRecord> + 'a {
        self.by_team
            .get(team)
            .into_iter()
            .flatten()
            .map(|idx| &self.matches[*idx])
    }

    pub fn matches_for_referee<'a>(
        &'a self,
        referee: &str,
    ) -> impl Iterator<Item = &'a MatchRecord> + 'a {
        self.by_referee
            .get(referee)
            .into_iter()
            .flatten()
            .map(|idx| &self.matches[*idx])
    }

    pub fn team_stat(&self, match_id: u64, team: &str) -> Option<&TeamMatchStat> {
        self.team_stats.get(&(match_id, team.to_string()))
    }

    pub fn player_stats(&self, match_id: u64, team: &str) -> &[PlayerMatchStat] {
        self.player_stats
            .get(&(match_id, team.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn teams(&self) -> BTreeSet<&str> {
        self.by_team.keys().map(String::as_str).collect()
    }

    pub fn referees(&self) -> BTreeSet<&str> {
        self.by_referee.keys().map(String::as_str).collect()
    }

    /// Every (team, referee) pairing that occurred at least once, sorted.
    pub fn team_referee_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = BTreeSet::new();
        for m in &self.matches {
            if m.referee.trim().is_empty() {
                continue;
            }
            pairs.insert((m.home_team.clone(), m.referee.clone()));
            pairs.insert((m.away_team.clone(), m.referee.clone()));
        }
        pairs.into_iter().collect()
    }

    pub fn team_stat_rows(&self) -> impl Iterator<Item = &TeamMatchStat> {
        self.team_stats.values()
    }

    pub fn player_stat_rows(&self) -> impl Iterator<Item = &PlayerMatchStat> {
        self.player_stats.values().flatten()
    }

    /// Snapshot containing only matches dated strictly before `cutoff` (and their stats).
    /// Matches with unparseable dates are dropped.
    pub fn before(&self, cutoff: NaiveDate) -> MatchHistory {
        let matches: Vec<MatchRecord> = self
            .matches
            .iter()
            .filter(|m| m.parsed_date().is_some_and(|d| d < cutoff))
            .cloned()
            .collect();
        let keep: std::collections::HashSet<u64> = matches.iter().map(|m| m.match_id).collect();
        let team_stats = self
            .team_stats
            .values()
            .filter(|s| keep.contains(&s.match_id))
            .cloned()
            .collect();
        let player_stats = self
            .player_stat_rows()
            .filter(|p| keep.contains(&p.match_id))
            .cloned()
            .collect();
        MatchHistory::new(matches, team_stats, player_stats)
    }
}
