use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, Transaction, params};

use crate::config::RbsConfig;
use crate::history::MatchHistory;
use crate::rbs::{RbsResult, StatBreakdown};
use crate::records::{MatchRecord, PlayerMatchStat, TeamMatchStat};

const DEFAULT_DB_FILE: &str = "refbias.sqlite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertSummary {
    pub matches: usize,
    pub team_stats: usize,
    pub player_stats: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RbsRun {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub reference_date: String,
    pub results_written: usize,
}

/// `REFBIAS_DB` when set, otherwise a file in the working directory.
pub fn default_db_path() -> PathBuf {
    std::env::var("REFBIAS_DB")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create db dir {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            referee TEXT NOT NULL,
            home_goals INTEGER NOT NULL,
            away_goals INTEGER NOT NULL,
            date TEXT NOT NULL,
            season TEXT NOT NULL,
            competition TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);
        CREATE INDEX IF NOT EXISTS idx_matches_referee ON matches(referee);

        CREATE TABLE IF NOT EXISTS team_match_stats (
            match_id INTEGER NOT NULL,
            team TEXT NOT NULL,
            yellow_cards INTEGER NULL,
            red_cards INTEGER NULL,
            fouls_committed INTEGER NULL,
            fouls_drawn INTEGER NULL,
            shots INTEGER NULL,
            shots_on_target INTEGER NULL,
            possession_pct REAL NULL,
            penalties_awarded INTEGER NULL,
            penalties_scored INTEGER NULL,
            xg REAL NULL,
            PRIMARY KEY (match_id, team)
        );

        CREATE TABLE IF NOT EXISTS player_match_stats (
            match_id INTEGER NOT NULL,
            team TEXT NOT NULL,
            player TEXT NOT NULL,
            minutes INTEGER NULL,
            xg REAL NULL,
            fouls_drawn INTEGER NULL,
            penalties_attempted INTEGER NULL,
            PRIMARY KEY (match_id, team, player)
        );

        CREATE TABLE IF NOT EXISTS rbs_results (
            team TEXT NOT NULL,
            referee TEXT NOT NULL,
            rbs_score REAL NOT NULL,
            rbs_raw REAL NOT NULL,
            matches_with_ref INTEGER NOT NULL,
            matches_without_ref INTEGER NOT NULL,
            confidence REAL NOT NULL,
            breakdown_json TEXT NOT NULL,
            run_id INTEGER NOT NULL,
            PRIMARY KEY (team, referee)
        );

        CREATE TABLE IF NOT EXISTS rbs_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            reference_date TEXT NOT NULL,
            config_json TEXT NOT NULL,
            results_written INTEGER NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Inserts or replaces every record of `history` in one transaction.
pub fn upsert_history(conn: &mut Connection, history: &MatchHistory) -> Result<UpsertSummary> {
    let tx = conn.transaction().context("begin upsert transaction")?;
    let mut summary = UpsertSummary::default();
    let now = Utc::now().to_rfc3339();
    for m in history.matches() {
        upsert_match(&tx, m, &now)?;
        summary.matches += 1;
    }
    for s in history.team_stat_rows() {
        upsert_team_stat(&tx, s)?;
        summary.team_stats += 1;
    }
    for p in history.player_stat_rows() {
        upsert_player_stat(&tx, p)?;
        summary.player_stats += 1;
    }
    tx.commit().context("commit upsert transaction")?;
    tracing::info!(
        matches = summary.matches,
        team_stats = summary.team_stats,
        player_stats = summary.player_stats,
        "history upserted"
    );
    Ok(summary)
}

pub fn load_history(conn: &Connection) -> Result<MatchHistory> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, home_team, away_team, referee, home_goals, away_goals,
                   date, season, competition
            FROM matches
            ORDER BY date ASC, match_id ASC
            "#,
        )
        .context("prepare load matches query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(MatchRecord {
                match_id: row.get::<_, i64>(0)? as u64,
                home_team: row.get(1)?,
                away_team: row.get(2)?,
                referee: row.get(3)?,
                home_goals: row.get(4)?,
                away_goals: row.get(5)?,
                date: row.get(6)?,
                season: row.get(7)?,
                competition: row.get(8)?,
            })
        })
        .context("query load matches")?;
    let mut matches = Vec::new();
    for row in rows {
        matches.push(row.context("decode match row")?);
    }

    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, team, yellow_cards, red_cards, fouls_committed, fouls_drawn,
                   shots, shots_on_target, possession_pct, penalties_awarded,
                   penalties_scored, xg
            FROM team_match_stats
            "#,
        )
        .context("prepare load team stats query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TeamMatchStat {
                match_id: row.get::<_, i64>(0)? as u64,
                team: row.get(1)?,
                yellow_cards: row.get(2)?,
                red_cards: row.get(3)?,
                fouls_committed: row.get(4)?,
                fouls_drawn: row.get(5)?,
                shots: row.get(6)?,
                shots_on_target: row.get(7)?,
                possession_pct: row.get(8)?,
                penalties_awarded: row.get(9)?,
                penalties_scored: row.get(10)?,
                xg: row.get(11)?,
            })
        })
        .context("query load team stats")?;
    let mut team_stats = Vec::new();
    for row in rows {
        team_stats.push(row.context("decode team stat row")?);
    }

    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, team, player, minutes, xg, fouls_drawn, penalties_attempted
            FROM player_match_stats
            "#,
        )
        .context("prepare load player stats query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PlayerMatchStat {
                match_id: row.get::<_, i64>(0)? as u64,
                team: row.get(1)?,
                player: row.get(2)?,
                minutes: row.get(3)?,
                xg: row.get(4)?,
                fouls_drawn: row.get(5)?,
                penalties_attempted: row.get(6)?,
            })
        })
        .context("query load player stats")?;
    let mut player_stats = Vec::new();
    for row in rows {
        player_stats.push(row.context("decode player stat row")?);
    }

    Ok(MatchHistory::new(matches, team_stats, player_stats))
}

/// Swaps the whole result set for `results` atomically and logs the run. Readers never see a
/// mix of two runs.
pub fn replace_rbs_results(
    conn: &mut Connection,
    results: &[RbsResult],
    config: &RbsConfig,
    reference_date: &str,
) -> Result<i64> {
    let started_at = Utc::now().to_rfc3339();
    let config_json = serde_json::to_string(config).context("encode rbs config")?;

    let tx = conn.transaction().context("begin rbs transaction")?;
    tx.execute(
        "INSERT INTO rbs_runs(started_at, finished_at, reference_date, config_json, results_written)
         VALUES (?1, NULL, ?2, ?3, 0)",
        params![started_at, reference_date, config_json],
    )
    .context("insert rbs run")?;
    let run_id = tx.last_insert_rowid();

    tx.execute("DELETE FROM rbs_results", [])
        .context("clear rbs results")?;
    for r in results {
        insert_rbs_result(&tx, r, run_id)?;
    }

    tx.execute(
        "UPDATE rbs_runs SET finished_at = ?1, results_written = ?2 WHERE run_id = ?3",
        params![Utc::now().to_rfc3339(), results.len() as i64, run_id],
    )
    .context("update rbs run")?;
    tx.commit().context("commit rbs transaction")?;

    tracing::info!(run_id, results = results.len(), "rbs results replaced");
    Ok(run_id)
}

/// All stored results ordered by (team, referee).
pub fn load_rbs_results(conn: &Connection) -> Result<Vec<RbsResult>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT team, referee, rbs_score, rbs_raw, matches_with_ref, matches_without_ref,
                   confidence, breakdown_json
            FROM rbs_results
            ORDER BY team ASC, referee ASC
            "#,
        )
        .context("prepare load rbs query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })
        .context("query load rbs")?;

    let mut out = Vec::new();
    for row in rows {
        let (team, referee, rbs_score, rbs_raw, with_ref, without_ref, confidence, breakdown) =
            row.context("decode rbs row")?;
        let stats_breakdown: Vec<StatBreakdown> = serde_json::from_str(&breakdown)
            .with_context(|| format!("decode breakdown for {team}/{referee}"))?;
        out.push(RbsResult {
            team,
            referee,
            rbs_score,
            rbs_raw,
            matches_with_ref: with_ref.max(0) as usize,
            matches_without_ref: without_ref.max(0) as usize,
            confidence,
            stats_breakdown,
        });
    }
    Ok(out)
}

pub fn latest_rbs_run(conn: &Connection) -> Result<Option<RbsRun>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, started_at, finished_at, reference_date, results_written
             FROM rbs_runs ORDER BY run_id DESC LIMIT 1",
        )
        .context("prepare latest rbs run query")?;
    let mut rows = stmt.query([]).context("query latest rbs run")?;
    let Some(row) = rows.next().context("read latest rbs run")? else {
        return Ok(None);
    };
    Ok(Some(RbsRun {
        run_id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        reference_date: row.get(3)?,
        results_written: row.get::<_, i64>(4)?.max(0) as usize,
    }))
}

fn upsert_match(tx: &Transaction<'_>, m: &MatchRecord, now: &str) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO matches (
            match_id, home_team, away_team, referee, home_goals, away_goals,
            date, season, competition, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(match_id) DO UPDATE SET
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            referee = excluded.referee,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            date = excluded.date,
            season = excluded.season,
            competition = excluded.competition,
            updated_at = excluded.updated_at
        "#,
        params![
            m.match_id as i64,
            m.home_team,
            m.away_team,
            m.referee,
            m.home_goals,
            m.away_goals,
            m.date,
            m.season,
            m.competition,
            now,
        ],
    )
    .with_context(|| format!("upsert match {}", m.match_id))?;
    Ok(())
}

fn upsert_team_stat(tx: &Transaction<'_>, s: &TeamMatchStat) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO team_match_stats (
            match_id, team, yellow_cards, red_cards, fouls_committed, fouls_drawn,
            shots, shots_on_target, possession_pct, penalties_awarded, penalties_scored, xg
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(match_id, team) DO UPDATE SET
            yellow_cards = excluded.yellow_cards,
            red_cards = excluded.red_cards,
            fouls_committed = excluded.fouls_committed,
            fouls_drawn = excluded.fouls_drawn,
            shots = excluded.shots,
            shots_on_target = excluded.shots_on_target,
            possession_pct = excluded.possession_pct,
            penalties_awarded = excluded.penalties_awarded,
            penalties_scored = excluded.penalties_scored,
            xg = excluded.xg
        "#,
        params![
            s.match_id as i64,
            s.team,
            s.yellow_cards,
            s.red_cards,
            s.fouls_committed,
            s.fouls_drawn,
            s.shots,
            s.shots_on_target,
            s.possession_pct,
            s.penalties_awarded,
            s.penalties_scored,
            s.xg,
        ],
    )
    .with_context(|| format!("upsert team stat {}/{}", s.match_id, s.team))?;
    Ok(())
}

fn upsert_player_stat(tx: &Transaction<'_>, p: &PlayerMatchStat) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO player_match_stats (
            match_id, team, player, minutes, xg, fouls_drawn, penalties_attempted
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(match_id, team, player) DO UPDATE SET
            minutes = excluded.minutes,
            xg = excluded.xg,
            fouls_drawn = excluded.fouls_drawn,
            penalties_attempted = excluded.penalties_attempted
        "#,
        params![
            p.match_id as i64,
            p.team,
            p.player,
            p.minutes,
            p.xg,
            p.fouls_drawn,
            p.penalties_attempted,
        ],
    )
    .with_context(|| format!("upsert player stat {}/{}", p.match_id, p.player))?;
    Ok(())
}

fn insert_rbs_result(tx: &Transaction<'_>, r: &RbsResult, run_id: i64) -> Result<()> {
    let breakdown = serde_json::to_string(&r.stats_breakdown).context("encode breakdown")?;
    tx.execute(
        r#"
        INSERT INTO rbs_results (
            team, referee, rbs_score, rbs_raw, matches_with_ref, matches_without_ref,
            confidence, breakdown_json, run_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            r.team,
            r.referee,
            r.rbs_score,
            r.rbs_raw,
            r.matches_with_ref as i64,
            r.matches_without_ref as i64,
            r.confidence,
            breakdown,
            run_id,
        ],
    )
    .with_context(|| format!("insert rbs result {}/{}", r.team, r.referee))?;
    Ok(())
}
