use anyhow::{anyhow, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db::{
    update_player_votes, upsert_players_batch, upsert_team_season,
};
use crate::models::{PlayerSeason, TeamSeason};

const STATS_API_BASE: &str = "https://api.collegefootballdata.com";
const VOTES_BASE: &str = "https://www.sports-reference.com/cfb/awards";

/// Conferences whose rosters are worth collecting; vote-getters outside
/// them are rare enough that the original pipeline ignored them too.
const CONFERENCES: &[&str] = &["ACC", "Big 12", "Big Ten", "SEC", "Pac-12", "Independent"];

// ── typed ingestion outcomes ────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SkipReason {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("unparseable value: {0}")]
    BadValue(String),
    #[error("no matching player row")]
    NoPlayerRow,
}

#[derive(Debug)]
pub struct SkippedEntity {
    pub entity: String,
    pub season: i64,
    pub reason: SkipReason,
}

/// What an ingestion run did. Skipped entities are carried by value rather
/// than swallowed, so a missing player is distinguishable from one that
/// never existed.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub teams_upserted: usize,
    pub players_upserted: usize,
    pub votes_applied: usize,
    pub skipped: Vec<SkippedEntity>,
}

impl IngestReport {
    pub fn absorb(&mut self, other: IngestReport) {
        self.teams_upserted += other.teams_upserted;
        self.players_upserted += other.players_upserted;
        self.votes_applied += other.votes_applied;
        self.skipped.extend(other.skipped);
    }

    pub fn log_summary(&self) {
        tracing::info!(
            teams = self.teams_upserted,
            players = self.players_upserted,
            votes = self.votes_applied,
            skipped = self.skipped.len(),
            "ingestion summary"
        );
        for skip in &self.skipped {
            tracing::warn!(
                entity = %skip.entity,
                season = skip.season,
                "skipped: {}",
                skip.reason
            );
        }
    }
}

// ── stats API wire structures ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTeamSeason {
    team: String,
    conference: Option<String>,
    win_percentage: Option<f64>,
    points_per_game: Option<f64>,
    points_against_per_game: Option<f64>,
    strength_of_schedule: Option<f64>,
    simple_rating_system: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPlayerSeason {
    player_id: Option<String>,
    team: Option<String>,
    position: Option<String>,
    class_year: Option<String>,
    #[serde(default)]
    stats: Vec<ApiStat>,
}

#[derive(Debug, Deserialize)]
struct ApiStat {
    name: String,
    value: Option<f64>,
}

/// "Ohio State" / "Texas A&M" -> the dashed upper-case identifiers the
/// team table is keyed on.
pub fn normalize_team_id(name: &str) -> String {
    name.trim()
        .replace(['(', ')', '&'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_uppercase()
}

// ── collector ───────────────────────────────────────────────────────────────

pub struct StatsCollector {
    client: Client,
    api_key: Option<String>,
}

impl StatsCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.stats_api_key.clone(),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("CFB_STATS_API_KEY not set"))
    }

    /// Teams, players and (when published) Heisman votes for one season.
    pub async fn collect_season(&self, pool: &SqlitePool, season: i64) -> Result<IngestReport> {
        let mut report = self.collect_teams(pool, season).await?;
        for conference in CONFERENCES {
            report.absorb(self.collect_players(pool, season, conference).await?);
        }
        match self.collect_votes(pool, season).await {
            Ok(votes) => report.absorb(votes),
            // vote pages appear months after the season starts
            Err(e) => tracing::warn!("vote table for {season} unavailable: {e}"),
        }
        report.log_summary();
        Ok(report)
    }

    pub async fn collect_teams(&self, pool: &SqlitePool, season: i64) -> Result<IngestReport> {
        let key = self.key()?;
        tracing::info!("fetching team stats for {season}…");

        let response = self
            .client
            .get(format!("{STATS_API_BASE}/teams/season"))
            .query(&[("year", season.to_string())])
            .bearer_auth(key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("team stats API error {}: {}", status, body));
        }

        let teams: Vec<ApiTeamSeason> = response.json().await?;
        let mut report = IngestReport::default();

        for t in teams {
            let Some(conference) = t.conference else {
                report.skipped.push(SkippedEntity {
                    entity: t.team,
                    season,
                    reason: SkipReason::MissingField("conference"),
                });
                continue;
            };
            upsert_team_season(
                pool,
                &TeamSeason {
                    team_id: normalize_team_id(&t.team),
                    season,
                    conference,
                    win_percentage: t.win_percentage.unwrap_or(0.0),
                    points_per_game: t.points_per_game.unwrap_or(0.0),
                    points_against_per_game: t.points_against_per_game.unwrap_or(0.0),
                    strength_of_schedule: t.strength_of_schedule.unwrap_or(0.0),
                    simple_rating_system: t.simple_rating_system.unwrap_or(0.0),
                },
            )
            .await?;
            report.teams_upserted += 1;
        }

        tracing::info!("stored {} team rows for {season}", report.teams_upserted);
        Ok(report)
    }

    /// One conference at a time, one transaction per conference, so a crash
    /// midway keeps every fully-collected conference.
    pub async fn collect_players(
        &self,
        pool: &SqlitePool,
        season: i64,
        conference: &str,
    ) -> Result<IngestReport> {
        let key = self.key()?;
        tracing::info!("fetching {conference} player stats for {season}…");

        let response = self
            .client
            .get(format!("{STATS_API_BASE}/players/season"))
            .query(&[("year", &season.to_string()), ("conference", &conference.to_string())])
            .bearer_auth(key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("player stats API error {}: {}", status, body));
        }

        let api_players: Vec<ApiPlayerSeason> = response.json().await?;
        let mut report = IngestReport::default();
        let mut batch = Vec::new();

        for p in api_players {
            match build_player(p, season, &mut report) {
                Some(player) => batch.push(player),
                None => continue,
            }
        }

        report.players_upserted = batch.len();
        upsert_players_batch(pool, &batch).await?;
        tracing::info!("stored {} {conference} players for {season}", batch.len());
        Ok(report)
    }

    /// Apply the season's Heisman vote totals to already-stored players.
    pub async fn collect_votes(&self, pool: &SqlitePool, season: i64) -> Result<IngestReport> {
        tracing::info!("fetching Heisman vote table for {season}…");

        let response = self
            .client
            .get(format!("{VOTES_BASE}/heisman-{season}.html"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("vote page error {}", response.status()));
        }

        let html = response.text().await?;
        let votes = parse_heisman_votes(&html)?;
        let mut report = IngestReport::default();

        for (player_id, vote_count) in votes {
            let updated = update_player_votes(pool, &player_id, season, vote_count).await?;
            if updated == 0 {
                report.skipped.push(SkippedEntity {
                    entity: player_id,
                    season,
                    reason: SkipReason::NoPlayerRow,
                });
            } else {
                report.votes_applied += 1;
            }
        }

        tracing::info!("applied {} vote totals for {season}", report.votes_applied);
        Ok(report)
    }
}

fn build_player(
    p: ApiPlayerSeason,
    season: i64,
    report: &mut IngestReport,
) -> Option<PlayerSeason> {
    let entity = p.player_id.clone().unwrap_or_else(|| "<unnamed>".to_string());
    let mut skip = |reason: SkipReason| {
        report.skipped.push(SkippedEntity { entity: entity.clone(), season, reason });
        None::<PlayerSeason>
    };

    let Some(player_id) = p.player_id.clone() else {
        return skip(SkipReason::MissingField("playerId"));
    };
    let Some(team) = p.team else {
        return skip(SkipReason::MissingField("team"));
    };
    let Some(position) = p.position else {
        return skip(SkipReason::MissingField("position"));
    };

    let mut player = PlayerSeason::zeroed(&player_id, season);
    player.team_abbreviation = normalize_team_id(&team);
    player.position = position;
    player.class_year = p.class_year.unwrap_or_default();
    for stat in p.stats {
        // null statistics are normalized to zero; stat names the schema
        // does not track are ignored
        player.set_stat(&stat.name, stat.value.unwrap_or(0.0));
    }
    Some(player)
}

/// Rows of (player slug, vote count) from the award summary page. The slug
/// in each row's first link matches the stats source's player identifier.
pub fn parse_heisman_votes(html: &str) -> Result<Vec<(String, i64)>> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table#heisman tbody tr")
        .map_err(|_| anyhow!("invalid row selector"))?;
    let link_selector = Selector::parse("a").map_err(|_| anyhow!("invalid link selector"))?;
    let cell_selector = Selector::parse("td").map_err(|_| anyhow!("invalid cell selector"))?;

    let mut votes = Vec::new();
    for row in document.select(&row_selector) {
        let Some(href) = row
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        // "/cfb/players/joe-burrow-1.html" -> "joe-burrow-1"
        let Some(slug) = href.rsplit('/').next().and_then(|f| f.strip_suffix(".html")) else {
            continue;
        };

        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|td| td.text().collect::<String>())
            .collect();
        // vote total sits in the second-to-last column
        let Some(count) = cells
            .len()
            .checked_sub(2)
            .and_then(|i| cells[i].trim().parse::<i64>().ok())
        else {
            continue;
        };

        votes.push((slug.to_string(), count));
    }

    if votes.is_empty() {
        return Err(anyhow!("no vote rows found in page"));
    }
    Ok(votes)
}

// ── CSV import of historical season dumps ───────────────────────────────────

pub async fn import_players_csv(pool: &SqlitePool, path: &Path) -> Result<IngestReport> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut report = IngestReport::default();
    let mut batch = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |name: &str| -> Option<&str> {
            headers.iter().position(|h| h == name).and_then(|i| record.get(i))
        };

        let (Some(player_id), Some(season)) = (
            field("player_id").filter(|v| !v.is_empty()),
            field("season").and_then(|v| v.parse::<f64>().ok()),
        ) else {
            report.skipped.push(SkippedEntity {
                entity: format!("line {}", line + 2),
                season: 0,
                reason: SkipReason::BadValue("player_id/season".to_string()),
            });
            continue;
        };

        let mut player = PlayerSeason::zeroed(player_id, season as i64);
        player.team_abbreviation = field("team_abbreviation").unwrap_or_default().to_string();
        player.position = field("position").unwrap_or_default().to_string();
        player.class_year = field("class_year").unwrap_or_default().to_string();
        for (i, header) in headers.iter().enumerate() {
            if let Some(value) = record.get(i) {
                player.set_stat(header, value.trim().parse().unwrap_or(0.0));
            }
        }
        if let Some(votes) = field("votes").and_then(|v| v.parse::<i64>().ok()) {
            player.votes = votes;
        }
        batch.push(player);
    }

    report.players_upserted = batch.len();
    upsert_players_batch(pool, &batch).await?;

    // votes arrive through the same file here, not through the vote pages
    for player in &batch {
        if player.votes > 0 {
            update_player_votes(pool, &player.player_id, player.season, player.votes).await?;
        }
    }

    Ok(report)
}

pub async fn import_teams_csv(pool: &SqlitePool, path: &Path) -> Result<IngestReport> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut report = IngestReport::default();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |name: &str| -> Option<&str> {
            headers.iter().position(|h| h == name).and_then(|i| record.get(i))
        };
        let number = |name: &str| -> f64 {
            field(name).and_then(|v| v.trim().parse().ok()).unwrap_or(0.0)
        };

        let (Some(team_id), Some(season)) = (
            field("team_id").filter(|v| !v.is_empty()),
            field("season").and_then(|v| v.parse::<f64>().ok()),
        ) else {
            report.skipped.push(SkippedEntity {
                entity: format!("line {}", line + 2),
                season: 0,
                reason: SkipReason::BadValue("team_id/season".to_string()),
            });
            continue;
        };

        upsert_team_season(
            pool,
            &TeamSeason {
                team_id: team_id.to_string(),
                season: season as i64,
                conference: field("conference").unwrap_or_default().to_string(),
                win_percentage: number("win_percentage"),
                points_per_game: number("points_per_game"),
                points_against_per_game: number("points_against_per_game"),
                strength_of_schedule: number("strength_of_schedule"),
                simple_rating_system: number("simple_rating_system"),
            },
        )
        .await?;
        report.teams_upserted += 1;
    }

    Ok(report)
}
