use anyhow::Result;
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::str::FromStr;

use crate::config::Config;
use crate::models::{
    JoinedRow, ModelRecord, PlayerSeason, PredictionRow, TeamSeason, PLAYER_STAT_COLUMNS,
    TEAM_STAT_COLUMNS,
};

pub async fn create_pool(config: &Config) -> Result<SqlitePool> {
    let database_url = &config.database_url;

    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if let Some(parent) = std::path::Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

fn player_table_ddl() -> String {
    let stat_columns = PLAYER_STAT_COLUMNS
        .iter()
        .map(|c| format!("{c} REAL NOT NULL DEFAULT 0"))
        .collect::<Vec<_>>()
        .join(",\n            ");

    format!(
        r#"
        CREATE TABLE IF NOT EXISTS player (
            player_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            team_abbreviation TEXT NOT NULL,
            position TEXT NOT NULL,
            class_year TEXT NOT NULL,
            {stat_columns},
            votes INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (player_id, season)
        )
        "#
    )
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database(config: &Config) -> Result<SqlitePool> {
    let pool = create_pool(config).await?;
    init_database_with_pool(&pool).await?;
    Ok(pool)
}

/// Called from the server so schema creation shares the main pool.
pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&player_table_ddl()).execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS team (
            team_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            conference TEXT NOT NULL,
            win_percentage REAL NOT NULL DEFAULT 0,
            points_per_game REAL NOT NULL DEFAULT 0,
            points_against_per_game REAL NOT NULL DEFAULT 0,
            strength_of_schedule REAL NOT NULL DEFAULT 0,
            simple_rating_system REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (team_id, season)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prediction (
            player_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            projected_votes REAL NOT NULL,
            model_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (player_id, season),
            FOREIGN KEY (player_id, season) REFERENCES player (player_id, season),
            FOREIGN KEY (team_id, season) REFERENCES team (team_id, season)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model (
            model_id TEXT PRIMARY KEY,
            clf_kind TEXT NOT NULL,
            reg_kind TEXT NOT NULL,
            clf_params TEXT NOT NULL,
            reg_params TEXT NOT NULL,
            clf_artifact TEXT NOT NULL,
            reg_artifact TEXT NOT NULL,
            metrics TEXT NOT NULL,
            precision_avg REAL NOT NULL,
            recall_avg REAL NOT NULL,
            fscore_avg REAL NOT NULL,
            rmse_avg REAL NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_player_season ON player(season)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prediction_season ON prediction(season)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_model_fscore ON model(fscore_avg)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

// Player operations

/// Upsert SQL covering every column except `votes`: vote totals arrive from
/// a different source and must survive stat refreshes.
fn player_upsert_sql() -> String {
    let columns: Vec<&str> = ["player_id", "season", "team_abbreviation", "position", "class_year"]
        .into_iter()
        .chain(PLAYER_STAT_COLUMNS.iter().copied())
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns
        .iter()
        .filter(|c| !matches!(**c, "player_id" | "season"))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO player ({}) VALUES ({}) ON CONFLICT(player_id, season) DO UPDATE SET {}",
        columns.join(", "),
        placeholders,
        updates
    )
}

fn bind_player<'q>(
    sql: &'q str,
    player: &'q PlayerSeason,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = sqlx::query(sql)
        .bind(&player.player_id)
        .bind(player.season)
        .bind(&player.team_abbreviation)
        .bind(&player.position)
        .bind(&player.class_year);
    for value in player.stat_values() {
        query = query.bind(value);
    }
    query
}

pub async fn upsert_player_season(pool: &SqlitePool, player: &PlayerSeason) -> Result<()> {
    let sql = player_upsert_sql();
    bind_player(&sql, player).execute(pool).await?;
    Ok(())
}

/// One transaction per batch, so partial progress survives a later crash.
pub async fn upsert_players_batch(pool: &SqlitePool, players: &[PlayerSeason]) -> Result<()> {
    let sql = player_upsert_sql();
    let mut tx = pool.begin().await?;
    for player in players {
        bind_player(&sql, player).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn update_player_votes(
    pool: &SqlitePool,
    player_id: &str,
    season: i64,
    votes: i64,
) -> Result<u64> {
    let result = sqlx::query("UPDATE player SET votes = ? WHERE player_id = ? AND season = ?")
        .bind(votes)
        .bind(player_id)
        .bind(season)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn get_player_season(
    pool: &SqlitePool,
    player_id: &str,
    season: i64,
) -> Result<Option<PlayerSeason>> {
    let row = sqlx::query_as::<_, PlayerSeason>(
        "SELECT * FROM player WHERE player_id = ? AND season = ?",
    )
    .bind(player_id)
    .bind(season)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn search_players(pool: &SqlitePool, pattern: &str) -> Result<Vec<PlayerSeason>> {
    let rows = sqlx::query_as::<_, PlayerSeason>(
        "SELECT * FROM player WHERE player_id LIKE ? ORDER BY player_id, season",
    )
    .bind(format!("%{}%", pattern))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_player_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT player_id FROM player ORDER BY player_id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// Team operations

fn team_upsert_sql() -> String {
    let columns: Vec<&str> = ["team_id", "season", "conference"]
        .into_iter()
        .chain(TEAM_STAT_COLUMNS.iter().copied())
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns
        .iter()
        .filter(|c| !matches!(**c, "team_id" | "season"))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO team ({}) VALUES ({}) ON CONFLICT(team_id, season) DO UPDATE SET {}",
        columns.join(", "),
        placeholders,
        updates
    )
}

pub async fn upsert_team_season(pool: &SqlitePool, team: &TeamSeason) -> Result<()> {
    let sql = team_upsert_sql();
    let mut query = sqlx::query(&sql)
        .bind(&team.team_id)
        .bind(team.season)
        .bind(&team.conference);
    for value in team.stat_values() {
        query = query.bind(value);
    }
    query.execute(pool).await?;
    Ok(())
}

// Joined reads feeding feature preparation

const JOINED_SELECT: &str = r#"
    SELECT p.*,
           t.conference,
           t.win_percentage,
           t.points_per_game,
           t.points_against_per_game,
           t.strength_of_schedule,
           t.simple_rating_system
    FROM player p
    INNER JOIN team t
        ON p.team_abbreviation = t.team_id
        AND p.season = t.season
"#;

pub async fn fetch_joined_rows(pool: &SqlitePool) -> Result<Vec<JoinedRow>> {
    let sql = format!("{JOINED_SELECT} ORDER BY p.season, p.player_id");
    let rows = sqlx::query_as::<_, JoinedRow>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

pub async fn fetch_joined_rows_for_season(
    pool: &SqlitePool,
    season: i64,
) -> Result<Vec<JoinedRow>> {
    let sql = format!("{JOINED_SELECT} WHERE p.season = ? ORDER BY p.player_id");
    let rows = sqlx::query_as::<_, JoinedRow>(&sql)
        .bind(season)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// Prediction operations

/// Replace the prediction rows for one season. Deletion and inserts share a
/// transaction so readers never observe a half-written season.
pub async fn replace_predictions(
    pool: &SqlitePool,
    season: i64,
    predictions: &[PredictionRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM prediction WHERE season = ?")
        .bind(season)
        .execute(&mut *tx)
        .await?;
    for p in predictions {
        sqlx::query(
            r#"
            INSERT INTO prediction (player_id, team_id, season, projected_votes, model_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&p.player_id)
        .bind(&p.team_id)
        .bind(p.season)
        .bind(p.projected_votes)
        .bind(&p.model_id)
        .bind(&p.created_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_all_predictions(pool: &SqlitePool) -> Result<Vec<PredictionRow>> {
    let rows = sqlx::query_as::<_, PredictionRow>(
        "SELECT * FROM prediction ORDER BY season DESC, projected_votes DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_predictions_for_season(
    pool: &SqlitePool,
    season: i64,
) -> Result<Vec<PredictionRow>> {
    let rows = sqlx::query_as::<_, PredictionRow>(
        "SELECT * FROM prediction WHERE season = ? ORDER BY projected_votes DESC",
    )
    .bind(season)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// Model operations

pub async fn insert_model(pool: &SqlitePool, model: &ModelRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO model (
            model_id, clf_kind, reg_kind, clf_params, reg_params,
            clf_artifact, reg_artifact, metrics,
            precision_avg, recall_avg, fscore_avg, rmse_avg, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&model.model_id)
    .bind(&model.clf_kind)
    .bind(&model.reg_kind)
    .bind(&model.clf_params)
    .bind(&model.reg_params)
    .bind(&model.clf_artifact)
    .bind(&model.reg_artifact)
    .bind(&model.metrics)
    .bind(model.precision_avg)
    .bind(model.recall_avg)
    .bind(model.fscore_avg)
    .bind(model.rmse_avg)
    .bind(&model.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_model_by_id(pool: &SqlitePool, model_id: &str) -> Result<Option<ModelRecord>> {
    let row = sqlx::query_as::<_, ModelRecord>("SELECT * FROM model WHERE model_id = ?")
        .bind(model_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Best stored candidate: highest averaged F-score, RMSE as tiebreaker.
pub async fn get_best_model(pool: &SqlitePool) -> Result<Option<ModelRecord>> {
    let row = sqlx::query_as::<_, ModelRecord>(
        "SELECT * FROM model ORDER BY fscore_avg DESC, rmse_avg ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn count_models(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM model")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    init_database_with_pool(&pool).await.unwrap();
    pool
}
