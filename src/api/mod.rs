use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::db::{
    create_pool, get_all_predictions, get_predictions_for_season, init_database_with_pool,
};
use crate::models::{ApiResponse, LeaderboardEntry, PredictionRow};
use crate::utils::{display_player_name, display_team_name};

/// How many rows the leaderboard keeps.
const LEADERBOARD_SIZE: usize = 15;

pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let pool = create_pool(config).await?;
    init_database_with_pool(&pool).await?;

    let app = create_router().with_state(pool);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("prediction API listening on port {}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn create_router() -> Router<SqlitePool> {
    Router::new()
        .route("/", get(all_predictions_handler))
        .route("/predictions/{season}", get(season_predictions_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("heisman prediction API is running"))
}

// GET / - every stored prediction row
async fn all_predictions_handler(
    State(pool): State<SqlitePool>,
) -> Result<Json<Vec<PredictionRow>>, StatusCode> {
    match get_all_predictions(&pool).await {
        Ok(rows) => Ok(Json(rows)),
        Err(e) => {
            tracing::error!("failed to fetch predictions: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /predictions/{season} - one season's rows; empty seasons are empty
// lists, never errors
async fn season_predictions_handler(
    State(pool): State<SqlitePool>,
    Path(season): Path<i64>,
) -> Result<Json<Vec<PredictionRow>>, StatusCode> {
    match get_predictions_for_season(&pool, season).await {
        Ok(rows) => Ok(Json(rows)),
        Err(e) => {
            tracing::error!("failed to fetch predictions for {}: {}", season, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    season: Option<i64>,
}

// GET /leaderboard?season= - ranked top candidates for a season, defaulting
// to the most recent one with predictions
async fn leaderboard_handler(
    State(pool): State<SqlitePool>,
    Query(params): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Vec<LeaderboardEntry>>>, StatusCode> {
    let season = match params.season {
        Some(season) => Some(season),
        None => match latest_prediction_season(&pool).await {
            Ok(season) => season,
            Err(e) => {
                tracing::error!("failed to resolve latest season: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        },
    };

    let Some(season) = season else {
        return Ok(Json(ApiResponse::success(Vec::new())));
    };

    match get_predictions_for_season(&pool, season).await {
        Ok(rows) => Ok(Json(ApiResponse::success(leaderboard_from(&rows)))),
        Err(e) => {
            tracing::error!("failed to build leaderboard for {}: {}", season, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn latest_prediction_season(pool: &SqlitePool) -> anyhow::Result<Option<i64>> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(season) FROM prediction")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Rank by projected votes descending, keep the top 15, format names for
/// display. Pure selection and truncation; rows arrive pre-sorted from the
/// store but re-sorting keeps this safe to call on anything.
fn leaderboard_from(rows: &[PredictionRow]) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&PredictionRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        b.projected_votes
            .partial_cmp(&a.projected_votes)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    sorted
        .into_iter()
        .take(LEADERBOARD_SIZE)
        .enumerate()
        .map(|(i, row)| LeaderboardEntry {
            rank: i + 1,
            player: display_player_name(&row.player_id),
            team: display_team_name(&row.team_id),
            season: row.season,
            projected_votes: row.projected_votes,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(player_id: &str, votes: f64) -> PredictionRow {
        PredictionRow {
            player_id: player_id.to_string(),
            team_id: "OHIO-STATE".to_string(),
            season: 2022,
            projected_votes: votes,
            model_id: "m".to_string(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_leaderboard_ranks_and_truncates() {
        let rows: Vec<PredictionRow> = (0..20)
            .map(|i| row(&format!("player-{i}-1"), i as f64 * 10.0))
            .collect();
        let board = leaderboard_from(&rows);

        assert_eq!(board.len(), LEADERBOARD_SIZE);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].projected_votes, 190.0);
        assert!(board.windows(2).all(|w| w[0].projected_votes >= w[1].projected_votes));
        assert_eq!(board[0].team, "Ohio State");
    }

    #[test]
    fn test_leaderboard_formats_names() {
        let board = leaderboard_from(&[row("joe-burrow-1", 5.0)]);
        assert_eq!(board[0].player, "Joe Burrow");
        assert_eq!(board[0].team, "Ohio State");
    }

    #[test]
    fn test_leaderboard_of_nothing_is_empty() {
        assert!(leaderboard_from(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_latest_prediction_season() {
        let pool = crate::db::test_pool().await;
        assert_eq!(latest_prediction_season(&pool).await.unwrap(), None);

        crate::db::replace_predictions(&pool, 2022, &[row("a-1", 10.0)])
            .await
            .unwrap();
        assert_eq!(latest_prediction_season(&pool).await.unwrap(), Some(2022));
    }
}
