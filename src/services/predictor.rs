use anyhow::{anyhow, bail, Result};
use ndarray::Axis;
use sqlx::SqlitePool;

use crate::db;
use crate::models::PredictionRow;
use crate::services::backtest::TOP_CANDIDATES;
use crate::services::estimators::{ClassifierArtifact, RegressorArtifact};
use crate::services::features::FeatureTable;
use crate::services::grid::LoadedArtifact;
use crate::utils::top_k_indices;

#[derive(Debug)]
pub struct PredictionReport {
    pub season: i64,
    pub model_id: String,
    pub stored: usize,
}

/// Project vote totals for one season using the best stored model pair and
/// replace that season's prediction rows with the result.
pub async fn predict_season(pool: &SqlitePool, season: i64) -> Result<PredictionReport> {
    let model = db::get_best_model(pool)
        .await?
        .ok_or_else(|| anyhow!("no trained models in the store; run a training grid first"))?;

    let rows = db::fetch_joined_rows_for_season(pool, season).await?;
    if rows.is_empty() {
        bail!("no joined player rows for season {season}");
    }
    let table = FeatureTable::from_rows(&rows);

    let clf_doc: LoadedArtifact = serde_json::from_str(&model.clf_artifact)?;
    let classifier: ClassifierArtifact = serde_json::from_value(clf_doc.model)?;
    let reg_doc: LoadedArtifact = serde_json::from_str(&model.reg_artifact)?;
    let regressor: RegressorArtifact = serde_json::from_value(reg_doc.model)?;

    // new data is re-expressed in each artifact's training column order
    let x_clf = table.aligned_to(&clf_doc.columns);
    let probabilities = classifier.predict_proba(x_clf.view());
    let selected = top_k_indices(&probabilities, TOP_CANDIDATES);

    let x_reg = table.aligned_to(&reg_doc.columns);
    let x_selected = x_reg.select(Axis(0), &selected);
    let projected = regressor.predict(x_selected.view());

    let created_at = db::now_rfc3339();
    let predictions: Vec<PredictionRow> = selected
        .iter()
        .zip(&projected)
        .map(|(&i, &votes)| PredictionRow {
            player_id: table.player_ids[i].clone(),
            team_id: table.team_ids[i].clone(),
            season,
            projected_votes: votes,
            model_id: model.model_id.clone(),
            created_at: created_at.clone(),
        })
        .collect();

    db::replace_predictions(pool, season, &predictions).await?;
    tracing::info!(
        season,
        model_id = %model.model_id,
        stored = predictions.len(),
        "prediction run complete"
    );

    Ok(PredictionReport {
        season,
        model_id: model.model_id,
        stored: predictions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, upsert_players_batch, upsert_team_season};
    use crate::models::{PlayerSeason, TeamSeason};
    use crate::services::grid::{run_grid, GridEntry, SearchSpace};

    async fn seed_seasons(pool: &SqlitePool, seasons: &[i64]) {
        for &season in seasons {
            upsert_team_season(
                pool,
                &TeamSeason {
                    team_id: "ALABAMA".to_string(),
                    season,
                    conference: "SEC".to_string(),
                    win_percentage: 0.85,
                    points_per_game: 38.0,
                    points_against_per_game: 19.0,
                    strength_of_schedule: 5.5,
                    simple_rating_system: 18.0,
                },
            )
            .await
            .unwrap();

            let mut players = Vec::new();
            for i in 0..20usize {
                let mut p = PlayerSeason::zeroed(&format!("player-{season}-{i}"), season);
                p.team_abbreviation = "ALABAMA".to_string();
                p.position = if i % 2 == 0 { "QB" } else { "RB" }.to_string();
                p.class_year = "SR".to_string();
                p.set_stat("points", (200 - i * 10) as f64);
                p.set_stat("passing_yards", (i * 91 % 500) as f64);
                players.push(p);
            }
            upsert_players_batch(pool, &players).await.unwrap();

            // historical seasons know their vote outcomes; the target season
            // does not
            if season < 2022 {
                for i in 0..10usize {
                    crate::db::update_player_votes(
                        pool,
                        &format!("player-{season}-{i}"),
                        season,
                        (100 - i * 10) as i64,
                    )
                    .await
                    .unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn test_predict_season_stores_top_candidates() {
        let pool = test_pool().await;
        seed_seasons(&pool, &[2004, 2005, 2006, 2022]).await;

        let table = FeatureTable::from_rows(&crate::db::fetch_joined_rows(&pool).await.unwrap());
        let space = SearchSpace {
            classifiers: vec![GridEntry::new("decision_tree", &[("max_depth", &[5.0])])],
            regressors: vec![GridEntry::new("random_forest", &[("trees", &[15.0])])],
        };
        let summary = run_grid(&pool, &table, &space).await.unwrap();
        assert_eq!(summary.trained, 1);

        let report = predict_season(&pool, 2022).await.unwrap();
        assert_eq!(report.stored, TOP_CANDIDATES);

        let stored = crate::db::get_predictions_for_season(&pool, 2022).await.unwrap();
        assert_eq!(stored.len(), TOP_CANDIDATES);
        // rows come back ranked by projected votes
        for pair in stored.windows(2) {
            assert!(pair[0].projected_votes >= pair[1].projected_votes);
        }
        assert_eq!(stored[0].model_id, report.model_id);
    }

    #[tokio::test]
    async fn test_predict_without_models_is_a_clear_error() {
        let pool = test_pool().await;
        seed_seasons(&pool, &[2022]).await;
        let err = predict_season(&pool, 2022).await.unwrap_err();
        assert!(err.to_string().contains("no trained models"));
    }
}
