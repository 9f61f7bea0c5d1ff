use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::db;
use crate::models::ModelRecord;
use crate::services::backtest::run_backtest;
use crate::services::estimators::{build_classifier, build_regressor, ParamMap};
use crate::services::features::FeatureTable;

/// One model kind with the hyperparameter values to sweep.
#[derive(Debug, Clone)]
pub struct GridEntry {
    pub kind: String,
    pub grid: BTreeMap<String, Vec<f64>>,
}

impl GridEntry {
    pub fn new(kind: &str, grid: &[(&str, &[f64])]) -> Self {
        Self {
            kind: kind.to_string(),
            grid: grid
                .iter()
                .map(|(name, values)| (name.to_string(), values.to_vec()))
                .collect(),
        }
    }
}

/// The full search space: every classifier entry is crossed with every
/// regressor entry, and every hyperparameter combination within each.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub classifiers: Vec<GridEntry>,
    pub regressors: Vec<GridEntry>,
}

impl SearchSpace {
    pub fn standard() -> Self {
        Self {
            classifiers: vec![
                GridEntry::new("logistic", &[("alpha", &[0.1, 1.0, 10.0]), ("max_iterations", &[200.0])]),
                GridEntry::new("decision_tree", &[("max_depth", &[4.0, 6.0, 8.0])]),
                GridEntry::new("random_forest", &[("trees", &[100.0]), ("max_depth", &[6.0, 10.0])]),
            ],
            regressors: vec![
                GridEntry::new("linear", &[]),
                GridEntry::new("ridge", &[("alpha", &[0.1, 1.0, 10.0])]),
                GridEntry::new("lasso", &[("alpha", &[0.1, 1.0])]),
                GridEntry::new("random_forest", &[("trees", &[100.0]), ("max_depth", &[6.0, 10.0])]),
            ],
        }
    }

    pub fn combination_count(&self) -> usize {
        let count = |entries: &[GridEntry]| -> usize {
            entries.iter().map(|e| expand_grid(&e.grid).len()).sum()
        };
        count(&self.classifiers) * count(&self.regressors)
    }
}

/// Cartesian expansion of one hyperparameter grid. An empty grid yields the
/// single empty combination.
fn expand_grid(grid: &BTreeMap<String, Vec<f64>>) -> Vec<ParamMap> {
    let mut combos = vec![ParamMap::new()];
    for (name, values) in grid {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for &value in values {
                let mut expanded = combo.clone();
                expanded.insert(name.clone(), value);
                next.push(expanded);
            }
        }
        combos = next;
    }
    combos
}

#[derive(Debug, Default)]
pub struct GridSummary {
    pub trained: usize,
    pub failed: usize,
}

/// Run the backtest for every combination and persist one model row per
/// combination as it completes. A combination that fails to fit is logged
/// and skipped; everything already stored stays stored.
pub async fn run_grid(
    pool: &SqlitePool,
    table: &FeatureTable,
    space: &SearchSpace,
) -> Result<GridSummary> {
    let mut summary = GridSummary::default();
    let total = space.combination_count();
    tracing::info!("running model grid: {total} combinations");

    for clf_entry in &space.classifiers {
        for clf_params in expand_grid(&clf_entry.grid) {
            for reg_entry in &space.regressors {
                for reg_params in expand_grid(&reg_entry.grid) {
                    match train_one(
                        pool,
                        table,
                        &clf_entry.kind,
                        clf_params.clone(),
                        &reg_entry.kind,
                        reg_params,
                    )
                    .await
                    {
                        Ok(model_id) => {
                            summary.trained += 1;
                            tracing::info!(
                                model_id = %model_id,
                                clf = %clf_entry.kind,
                                reg = %reg_entry.kind,
                                "stored model {}/{total}",
                                summary.trained + summary.failed
                            );
                        }
                        Err(e) => {
                            summary.failed += 1;
                            tracing::warn!(
                                clf = %clf_entry.kind,
                                reg = %reg_entry.kind,
                                "combination skipped: {e:#}"
                            );
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        trained = summary.trained,
        failed = summary.failed,
        "model grid finished"
    );
    Ok(summary)
}

async fn train_one(
    pool: &SqlitePool,
    table: &FeatureTable,
    clf_kind: &str,
    clf_params: ParamMap,
    reg_kind: &str,
    reg_params: ParamMap,
) -> Result<String> {
    let classifier = build_classifier(clf_kind, clf_params)?;
    let regressor = build_regressor(reg_kind, reg_params)?;

    let outcome = run_backtest(table, classifier.as_ref(), regressor.as_ref())?;

    // the artifact document embeds the training column order so inference
    // can reproduce it exactly
    let clf_artifact = serde_json::to_string(&StoredArtifact {
        columns: &table.columns,
        model: serde_json::to_value(&outcome.classifier)?,
    })?;
    let reg_artifact = serde_json::to_string(&StoredArtifact {
        columns: &table.columns,
        model: serde_json::to_value(&outcome.regressor)?,
    })?;

    let model_id = Uuid::new_v4().to_string();
    let record = ModelRecord {
        model_id: model_id.clone(),
        clf_kind: clf_kind.to_string(),
        reg_kind: reg_kind.to_string(),
        clf_params: serde_json::to_string(&classifier.params())?,
        reg_params: serde_json::to_string(&regressor.params())?,
        clf_artifact,
        reg_artifact,
        metrics: serde_json::to_string(&outcome.metrics)?,
        precision_avg: outcome.metrics.precision_avg,
        recall_avg: outcome.metrics.recall_avg,
        fscore_avg: outcome.metrics.fscore_avg,
        rmse_avg: outcome.metrics.rmse_avg,
        created_at: db::now_rfc3339(),
    };
    db::insert_model(pool, &record).await?;

    Ok(model_id)
}

#[derive(serde::Serialize)]
struct StoredArtifact<'a> {
    columns: &'a [String],
    model: serde_json::Value,
}

/// Owned counterpart of the stored artifact document, used when loading.
#[derive(serde::Deserialize)]
pub struct LoadedArtifact {
    pub columns: Vec<String>,
    pub model: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JoinedRow, PlayerSeason};

    fn synthetic_table() -> FeatureTable {
        let mut rows = Vec::new();
        for season in [2004i64, 2005, 2006] {
            for i in 0..20usize {
                let mut player = PlayerSeason::zeroed(&format!("p-{season}-{i}"), season);
                player.team_abbreviation = "ALABAMA".to_string();
                player.position = if i % 2 == 0 { "QB" } else { "RB" }.to_string();
                player.class_year = "JR".to_string();
                player.votes = if i < 10 { (100 - i * 10) as i64 } else { 0 };
                player.set_stat("points", player.votes as f64 + (season % 7) as f64);
                player.set_stat("passing_yards", (i * 53 % 300) as f64);
                rows.push(JoinedRow {
                    player,
                    conference: "SEC".to_string(),
                    win_percentage: 0.8,
                    points_per_game: 35.0,
                    points_against_per_game: 20.0,
                    strength_of_schedule: 4.0,
                    simple_rating_system: 15.0,
                });
            }
        }
        FeatureTable::from_rows(&rows)
    }

    #[test]
    fn test_expand_grid_is_full_cartesian_product() {
        let entry = GridEntry::new("ridge", &[("alpha", &[0.1, 1.0, 10.0]), ("max_iterations", &[500.0, 1000.0])]);
        let combos = expand_grid(&entry.grid);
        assert_eq!(combos.len(), 6);
        // nothing deduplicated, nothing skipped
        let distinct: std::collections::BTreeSet<String> =
            combos.iter().map(|c| serde_json::to_string(c).unwrap()).collect();
        assert_eq!(distinct.len(), 6);

        assert_eq!(expand_grid(&GridEntry::new("linear", &[]).grid).len(), 1);
    }

    #[test]
    fn test_combination_count() {
        let space = SearchSpace {
            classifiers: vec![
                GridEntry::new("logistic", &[("alpha", &[0.1, 1.0])]),
                GridEntry::new("decision_tree", &[]),
            ],
            regressors: vec![GridEntry::new("ridge", &[("alpha", &[0.1, 1.0, 10.0])])],
        };
        assert_eq!(space.combination_count(), 9);
    }

    #[tokio::test]
    async fn test_grid_persists_one_row_per_combination() {
        let pool = crate::db::test_pool().await;
        let table = synthetic_table();
        let space = SearchSpace {
            classifiers: vec![GridEntry::new("decision_tree", &[("max_depth", &[3.0, 5.0])])],
            regressors: vec![GridEntry::new("random_forest", &[("trees", &[10.0])])],
        };

        let summary = run_grid(&pool, &table, &space).await.unwrap();
        assert_eq!(summary.trained, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(crate::db::count_models(&pool).await.unwrap(), 2);

        let best = crate::db::get_best_model(&pool).await.unwrap().unwrap();
        let loaded: LoadedArtifact = serde_json::from_str(&best.clf_artifact).unwrap();
        assert_eq!(loaded.columns, table.columns);
    }

    #[tokio::test]
    async fn test_failing_combination_is_skipped_not_fatal() {
        let pool = crate::db::test_pool().await;
        let table = synthetic_table();
        let space = SearchSpace {
            classifiers: vec![
                GridEntry::new("decision_tree", &[("max_depth", &[4.0])]),
                GridEntry::new("does_not_exist", &[]),
            ],
            regressors: vec![GridEntry::new("random_forest", &[("trees", &[10.0])])],
        };

        let summary = run_grid(&pool, &table, &space).await.unwrap();
        assert_eq!(summary.trained, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(crate::db::count_models(&pool).await.unwrap(), 1);
    }
}
