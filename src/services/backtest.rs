use anyhow::{bail, Context, Result};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::services::estimators::{Classifier, ClassifierArtifact, Regressor, RegressorArtifact};
use crate::services::features::FeatureTable;
use crate::utils::{macro_precision_recall_fscore, root_mean_squared_error, top_k_indices};

/// Evaluation years: every season with a complete vote table after the
/// earliest training window.
pub const FIRST_TEST_SEASON: i64 = 2006;
pub const LAST_TEST_SEASON: i64 = 2021;

/// How many players per season are called as vote-getters.
pub const TOP_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct YearMetrics {
    pub precision: f64,
    pub recall: f64,
    pub fscore: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub per_year: BTreeMap<i64, YearMetrics>,
    pub precision_avg: f64,
    pub recall_avg: f64,
    pub fscore_avg: f64,
    pub rmse_avg: f64,
}

impl BacktestMetrics {
    /// Overall scores are the arithmetic means of the per-year values.
    pub fn from_per_year(per_year: BTreeMap<i64, YearMetrics>) -> Self {
        let column = |f: fn(&YearMetrics) -> f64| -> f64 {
            per_year.values().map(f).mean()
        };
        Self {
            precision_avg: column(|m| m.precision),
            recall_avg: column(|m| m.recall),
            fscore_avg: column(|m| m.fscore),
            rmse_avg: column(|m| m.rmse),
            per_year,
        }
    }
}

/// Result of one backtest: the metrics plus the pair fit on the final
/// iteration's training slice. The pair is deliberately not refit on the
/// full dataset afterwards, so the stored metrics describe the same
/// artifacts they are stored with.
pub struct BacktestOutcome {
    pub classifier: ClassifierArtifact,
    pub regressor: RegressorArtifact,
    pub metrics: BacktestMetrics,
}

pub fn run_backtest(
    table: &FeatureTable,
    classifier: &dyn Classifier,
    regressor: &dyn Regressor,
) -> Result<BacktestOutcome> {
    run_backtest_over(table, classifier, regressor, FIRST_TEST_SEASON..=LAST_TEST_SEASON)
}

/// Forward-chaining evaluation: for each year, train strictly on the past,
/// score the held-out year, call the top ten probabilities positive, then
/// regress vote counts over the predicted positives.
pub fn run_backtest_over(
    table: &FeatureTable,
    classifier: &dyn Classifier,
    regressor: &dyn Regressor,
    years: RangeInclusive<i64>,
) -> Result<BacktestOutcome> {
    let mut per_year = BTreeMap::new();
    let mut last_pair: Option<(ClassifierArtifact, RegressorArtifact)> = None;

    for year in years {
        let (train_idx, test_idx) = table.season_partition(year);
        if test_idx.is_empty() {
            tracing::warn!("no test rows for {year}, skipping evaluation year");
            continue;
        }

        let x_train = table.x.select(Axis(0), &train_idx);
        let y_train: Vec<usize> = train_idx.iter().map(|&i| table.got_votes[i]).collect();
        let x_test = table.x.select(Axis(0), &test_idx);
        let y_test: Vec<usize> = test_idx.iter().map(|&i| table.got_votes[i]).collect();

        let clf_artifact = classifier
            .fit(x_train.view(), &y_train)
            .with_context(|| format!("classifier fit for test year {year}"))?;

        // call the ten strongest scores positive; with fewer than ten test
        // rows everything is called positive
        let probabilities = clf_artifact.predict_proba(x_test.view());
        let selected = top_k_indices(&probabilities, TOP_CANDIDATES);
        let mut y_pred = vec![0usize; test_idx.len()];
        for &i in &selected {
            y_pred[i] = 1;
        }

        let (precision, recall, fscore) = macro_precision_recall_fscore(&y_test, &y_pred);

        // vote-count regression, trained on the past's actual vote-getters
        let voters: Vec<usize> = train_idx
            .iter()
            .copied()
            .filter(|&i| table.votes[i] > 0.0)
            .collect();
        let x_voters = table.x.select(Axis(0), &voters);
        let y_voters: Vec<f64> = voters.iter().map(|&i| table.votes[i]).collect();

        let reg_artifact = regressor
            .fit(x_voters.view(), &y_voters)
            .with_context(|| format!("regressor fit for test year {year}"))?;

        let positive_rows: Vec<usize> = selected.iter().map(|&i| test_idx[i]).collect();
        let x_positive = table.x.select(Axis(0), &positive_rows);
        let actual_votes: Vec<f64> = positive_rows.iter().map(|&i| table.votes[i]).collect();
        let predicted_votes = reg_artifact.predict(x_positive.view());
        let rmse = root_mean_squared_error(&actual_votes, &predicted_votes);

        tracing::info!(
            year,
            precision,
            recall,
            fscore,
            rmse,
            "backtest year complete"
        );

        per_year.insert(year, YearMetrics { precision, recall, fscore, rmse });
        last_pair = Some((clf_artifact, reg_artifact));
    }

    let Some((classifier, regressor)) = last_pair else {
        bail!("no evaluation year had any test rows");
    };

    Ok(BacktestOutcome {
        classifier,
        regressor,
        metrics: BacktestMetrics::from_per_year(per_year),
    })
}
