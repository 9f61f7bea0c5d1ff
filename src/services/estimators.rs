use anyhow::{anyhow, bail, Result};
use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use linfa_linear::LinearRegression;
use linfa_logistic::LogisticRegression;
use ndarray::{Array1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Hyperparameters, name -> value. Integer-valued parameters ride as f64
/// and are truncated where consumed.
pub type ParamMap = BTreeMap<String, f64>;

fn param(params: &ParamMap, name: &str, default: f64) -> f64 {
    params.get(name).copied().unwrap_or(default)
}

/// A classifier candidate. `fit` returns a self-contained artifact; the
/// estimator object itself only carries hyperparameters, so refitting it on
/// a new slice never leaks state from an earlier year.
pub trait Classifier: Send + Sync {
    fn kind(&self) -> &'static str;
    fn params(&self) -> ParamMap;
    fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<ClassifierArtifact>;
}

pub trait Regressor: Send + Sync {
    fn kind(&self) -> &'static str;
    fn params(&self) -> ParamMap;
    fn fit(&self, x: ArrayView2<f64>, y: &[f64]) -> Result<RegressorArtifact>;
}

// ── artifacts ───────────────────────────────────────────────────────────────

/// Fitted classifier state, serializable as JSON. Scoring lives here so
/// inference needs no live estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClassifierArtifact {
    Logistic { weights: Vec<f64>, intercept: f64 },
    Tree { tree: TreeNode },
    Forest { trees: Vec<TreeNode> },
}

impl ClassifierArtifact {
    /// Positive-class probability per row.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        match self {
            Self::Logistic { weights, intercept } => (0..x.nrows())
                .map(|i| sigmoid(dot_row(x, i, weights) + intercept))
                .collect(),
            Self::Tree { tree } => (0..x.nrows()).map(|i| tree.predict_row(x, i)).collect(),
            Self::Forest { trees } => forest_predict(trees, x),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegressorArtifact {
    Linear { weights: Vec<f64>, intercept: f64 },
    Forest { trees: Vec<TreeNode> },
}

impl RegressorArtifact {
    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<f64> {
        match self {
            Self::Linear { weights, intercept } => (0..x.nrows())
                .map(|i| dot_row(x, i, weights) + intercept)
                .collect(),
            Self::Forest { trees } => forest_predict(trees, x),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn dot_row(x: ArrayView2<f64>, row: usize, weights: &[f64]) -> f64 {
    weights
        .iter()
        .enumerate()
        .map(|(j, w)| w * x[(row, j)])
        .sum()
}

fn forest_predict(trees: &[TreeNode], x: ArrayView2<f64>) -> Vec<f64> {
    (0..x.nrows())
        .map(|i| {
            trees.iter().map(|t| t.predict_row(x, i)).sum::<f64>() / trees.len().max(1) as f64
        })
        .collect()
}

// ── linear-family members (linfa) ───────────────────────────────────────────

pub struct LogisticClassifier {
    params: ParamMap,
}

impl LogisticClassifier {
    pub fn new(params: ParamMap) -> Self {
        Self { params }
    }
}

impl Classifier for LogisticClassifier {
    fn kind(&self) -> &'static str {
        "logistic"
    }

    fn params(&self) -> ParamMap {
        self.params.clone()
    }

    fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<ClassifierArtifact> {
        if x.nrows() == 0 {
            bail!("cannot fit a classifier on an empty training set");
        }
        let dataset = Dataset::new(x.to_owned(), Array1::from_vec(y.to_vec()));
        // linfa's binary logistic regression treats the larger of the two
        // labels as the positive class, so these coefficients score P(1).
        let model = LogisticRegression::default()
            .alpha(param(&self.params, "alpha", 1.0))
            .max_iterations(param(&self.params, "max_iterations", 100.0) as u64)
            .fit(&dataset)
            .map_err(|e| anyhow!("logistic fit: {e}"))?;

        Ok(ClassifierArtifact::Logistic {
            weights: model.params().to_vec(),
            intercept: model.intercept(),
        })
    }
}

pub struct LinearRegressor {
    params: ParamMap,
}

impl LinearRegressor {
    pub fn new(params: ParamMap) -> Self {
        Self { params }
    }
}

impl Regressor for LinearRegressor {
    fn kind(&self) -> &'static str {
        "linear"
    }

    fn params(&self) -> ParamMap {
        self.params.clone()
    }

    fn fit(&self, x: ArrayView2<f64>, y: &[f64]) -> Result<RegressorArtifact> {
        if x.nrows() == 0 {
            bail!("cannot fit a regressor on an empty training set");
        }
        let dataset = Dataset::new(x.to_owned(), Array1::from_vec(y.to_vec()));
        let model = LinearRegression::new()
            .fit(&dataset)
            .map_err(|e| anyhow!("linear fit: {e}"))?;

        Ok(RegressorArtifact::Linear {
            weights: model.params().to_vec(),
            intercept: model.intercept(),
        })
    }
}

/// Ridge and lasso share the elastic-net solver; the l1 ratio picks the
/// penalty shape.
pub struct PenalizedRegressor {
    kind: &'static str,
    l1_ratio: f64,
    params: ParamMap,
}

impl PenalizedRegressor {
    pub fn ridge(params: ParamMap) -> Self {
        Self { kind: "ridge", l1_ratio: 0.0, params }
    }

    pub fn lasso(params: ParamMap) -> Self {
        Self { kind: "lasso", l1_ratio: 1.0, params }
    }
}

impl Regressor for PenalizedRegressor {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn params(&self) -> ParamMap {
        self.params.clone()
    }

    fn fit(&self, x: ArrayView2<f64>, y: &[f64]) -> Result<RegressorArtifact> {
        if x.nrows() == 0 {
            bail!("cannot fit a regressor on an empty training set");
        }
        let dataset = Dataset::new(x.to_owned(), Array1::from_vec(y.to_vec()));
        let model = ElasticNet::params()
            .penalty(param(&self.params, "alpha", 1.0))
            .l1_ratio(self.l1_ratio)
            .max_iterations(param(&self.params, "max_iterations", 1000.0) as u32)
            .fit(&dataset)
            .map_err(|e| anyhow!("{} fit: {e}", self.kind))?;

        Ok(RegressorArtifact::Linear {
            weights: model.hyperplane().to_vec(),
            intercept: model.intercept(),
        })
    }
}

// ── tree-family members ─────────────────────────────────────────────────────

/// CART node. Leaves store the mean target of their training rows, which is
/// the positive-class fraction when the targets are 0/1 labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict_row(&self, x: ArrayView2<f64>, row: usize) -> f64 {
        match self {
            Self::Leaf { value } => *value,
            Self::Split { feature, threshold, left, right } => {
                if x[(row, *feature)] <= *threshold {
                    left.predict_row(x, row)
                } else {
                    right.predict_row(x, row)
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
struct TreeConfig {
    max_depth: usize,
    min_leaf: usize,
    /// Number of features examined per split; None examines all of them.
    features_per_split: Option<usize>,
}

fn mean_of(y: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
}

/// Variance-reduction splitter. On 0/1 labels the split ordering matches
/// gini impurity, so one splitter serves classification and regression.
fn grow_tree(
    x: ArrayView2<f64>,
    y: &[f64],
    rows: &[usize],
    depth: usize,
    config: TreeConfig,
    rng: &mut StdRng,
) -> TreeNode {
    let leaf = TreeNode::Leaf { value: mean_of(y, rows) };
    if depth >= config.max_depth || rows.len() < config.min_leaf * 2 {
        return leaf;
    }
    let first = y[rows[0]];
    if rows.iter().all(|&i| y[i] == first) {
        return leaf;
    }

    let all_features: Vec<usize> = (0..x.ncols()).collect();
    let features: Vec<usize> = match config.features_per_split {
        Some(k) => all_features.choose_multiple(rng, k.min(all_features.len())).copied().collect(),
        None => all_features,
    };

    // best = (residual sum of squares after split, feature, threshold)
    let mut best: Option<(f64, usize, f64)> = None;
    for &feature in &features {
        let mut pairs: Vec<(f64, f64)> = rows.iter().map(|&i| (x[(i, feature)], y[i])).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for split in 1..pairs.len() {
            left_sum += pairs[split - 1].1;
            left_sq += pairs[split - 1].1 * pairs[split - 1].1;
            if pairs[split].0 == pairs[split - 1].0 {
                continue;
            }
            if split < config.min_leaf || pairs.len() - split < config.min_leaf {
                continue;
            }
            let left_n = split as f64;
            let right_n = (pairs.len() - split) as f64;
            let left_sse = left_sq - left_sum * left_sum / left_n;
            let right_sum = total_sum - left_sum;
            let right_sse = (total_sq - left_sq) - right_sum * right_sum / right_n;
            let score = left_sse + right_sse;
            if best.map_or(true, |(s, _, _)| score < s) {
                let threshold = (pairs[split - 1].0 + pairs[split].0) / 2.0;
                best = Some((score, feature, threshold));
            }
        }
    }

    let Some((_, feature, threshold)) = best else {
        return leaf;
    };

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.iter().copied().partition(|&i| x[(i, feature)] <= threshold);
    if left_rows.is_empty() || right_rows.is_empty() {
        return leaf;
    }

    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(grow_tree(x, y, &left_rows, depth + 1, config, rng)),
        right: Box::new(grow_tree(x, y, &right_rows, depth + 1, config, rng)),
    }
}

fn grow_forest(
    x: ArrayView2<f64>,
    y: &[f64],
    params: &ParamMap,
) -> Result<Vec<TreeNode>> {
    if x.nrows() == 0 {
        bail!("cannot fit a forest on an empty training set");
    }
    let n_trees = param(params, "trees", 100.0) as usize;
    let config = TreeConfig {
        max_depth: param(params, "max_depth", 8.0) as usize,
        min_leaf: (param(params, "min_leaf", 2.0) as usize).max(1),
        features_per_split: Some((x.ncols() as f64).sqrt().ceil() as usize),
    };
    let mut rng = StdRng::seed_from_u64(param(params, "seed", 42.0) as u64);

    let n = x.nrows();
    let mut trees = Vec::with_capacity(n_trees);
    for _ in 0..n_trees {
        let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        trees.push(grow_tree(x, y, &sample, 0, config, &mut rng));
    }
    Ok(trees)
}

pub struct TreeClassifier {
    params: ParamMap,
}

impl TreeClassifier {
    pub fn new(params: ParamMap) -> Self {
        Self { params }
    }
}

impl Classifier for TreeClassifier {
    fn kind(&self) -> &'static str {
        "decision_tree"
    }

    fn params(&self) -> ParamMap {
        self.params.clone()
    }

    fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<ClassifierArtifact> {
        if x.nrows() == 0 {
            bail!("cannot fit a classifier on an empty training set");
        }
        let labels: Vec<f64> = y.iter().map(|&v| v as f64).collect();
        let config = TreeConfig {
            max_depth: param(&self.params, "max_depth", 6.0) as usize,
            min_leaf: (param(&self.params, "min_leaf", 2.0) as usize).max(1),
            features_per_split: None,
        };
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut rng = StdRng::seed_from_u64(param(&self.params, "seed", 42.0) as u64);
        Ok(ClassifierArtifact::Tree {
            tree: grow_tree(x, &labels, &rows, 0, config, &mut rng),
        })
    }
}

pub struct ForestClassifier {
    params: ParamMap,
}

impl ForestClassifier {
    pub fn new(params: ParamMap) -> Self {
        Self { params }
    }
}

impl Classifier for ForestClassifier {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn params(&self) -> ParamMap {
        self.params.clone()
    }

    fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<ClassifierArtifact> {
        let labels: Vec<f64> = y.iter().map(|&v| v as f64).collect();
        Ok(ClassifierArtifact::Forest {
            trees: grow_forest(x, &labels, &self.params)?,
        })
    }
}

pub struct ForestRegressor {
    params: ParamMap,
}

impl ForestRegressor {
    pub fn new(params: ParamMap) -> Self {
        Self { params }
    }
}

impl Regressor for ForestRegressor {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn params(&self) -> ParamMap {
        self.params.clone()
    }

    fn fit(&self, x: ArrayView2<f64>, y: &[f64]) -> Result<RegressorArtifact> {
        Ok(RegressorArtifact::Forest {
            trees: grow_forest(x, y, &self.params)?,
        })
    }
}

// ── registry ────────────────────────────────────────────────────────────────

pub type ClassifierCtor = fn(ParamMap) -> Box<dyn Classifier>;
pub type RegressorCtor = fn(ParamMap) -> Box<dyn Regressor>;

/// Every classifier kind the grid may instantiate.
pub fn classifier_registry() -> Vec<(&'static str, ClassifierCtor)> {
    vec![
        ("logistic", |p| Box::new(LogisticClassifier::new(p))),
        ("decision_tree", |p| Box::new(TreeClassifier::new(p))),
        ("random_forest", |p| Box::new(ForestClassifier::new(p))),
    ]
}

pub fn regressor_registry() -> Vec<(&'static str, RegressorCtor)> {
    vec![
        ("linear", |p| Box::new(LinearRegressor::new(p))),
        ("ridge", |p| Box::new(PenalizedRegressor::ridge(p))),
        ("lasso", |p| Box::new(PenalizedRegressor::lasso(p))),
        ("random_forest", |p| Box::new(ForestRegressor::new(p))),
    ]
}

pub fn build_classifier(kind: &str, params: ParamMap) -> Result<Box<dyn Classifier>> {
    classifier_registry()
        .into_iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, ctor)| ctor(params))
        .ok_or_else(|| anyhow!("unknown classifier kind: {kind}"))
}

pub fn build_regressor(kind: &str, params: ParamMap) -> Result<Box<dyn Regressor>> {
    regressor_registry()
        .into_iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, ctor)| ctor(params))
        .ok_or_else(|| anyhow!("unknown regressor kind: {kind}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn separable_data() -> (Array2<f64>, Vec<usize>) {
        // column 0 separates the classes cleanly, column 1 is noise
        let mut x = Array2::zeros((20, 2));
        let mut y = Vec::new();
        for i in 0..20 {
            let positive = i < 5;
            x[(i, 0)] = if positive { 10.0 + i as f64 } else { i as f64 / 10.0 };
            x[(i, 1)] = (i % 3) as f64;
            y.push(usize::from(positive));
        }
        (x, y)
    }

    #[test]
    fn test_logistic_ranks_separable_classes() {
        let (x, y) = separable_data();
        let clf = LogisticClassifier::new(ParamMap::new());
        let artifact = clf.fit(x.view(), &y).unwrap();
        let probs = artifact.predict_proba(x.view());
        let pos_min = probs[..5].iter().cloned().fold(f64::MAX, f64::min);
        let neg_max = probs[5..].iter().cloned().fold(f64::MIN, f64::max);
        assert!(
            pos_min > neg_max,
            "positives ({pos_min}) should outrank negatives ({neg_max})"
        );
    }

    #[test]
    fn test_tree_and_forest_separate_classes() {
        let (x, y) = separable_data();
        for clf in [
            build_classifier("decision_tree", ParamMap::new()).unwrap(),
            build_classifier("random_forest", ParamMap::from([("trees".to_string(), 25.0)])).unwrap(),
        ] {
            let artifact = clf.fit(x.view(), &y).unwrap();
            let probs = artifact.predict_proba(x.view());
            let pos_min = probs[..5].iter().cloned().fold(f64::MAX, f64::min);
            let neg_max = probs[5..].iter().cloned().fold(f64::MIN, f64::max);
            assert!(pos_min > neg_max, "{} failed to separate", clf.kind());
        }
    }

    #[test]
    fn test_linear_regressor_recovers_line() {
        let mut x = Array2::zeros((10, 1));
        let mut y = Vec::new();
        for i in 0..10 {
            x[(i, 0)] = i as f64;
            y.push(3.0 * i as f64 + 7.0);
        }
        let reg = LinearRegressor::new(ParamMap::new());
        let artifact = reg.fit(x.view(), &y).unwrap();
        let predictions = artifact.predict(x.view());
        for (pred, actual) in predictions.iter().zip(&y) {
            assert!((pred - actual).abs() < 1e-6);
        }
    }

    #[test]
    fn test_forest_is_deterministic_for_fixed_seed() {
        let (x, y) = separable_data();
        let labels: Vec<f64> = y.iter().map(|&v| v as f64).collect();
        let params = ParamMap::from([("trees".to_string(), 10.0), ("seed".to_string(), 7.0)]);
        let a = grow_forest(x.view(), &labels, &params).unwrap();
        let b = grow_forest(x.view(), &labels, &params).unwrap();
        let xa = serde_json::to_string(&a).unwrap();
        let xb = serde_json::to_string(&b).unwrap();
        assert_eq!(xa, xb);
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let artifact = ClassifierArtifact::Logistic {
            weights: vec![0.5, -1.25],
            intercept: 0.75,
        };
        let json = serde_json::to_string(&artifact).unwrap();
        let back: ClassifierArtifact = serde_json::from_str(&json).unwrap();
        let x = Array2::from_shape_vec((1, 2), vec![2.0, 1.0]).unwrap();
        assert_eq!(artifact.predict_proba(x.view()), back.predict_proba(x.view()));
    }

    #[test]
    fn test_empty_training_set_is_an_error() {
        let x = Array2::<f64>::zeros((0, 3));
        let clf = build_classifier("logistic", ParamMap::new()).unwrap();
        assert!(clf.fit(x.view(), &[]).is_err());
        let reg = build_regressor("linear", ParamMap::new()).unwrap();
        assert!(reg.fit(x.view(), &[]).is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(build_classifier("svm", ParamMap::new()).is_err());
        assert!(build_regressor("poisson", ParamMap::new()).is_err());
    }
}
