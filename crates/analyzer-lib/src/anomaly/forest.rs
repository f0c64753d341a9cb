//! Isolation forest outlier model with a standardizing scaler
//!
//! Points that are isolated by few random axis-aligned splits are outliers.
//! Scores follow the usual convention of `-2^(-E[h(x)] / c(psi))`: values lie
//! in `[-1, 0]` and lower means more anomalous. The decision threshold is the
//! `contamination` quantile of the training scores.

use crate::error::AnalysisError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

/// Euler-Mascheroni constant, used by the average path length estimate
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest hyperparameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees in the ensemble
    pub n_trees: usize,
    /// Subsample size per tree (capped at the training set size)
    pub max_samples: usize,
    /// Expected fraction of outliers in the training data
    pub contamination: f64,
    /// RNG seed so fits are reproducible
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

/// Per-feature standardization (zero mean, unit variance)
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(samples: &[Vec<f64>]) -> Result<Self, AnalysisError> {
        let dim = check_dimensions(samples)?;
        let n = samples.len() as f64;

        let mut mean = vec![0.0; dim];
        for sample in samples {
            for (m, x) in mean.iter_mut().zip(sample) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; dim];
        for sample in samples {
            for ((v, x), m) in var.iter_mut().zip(sample).zip(&mean) {
                *v += (x - m).powi(2);
            }
        }

        // Population std; constant features keep their raw offset from the mean
        let scale = var
            .into_iter()
            .map(|v| {
                let s = (v / n).sqrt();
                if s < f64::EPSILON {
                    1.0
                } else {
                    s
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Standardize one vector; `None` when the dimension does not match
    pub fn transform(&self, sample: &[f64]) -> Option<Vec<f64>> {
        if sample.len() != self.mean.len() {
            return None;
        }
        Some(
            sample
                .iter()
                .zip(&self.mean)
                .zip(&self.scale)
                .map(|((x, m), s)| (x - m) / s)
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(data: &[&[f64]], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: build_node(data, 0, max_depth, rng),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold {
                        left
                    } else {
                        right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

fn build_node(data: &[&[f64]], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if depth >= max_depth || data.len() <= 1 {
        return Node::Leaf { size: data.len() };
    }

    // Only features with spread can split this subset
    let dim = data[0].len();
    let candidates: Vec<(usize, f64, f64)> = (0..dim)
        .filter_map(|f| {
            let (lo, hi) = data.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(x[f]), hi.max(x[f]))
            });
            (hi - lo > f64::EPSILON).then_some((f, lo, hi))
        })
        .collect();

    if candidates.is_empty() {
        return Node::Leaf { size: data.len() };
    }

    let (feature, lo, hi) = candidates[rng.random_range(0..candidates.len())];
    let threshold = rng.random_range(lo..hi);

    let (left, right): (Vec<&[f64]>, Vec<&[f64]>) =
        data.iter().copied().partition(|x| x[feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_node(&left, depth + 1, max_depth, rng)),
        right: Box::new(build_node(&right, depth + 1, max_depth, rng)),
    }
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Normalizer `c(psi)` for the subsample size used per tree
    normalizer: f64,
    /// Scores below this are outliers
    offset: f64,
    dimension: usize,
}

impl IsolationForest {
    pub fn fit(samples: &[Vec<f64>], config: &ForestConfig) -> Result<Self, AnalysisError> {
        let dimension = check_dimensions(samples)?;
        if config.n_trees == 0 {
            return Err(AnalysisError::ModelFit("n_trees must be positive".to_string()));
        }
        if !(0.0..=0.5).contains(&config.contamination) {
            return Err(AnalysisError::ModelFit(format!(
                "contamination {} outside [0, 0.5]",
                config.contamination
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let n = samples.len();
        let psi = config.max_samples.clamp(1, n);
        let max_depth = (psi as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..config.n_trees)
            .map(|_| {
                let subset: Vec<&[f64]> = rand::seq::index::sample(&mut rng, n, psi)
                    .into_iter()
                    .map(|i| samples[i].as_slice())
                    .collect();
                IsolationTree::build(&subset, max_depth, &mut rng)
            })
            .collect();

        let normalizer = average_path_length(psi).max(f64::EPSILON);
        let mut forest = Self {
            trees,
            normalizer,
            offset: 0.0,
            dimension,
        };

        let mut training_scores: Vec<f64> = samples.iter().map(|s| forest.raw_score(s)).collect();
        forest.offset = percentile(&mut training_scores, config.contamination * 100.0);
        Ok(forest)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Anomaly score in `[-1, 0]`; `None` on dimension mismatch
    pub fn score(&self, sample: &[f64]) -> Option<f64> {
        (sample.len() == self.dimension).then(|| self.raw_score(sample))
    }

    /// Whether the sample falls on the outlier side of the fitted threshold
    pub fn is_outlier(&self, score: f64) -> bool {
        score < self.offset
    }

    fn raw_score(&self, sample: &[f64]) -> f64 {
        let mean_path =
            self.trees.iter().map(|t| t.path_length(sample)).sum::<f64>() / self.trees.len() as f64;
        -(2f64.powf(-mean_path / self.normalizer))
    }
}

fn check_dimensions(samples: &[Vec<f64>]) -> Result<usize, AnalysisError> {
    let first = samples
        .first()
        .ok_or_else(|| AnalysisError::ModelFit("no training samples".to_string()))?;
    let dim = first.len();
    if dim == 0 {
        return Err(AnalysisError::ModelFit("empty feature vectors".to_string()));
    }
    if samples.iter().any(|s| s.len() != dim) {
        return Err(AnalysisError::ModelFit(
            "training samples have mixed dimensions".to_string(),
        ));
    }
    Ok(dim)
}

/// Linear-interpolated percentile; sorts `values` in place
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let a = (i % 7) as f64 * 0.01;
                let b = (i % 5) as f64 * 0.01;
                vec![1.0 + a, 2.0 - b]
            })
            .collect()
    }

    #[test]
    fn test_scaler_standardizes() {
        let samples = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&samples).unwrap();
        assert_eq!(scaler.transform(&[1.0, 5.0]).unwrap(), vec![-1.0, 0.0]);
        assert_eq!(scaler.transform(&[3.0, 6.0]).unwrap(), vec![1.0, 1.0]);
        assert!(scaler.transform(&[1.0]).is_none());
    }

    #[test]
    fn test_outlier_scores_lower() {
        let samples = cluster(100);
        let forest = IsolationForest::fit(&samples, &ForestConfig::default()).unwrap();

        let inlier = forest.score(&[1.03, 1.98]).unwrap();
        let outlier = forest.score(&[5.0, -3.0]).unwrap();

        assert!(outlier < inlier, "outlier {outlier} inlier {inlier}");
        assert!((-1.0..=0.0).contains(&outlier));
        assert!(!forest.is_outlier(inlier));
    }

    #[test]
    fn test_planted_outliers_flagged() {
        let mut samples = cluster(95);
        let planted = [
            vec![10.0, 10.0],
            vec![-10.0, 5.0],
            vec![10.0, -10.0],
            vec![-8.0, -8.0],
            vec![0.0, 15.0],
        ];
        samples.extend(planted.iter().cloned());

        let forest = IsolationForest::fit(&samples, &ForestConfig::default()).unwrap();
        for p in &planted {
            let score = forest.score(p).unwrap();
            assert!(forest.is_outlier(score), "{p:?} scored {score}");
        }
    }

    #[test]
    fn test_contamination_calibrates_threshold() {
        let samples = cluster(100);
        let forest = IsolationForest::fit(&samples, &ForestConfig::default()).unwrap();
        let flagged = samples
            .iter()
            .filter(|s| forest.is_outlier(forest.score(s).unwrap()))
            .count();
        // Roughly 10% of training points sit below the threshold (ties allowed)
        assert!(flagged <= 10, "flagged {flagged}");
    }

    #[test]
    fn test_fit_is_deterministic() {
        let samples = cluster(60);
        let a = IsolationForest::fit(&samples, &ForestConfig::default()).unwrap();
        let b = IsolationForest::fit(&samples, &ForestConfig::default()).unwrap();
        assert_eq!(a.score(&[2.0, 2.0]), b.score(&[2.0, 2.0]));
        assert_eq!(a.offset(), b.offset());
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert!(IsolationForest::fit(&[], &ForestConfig::default()).is_err());
        let mixed = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(IsolationForest::fit(&mixed, &ForestConfig::default()).is_err());
        assert!(StandardScaler::fit(&mixed).is_err());
    }

    #[test]
    fn test_dimension_mismatch_scores_none() {
        let forest = IsolationForest::fit(&cluster(20), &ForestConfig::default()).unwrap();
        assert!(forest.score(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(50));
    }

    #[test]
    fn test_percentile_interpolates() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut v, 50.0), 3.0);
        assert_eq!(percentile(&mut v, 0.0), 1.0);
        assert_eq!(percentile(&mut v, 25.0), 2.0);
    }
}
