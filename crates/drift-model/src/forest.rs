//! Isolation forest.
//!
//! Anomalies are few and different, so random axis-aligned splits isolate
//! them in fewer steps than normal points. Each tree is grown on a random
//! sub-sample up to `ceil(log2(max_samples))` levels; a point's score is
//! derived from its average path length across trees, normalised by the
//! expected path length of an unsuccessful BST search, `c(max_samples)`.
//!
//! Sign conventions:
//!
//! - `score_samples(x) = -2^(-E[h(x)] / c(max_samples))`, in `[-1, 0)`;
//!   lower is more anomalous.
//! - `decision_function(x) = score_samples(x) - offset`; negative means
//!   outlier. `offset` is the contamination percentile of the training
//!   scores, or −0.5 for `contamination = "auto"`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use drift_core::N_FEATURES;
use drift_core::config::{Contamination, IsolationForestConfig, MaxSamples};

use crate::error::ModelError;

/// Sub-sample cap used by `max_samples = "auto"`.
const AUTO_MAX_SAMPLES: usize = 256;

/// Euler–Mascheroni constant, for the harmonic-number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// A single isolation tree stored as a flat node array; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow<R: Rng + ?Sized>(
        data: &[[f64; N_FEATURES]],
        sample: Vec<usize>,
        height_limit: usize,
        rng: &mut R,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(data, sample, 0, height_limit, rng);
        tree
    }

    fn grow_node<R: Rng + ?Sized>(
        &mut self,
        data: &[[f64; N_FEATURES]],
        sample: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut R,
    ) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { size: sample.len() });
        if depth >= height_limit || sample.len() <= 1 {
            return slot;
        }

        // Only features that still vary within this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..N_FEATURES)
            .filter_map(|f| {
                let (lo, hi) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(data[i][f]), hi.max(data[i][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return slot;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        // Threshold in [lo, hi) with `<=` going left keeps both sides non-empty.
        let threshold = rng.gen_range(lo..hi);
        let (left_sample, right_sample): (Vec<usize>, Vec<usize>) =
            sample.into_iter().partition(|&i| data[i][feature] <= threshold);

        let left = self.grow_node(data, left_sample, depth + 1, height_limit, rng);
        let right = self.grow_node(data, right_sample, depth + 1, height_limit, rng);
        self.nodes[slot] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        slot
    }

    /// Depth at which `x` lands, plus the expected remaining depth of the
    /// unsplit points sharing its leaf.
    fn path_length(&self, x: &[f64; N_FEATURES]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Some(Node::Leaf { size }) => return depth + average_path_length(*size),
                None => return depth,
            }
        }
    }

    /// Structural sanity check used when loading an artifact.
    fn is_well_formed(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, node)| match node {
                // Children always follow their parent in the array.
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    *feature < N_FEATURES
                        && threshold.is_finite()
                        && *left > i
                        && *right > i
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
                Node::Leaf { .. } => true,
            })
    }
}

/// A fitted isolation forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    max_samples: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit a forest on `data`.
    pub fn fit<R: Rng + ?Sized>(
        data: &[[f64; N_FEATURES]],
        params: &IsolationForestConfig,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        if data.len() < 2 {
            return Err(ModelError::Fit(format!(
                "need at least 2 samples, got {}",
                data.len()
            )));
        }
        if params.n_estimators == 0 {
            return Err(ModelError::Fit("n_estimators must be positive".to_string()));
        }
        if data.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::Fit("training data must be finite".to_string()));
        }

        let max_samples = match params.max_samples {
            MaxSamples::Auto(_) => AUTO_MAX_SAMPLES.min(data.len()),
            MaxSamples::Count(n) => n.clamp(2, data.len()),
        };
        let height_limit = (max_samples as f64).log2().ceil() as usize;

        let trees = (0..params.n_estimators)
            .map(|_| {
                let sample = rand::seq::index::sample(rng, data.len(), max_samples).into_vec();
                IsolationTree::grow(data, sample, height_limit, rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            max_samples,
            offset: -0.5,
        };

        if let Contamination::Fraction(c) = params.contamination {
            let mut scores: Vec<f64> = data.iter().map(|x| forest.score_samples(x)).collect();
            scores.sort_by(f64::total_cmp);
            forest.offset = percentile(&scores, c);
        }

        debug!(
            trees = forest.trees.len(),
            max_samples,
            height_limit,
            offset = forest.offset,
            "isolation forest fitted"
        );
        Ok(forest)
    }

    /// Raw isolation score in `[-1, 0)`; lower is more anomalous.
    pub fn score_samples(&self, x: &[f64; N_FEATURES]) -> f64 {
        let mean_depth = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
            / self.trees.len() as f64;
        -(2f64).powf(-mean_depth / average_path_length(self.max_samples))
    }

    /// Score shifted by the fitted offset; negative means outlier.
    pub fn decision_function(&self, x: &[f64; N_FEATURES]) -> f64 {
        self.score_samples(x) - self.offset
    }

    pub fn is_outlier(&self, x: &[f64; N_FEATURES]) -> bool {
        self.decision_function(x) < 0.0
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Reject forests that would produce meaningless scores.
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.max_samples < 2 {
            return Err(format!("max_samples must be at least 2, got {}", self.max_samples));
        }
        if !self.offset.is_finite() {
            return Err("offset is not finite".to_string());
        }
        if let Some(i) = self.trees.iter().position(|t| !t.is_well_formed()) {
            return Err(format!("tree {i} is malformed"));
        }
        Ok(())
    }
}

/// Expected path length of an unsuccessful search in a BST of `n` nodes.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile `q` (0..=1) of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
