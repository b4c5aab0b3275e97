/*! Pairwise intensity correlation between features.

Every pair of features is compared over the samples where both have an
intensity. A pair becomes a [`CorrelationEdge`] when its coefficient, the
coefficient's two-sided significance and the two features' retention time
difference all pass their thresholds.

The dense matrices are `O(F^2)` in the number of features.
*/
use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;
use tracing::debug;

use crate::feature::FeatureTable;
use crate::matcher::round_to;

/// An error that might occur when configuring correlation analysis
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelationError {
    #[error("Unknown correlation method {0:?}, expected \"pearson\" or \"spearman\"")]
    UnknownMethod(String),
    #[error("The correlation threshold {name} = {value} is out of range")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("At least 3 paired observations are needed for a significance test, not {0}")]
    InvalidMinPeriods(usize),
}

/// The correlation coefficient to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    /// Pearson's coefficient of the per-feature ranks
    Spearman,
}

impl Display for CorrelationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationMethod::Pearson => write!(f, "pearson"),
            CorrelationMethod::Spearman => write!(f, "spearman"),
        }
    }
}

impl FromStr for CorrelationMethod {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(Self::Pearson),
            "spearman" => Ok(Self::Spearman),
            _ => Err(CorrelationError::UnknownMethod(s.to_string())),
        }
    }
}

/// Thresholds and options controlling which feature pairs are reported
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationParams {
    /// Retention time differences must be strictly below this
    pub thres_rt: f64,
    /// Coefficients must be strictly above this, in magnitude unless `positive`
    pub thres_corr: f64,
    /// p-values must be strictly below this
    pub thres_pval: f64,
    pub method: CorrelationMethod,
    /// Only keep positively correlated pairs
    pub positive: bool,
    /// The minimum number of paired observations for a coefficient to be defined
    pub min_periods: usize,
}

impl Default for CorrelationParams {
    fn default() -> Self {
        Self {
            thres_rt: 1.0,
            thres_corr: 0.5,
            thres_pval: 0.05,
            method: CorrelationMethod::Pearson,
            positive: false,
            min_periods: 4,
        }
    }
}

impl CorrelationParams {
    pub fn validate(&self) -> Result<(), CorrelationError> {
        if !(self.thres_rt >= 0.0) {
            return Err(CorrelationError::InvalidThreshold {
                name: "thres_rt",
                value: self.thres_rt,
            });
        }
        if !(0.0..1.0).contains(&self.thres_corr) {
            return Err(CorrelationError::InvalidThreshold {
                name: "thres_corr",
                value: self.thres_corr,
            });
        }
        if !(self.thres_pval > 0.0 && self.thres_pval <= 1.0) {
            return Err(CorrelationError::InvalidThreshold {
                name: "thres_pval",
                value: self.thres_pval,
            });
        }
        if self.min_periods < 3 {
            return Err(CorrelationError::InvalidMinPeriods(self.min_periods));
        }
        Ok(())
    }

    fn passes(&self, r_value: f64, p_value: f64, rt_diff: f64) -> bool {
        let r_ok = if self.positive {
            r_value > self.thres_corr
        } else {
            r_value.abs() > self.thres_corr
        };
        r_ok && p_value < self.thres_pval && rt_diff.abs() < self.thres_rt
    }
}

/// A dense, symmetric, square matrix with undefined entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricMatrix {
    size: usize,
    values: Vec<f64>,
}

impl SymmetricMatrix {
    /// A `size` x `size` matrix with every entry undefined
    pub fn new(size: usize) -> Self {
        Self {
            size,
            values: vec![f64::NAN; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The entry at `(i, j)`, or `None` if it is undefined
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        let v = self.values[i * self.size + j];
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    /// Set both `(i, j)` and `(j, i)`
    pub fn set(&mut self, i: usize, j: usize, value: Option<f64>) {
        let value = value.unwrap_or(f64::NAN);
        self.values[i * self.size + j] = value;
        self.values[j * self.size + i] = value;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }
}

/// A pair of features passing every correlation filter, with `feature_a < feature_b`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationEdge {
    pub feature_a: String,
    pub feature_b: String,
    /// The correlation coefficient rounded to 2 decimal places
    pub r_value: f64,
    pub p_value: f64,
    /// The absolute retention time difference rounded to 2 decimal places
    pub rt_diff: f64,
}

/// The full pairwise matrices for a feature table, in table order
#[derive(Debug, Clone)]
pub struct CorrelationMatrices {
    pub names: Vec<String>,
    pub r_values: SymmetricMatrix,
    pub p_values: SymmetricMatrix,
    pub rt_diffs: SymmetricMatrix,
}

/// Rank the defined values of `values` from 1, giving tied values the mean of their
/// ranks. Undefined values stay undefined.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|i| !values[*i].is_nan()).collect();
    order.sort_by(|a, b| {
        values[*a]
            .partial_cmp(&values[*b])
            .unwrap_or(Ordering::Equal)
    });
    let mut ranks = vec![f64::NAN; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // ranks start..end (0-based) share the mean of start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for k in &order[start..end] {
            ranks[*k] = rank;
        }
        start = end;
    }
    ranks
}

/// Pearson's coefficient over the samples where both `x` and `y` are defined.
///
/// Returns the coefficient and the number of paired observations, or `None` if fewer
/// than `min_periods` pairs exist or either side has no variance.
pub fn pearson_pairwise(x: &[f64], y: &[f64], min_periods: usize) -> Option<(f64, usize)> {
    let mut n = 0usize;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        if a.is_nan() || b.is_nan() {
            continue;
        }
        n += 1;
        sum_x += a;
        sum_y += b;
    }
    if n < min_periods || n == 0 {
        return None;
    }
    let mean_x = sum_x / n as f64;
    let mean_y = sum_y / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        if a.is_nan() || b.is_nan() {
            continue;
        }
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    Some((r, n))
}

/// The two-sided p-value of a correlation coefficient `r` from `n` paired observations,
/// using the t-approximation with `n - 2` degrees of freedom.
///
/// A coefficient of exactly ±1 has an infinite test statistic, and a p-value of 0.
pub fn correlation_pvalue(r: f64, n: usize) -> Option<f64> {
    if n < 3 || r.is_nan() {
        return None;
    }
    let dof = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 0.0 {
        return Some(0.0);
    }
    let t = -r.abs() * (dof / denom).sqrt();
    let dist = StudentsT::new(0.0, 1.0, dof).ok()?;
    Some((2.0 * dist.cdf(t)).clamp(0.0, 1.0))
}

/// Computes pairwise correlation statistics and the edges passing [`CorrelationParams`]
#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    pub params: CorrelationParams,
}

impl CorrelationEngine {
    pub fn new(params: CorrelationParams) -> Result<Self, CorrelationError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn prepare_vectors(&self, features: &FeatureTable) -> Vec<Vec<f64>> {
        features
            .iter()
            .map(|f| {
                let raw: Vec<f64> = f
                    .intensities
                    .iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect();
                match self.params.method {
                    CorrelationMethod::Pearson => raw,
                    CorrelationMethod::Spearman => average_ranks(&raw),
                }
            })
            .collect()
    }

    /// The coefficient and number of paired observations of every pair `(i, j)` with
    /// `j >= i`, one row per feature.
    fn pairwise_statistics(&self, features: &FeatureTable) -> Vec<Vec<Option<(f64, usize)>>> {
        let n = features.len();
        let vectors = self.prepare_vectors(features);
        let min_periods = self.params.min_periods;
        (0..n)
            .into_par_iter()
            .map(|i| {
                (i..n)
                    .map(|j| pearson_pairwise(&vectors[i], &vectors[j], min_periods))
                    .collect()
            })
            .collect()
    }

    fn fill_matrix(
        size: usize,
        statistics: &[Vec<Option<(f64, usize)>>],
        value: impl Fn(f64, usize) -> Option<f64>,
    ) -> SymmetricMatrix {
        let mut matrix = SymmetricMatrix::new(size);
        for (i, row) in statistics.iter().enumerate() {
            for (offset, stat) in row.iter().copied().enumerate() {
                matrix.set(i, i + offset, stat.and_then(|(r, k)| value(r, k)));
            }
        }
        matrix
    }

    /// Compute the coefficient, p-value and retention time difference matrices
    pub fn correlate(&self, features: &FeatureTable) -> CorrelationMatrices {
        let n = features.len();
        let statistics = self.pairwise_statistics(features);
        CorrelationMatrices {
            names: features.names().map(String::from).collect(),
            r_values: Self::fill_matrix(n, &statistics, |r, _| Some(r)),
            p_values: Self::fill_matrix(n, &statistics, correlation_pvalue),
            rt_diffs: self.rt_difference_matrix(features),
        }
    }

    /// The pairwise correlation coefficients, undefined where too few samples overlap.
    ///
    /// Use [`CorrelationEngine::correlate`] when more than one matrix is needed.
    pub fn correlation_matrix(&self, features: &FeatureTable) -> SymmetricMatrix {
        let statistics = self.pairwise_statistics(features);
        Self::fill_matrix(features.len(), &statistics, |r, _| Some(r))
    }

    /// The two-sided p-values of [`CorrelationEngine::correlation_matrix`]
    pub fn pvalue_matrix(&self, features: &FeatureTable) -> SymmetricMatrix {
        let statistics = self.pairwise_statistics(features);
        Self::fill_matrix(features.len(), &statistics, correlation_pvalue)
    }

    /// The absolute retention time differences between every pair of features
    pub fn rt_difference_matrix(&self, features: &FeatureTable) -> SymmetricMatrix {
        let n = features.len();
        let mut rt_diffs = SymmetricMatrix::new(n);
        for i in 0..n {
            for j in i..n {
                rt_diffs.set(i, j, Some((features[i].rt - features[j].rt).abs()));
            }
        }
        rt_diffs
    }

    /// Select the pairs of `matrices` passing every filter. Each unordered pair is
    /// emitted once, ordered by name, walking the matrices row by row.
    pub fn edges_from(&self, matrices: &CorrelationMatrices) -> Vec<CorrelationEdge> {
        let names = &matrices.names;
        let n = names.len();
        (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                (0..n).filter_map(move |j| {
                    if names[i] >= names[j] {
                        return None;
                    }
                    let r_value = matrices.r_values.get(i, j)?;
                    let p_value = matrices.p_values.get(i, j)?;
                    let rt_diff = matrices.rt_diffs.get(i, j)?;
                    if !self.params.passes(r_value, p_value, rt_diff) {
                        return None;
                    }
                    Some(CorrelationEdge {
                        feature_a: names[i].clone(),
                        feature_b: names[j].clone(),
                        r_value: round_to(r_value, 2),
                        p_value,
                        rt_diff: round_to(rt_diff, 2),
                    })
                })
            })
            .collect()
    }

    /// Find all feature pairs passing the correlation, significance and retention
    /// time filters.
    pub fn edges(&self, features: &FeatureTable) -> Vec<CorrelationEdge> {
        let matrices = self.correlate(features);
        let edges = self.edges_from(&matrices);
        debug!(
            "{} of {} feature pairs passed correlation filters ({})",
            edges.len(),
            features.len() * features.len().saturating_sub(1) / 2,
            self.params.method
        );
        edges
    }
}
