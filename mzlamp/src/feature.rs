//! Typed LC-MS feature tables.
//!
//! A [`FeatureTable`] is built by a loader after it maps its input schema onto
//! [`Feature`]. Every feature has a name, an m/z, a retention time and one
//! intensity per sample. Missing or zero intensities are already `None`.
use std::collections::HashSet;
use std::ops::Index;
use std::slice;

use serde::Serialize;
use thiserror::Error;

/// An error that might occur when assembling a [`FeatureTable`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("The feature name {0:?} occurs more than once")]
    DuplicateFeatureName(String),
    #[error("Feature {name:?} has {found} samples but the table has {expected}")]
    InconsistentSampleCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Feature {0:?} has a non-finite m/z or retention time")]
    NonFiniteCoordinate(String),
}

/// A detected ion peak with its per-sample intensities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    /// The feature's identity, unique within a run
    pub name: String,
    /// The observed mass-to-charge ratio
    pub mz: f64,
    /// The retention time
    pub rt: f64,
    /// One intensity per sample, `None` when the signal is missing
    pub intensities: Vec<Option<f64>>,
}

impl Feature {
    pub fn new(name: impl Into<String>, mz: f64, rt: f64, intensities: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            mz,
            rt,
            intensities,
        }
    }

    /// Build a feature from raw intensities, treating zero and NaN as missing
    pub fn from_raw_intensities(
        name: impl Into<String>,
        mz: f64,
        rt: f64,
        intensities: &[f64],
    ) -> Self {
        let intensities = intensities
            .iter()
            .map(|v| if *v == 0.0 || v.is_nan() { None } else { Some(*v) })
            .collect();
        Self::new(name, mz, rt, intensities)
    }

    /// The number of samples with a recorded intensity
    pub fn observed_count(&self) -> usize {
        self.intensities.iter().filter(|v| v.is_some()).count()
    }
}

/// An ordered collection of [`Feature`] sharing the same sample axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    features: Vec<Feature>,
    n_samples: usize,
}

impl FeatureTable {
    /// Create a new table, checking that names are unique, coordinates are finite and
    /// every feature has the same number of samples.
    pub fn new(features: Vec<Feature>) -> Result<Self, TableError> {
        let n_samples = features.first().map(|f| f.intensities.len()).unwrap_or_default();
        let mut seen = HashSet::with_capacity(features.len());
        for feature in features.iter() {
            if !seen.insert(feature.name.as_str()) {
                return Err(TableError::DuplicateFeatureName(feature.name.clone()));
            }
            if !(feature.mz.is_finite() && feature.rt.is_finite()) {
                return Err(TableError::NonFiniteCoordinate(feature.name.clone()));
            }
            if feature.intensities.len() != n_samples {
                return Err(TableError::InconsistentSampleCount {
                    name: feature.name.clone(),
                    expected: n_samples,
                    found: feature.intensities.len(),
                });
            }
        }
        Ok(Self {
            features,
            n_samples,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn iter(&self) -> slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    pub fn as_slice(&self) -> &[Feature] {
        &self.features
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }
}

impl Index<usize> for FeatureTable {
    type Output = Feature;

    fn index(&self, index: usize) -> &Self::Output {
        &self.features[index]
    }
}

impl<'a> IntoIterator for &'a FeatureTable {
    type Item = &'a Feature;
    type IntoIter = slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}

impl TryFrom<Vec<Feature>> for FeatureTable {
    type Error = TableError;

    fn try_from(value: Vec<Feature>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
