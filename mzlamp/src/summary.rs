//! Per-feature views of a [`MatchTable`].
//!
//! A [`MatchSummary`] has one row per match, plus one empty row for each
//! feature without any. A [`FeatureSummary`] collapses all of a feature's
//! matches into a single row.
use std::collections::HashMap;

use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use crate::feature::{Feature, FeatureTable};
use crate::grouping::MEMBER_SEPARATOR;
use crate::matcher::{MatchRecord, MatchTable};

fn matches_by_feature(matches: &MatchTable) -> HashMap<&str, Vec<&MatchRecord>> {
    let mut by_feature: HashMap<&str, Vec<&MatchRecord>> = HashMap::new();
    for record in matches.iter() {
        by_feature
            .entry(record.feature_id.as_str())
            .or_default()
            .push(record);
    }
    by_feature
}

/// A feature joined with at most one of its matches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummaryRow {
    pub name: String,
    pub mz: f64,
    pub rt: f64,
    pub exact_mass: Option<f64>,
    pub ppm_error: Option<f64>,
    pub adduct: Option<String>,
    pub attributes: Vec<Option<String>>,
}

impl MatchSummaryRow {
    fn unmatched(feature: &Feature, n_attributes: usize) -> Self {
        Self {
            name: feature.name.clone(),
            mz: feature.mz,
            rt: feature.rt,
            exact_mass: None,
            ppm_error: None,
            adduct: None,
            attributes: vec![None; n_attributes],
        }
    }

    fn matched(feature: &Feature, record: &MatchRecord) -> Self {
        Self {
            name: feature.name.clone(),
            mz: feature.mz,
            rt: feature.rt,
            exact_mass: Some(record.exact_mass),
            ppm_error: Some(record.ppm_error),
            adduct: record.adduct.clone(),
            attributes: record.attributes.clone(),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.ppm_error.is_some()
    }
}

/// Every feature outer-joined with its matches
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchSummary {
    pub attribute_names: Vec<String>,
    pub rows: Vec<MatchSummaryRow>,
}

impl MatchSummary {
    pub fn new(features: &FeatureTable, matches: &MatchTable) -> Self {
        let by_feature = matches_by_feature(matches);
        let n_attributes = matches.attribute_names.len();
        let mut rows = Vec::with_capacity(features.len().max(matches.len()));
        for feature in features.iter() {
            match by_feature.get(feature.name.as_str()) {
                Some(records) => rows.extend(
                    records
                        .iter()
                        .map(|record| MatchSummaryRow::matched(feature, record)),
                ),
                None => rows.push(MatchSummaryRow::unmatched(feature, n_attributes)),
            }
        }
        debug!(
            "Multi-row summary has {} rows for {} features",
            rows.len(),
            features.len()
        );
        Self {
            attribute_names: matches.attribute_names.clone(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> Vec<String> {
        ["name", "mz", "rt", "exact_mass", "ppm_error", "adduct"]
            .into_iter()
            .map(String::from)
            .chain(self.attribute_names.iter().cloned())
            .collect()
    }
}

/// Several text values collapsed into one `::`-separated value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinedText {
    pub value: String,
    /// The number of distinct values, only counted when duplicates are dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl JoinedText {
    /// Join the non-empty `values`, optionally keeping only the first occurrence
    /// of each distinct value.
    pub fn join<'a>(values: impl IntoIterator<Item = Option<&'a str>>, unique: bool) -> Self {
        let present = values.into_iter().flatten().filter(|v| !v.is_empty());
        if unique {
            let distinct: Vec<&str> = present.unique().collect();
            Self {
                count: Some(distinct.len()),
                value: distinct.join(MEMBER_SEPARATOR),
            }
        } else {
            Self {
                value: present.collect::<Vec<_>>().join(MEMBER_SEPARATOR),
                count: None,
            }
        }
    }
}

/// A feature with all of its matches collapsed into one row.
///
/// Numeric match columns come from the feature's first match, text columns
/// join the values of every match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSummaryRow {
    pub name: String,
    pub mz: f64,
    pub rt: f64,
    pub exact_mass: Option<f64>,
    pub ppm_error: Option<f64>,
    pub n_matches: usize,
    pub adduct: Option<JoinedText>,
    pub attributes: Vec<Option<JoinedText>>,
}

impl FeatureSummaryRow {
    fn from_matches(
        feature: &Feature,
        records: &[&MatchRecord],
        n_attributes: usize,
        unique: bool,
    ) -> Self {
        let first = records.first();
        let (adduct, attributes) = if records.is_empty() {
            (None, vec![None; n_attributes])
        } else {
            let adduct = records
                .iter()
                .any(|r| r.adduct.is_some())
                .then(|| JoinedText::join(records.iter().map(|r| r.adduct.as_deref()), unique));
            let attributes = (0..n_attributes)
                .map(|i| {
                    Some(JoinedText::join(
                        records.iter().map(|r| r.attributes[i].as_deref()),
                        unique,
                    ))
                })
                .collect();
            (adduct, attributes)
        };
        Self {
            name: feature.name.clone(),
            mz: feature.mz,
            rt: feature.rt,
            exact_mass: first.map(|r| r.exact_mass),
            ppm_error: first.map(|r| r.ppm_error),
            n_matches: records.len(),
            adduct,
            attributes,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.ppm_error.is_some()
    }
}

/// One row per feature summarizing all of its matches
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureSummary {
    pub attribute_names: Vec<String>,
    pub unique: bool,
    pub rows: Vec<FeatureSummaryRow>,
}

impl FeatureSummary {
    /// Summarize `matches` per feature of `features`, in feature table order.
    ///
    /// When `unique` is set, repeated text values are dropped and each text column
    /// also counts its distinct values.
    pub fn new(features: &FeatureTable, matches: &MatchTable, unique: bool) -> Self {
        let by_feature = matches_by_feature(matches);
        let n_attributes = matches.attribute_names.len();
        let rows: Vec<_> = features
            .iter()
            .map(|feature| {
                let records = by_feature
                    .get(feature.name.as_str())
                    .map(|r| r.as_slice())
                    .unwrap_or_default();
                FeatureSummaryRow::from_matches(feature, records, n_attributes, unique)
            })
            .collect();
        debug!(
            "Single-row summary covers {} features, {} matched",
            rows.len(),
            rows.iter().filter(|r| r.is_matched()).count()
        );
        Self {
            attribute_names: matches.attribute_names.clone(),
            unique,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSummaryRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}
