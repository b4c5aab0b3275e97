//! Consolidation of match summaries and correlation groups into one report.
use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::grouping::GroupEntry;
use crate::summary::{FeatureSummary, FeatureSummaryRow};

/// A feature's single-row match summary with its correlation group, if any
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    #[serde(flatten)]
    pub summary: FeatureSummaryRow,
    pub group_size: Option<usize>,
    pub group_members: Option<String>,
}

impl ReportRow {
    pub fn name(&self) -> &str {
        &self.summary.name
    }

    pub fn ppm_error(&self) -> Option<f64> {
        self.summary.ppm_error
    }

    /// Whether the feature has both a compound match and a correlation group
    pub fn is_matched_and_grouped(&self) -> bool {
        self.summary.ppm_error.is_some() && self.group_size.is_some()
    }
}

/// The final ranked report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub attribute_names: Vec<String>,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReportRow> {
        self.rows.iter()
    }

    /// The number of leading rows that have both a match and a group
    pub fn matched_and_grouped(&self) -> usize {
        self.rows
            .iter()
            .take_while(|r| r.is_matched_and_grouped())
            .count()
    }
}

fn by_group_size_desc(a: &ReportRow, b: &ReportRow) -> Ordering {
    // missing sizes sort after every present size
    match (a.group_size, b.group_size) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn by_ppm_error_asc(a: &ReportRow, b: &ReportRow) -> Ordering {
    match (a.ppm_error(), b.ppm_error()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Left join `summary` with `groups` by feature name and rank the result.
///
/// Rows with both a match and a group come first, largest group first. All
/// other rows follow ordered by ascending ppm error, rows without a match last.
/// Both sorts are stable, so unmatched rows keep their group size order.
pub fn consolidate(summary: &FeatureSummary, groups: &[GroupEntry]) -> Report {
    let groups_by_name: HashMap<&str, &GroupEntry> =
        groups.iter().map(|g| (g.name.as_str(), g)).collect();

    let mut rows: Vec<ReportRow> = summary
        .rows
        .iter()
        .map(|row| {
            let group = groups_by_name.get(row.name.as_str());
            ReportRow {
                summary: row.clone(),
                group_size: group.map(|g| g.group_size),
                group_members: group.map(|g| g.members_joined()),
            }
        })
        .collect();
    rows.sort_by(by_group_size_desc);

    let (mut ranked, mut rest): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|r| r.is_matched_and_grouped());
    rest.sort_by(by_ppm_error_asc);
    debug!(
        "Report has {} matched and grouped features, {} others",
        ranked.len(),
        rest.len()
    );
    ranked.extend(rest);

    Report {
        attribute_names: summary.attribute_names.clone(),
        rows: ranked,
    }
}
