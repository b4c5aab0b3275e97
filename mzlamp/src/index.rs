/*! A range-queryable index over the exact masses of a [`ReferenceLibrary`] */
use std::cmp::Ordering;

use tracing::debug;

use crate::reference::{ReferenceCompound, ReferenceError, ReferenceLibrary};

/// A position in the index, the exact mass and the compound's offset in the library
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub exact_mass: f64,
    pub compound: usize,
}

/// A sorted view of a reference library ordered by exact mass.
///
/// Built once per run and only read afterwards, so it can be shared between
/// matching workers.
#[derive(Debug, Clone)]
pub struct MassIndex<'a> {
    library: &'a ReferenceLibrary,
    entries: Vec<IndexEntry>,
}

impl<'a> MassIndex<'a> {
    /// Index every compound with a known exact mass.
    ///
    /// Fails if the library is non-empty but has no exact masses at all.
    pub fn build(library: &'a ReferenceLibrary) -> Result<Self, ReferenceError> {
        library.check_exact_masses()?;
        let mut entries: Vec<IndexEntry> = library
            .compounds()
            .iter()
            .enumerate()
            .filter_map(|(compound, c)| {
                c.exact_mass
                    .filter(|m| m.is_finite())
                    .map(|exact_mass| IndexEntry {
                        exact_mass,
                        compound,
                    })
            })
            .collect();
        // Stable, so duplicate masses keep their library order
        entries.sort_by(|a, b| {
            a.exact_mass
                .partial_cmp(&b.exact_mass)
                .unwrap_or(Ordering::Equal)
        });
        debug!(
            "Indexed {} of {} reference compounds",
            entries.len(),
            library.len()
        );
        Ok(Self { library, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn library(&self) -> &'a ReferenceLibrary {
        self.library
    }

    /// All index entries whose exact mass lies in the closed interval `[lo, hi]`
    pub fn entries_between(&self, lo: f64, hi: f64) -> &[IndexEntry] {
        let start = self.entries.partition_point(|e| e.exact_mass < lo);
        let end = self.entries.partition_point(|e| e.exact_mass <= hi);
        if start >= end {
            &[]
        } else {
            &self.entries[start..end]
        }
    }

    /// All compounds whose exact mass lies in the closed interval `[lo, hi]`, in
    /// ascending mass order.
    pub fn range_query(
        &self,
        lo: f64,
        hi: f64,
    ) -> impl Iterator<Item = (usize, &'a ReferenceCompound)> + '_ {
        let compounds = self.library.compounds();
        self.entries_between(lo, hi)
            .iter()
            .map(move |e| (e.compound, &compounds[e.compound]))
    }
}
