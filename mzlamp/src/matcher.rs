//! Mass-tolerant matching of features against a reference library.
//!
//! Two search modes share the same ppm tolerance window:
//! - *direct*, where a feature's m/z is compared to compound exact masses as-is
//! - *adduct*, where each window is first transformed into neutral mass space
//!   by every [`AdductDefinition`] of the run's ion mode, and hits are mapped
//!   back to the adducted mass before the error is computed.
use itertools::Itertools;
use mzpeaks::Tolerance;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, trace};

use crate::adduct::{AdductDefinition, AdductLibrary};
use crate::feature::{Feature, FeatureTable};
use crate::index::MassIndex;
use crate::reference::ReferenceCompound;

/// Adducts whose lower window bound minus the adduct mass falls below this
/// many Daltons are not searched.
pub const MINIMUM_NEUTRAL_MASS: f64 = 0.5;

/// Round `value` to `places` decimal places, resolving halves to the even neighbor
#[inline]
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round_ties_even() / scale
}

/// The signed deviation of an observed mass from a theoretical mass in parts-per-million
#[inline]
pub fn ppm_error(observed: f64, theoretical: f64) -> f64 {
    (observed - theoretical) / (theoretical * 1e-6)
}

/// The closed interval of masses within `tolerance` of `mass`
#[inline]
pub fn mass_tolerance_window(mass: f64, tolerance: Tolerance) -> (f64, f64) {
    tolerance.bounds(mass)
}

/// One feature matched to one reference compound, possibly through an adduct
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub feature_id: String,
    pub mz: f64,
    /// The matched compound's mass, adduct-adjusted when an adduct was used, rounded
    /// to 2 decimal places
    pub exact_mass: f64,
    /// The error of `mz` relative to the unrounded theoretical mass, rounded to 2 decimal
    /// places
    pub ppm_error: f64,
    pub adduct: Option<String>,
    /// Attribute values of the matched compound, aligned with [`MatchTable::attribute_names`]
    pub attributes: Vec<Option<String>>,
    /// The unrounded mass `ppm_error` was computed against
    #[serde(skip)]
    pub theoretical_mass: f64,
}

impl MatchRecord {
    fn from_hit(
        feature: &Feature,
        compound: &ReferenceCompound,
        theoretical_mass: f64,
        adduct: Option<&AdductDefinition>,
    ) -> Self {
        Self {
            feature_id: feature.name.clone(),
            mz: feature.mz,
            exact_mass: theoretical_mass,
            ppm_error: ppm_error(feature.mz, theoretical_mass),
            adduct: adduct.map(|a| a.label.clone()),
            attributes: compound.attributes.clone(),
            theoretical_mass,
        }
    }

    /// Recompute the ppm error from the observed and theoretical masses, at the stored
    /// precision.
    pub fn recomputed_ppm_error(&self) -> f64 {
        round_to(ppm_error(self.mz, self.theoretical_mass), 2)
    }

    fn round(&mut self) {
        self.exact_mass = round_to(self.exact_mass, 2);
        self.ppm_error = round_to(self.ppm_error, 2);
    }

    fn duplicate_key(&self) -> (String, u64, u64, u64, Option<String>, Vec<Option<String>>) {
        (
            self.feature_id.clone(),
            float_key(self.mz),
            float_key(self.exact_mass),
            float_key(self.ppm_error),
            self.adduct.clone(),
            self.attributes.clone(),
        )
    }

    /// Render the record as text cells in [`MatchTable::header`] order
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(5 + self.attributes.len());
        row.push(self.feature_id.clone());
        row.push(self.mz.to_string());
        row.push(self.exact_mass.to_string());
        row.push(self.ppm_error.to_string());
        row.push(self.adduct.clone().unwrap_or_default());
        row.extend(self.attributes.iter().map(|a| a.clone().unwrap_or_default()));
        row
    }
}

#[inline]
fn float_key(value: f64) -> u64 {
    if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

/// All matches produced for a feature table against one reference library
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchTable {
    pub attribute_names: Vec<String>,
    pub records: Vec<MatchRecord>,
}

impl MatchTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MatchRecord> {
        self.records.iter()
    }

    /// The column names, with `feature_id` and `mz` leading
    pub fn header(&self) -> Vec<String> {
        ["feature_id", "mz", "exact_mass", "ppm_error", "adduct"]
            .into_iter()
            .map(String::from)
            .chain(self.attribute_names.iter().cloned())
            .collect()
    }

    /// The matches for a single feature, in table order
    pub fn for_feature<'a>(&'a self, feature_id: &'a str) -> impl Iterator<Item = &'a MatchRecord> {
        self.records.iter().filter(move |r| r.feature_id == feature_id)
    }
}

/// Matches feature masses against a [`MassIndex`] within a ppm tolerance
#[derive(Debug, Clone)]
pub struct MassMatcher<'a> {
    index: MassIndex<'a>,
    pub tolerance: Tolerance,
}

impl<'a> MassMatcher<'a> {
    pub fn new(index: MassIndex<'a>, tolerance: Tolerance) -> Self {
        Self { index, tolerance }
    }

    /// Create a matcher with a tolerance of `ppm` parts-per-million
    pub fn with_ppm(index: MassIndex<'a>, ppm: f64) -> Self {
        Self::new(index, Tolerance::PPM(ppm))
    }

    pub fn index(&self) -> &MassIndex<'a> {
        &self.index
    }

    /// Find every compound whose exact mass is within tolerance of `feature`'s m/z
    pub fn match_feature(&self, feature: &Feature) -> Vec<MatchRecord> {
        let (lo, hi) = mass_tolerance_window(feature.mz, self.tolerance);
        self.index
            .range_query(lo, hi)
            .map(|(_, compound)| {
                // Only indexed compounds are returned, and those always carry a mass
                let exact_mass = compound.exact_mass.unwrap_or(f64::NAN);
                MatchRecord::from_hit(feature, compound, exact_mass, None)
            })
            .collect()
    }

    /// Find every compound which, combined with one of `adducts`, has a mass within
    /// tolerance of `feature`'s m/z.
    pub fn match_feature_with_adducts(
        &self,
        feature: &Feature,
        adducts: &AdductLibrary,
    ) -> Vec<MatchRecord> {
        let (lo, hi) = mass_tolerance_window(feature.mz, self.tolerance);
        let mut records = Vec::new();
        for adduct in adducts.iter() {
            if lo - adduct.mass < MINIMUM_NEUTRAL_MASS {
                trace!(
                    "Skipping {} for {}, neutral window is below {MINIMUM_NEUTRAL_MASS}",
                    adduct.label,
                    feature.name
                );
                continue;
            }
            let (neutral_lo, neutral_hi) = adduct.neutral_window(lo, hi);
            records.extend(
                self.index
                    .range_query(neutral_lo, neutral_hi)
                    .map(|(_, compound)| {
                        let neutral = compound.exact_mass.unwrap_or(f64::NAN);
                        MatchRecord::from_hit(
                            feature,
                            compound,
                            adduct.adducted_mass(neutral),
                            Some(adduct),
                        )
                    }),
            );
        }
        records
    }

    /// Match every feature in `features` directly against the library
    pub fn match_mass(&self, features: &FeatureTable) -> MatchTable {
        let records: Vec<Vec<MatchRecord>> = features
            .as_slice()
            .par_iter()
            .map(|f| self.match_feature(f))
            .collect();
        self.finalize(records)
    }

    /// Match every feature in `features` against the library through `adducts`
    pub fn match_mass_with_adducts(
        &self,
        features: &FeatureTable,
        adducts: &AdductLibrary,
    ) -> MatchTable {
        let records: Vec<Vec<MatchRecord>> = features
            .as_slice()
            .par_iter()
            .map(|f| self.match_feature_with_adducts(f, adducts))
            .collect();
        self.finalize(records)
    }

    fn finalize(&self, records: Vec<Vec<MatchRecord>>) -> MatchTable {
        let total: usize = records.iter().map(|r| r.len()).sum();
        let records: Vec<MatchRecord> = records
            .into_iter()
            .flatten()
            .map(|mut r| {
                r.round();
                r
            })
            .unique_by(|r| r.duplicate_key())
            .collect();
        debug!(
            "Found {} matches ({} before removing duplicates) within {:?}",
            records.len(),
            total,
            self.tolerance
        );
        MatchTable {
            attribute_names: self.index.library().attribute_names().to_vec(),
            records,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adduct::IonMode;
    use crate::reference::ReferenceLibrary;

    fn library(masses: &[f64]) -> ReferenceLibrary {
        ReferenceLibrary::new(
            vec!["compound_id".into()],
            masses
                .iter()
                .enumerate()
                .map(|(i, m)| ReferenceCompound::new(Some(*m), vec![Some(format!("C{i}"))]))
                .collect(),
        )
        .unwrap()
    }

    fn features() -> FeatureTable {
        FeatureTable::new(vec![
            Feature::new("F1", 100.0, 1.0, vec![]),
            Feature::new("F2", 200.0, 2.0, vec![]),
            Feature::new("F3", 300.0, 3.0, vec![]),
        ])
        .unwrap()
    }

    #[test]
    fn test_window_symmetric() {
        for (mz, ppm) in [(100.0, 5.0), (1234.5678, 10.0), (50.0, 0.0), (999.99, 100.0)] {
            let (lo, hi) = mass_tolerance_window(mz, Tolerance::PPM(ppm));
            assert!(((hi / mz - 1.0) - (1.0 - lo / mz)).abs() < 1e-12);
            assert!((hi - mz * (1.0 + ppm * 1e-6)).abs() < 1e-9);
            assert!((lo - mz * (1.0 - ppm * 1e-6)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(4.999999, 2), 5.0);
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(-1.236, 2), -1.24);
    }

    #[test]
    fn test_direct_match() {
        let lib = library(&[100.0005]);
        let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), 10.0);
        let table = matcher.match_mass(&features());
        assert_eq!(table.len(), 1);
        let hit = &table.records[0];
        assert_eq!(hit.feature_id, "F1");
        assert_eq!(hit.mz, 100.0);
        assert!((hit.ppm_error - -5.0).abs() < 0.01, "{}", hit.ppm_error);
        assert_eq!(hit.exact_mass, 100.0);
        assert_eq!(hit.adduct, None);
        assert_eq!(hit.recomputed_ppm_error(), hit.ppm_error);
        assert_eq!(table.for_feature("F2").count(), 0);
        assert_eq!(
            table.header()[..4],
            ["feature_id", "mz", "exact_mass", "ppm_error"]
        );
    }

    #[test]
    fn test_exact_mass_always_matches() {
        let lib = library(&[100.0, 200.0, 300.0]);
        for ppm in [0.0, 1.0, 50.0] {
            let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), ppm);
            let table = matcher.match_mass(&features());
            for f in features().iter() {
                assert!(
                    table
                        .for_feature(&f.name)
                        .any(|r| r.theoretical_mass == f.mz),
                    "{} at {ppm}",
                    f.name
                );
            }
        }
    }

    #[test]
    fn test_duplicates_removed() {
        let lib = ReferenceLibrary::new(
            vec!["compound_id".into()],
            vec![
                ReferenceCompound::new(Some(100.0), vec![Some("A".into())]),
                ReferenceCompound::new(Some(100.0), vec![Some("A".into())]),
                ReferenceCompound::new(Some(100.0), vec![Some("B".into())]),
            ],
        )
        .unwrap();
        let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), 5.0);
        let table = matcher.match_mass(&features());
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].attributes, vec![Some("A".to_string())]);
        assert_eq!(table.records[1].attributes, vec![Some("B".to_string())]);
    }

    #[test]
    fn test_adduct_match() {
        // glucose [M+H]+ and [M+Na]+
        let lib = library(&[180.063388]);
        let adducts: AdductLibrary = vec![
            AdductDefinition::new("[M+H]+", 1.007276, 1.0, IonMode::Pos).unwrap(),
            AdductDefinition::new("[M+Na]+", 22.989218, 1.0, IonMode::Pos).unwrap(),
        ]
        .into_iter()
        .collect();
        let table = FeatureTable::new(vec![
            Feature::new("H", 181.070664, 1.0, vec![]),
            Feature::new("Na", 203.052606, 1.0, vec![]),
            Feature::new("none", 250.0, 1.0, vec![]),
        ])
        .unwrap();
        let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), 5.0);
        let matches = matcher.match_mass_with_adducts(&table, &adducts);
        assert_eq!(matches.len(), 2);
        let h = matches.for_feature("H").next().unwrap();
        assert_eq!(h.adduct.as_deref(), Some("[M+H]+"));
        assert_eq!(h.exact_mass, 181.07);
        assert!(h.ppm_error.abs() < 0.01);
        assert_eq!(h.recomputed_ppm_error(), h.ppm_error);
        let na = matches.for_feature("Na").next().unwrap();
        assert_eq!(na.adduct.as_deref(), Some("[M+Na]+"));
        assert_eq!(matches.for_feature("none").count(), 0);
    }

    #[test]
    fn test_adduct_floor() {
        let lib = library(&[0.2, 0.6, 10.0]);
        let adducts: AdductLibrary = vec![
            AdductDefinition::new("[M+X]+", 10.0, 1.0, IonMode::Pos).unwrap(),
        ]
        .into_iter()
        .collect();
        let table = FeatureTable::new(vec![
            Feature::new("low", 10.2, 1.0, vec![]),
            Feature::new("ok", 10.6, 1.0, vec![]),
            Feature::new("far", 20.0, 1.0, vec![]),
        ])
        .unwrap();
        let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), 5.0);
        let matches = matcher.match_mass_with_adducts(&table, &adducts);
        let ids: Vec<_> = matches.iter().map(|r| r.feature_id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "far"]);
        for r in matches.iter() {
            let (lo, _) = mass_tolerance_window(r.mz, matcher.tolerance);
            assert!(lo - 10.0 >= MINIMUM_NEUTRAL_MASS);
        }
    }

    #[test]
    fn test_negative_charge_normalized() {
        let lib = library(&[200.0]);
        let adduct = AdductDefinition::new("[M]-", 0.0, -1.0, IonMode::Neg).unwrap();
        let adducts: AdductLibrary = vec![adduct].into_iter().collect();
        // neutral window is [-hi, -lo], which never touches a positive mass but must
        // still be a well-formed interval
        let (lo, hi) = adducts.iter().next().unwrap().neutral_window(199.999, 200.001);
        assert!(lo <= hi);
        let table = FeatureTable::new(vec![Feature::new("F", 200.0, 1.0, vec![])]).unwrap();
        let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), 5.0);
        assert!(matcher.match_mass_with_adducts(&table, &adducts).is_empty());

        let lib = library(&[-200.0]);
        let matcher = MassMatcher::with_ppm(MassIndex::build(&lib).unwrap(), 5.0);
        let matches = matcher.match_mass_with_adducts(&table, &adducts);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.records[0].exact_mass, 200.0);
    }
}
