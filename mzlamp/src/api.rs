//! The complete annotation pipeline.
//!
//! Features are matched against the reference library, correlated with each
//! other, grouped by their correlation partners, summarized and finally
//! consolidated into a ranked report.
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::adduct::{AdductError, AdductLibrary};
use crate::config::{AnnotationConfig, ConfigError};
use crate::correlation::{CorrelationEdge, CorrelationEngine, CorrelationError};
use crate::feature::{FeatureTable, TableError};
use crate::grouping::{neighbor_groups, GroupEntry};
use crate::index::MassIndex;
use crate::matcher::{MassMatcher, MatchTable};
use crate::reference::{ReferenceError, ReferenceLibrary};
use crate::report::{consolidate, Report};
use crate::summary::{FeatureSummary, MatchSummary};
use crate::timing::timed_stage;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Adduct(#[from] AdductError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How long each pipeline stage took
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub matching: Duration,
    pub correlation: Duration,
    pub grouping: Duration,
    pub summary: Duration,
    pub consolidation: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.matching + self.correlation + self.grouping + self.summary + self.consolidation
    }
}

/// Every table produced by [`annotate`]
#[derive(Debug, Clone, Default)]
pub struct AnnotationResult {
    pub matches: MatchTable,
    pub match_summary: MatchSummary,
    pub feature_summary: FeatureSummary,
    pub edges: Vec<CorrelationEdge>,
    pub groups: Vec<GroupEntry>,
    pub report: Report,
    pub timings: StageTimings,
}

/// Fill in missing exact masses, or recompute all of them when `calculate_mass` is set
pub fn prepare_reference(
    reference: &mut ReferenceLibrary,
    calculate_mass: bool,
) -> Result<(), ReferenceError> {
    reference.resolve_exact_masses(calculate_mass);
    reference.check_exact_masses()
}

/// Match `features` against `reference`, through `adducts` if `config.adduct_search`
/// is set.
pub fn match_features(
    features: &FeatureTable,
    reference: &ReferenceLibrary,
    adducts: &AdductLibrary,
    config: &AnnotationConfig,
) -> Result<MatchTable, AnnotationError> {
    let index = MassIndex::build(reference)?;
    let matcher = MassMatcher::new(index, config.matcher_tolerance());
    let matches = if config.adduct_search {
        let adducts = adducts.for_ion_mode(config.ion_mode);
        if adducts.is_empty() {
            warn!("Adduct search requested without any adducts, nothing will match");
        }
        matcher.match_mass_with_adducts(features, &adducts)
    } else {
        matcher.match_mass(features)
    };
    Ok(matches)
}

fn run(
    features: &FeatureTable,
    mut reference: ReferenceLibrary,
    adducts: &AdductLibrary,
    config: &AnnotationConfig,
) -> Result<AnnotationResult, AnnotationError> {
    let mut timings = StageTimings::default();

    prepare_reference(&mut reference, config.calculate_mass)?;
    let matches = timed_stage("Matching", || {
        match_features(features, &reference, adducts, config)
    });
    timings.matching = matches.elapsed;
    let matches = matches.value?;

    let engine = CorrelationEngine::new(config.correlation_params())?;
    let edges = timed_stage("Correlation", || engine.edges(features));
    timings.correlation = edges.elapsed;
    let edges = edges.value;

    let groups = timed_stage("Grouping", || neighbor_groups(&edges));
    timings.grouping = groups.elapsed;
    let groups = groups.value;

    let summaries = timed_stage("Summary", || {
        (
            MatchSummary::new(features, &matches),
            FeatureSummary::new(features, &matches, config.unique_summary),
        )
    });
    timings.summary = summaries.elapsed;
    let (match_summary, feature_summary) = summaries.value;

    let report = timed_stage("Consolidation", || consolidate(&feature_summary, &groups));
    timings.consolidation = report.elapsed;
    let report = report.value;

    info!(
        "Annotated {} features: {} matches, {} correlated pairs, {} groups",
        features.len(),
        matches.len(),
        edges.len(),
        groups.len()
    );
    info!("Total Elapsed Time: {:0.3?}", timings.total());

    Ok(AnnotationResult {
        matches,
        match_summary,
        feature_summary,
        edges,
        groups,
        report,
        timings,
    })
}

/// Run the whole pipeline over `features` with the parameters of `config`.
///
/// Parallel stages run on a thread pool sized by `config.threads`.
pub fn annotate(
    features: &FeatureTable,
    reference: ReferenceLibrary,
    adducts: &AdductLibrary,
    config: &AnnotationConfig,
) -> Result<AnnotationResult, AnnotationError> {
    config.validate()?;
    info!(
        "mzlamp v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );
    info!(
        "{} features across {} samples, {} reference compounds",
        features.len(),
        features.n_samples(),
        reference.len()
    );
    config
        .create_threadpool()?
        .install(|| run(features, reference, adducts, config))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adduct::{AdductDefinition, IonMode};
    use crate::feature::Feature;
    use crate::reference::{ReferenceCompound, MOLECULAR_FORMULA};

    fn reference() -> ReferenceLibrary {
        ReferenceLibrary::new(
            vec!["molecular_name".into(), MOLECULAR_FORMULA.into()],
            vec![
                ReferenceCompound::new(None, vec![Some("glucose".into()), Some("C6H12O6".into())]),
                ReferenceCompound::new(Some(100.0005), vec![Some("standard".into()), None]),
            ],
        )
        .unwrap()
    }

    fn adducts() -> AdductLibrary {
        vec![
            AdductDefinition::new("[M+H]+", 1.007276, 1.0, IonMode::Pos).unwrap(),
            AdductDefinition::new("[M-H]-", -1.007276, 1.0, IonMode::Neg).unwrap(),
        ]
        .into_iter()
        .collect()
    }

    fn features() -> FeatureTable {
        FeatureTable::new(vec![
            Feature::from_raw_intensities("F1", 100.0, 1.0, &[1.0, 2.0, 3.0, 4.0, 5.0]),
            Feature::from_raw_intensities("F2", 181.070664, 1.2, &[2.0, 4.0, 6.0, 8.0, 10.0]),
            Feature::from_raw_intensities("F3", 300.0, 4.0, &[5.0, 1.0, 4.0, 2.0, 3.0]),
        ])
        .unwrap()
    }

    #[test_log::test]
    fn test_direct_pipeline() {
        let config = AnnotationConfig {
            ppm: 10.0,
            threads: 2,
            ..Default::default()
        };
        let result = annotate(&features(), reference(), &adducts(), &config).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches.records[0].feature_id, "F1");

        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].feature_a, "F1");
        assert_eq!(result.edges[0].feature_b, "F2");
        assert_eq!(result.groups.len(), 2);

        assert_eq!(result.report.len(), 3);
        assert_eq!(result.report.rows[0].name(), "F1");
        assert_eq!(result.report.matched_and_grouped(), 1);
        assert_eq!(result.match_summary.len(), 3);
    }

    #[test_log::test]
    fn test_adduct_pipeline() {
        let config = AnnotationConfig {
            adduct_search: true,
            threads: 1,
            ..Default::default()
        };
        let result = annotate(&features(), reference(), &adducts(), &config).unwrap();
        let f2: Vec<_> = result.matches.for_feature("F2").collect();
        assert_eq!(f2.len(), 1);
        assert_eq!(f2[0].adduct.as_deref(), Some("[M+H]+"));
        assert_eq!(f2[0].attributes[0].as_deref(), Some("glucose"));
        assert_eq!(result.report.rows[0].name(), "F2");
    }

    #[test]
    fn test_invalid_config() {
        let config = AnnotationConfig {
            thres_pval: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            annotate(&features(), reference(), &adducts(), &config),
            Err(AnnotationError::Config(_))
        ));
    }

    #[test]
    fn test_unresolvable_reference() {
        let lib = ReferenceLibrary::new(
            vec!["molecular_name".into()],
            vec![ReferenceCompound::new(None, vec![Some("x".into())])],
        )
        .unwrap();
        assert!(matches!(
            annotate(&features(), lib, &adducts(), &AnnotationConfig::default()),
            Err(AnnotationError::Reference(ReferenceError::MissingExactMass(1)))
        ));
    }

    #[test]
    fn test_nan_masses_are_unresolvable() {
        let lib = ReferenceLibrary::new(
            vec!["molecular_name".into()],
            vec![ReferenceCompound::new(Some(f64::NAN), vec![Some("x".into())])],
        )
        .unwrap();
        assert!(matches!(
            annotate(&features(), lib, &adducts(), &AnnotationConfig::default()),
            Err(AnnotationError::Reference(ReferenceError::MissingExactMass(1)))
        ));
    }
}
