//! Annotation of LC-MS features against reference compound libraries, and grouping of
//! features whose intensities are correlated across samples.
//!
//! The [`api::annotate`] function runs every stage with an [`config::AnnotationConfig`].
pub mod adduct;
pub mod feature;
pub mod index;
pub mod matcher;
pub mod reference;

pub mod correlation;
pub mod grouping;
pub mod report;
pub mod summary;

pub mod api;
pub mod config;
pub mod timing;

pub use crate::adduct::{AdductDefinition, AdductLibrary, IonMode};
pub use crate::api::{annotate, AnnotationError, AnnotationResult};
pub use crate::config::AnnotationConfig;
pub use crate::correlation::{CorrelationEdge, CorrelationEngine, CorrelationMethod, CorrelationParams};
pub use crate::feature::{Feature, FeatureTable};
pub use crate::grouping::GroupEntry;
pub use crate::index::MassIndex;
pub use crate::matcher::{MassMatcher, MatchRecord, MatchTable};
pub use crate::reference::{ReferenceCompound, ReferenceLibrary};
pub use crate::report::{Report, ReportRow};
