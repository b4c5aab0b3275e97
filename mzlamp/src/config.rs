//! Run parameters and their layered configuration sources.
use std::path::Path;
use std::thread;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::adduct::IonMode;
use crate::correlation::{CorrelationError, CorrelationMethod, CorrelationParams};

/// The configuration file read from the working directory, if it exists
pub const CONFIG_FILE_NAME: &str = "mzlamp.toml";

/// The prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "MZLAMP_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Figment(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("The parameter {name} = {value} is out of range")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("Failed to build a thread pool: {0}")]
    ThreadPool(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
}

/// All parameters of an annotation run.
///
/// Configurations are read from `mzlamp.toml` in the working directory and an
/// optional explicit TOML file, then environment variables prefixed with `MZLAMP_`,
/// each layer overriding the one before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// The mass tolerance in parts-per-million
    pub ppm: f64,
    /// The polarity used to select adducts
    pub ion_mode: IonMode,
    /// Search adducted masses instead of matching m/z directly
    pub adduct_search: bool,
    /// Recompute every reference exact mass from its molecular formula
    pub calculate_mass: bool,
    pub thres_rt: f64,
    pub thres_corr: f64,
    pub thres_pval: f64,
    pub method: CorrelationMethod,
    pub positive: bool,
    /// Collapse repeated values in the single-row summary and count them
    pub unique_summary: bool,
    pub min_periods: usize,
    /// The number of threads to use, passing a value < 1 to use all available threads
    pub threads: i32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        let corr = CorrelationParams::default();
        Self {
            ppm: 5.0,
            ion_mode: IonMode::Pos,
            adduct_search: false,
            calculate_mass: false,
            thres_rt: corr.thres_rt,
            thres_corr: corr.thres_corr,
            thres_pval: corr.thres_pval,
            method: corr.method,
            positive: corr.positive,
            unique_summary: false,
            min_periods: corr.min_periods,
            threads: -1,
        }
    }
}

impl AnnotationConfig {
    /// The layered configuration sources, lowest precedence first
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AnnotationConfig::default()))
            .merge(Toml::file(CONFIG_FILE_NAME));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract and validate a configuration from `figment`
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        debug!("Loaded configuration {config:?}");
        Ok(config)
    }

    /// Read the configuration from every source, see [`AnnotationConfig::figment`]
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(config_file))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ppm >= 0.0) || !self.ppm.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "ppm",
                value: self.ppm,
            });
        }
        self.correlation_params().validate()?;
        Ok(())
    }

    pub fn matcher_tolerance(&self) -> Tolerance {
        Tolerance::PPM(self.ppm)
    }

    pub fn correlation_params(&self) -> CorrelationParams {
        CorrelationParams {
            thres_rt: self.thres_rt,
            thres_corr: self.thres_corr,
            thres_pval: self.thres_pval,
            method: self.method,
            positive: self.positive,
            min_periods: self.min_periods,
        }
    }

    pub fn num_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn create_threadpool(&self) -> Result<rayon::ThreadPool, ConfigError> {
        let num_threads = self.num_threads();
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }
}
