//! Retrieval configuration: RTM parameter priors, LUT/inversion settings.
//!
//! The configuration is an immutable value passed explicitly into the LUT
//! builder and the batch processor, so concurrent batches with different
//! settings can coexist in one process.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{CanopyTrait, Platform, RetrievalError, RetrievalResult};

/// Prior distribution of one RTM input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Distribution {
    /// Uniform over [min, max]
    Uniform { min: f64, max: f64 },
    /// Gaussian with the given moments, truncated to [min, max]
    Gaussian {
        mean: f64,
        std: f64,
        min: f64,
        max: f64,
    },
    /// Degenerate distribution; always yields `value`
    Fixed { value: f64 },
}

impl Distribution {
    pub fn validate(&self) -> RetrievalResult<()> {
        match *self {
            Distribution::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(RetrievalError::Config(format!(
                        "invalid uniform bounds [{}, {}]",
                        min, max
                    )));
                }
            }
            Distribution::Gaussian {
                mean,
                std,
                min,
                max,
            } => {
                if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
                    return Err(RetrievalError::Config(format!(
                        "invalid gaussian moments (mean {}, std {})",
                        mean, std
                    )));
                }
                if !min.is_finite() || !max.is_finite() || min >= max {
                    return Err(RetrievalError::Config(format!(
                        "invalid gaussian truncation bounds [{}, {}]",
                        min, max
                    )));
                }
            }
            Distribution::Fixed { value } => {
                if !value.is_finite() {
                    return Err(RetrievalError::Config(
                        "fixed parameter value is not finite".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Zero-width distributions carry no sampling dimension.
    pub fn is_fixed(&self) -> bool {
        match *self {
            Distribution::Fixed { .. } => true,
            Distribution::Uniform { min, max } => min == max,
            Distribution::Gaussian { .. } => false,
        }
    }

    /// Declared support of the distribution.
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Distribution::Uniform { min, max } => (min, max),
            Distribution::Gaussian { min, max, .. } => (min, max),
            Distribution::Fixed { value } => (value, value),
        }
    }
}

/// Prior specification of one RTM input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: CanopyTrait,
    pub distribution: Distribution,
}

impl ParameterSpec {
    pub fn uniform(name: CanopyTrait, min: f64, max: f64) -> Self {
        Self {
            name,
            distribution: Distribution::Uniform { min, max },
        }
    }

    pub fn gaussian(name: CanopyTrait, mean: f64, std: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            distribution: Distribution::Gaussian {
                mean,
                std,
                min,
                max,
            },
        }
    }

    pub fn fixed(name: CanopyTrait, value: f64) -> Self {
        Self {
            name,
            distribution: Distribution::Fixed { value },
        }
    }
}

/// LUT sampling design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMethod {
    /// Deterministic regular/stratified design (no randomness)
    Frs,
    /// Seeded Latin hypercube sampling
    Lhs,
}

impl std::str::FromStr for SamplingMethod {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "frs" => Ok(SamplingMethod::Frs),
            "lhs" => Ok(SamplingMethod::Lhs),
            other => Err(RetrievalError::Config(format!(
                "unknown sampling method: {} (expected frs|lhs)",
                other
            ))),
        }
    }
}

/// Spectral distance metric between an observed and a simulated spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostFunction {
    /// Root-mean-square error across bands (default)
    Rmse,
    /// Mean absolute error across bands
    Mae,
}

/// Statistic used to collapse the top-N candidates into a point estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Median of the candidate values (default, robust to outlier matches)
    Median,
    /// Arithmetic mean of the candidate values
    Mean,
}

/// Failure policy of the LUT builder when forward simulations are rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LutBuildMode {
    /// Keep the surviving entries (default)
    Tolerant,
    /// Fail unless the full requested size could be simulated
    Strict,
}

/// Immutable configuration of one retrieval run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// RTM parameter priors spanning the LUT
    pub rtm_params: Vec<ParameterSpec>,
    /// Number of LUT entries to simulate
    pub lut_size: usize,
    /// Number of best-matching candidates kept per pixel
    pub n_solutions: usize,
    pub sampling_method: SamplingMethod,
    /// Traits written to the output raster stack
    pub traits: Vec<CanopyTrait>,
    pub platform: Platform,
    /// LUT reuse granularity in days
    pub temporal_increment_days: i64,
    pub cost_function: CostFunction,
    pub aggregation: Aggregation,
    /// Per-band weights of the cost function; `None` = equal weighting
    pub band_weights: Option<Vec<f32>>,
    pub lut_build_mode: LutBuildMode,
    /// Maximum angular deviation for reusing a bucket LUT (degrees)
    pub geometry_tolerance_deg: f64,
    /// Seed of the LHS sampler
    pub seed: u64,
    /// Drop simulated spectra with an implausible green peak
    pub green_peak_filter: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rtm_params: default_priors(),
            lut_size: 20_000,
            n_solutions: 1_000,
            sampling_method: SamplingMethod::Frs,
            traits: vec![CanopyTrait::Lai, CanopyTrait::Cab],
            platform: Platform::Sentinel2A,
            temporal_increment_days: 7,
            cost_function: CostFunction::Rmse,
            aggregation: Aggregation::Median,
            band_weights: None,
            lut_build_mode: LutBuildMode::Tolerant,
            geometry_tolerance_deg: 2.0,
            seed: 42,
            green_peak_filter: false,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> RetrievalResult<()> {
        if self.rtm_params.is_empty() {
            return Err(RetrievalError::Config(
                "no RTM parameter priors configured".to_string(),
            ));
        }
        for spec in &self.rtm_params {
            spec.distribution.validate()?;
        }
        // one prior per parameter
        for (i, spec) in self.rtm_params.iter().enumerate() {
            if self.rtm_params[i + 1..].iter().any(|s| s.name == spec.name) {
                return Err(RetrievalError::Config(format!(
                    "duplicate prior for parameter {}",
                    spec.name
                )));
            }
        }
        if self.lut_size == 0 {
            return Err(RetrievalError::Config("lut_size must be > 0".to_string()));
        }
        if self.n_solutions == 0 || self.n_solutions > self.lut_size {
            return Err(RetrievalError::Config(format!(
                "n_solutions {} outside [1, lut_size = {}]",
                self.n_solutions, self.lut_size
            )));
        }
        if self.traits.is_empty() {
            return Err(RetrievalError::Config(
                "no traits requested".to_string(),
            ));
        }
        for t in &self.traits {
            if !self.rtm_params.iter().any(|s| s.name == *t) {
                return Err(RetrievalError::Config(format!(
                    "requested trait {} has no prior; it cannot be retrieved",
                    t
                )));
            }
        }
        if self.temporal_increment_days <= 0 {
            return Err(RetrievalError::Config(
                "temporal_increment_days must be positive".to_string(),
            ));
        }
        if self.geometry_tolerance_deg < 0.0 {
            return Err(RetrievalError::Config(
                "geometry_tolerance_deg must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn spec(&self, name: CanopyTrait) -> Option<&ParameterSpec> {
        self.rtm_params.iter().find(|s| s.name == name)
    }

    /// Replace the priors with the contents of a CSV prior table.
    pub fn with_priors_from_csv<P: AsRef<Path>>(mut self, path: P) -> RetrievalResult<Self> {
        self.rtm_params = load_priors_csv(path)?;
        Ok(self)
    }
}

/// One row of the CSV prior table:
/// `parameter,distribution,minimum,maximum,mean,std`
#[derive(Debug, Deserialize)]
struct PriorRecord {
    parameter: String,
    distribution: String,
    minimum: Option<f64>,
    maximum: Option<f64>,
    mean: Option<f64>,
    std: Option<f64>,
}

/// Load RTM parameter priors from a CSV table.
pub fn load_priors_csv<P: AsRef<Path>>(path: P) -> RetrievalResult<Vec<ParameterSpec>> {
    log::info!("Loading RTM priors from {}", path.as_ref().display());

    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| RetrievalError::InvalidFormat(format!("cannot read prior table: {}", e)))?;

    let mut specs = Vec::new();
    for record in reader.deserialize::<PriorRecord>() {
        let record = record
            .map_err(|e| RetrievalError::InvalidFormat(format!("malformed prior row: {}", e)))?;
        let name: CanopyTrait = record.parameter.parse()?;

        let missing = |field: &str| {
            RetrievalError::InvalidFormat(format!(
                "prior for {} is missing the `{}` column",
                name, field
            ))
        };

        let distribution = match record.distribution.to_lowercase().as_str() {
            "uniform" => Distribution::Uniform {
                min: record.minimum.ok_or_else(|| missing("minimum"))?,
                max: record.maximum.ok_or_else(|| missing("maximum"))?,
            },
            "gaussian" | "normal" => Distribution::Gaussian {
                mean: record.mean.ok_or_else(|| missing("mean"))?,
                std: record.std.ok_or_else(|| missing("std"))?,
                min: record.minimum.ok_or_else(|| missing("minimum"))?,
                max: record.maximum.ok_or_else(|| missing("maximum"))?,
            },
            "fixed" | "constant" => Distribution::Fixed {
                value: record
                    .mean
                    .or(record.minimum)
                    .ok_or_else(|| missing("mean"))?,
            },
            other => {
                return Err(RetrievalError::InvalidFormat(format!(
                    "unknown distribution kind `{}` for {}",
                    other, name
                )))
            }
        };
        distribution.validate()?;
        specs.push(ParameterSpec { name, distribution });
    }

    if specs.is_empty() {
        return Err(RetrievalError::InvalidFormat(
            "prior table contains no rows".to_string(),
        ));
    }
    log::debug!("Loaded {} parameter priors", specs.len());
    Ok(specs)
}

/// Default prior set for green agricultural canopies between stem
/// elongation and end of heading.
pub fn default_priors() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::uniform(CanopyTrait::N, 1.0, 2.2),
        ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0),
        ParameterSpec::uniform(CanopyTrait::Cab, 10.0, 80.0),
        ParameterSpec::uniform(CanopyTrait::Car, 2.0, 20.0),
        ParameterSpec::uniform(CanopyTrait::Cbrown, 0.0, 0.3),
        ParameterSpec::gaussian(CanopyTrait::Cw, 0.02, 0.008, 0.001, 0.05),
        ParameterSpec::gaussian(CanopyTrait::Cm, 0.0065, 0.003, 0.001, 0.02),
        ParameterSpec::fixed(CanopyTrait::Ant, 0.0),
        ParameterSpec::uniform(CanopyTrait::Lidfa, -0.6, 0.2),
        ParameterSpec::fixed(CanopyTrait::Lidfb, -0.15),
        ParameterSpec::uniform(CanopyTrait::Hspot, 0.01, 0.5),
        ParameterSpec::uniform(CanopyTrait::Rsoil, 0.3, 1.4),
        ParameterSpec::uniform(CanopyTrait::Psoil, 0.0, 1.0),
    ]
}
