//! Lookup table construction: sampling the priors, running the forward
//! model per draw, and freezing the surviving entries into an immutable,
//! positionally indexable table.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::config::{LutBuildMode, RetrievalConfig};
use crate::core::forward::ForwardModel;
use crate::core::sampling::{ParameterVector, Sampler};
use crate::core::sensor;
use crate::types::{
    CanopyTrait, ObservationGeometry, Platform, Reflectance, RetrievalError, RetrievalResult,
};

/// One LUT entry: borrowed views into the frozen table.
#[derive(Debug, Clone, Copy)]
pub struct LutEntry<'a> {
    pub index: usize,
    pub params: ArrayView1<'a, f64>,
    pub spectrum: ArrayView1<'a, Reflectance>,
    traits: &'a [CanopyTrait],
}

impl<'a> LutEntry<'a> {
    pub fn get(&self, name: CanopyTrait) -> Option<f64> {
        self.traits
            .iter()
            .position(|t| *t == name)
            .map(|i| self.params[i])
    }
}

/// Immutable collection of (parameter vector, simulated spectrum) pairs for
/// one observation geometry. Entry order is the sampling order, so builds
/// are reproducible under a fixed seed.
#[derive(Debug, Clone)]
pub struct LookupTable {
    traits: Vec<CanopyTrait>,
    samples: Array2<f64>,
    spectra: Array2<Reflectance>,
    geometry: ObservationGeometry,
    platform: Platform,
    band_names: Vec<String>,
    dropped: usize,
}

impl LookupTable {
    /// Sample the priors and simulate each draw under `geometry`. Draws the
    /// forward model rejects are dropped (and counted) unless strict mode
    /// demands the full requested size.
    pub fn build(
        config: &RetrievalConfig,
        geometry: &ObservationGeometry,
    ) -> RetrievalResult<Self> {
        config.validate()?;
        geometry.validate()?;

        log::info!(
            "Building LUT: size {}, {:?} sampling, platform {}",
            config.lut_size,
            config.sampling_method,
            config.platform
        );

        let sampler = Sampler::new(&config.rtm_params, config.sampling_method, config.seed)?;
        let vectors = sampler.sample(config.lut_size)?;
        let forward = ForwardModel::new(config.platform);

        let simulated = simulate_all(&forward, &vectors, geometry);

        let traits: Vec<CanopyTrait> = config.rtm_params.iter().map(|s| s.name).collect();
        let band_names = forward.band_names();
        let n_bands = band_names.len();

        let mut rows: Vec<(&ParameterVector, Vec<Reflectance>)> = Vec::new();
        let mut rejected = 0usize;
        for (vector, result) in vectors.iter().zip(simulated) {
            match result {
                Some(spectrum) => rows.push((vector, spectrum)),
                None => rejected += 1,
            }
        }

        let mut filtered = 0usize;
        if config.green_peak_filter {
            let before = rows.len();
            let indices = visible_band_indices(config.platform);
            rows.retain(|(_, spectrum)| has_plausible_green_peak(spectrum, indices));
            filtered = before - rows.len();
        }

        let dropped = rejected + filtered;
        if dropped > 0 {
            log::warn!(
                "LUT build dropped {} of {} draws ({} model-domain, {} green-peak)",
                dropped,
                config.lut_size,
                rejected,
                filtered
            );
        }
        if config.lut_build_mode == LutBuildMode::Strict && rows.len() < config.lut_size {
            return Err(RetrievalError::InsufficientLutSize {
                requested: config.lut_size,
                built: rows.len(),
            });
        }

        let mut samples = Array2::zeros((rows.len(), traits.len()));
        let mut spectra = Array2::zeros((rows.len(), n_bands));
        for (i, (vector, spectrum)) in rows.iter().enumerate() {
            for (j, t) in traits.iter().enumerate() {
                // every prior appears in every sampled vector
                samples[[i, j]] = vector.get(*t).unwrap_or(f64::NAN);
            }
            for (j, &r) in spectrum.iter().enumerate() {
                spectra[[i, j]] = r;
            }
        }

        log::info!("LUT ready: {} entries, {} bands", rows.len(), n_bands);
        Ok(Self {
            traits,
            samples,
            spectra,
            geometry: *geometry,
            platform: config.platform,
            band_names,
            dropped,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_bands(&self) -> usize {
        self.spectra.ncols()
    }

    pub fn entry(&self, index: usize) -> LutEntry<'_> {
        LutEntry {
            index,
            params: self.samples.row(index),
            spectrum: self.spectra.row(index),
            traits: &self.traits,
        }
    }

    /// All simulated spectra (entries x bands).
    pub fn spectra(&self) -> ArrayView2<'_, Reflectance> {
        self.spectra.view()
    }

    /// Sampled values of one trait across all entries.
    pub fn trait_column(&self, name: CanopyTrait) -> Option<ArrayView1<'_, f64>> {
        self.traits
            .iter()
            .position(|t| *t == name)
            .map(|i| self.samples.column(i))
    }

    pub fn traits(&self) -> &[CanopyTrait] {
        &self.traits
    }

    pub fn geometry(&self) -> &ObservationGeometry {
        &self.geometry
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    /// Number of draws dropped during the build.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(feature = "parallel")]
fn simulate_all(
    forward: &ForwardModel,
    vectors: &[ParameterVector],
    geometry: &ObservationGeometry,
) -> Vec<Option<Vec<Reflectance>>> {
    use rayon::prelude::*;

    vectors
        .par_iter()
        .map(|v| simulate_one(forward, v, geometry))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn simulate_all(
    forward: &ForwardModel,
    vectors: &[ParameterVector],
    geometry: &ObservationGeometry,
) -> Vec<Option<Vec<Reflectance>>> {
    vectors
        .iter()
        .map(|v| simulate_one(forward, v, geometry))
        .collect()
}

fn simulate_one(
    forward: &ForwardModel,
    vector: &ParameterVector,
    geometry: &ObservationGeometry,
) -> Option<Vec<Reflectance>> {
    match forward.simulate(vector, geometry) {
        Ok(spectrum) => Some(spectrum),
        Err(e) => {
            log::debug!("dropping LUT draw: {}", e);
            None
        }
    }
}

/// Indices of the bands closest to the blue/green/red reference
/// wavelengths of the platform.
fn visible_band_indices(platform: Platform) -> (usize, usize, usize) {
    let nearest = |target: f64| {
        sensor::platform_bands(platform)
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.center - target)
                    .abs()
                    .partial_cmp(&(b.center - target).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    (nearest(492.0), nearest(560.0), nearest(665.0))
}

/// Vegetation spectra peak in the green; a simulated spectrum whose blue
/// reflectance exceeds its green is not a plausible canopy.
fn has_plausible_green_peak(
    spectrum: &[Reflectance],
    (blue, green, _red): (usize, usize, usize),
) -> bool {
    spectrum[green] >= spectrum[blue]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParameterSpec, SamplingMethod};

    fn lai_config(size: usize) -> RetrievalConfig {
        RetrievalConfig {
            rtm_params: vec![ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0)],
            lut_size: size,
            n_solutions: 1,
            sampling_method: SamplingMethod::Lhs,
            traits: vec![CanopyTrait::Lai],
            ..RetrievalConfig::default()
        }
    }

    fn geometry() -> ObservationGeometry {
        ObservationGeometry::new(35.0, 5.0, 120.0)
    }

    #[test]
    fn test_build_size_and_shape() {
        let lut = LookupTable::build(&lai_config(25), &geometry()).unwrap();
        assert_eq!(lut.len(), 25);
        assert_eq!(lut.n_bands(), 10);
        assert_eq!(lut.dropped(), 0);
    }

    #[test]
    fn test_build_reproducible() {
        let config = lai_config(12);
        let a = LookupTable::build(&config, &geometry()).unwrap();
        let b = LookupTable::build(&config, &geometry()).unwrap();
        assert_eq!(a.spectra(), b.spectra());
        for i in 0..a.len() {
            assert_eq!(
                a.entry(i).get(CanopyTrait::Lai),
                b.entry(i).get(CanopyTrait::Lai)
            );
        }
    }

    #[test]
    fn test_entry_access() {
        let lut = LookupTable::build(&lai_config(10), &geometry()).unwrap();
        let entry = lut.entry(3);
        assert_eq!(entry.index, 3);
        let lai = entry.get(CanopyTrait::Lai).unwrap();
        assert!((0.0..=8.0).contains(&lai));
        assert_eq!(entry.get(CanopyTrait::Cab), None);
        assert_eq!(
            lut.trait_column(CanopyTrait::Lai).unwrap()[3],
            lai
        );
    }

    #[test]
    fn test_invalid_draws_dropped() {
        // priors straddling the model domain boundary: negative LAI draws
        // must be dropped, not clamped
        let mut config = lai_config(40);
        config.rtm_params = vec![ParameterSpec::uniform(CanopyTrait::Lai, -4.0, 4.0)];
        let lut = LookupTable::build(&config, &geometry()).unwrap();
        assert!(lut.dropped() > 0);
        assert_eq!(lut.len() + lut.dropped(), 40);
        for i in 0..lut.len() {
            assert!(lut.entry(i).get(CanopyTrait::Lai).unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_green_peak_filter_accounts_for_drops() {
        let mut config = lai_config(30);
        config.green_peak_filter = true;
        let lut = LookupTable::build(&config, &geometry()).unwrap();
        assert_eq!(lut.len() + lut.dropped(), 30);
    }

    #[test]
    fn test_strict_mode_fails_on_dropped_draws() {
        let mut config = lai_config(40);
        config.rtm_params = vec![ParameterSpec::uniform(CanopyTrait::Lai, -4.0, 4.0)];
        config.lut_build_mode = LutBuildMode::Strict;
        match LookupTable::build(&config, &geometry()) {
            Err(RetrievalError::InsufficientLutSize { requested, built }) => {
                assert_eq!(requested, 40);
                assert!(built < 40);
            }
            other => panic!("expected InsufficientLutSize, got {:?}", other.map(|_| ())),
        }
    }
}
