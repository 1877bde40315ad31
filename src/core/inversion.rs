//! LUT inversion: spectral distance ranking of candidate solutions and
//! top-N ensemble aggregation into per-pixel trait estimates.

use std::collections::HashMap;

use ndarray::Array2;

use crate::config::{Aggregation, CostFunction, RetrievalConfig};
use crate::core::lut::LookupTable;
use crate::types::{
    BandImage, CanopyTrait, PixelObservation, RetrievalError, RetrievalResult, Scene,
    TraitEstimate,
};

/// One candidate solution: a LUT entry and its spectral distance to the
/// observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub distance: f32,
}

/// Explicitly ranked candidate collection, ascending by distance with ties
/// broken by LUT insertion order. The top-1 candidate is contained in every
/// top-k selection by construction.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Select the `n` best entries from per-entry distances.
    fn rank(distances: &[f32], n: usize) -> Self {
        let mut order: Vec<usize> = (0..distances.len()).collect();
        let by_distance = |a: &usize, b: &usize| {
            distances[*a]
                .partial_cmp(&distances[*b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        };
        if n < order.len() {
            order.select_nth_unstable_by(n - 1, by_distance);
            order.truncate(n);
        }
        order.sort_unstable_by(by_distance);

        Self {
            candidates: order
                .into_iter()
                .map(|index| Candidate {
                    index,
                    distance: distances[index],
                })
                .collect(),
        }
    }

    pub fn best(&self) -> &Candidate {
        &self.candidates[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Per-scene inversion result: one trait map per requested trait (NaN marks
/// no-data) and the count of pixels whose inversion failed.
#[derive(Debug, Clone)]
pub struct SceneTraits {
    pub maps: Vec<(CanopyTrait, BandImage)>,
    pub pixel_failures: usize,
}

/// Inverts pixel observations against a frozen LUT. The engine borrows the
/// LUT read-only, so one instance is shared by all pixel workers.
pub struct InversionEngine<'a> {
    lut: &'a LookupTable,
    cost_function: CostFunction,
    aggregation: Aggregation,
    n_solutions: usize,
    band_weights: Option<Vec<f32>>,
    traits: Vec<CanopyTrait>,
}

impl<'a> InversionEngine<'a> {
    pub fn new(config: &RetrievalConfig, lut: &'a LookupTable) -> RetrievalResult<Self> {
        if lut.is_empty() {
            return Err(RetrievalError::Config(
                "cannot invert against an empty LUT".to_string(),
            ));
        }
        if config.n_solutions == 0 || config.n_solutions > lut.len() {
            return Err(RetrievalError::Config(format!(
                "n_solutions {} outside [1, LUT size = {}]",
                config.n_solutions,
                lut.len()
            )));
        }
        if let Some(weights) = &config.band_weights {
            if weights.len() != lut.n_bands() {
                return Err(RetrievalError::Config(format!(
                    "{} band weights for {} bands",
                    weights.len(),
                    lut.n_bands()
                )));
            }
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f32>() <= 0.0 {
                return Err(RetrievalError::Config(
                    "band weights must be non-negative with a positive sum".to_string(),
                ));
            }
        }
        for t in &config.traits {
            if lut.trait_column(*t).is_none() {
                return Err(RetrievalError::Config(format!(
                    "trait {} is not a LUT dimension",
                    t
                )));
            }
        }
        Ok(Self {
            lut,
            cost_function: config.cost_function,
            aggregation: config.aggregation,
            n_solutions: config.n_solutions,
            band_weights: config.band_weights.clone(),
            traits: config.traits.clone(),
        })
    }

    pub fn n_solutions(&self) -> usize {
        self.n_solutions
    }

    /// Rank all LUT entries against one observation.
    pub fn rank_candidates(&self, pixel: &PixelObservation) -> RetrievalResult<CandidateSet> {
        self.rank_with(pixel, self.n_solutions)
    }

    /// Rank with an explicit solution count (1..=LUT size).
    pub fn rank_with(
        &self,
        pixel: &PixelObservation,
        n_solutions: usize,
    ) -> RetrievalResult<CandidateSet> {
        self.validate_observation(pixel)?;
        if n_solutions == 0 || n_solutions > self.lut.len() {
            return Err(RetrievalError::Config(format!(
                "n_solutions {} outside [1, LUT size = {}]",
                n_solutions,
                self.lut.len()
            )));
        }

        let distances = self.distances(&pixel.reflectance);
        Ok(CandidateSet::rank(&distances, n_solutions))
    }

    /// Invert one pixel: rank, select top-N, aggregate per requested trait.
    pub fn invert(
        &self,
        pixel: &PixelObservation,
    ) -> RetrievalResult<HashMap<CanopyTrait, TraitEstimate>> {
        let candidates = self.rank_candidates(pixel)?;
        Ok(self.aggregate(&candidates))
    }

    /// Collapse a ranked candidate set into per-trait estimates.
    pub fn aggregate(&self, candidates: &CandidateSet) -> HashMap<CanopyTrait, TraitEstimate> {
        let mut estimates = HashMap::with_capacity(self.traits.len());
        for t in &self.traits {
            // engine construction guarantees the column exists
            let column = match self.lut.trait_column(*t) {
                Some(c) => c,
                None => continue,
            };
            let values: Vec<f64> = candidates.iter().map(|c| column[c.index]).collect();
            let value = match self.aggregation {
                Aggregation::Median => median(&values),
                Aggregation::Mean => mean(&values),
            };
            estimates.insert(
                *t,
                TraitEstimate {
                    value,
                    dispersion: sample_std(&values),
                    n_solutions: values.len(),
                },
            );
        }
        estimates
    }

    /// Invert a whole scene. Per-pixel failures degrade that pixel to
    /// no-data and are counted; they never abort the scene.
    pub fn invert_scene(&self, scene: &Scene) -> RetrievalResult<SceneTraits> {
        let (rows, cols) = scene.shape();
        if scene.n_bands() != self.lut.n_bands() {
            return Err(RetrievalError::InvalidObservation(format!(
                "scene has {} bands, LUT {}",
                scene.n_bands(),
                self.lut.n_bands()
            )));
        }

        log::info!(
            "Inverting scene {} ({} x {} pixels, {} LUT entries)",
            scene.id,
            rows,
            cols,
            self.lut.len()
        );

        let results = self.invert_pixels(scene, rows, cols);

        let mut maps: Vec<(CanopyTrait, BandImage)> = self
            .traits
            .iter()
            .map(|t| (*t, Array2::from_elem((rows, cols), f32::NAN)))
            .collect();
        let mut pixel_failures = 0usize;
        for (pixel_idx, outcome) in results.into_iter().enumerate() {
            let (r, c) = (pixel_idx / cols, pixel_idx % cols);
            match outcome {
                PixelOutcome::Estimates(estimates) => {
                    for (t, map) in &mut maps {
                        if let Some(e) = estimates.get(t) {
                            map[[r, c]] = e.value as f32;
                        }
                    }
                }
                PixelOutcome::Failed => pixel_failures += 1,
                PixelOutcome::Masked => {}
            }
        }

        if pixel_failures > 0 {
            log::warn!(
                "Scene {}: {} pixels failed inversion and were set to no-data",
                scene.id,
                pixel_failures
            );
        }
        Ok(SceneTraits {
            maps,
            pixel_failures,
        })
    }

    #[cfg(feature = "parallel")]
    fn invert_pixels(&self, scene: &Scene, rows: usize, cols: usize) -> Vec<PixelOutcome> {
        use rayon::prelude::*;

        (0..rows * cols)
            .into_par_iter()
            .map(|i| self.invert_pixel_at(scene, i / cols, i % cols))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn invert_pixels(&self, scene: &Scene, rows: usize, cols: usize) -> Vec<PixelOutcome> {
        (0..rows * cols)
            .map(|i| self.invert_pixel_at(scene, i / cols, i % cols))
            .collect()
    }

    fn invert_pixel_at(&self, scene: &Scene, r: usize, c: usize) -> PixelOutcome {
        if scene.mask[[r, c]] {
            return PixelOutcome::Masked;
        }
        let reflectance: Vec<f32> = (0..scene.n_bands())
            .map(|b| scene.reflectance[[b, r, c]])
            .collect();
        let pixel = PixelObservation {
            reflectance,
            geometry: scene.geometry,
        };
        match self.invert(&pixel) {
            Ok(estimates) => PixelOutcome::Estimates(estimates),
            Err(e) => {
                log::debug!("pixel ({}, {}) failed: {}", r, c, e);
                PixelOutcome::Failed
            }
        }
    }

    fn validate_observation(&self, pixel: &PixelObservation) -> RetrievalResult<()> {
        if pixel.reflectance.len() != self.lut.n_bands() {
            return Err(RetrievalError::InvalidObservation(format!(
                "observation has {} bands, LUT {}",
                pixel.reflectance.len(),
                self.lut.n_bands()
            )));
        }
        if pixel.reflectance.iter().any(|r| !r.is_finite()) {
            return Err(RetrievalError::InvalidObservation(
                "observation contains non-finite reflectance".to_string(),
            ));
        }
        Ok(())
    }

    /// Spectral distance of the observation to every LUT entry.
    fn distances(&self, observed: &[f32]) -> Vec<f32> {
        let spectra = self.lut.spectra();
        let weight_sum: f32 = match &self.band_weights {
            Some(w) => w.iter().sum(),
            None => observed.len() as f32,
        };

        (0..spectra.nrows())
            .map(|i| {
                let simulated = spectra.row(i);
                let mut acc = 0.0f32;
                for (b, (&o, &s)) in observed.iter().zip(simulated).enumerate() {
                    let w = self.band_weights.as_ref().map_or(1.0, |ws| ws[b]);
                    let d = o - s;
                    acc += match self.cost_function {
                        CostFunction::Rmse => w * d * d,
                        CostFunction::Mae => w * d.abs(),
                    };
                }
                match self.cost_function {
                    CostFunction::Rmse => (acc / weight_sum).sqrt(),
                    CostFunction::Mae => acc / weight_sum,
                }
            })
            .collect()
    }
}

enum PixelOutcome {
    Estimates(HashMap<CanopyTrait, TraitEstimate>),
    Failed,
    Masked,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        0.5 * (sorted[mid - 1] + sorted[mid])
    }
}

/// Sample standard deviation; zero for a single value.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParameterSpec, SamplingMethod};
    use crate::types::ObservationGeometry;
    use approx::assert_relative_eq;

    fn build_lut(size: usize) -> (RetrievalConfig, LookupTable) {
        let config = RetrievalConfig {
            rtm_params: vec![
                ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0),
                ParameterSpec::uniform(CanopyTrait::Cab, 20.0, 60.0),
            ],
            lut_size: size,
            n_solutions: 5,
            sampling_method: SamplingMethod::Lhs,
            traits: vec![CanopyTrait::Lai, CanopyTrait::Cab],
            ..RetrievalConfig::default()
        };
        let lut = LookupTable::build(&config, &ObservationGeometry::new(35.0, 5.0, 120.0)).unwrap();
        (config, lut)
    }

    fn pixel_from_entry(lut: &LookupTable, index: usize) -> PixelObservation {
        PixelObservation {
            reflectance: lut.entry(index).spectrum.to_vec(),
            geometry: *lut.geometry(),
        }
    }

    #[test]
    fn test_exact_match_ranks_first_with_zero_distance() {
        let (config, lut) = build_lut(50);
        let engine = InversionEngine::new(&config, &lut).unwrap();
        let pixel = pixel_from_entry(&lut, 17);
        let candidates = engine.rank_candidates(&pixel).unwrap();
        assert_eq!(candidates.best().index, 17);
        assert_eq!(candidates.best().distance, 0.0);
    }

    #[test]
    fn test_top1_contained_in_topk() {
        let (config, lut) = build_lut(50);
        let engine = InversionEngine::new(&config, &lut).unwrap();
        let pixel = pixel_from_entry(&lut, 9);
        let top1 = engine.rank_with(&pixel, 1).unwrap();
        for k in [2, 5, 20, 50] {
            let topk = engine.rank_with(&pixel, k).unwrap();
            assert_eq!(topk.len(), k);
            assert_eq!(topk.best().index, top1.best().index);
            // ranking is ascending
            let dists: Vec<f32> = topk.iter().map(|c| c.distance).collect();
            assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_zero_dispersion_for_single_solution() {
        let (mut config, lut) = build_lut(50);
        config.n_solutions = 1;
        let engine = InversionEngine::new(&config, &lut).unwrap();
        let pixel = pixel_from_entry(&lut, 17);
        let estimates = engine.invert(&pixel).unwrap();
        let lai = estimates[&CanopyTrait::Lai];
        assert_eq!(lai.dispersion, 0.0);
        assert_eq!(lai.n_solutions, 1);
        assert_relative_eq!(
            lai.value,
            lut.entry(17).get(CanopyTrait::Lai).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_inversion_is_idempotent() {
        let (config, lut) = build_lut(60);
        let engine = InversionEngine::new(&config, &lut).unwrap();
        let pixel = pixel_from_entry(&lut, 23);
        let a = engine.invert(&pixel).unwrap();
        let b = engine.invert(&pixel).unwrap();
        assert_eq!(a[&CanopyTrait::Lai], b[&CanopyTrait::Lai]);
        assert_eq!(a[&CanopyTrait::Cab], b[&CanopyTrait::Cab]);
    }

    #[test]
    fn test_tie_break_by_insertion_order() {
        // uniform distances: selection must follow LUT order
        let distances = vec![0.5f32; 8];
        let set = CandidateSet::rank(&distances, 3);
        let indices: Vec<usize> = set.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_invalid_observation_rejected() {
        let (config, lut) = build_lut(20);
        let engine = InversionEngine::new(&config, &lut).unwrap();

        let bad_band_count = PixelObservation {
            reflectance: vec![0.1; 3],
            geometry: *lut.geometry(),
        };
        assert!(matches!(
            engine.invert(&bad_band_count),
            Err(RetrievalError::InvalidObservation(_))
        ));

        let mut nodata = pixel_from_entry(&lut, 0);
        nodata.reflectance[4] = f32::NAN;
        assert!(matches!(
            engine.invert(&nodata),
            Err(RetrievalError::InvalidObservation(_))
        ));
    }

    #[test]
    fn test_n_solutions_validated_against_lut() {
        let (mut config, lut) = build_lut(20);
        config.n_solutions = 21;
        assert!(InversionEngine::new(&config, &lut).is_err());
        config.n_solutions = 20;
        assert!(InversionEngine::new(&config, &lut).is_ok());
    }

    #[test]
    fn test_band_weights_validated() {
        let (mut config, lut) = build_lut(20);
        config.band_weights = Some(vec![1.0; 3]);
        assert!(InversionEngine::new(&config, &lut).is_err());
        config.band_weights = Some(vec![0.0; lut.n_bands()]);
        assert!(InversionEngine::new(&config, &lut).is_err());
        config.band_weights = Some(vec![1.0; lut.n_bands()]);
        assert!(InversionEngine::new(&config, &lut).is_ok());
    }

    #[test]
    fn test_mean_and_median_aggregation() {
        let (mut config, lut) = build_lut(30);
        let pixel = pixel_from_entry(&lut, 5);

        config.aggregation = Aggregation::Median;
        let med = InversionEngine::new(&config, &lut)
            .unwrap()
            .invert(&pixel)
            .unwrap()[&CanopyTrait::Lai];
        config.aggregation = Aggregation::Mean;
        let avg = InversionEngine::new(&config, &lut)
            .unwrap()
            .invert(&pixel)
            .unwrap()[&CanopyTrait::Lai];

        // both live inside the candidate value range
        let candidates = InversionEngine::new(&config, &lut)
            .unwrap()
            .rank_candidates(&pixel)
            .unwrap();
        let column = lut.trait_column(CanopyTrait::Lai).unwrap();
        let values: Vec<f64> = candidates.iter().map(|c| column[c.index]).collect();
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        for e in [med, avg] {
            assert!(e.value >= lo && e.value <= hi);
        }
    }

    #[test]
    fn test_median_helpers() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(sample_std(&[5.0]), 0.0);
        assert_relative_eq!(sample_std(&[1.0, 2.0, 3.0]), 1.0, epsilon = 1e-12);
    }
}
