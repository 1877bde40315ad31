//! Parameter space sampling for LUT construction.
//!
//! Two designs are supported: a deterministic stratified low-discrepancy
//! design (`frs`) and seeded Latin hypercube sampling (`lhs`).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{Distribution, ParameterSpec, SamplingMethod};
use crate::types::{CanopyTrait, RetrievalResult};

/// One concrete draw from the parameter priors: an ordered mapping from
/// parameter identifier to value. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    entries: Vec<(CanopyTrait, f64)>,
}

impl ParameterVector {
    pub fn new(entries: Vec<(CanopyTrait, f64)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: CanopyTrait) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanopyTrait, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = CanopyTrait> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Draws parameter vectors from the configured priors.
pub struct Sampler<'a> {
    specs: &'a [ParameterSpec],
    method: SamplingMethod,
    seed: u64,
}

impl<'a> Sampler<'a> {
    pub fn new(
        specs: &'a [ParameterSpec],
        method: SamplingMethod,
        seed: u64,
    ) -> RetrievalResult<Self> {
        for spec in specs {
            spec.distribution.validate()?;
        }
        Ok(Self {
            specs,
            method,
            seed,
        })
    }

    /// Produce exactly `n` parameter vectors.
    pub fn sample(&self, n: usize) -> RetrievalResult<Vec<ParameterVector>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        log::debug!(
            "Sampling {} vectors over {} parameters ({:?})",
            n,
            self.specs.len(),
            self.method
        );
        let vectors = match self.method {
            SamplingMethod::Frs => self.sample_factorial(n),
            SamplingMethod::Lhs => self.sample_lhs(n),
        };
        debug_assert_eq!(vectors.len(), n);
        Ok(vectors)
    }

    /// Regular stratified design: a Halton low-discrepancy sequence, one
    /// prime base per free parameter. Fully deterministic (no seed), with
    /// well-covered univariate margins for any n and dimensionality.
    fn sample_factorial(&self, n: usize) -> Vec<ParameterVector> {
        let mut free_pos = 0usize;
        let bases: Vec<Option<u64>> = self
            .specs
            .iter()
            .map(|s| {
                if s.distribution.is_fixed() {
                    None
                } else {
                    let base = HALTON_PRIMES[free_pos % HALTON_PRIMES.len()];
                    free_pos += 1;
                    Some(base)
                }
            })
            .collect();

        (0..n)
            .map(|idx| {
                let entries = self
                    .specs
                    .iter()
                    .zip(&bases)
                    .map(|(spec, base)| {
                        let value = match base {
                            // index 0 of the sequence is skipped: it is 0 in
                            // every base and would pin the first draw to the
                            // lower bound of every parameter
                            Some(b) => {
                                let p = radical_inverse(idx as u64 + 1, *b);
                                quantile(&spec.distribution, p.clamp(1e-12, 1.0 - 1e-12))
                            }
                            None => spec.distribution.bounds().0,
                        };
                        (spec.name, value)
                    })
                    .collect();
                ParameterVector::new(entries)
            })
            .collect()
    }

    /// Latin hypercube: n equal-probability strata per parameter, one draw
    /// per stratum, strata paired across parameters by independent seeded
    /// permutations.
    fn sample_lhs(&self, n: usize) -> Vec<ParameterVector> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        // per parameter: the probability assigned to each of the n draws
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            if spec.distribution.is_fixed() {
                columns.push(vec![0.5; n]);
                continue;
            }
            let mut strata: Vec<usize> = (0..n).collect();
            strata.shuffle(&mut rng);
            let column = strata
                .into_iter()
                .map(|s| (s as f64 + rng.gen::<f64>()) / n as f64)
                .collect();
            columns.push(column);
        }

        (0..n)
            .map(|row| {
                let entries = self
                    .specs
                    .iter()
                    .zip(&columns)
                    .map(|(spec, col)| (spec.name, quantile(&spec.distribution, col[row])))
                    .collect();
                ParameterVector::new(entries)
            })
            .collect()
    }
}

/// Prime bases of the Halton sequence, one per sampled dimension.
const HALTON_PRIMES: [u64; 16] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

/// Van der Corput radical inverse of `index` in the given base.
fn radical_inverse(mut index: u64, base: u64) -> f64 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f64;
    while index > 0 {
        result += (index % base) as f64 * fraction;
        index /= base;
        fraction /= base as f64;
    }
    result
}

/// Inverse CDF of a prior distribution at probability `p` in (0, 1).
fn quantile(dist: &Distribution, p: f64) -> f64 {
    match *dist {
        Distribution::Uniform { min, max } => min + p * (max - min),
        Distribution::Gaussian {
            mean,
            std,
            min,
            max,
        } => {
            // restrict the quantile range to the truncation interval so the
            // draw is from the truncated law, not clipped afterwards
            let p_lo = norm_cdf((min - mean) / std);
            let p_hi = norm_cdf((max - mean) / std);
            let value = mean + std * norm_ppf(p_lo + p * (p_hi - p_lo));
            // guard against round-off at the interval edges
            value.clamp(min, max)
        }
        Distribution::Fixed { value } => value,
    }
}

/// Standard normal CDF via the Abramowitz & Stegun erf approximation.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    // A&S 7.1.26, |error| < 1.5e-7
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let y = 1.0
        - (((((1.061_405_429 * t - 1.453_152_027) * t) + 1.421_413_741) * t - 0.284_496_736)
            * t
            + 0.254_829_592)
            * t
            * (-x * x).exp();
    sign * y
}

/// Standard normal inverse CDF (Acklam's rational approximation).
fn norm_ppf(p: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0);

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterSpec;
    use crate::types::CanopyTrait;

    fn test_specs() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0),
            ParameterSpec::gaussian(CanopyTrait::Cab, 45.0, 15.0, 10.0, 80.0),
            ParameterSpec::fixed(CanopyTrait::Cbrown, 0.0),
        ]
    }

    #[test]
    fn test_sample_count_and_bounds() {
        let specs = test_specs();
        for method in [SamplingMethod::Frs, SamplingMethod::Lhs] {
            for n in [1, 2, 7, 64, 500] {
                let sampler = Sampler::new(&specs, method, 42).unwrap();
                let vectors = sampler.sample(n).unwrap();
                assert_eq!(vectors.len(), n);
                for v in &vectors {
                    for spec in &specs {
                        let value = v.get(spec.name).unwrap();
                        let (lo, hi) = spec.distribution.bounds();
                        assert!(
                            value >= lo && value <= hi,
                            "{} = {} outside [{}, {}]",
                            spec.name,
                            value,
                            lo,
                            hi
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_fixed_parameter_never_varies() {
        let specs = test_specs();
        let sampler = Sampler::new(&specs, SamplingMethod::Lhs, 7).unwrap();
        for v in sampler.sample(50).unwrap() {
            assert_eq!(v.get(CanopyTrait::Cbrown), Some(0.0));
        }
    }

    #[test]
    fn test_lhs_stratification() {
        // one value per equal-probability stratum for a uniform marginal
        let specs = vec![ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0)];
        let n = 16;
        let sampler = Sampler::new(&specs, SamplingMethod::Lhs, 123).unwrap();
        let vectors = sampler.sample(n).unwrap();

        let mut hits = vec![0usize; n];
        for v in &vectors {
            let value = v.get(CanopyTrait::Lai).unwrap();
            let stratum = ((value / 8.0) * n as f64).floor() as usize;
            hits[stratum.min(n - 1)] += 1;
        }
        assert!(hits.iter().all(|&h| h == 1), "strata hits: {:?}", hits);
    }

    #[test]
    fn test_lhs_seed_reproducibility() {
        let specs = test_specs();
        let a = Sampler::new(&specs, SamplingMethod::Lhs, 42)
            .unwrap()
            .sample(20)
            .unwrap();
        let b = Sampler::new(&specs, SamplingMethod::Lhs, 42)
            .unwrap()
            .sample(20)
            .unwrap();
        let c = Sampler::new(&specs, SamplingMethod::Lhs, 43)
            .unwrap()
            .sample(20)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_frs_is_deterministic() {
        let specs = test_specs();
        // FRS ignores the seed entirely
        let a = Sampler::new(&specs, SamplingMethod::Frs, 1)
            .unwrap()
            .sample(30)
            .unwrap();
        let b = Sampler::new(&specs, SamplingMethod::Frs, 99)
            .unwrap()
            .sample(30)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fewer_samples_than_parameters() {
        let specs = test_specs();
        let sampler = Sampler::new(&specs, SamplingMethod::Lhs, 42).unwrap();
        assert_eq!(sampler.sample(1).unwrap().len(), 1);
        let sampler = Sampler::new(&specs, SamplingMethod::Frs, 42).unwrap();
        assert_eq!(sampler.sample(2).unwrap().len(), 2);
    }

    #[test]
    fn test_radical_inverse() {
        use approx::assert_relative_eq;
        // base 2: 1 -> 0.5, 2 -> 0.25, 3 -> 0.75
        assert_relative_eq!(radical_inverse(1, 2), 0.5);
        assert_relative_eq!(radical_inverse(2, 2), 0.25);
        assert_relative_eq!(radical_inverse(3, 2), 0.75);
        // base 3: 1 -> 1/3, 2 -> 2/3, 3 -> 1/9
        assert_relative_eq!(radical_inverse(3, 3), 1.0 / 9.0);
    }

    #[test]
    fn test_frs_marginal_coverage() {
        // every quarter of each marginal receives draws
        let specs = test_specs();
        let sampler = Sampler::new(&specs, SamplingMethod::Frs, 0).unwrap();
        let vectors = sampler.sample(64).unwrap();
        let mut quartile_hits = [0usize; 4];
        for v in &vectors {
            let lai = v.get(CanopyTrait::Lai).unwrap();
            quartile_hits[((lai / 8.0) * 4.0).floor().min(3.0) as usize] += 1;
        }
        assert!(
            quartile_hits.iter().all(|&h| h > 0),
            "quartile hits: {:?}",
            quartile_hits
        );
    }

    #[test]
    fn test_norm_ppf_symmetry() {
        use approx::assert_relative_eq;
        assert_relative_eq!(norm_ppf(0.5), 0.0, epsilon = 1e-8);
        assert_relative_eq!(norm_ppf(0.975), 1.959964, epsilon = 1e-4);
        assert_relative_eq!(norm_ppf(0.025), -norm_ppf(0.975), epsilon = 1e-8);
        // cdf and ppf are inverses
        for p in [0.01, 0.2, 0.5, 0.8, 0.99] {
            assert_relative_eq!(norm_cdf(norm_ppf(p)), p, epsilon = 1e-6);
        }
    }
}
