//! Sensor spectral response: platform band sets and the convolution of
//! full-resolution spectra to sensor bands.
//!
//! Band responses are Gaussian (centre wavelength + FWHM per band), an
//! approximation of the tabulated instrument response functions.

use crate::core::prospect::{WL_MIN, WL_STEP};
use crate::types::{Platform, Reflectance, RetrievalError, RetrievalResult};

/// One sensor band: name, centre wavelength and full width at half maximum
/// (both nm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorBand {
    pub name: &'static str,
    pub center: f64,
    pub fwhm: f64,
}

const fn band(name: &'static str, center: f64, fwhm: f64) -> SensorBand {
    SensorBand { name, center, fwhm }
}

/// Sentinel-2A MSI land bands
const SENTINEL2A_BANDS: [SensorBand; 10] = [
    band("B02", 492.4, 66.0),
    band("B03", 559.8, 36.0),
    band("B04", 664.6, 31.0),
    band("B05", 704.1, 15.0),
    band("B06", 740.5, 15.0),
    band("B07", 782.8, 20.0),
    band("B08", 832.8, 106.0),
    band("B8A", 864.7, 21.0),
    band("B11", 1613.7, 91.0),
    band("B12", 2202.4, 175.0),
];

/// Sentinel-2B MSI land bands (slightly shifted centres)
const SENTINEL2B_BANDS: [SensorBand; 10] = [
    band("B02", 492.1, 66.0),
    band("B03", 559.0, 36.0),
    band("B04", 665.0, 31.0),
    band("B05", 703.8, 16.0),
    band("B06", 739.1, 15.0),
    band("B07", 779.7, 20.0),
    band("B08", 833.0, 106.0),
    band("B8A", 864.0, 22.0),
    band("B11", 1610.4, 94.0),
    band("B12", 2185.7, 185.0),
];

/// Landsat 8/9 OLI reflective bands
const LANDSAT_OLI_BANDS: [SensorBand; 6] = [
    band("blue", 482.0, 60.0),
    band("green", 561.4, 57.0),
    band("red", 654.6, 37.0),
    band("nir08", 865.0, 28.0),
    band("swir16", 1608.9, 85.0),
    band("swir22", 2200.7, 187.0),
];

/// Band set of a platform.
pub fn platform_bands(platform: Platform) -> &'static [SensorBand] {
    match platform {
        Platform::Sentinel2A => &SENTINEL2A_BANDS,
        Platform::Sentinel2B => &SENTINEL2B_BANDS,
        Platform::Landsat8 | Platform::Landsat9 => &LANDSAT_OLI_BANDS,
    }
}

/// Band names of a platform, in spectral order.
pub fn platform_band_names(platform: Platform) -> Vec<String> {
    platform_bands(platform)
        .iter()
        .map(|b| b.name.to_string())
        .collect()
}

/// Index of a named band within a platform's band set.
pub fn band_index(platform: Platform, name: &str) -> RetrievalResult<usize> {
    platform_bands(platform)
        .iter()
        .position(|b| b.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            RetrievalError::InvalidFormat(format!("unknown band {} for {}", name, platform))
        })
}

/// Convolve a full-resolution spectrum with the platform's spectral
/// response functions. `spectrum` must be on the model wavelength grid.
pub fn resample_to_bands(spectrum: &[f64], platform: Platform) -> Vec<Reflectance> {
    platform_bands(platform)
        .iter()
        .map(|b| band_response(spectrum, b) as Reflectance)
        .collect()
}

/// Gaussian-weighted mean of the spectrum over one band, truncated at
/// three standard deviations.
fn band_response(spectrum: &[f64], band: &SensorBand) -> f64 {
    let sigma = band.fwhm / 2.354_820_045;
    let lo = ((band.center - 3.0 * sigma - WL_MIN) / WL_STEP).floor().max(0.0) as usize;
    let hi = (((band.center + 3.0 * sigma - WL_MIN) / WL_STEP).ceil() as usize)
        .min(spectrum.len() - 1);

    let mut weighted = 0.0;
    let mut weight = 0.0;
    for i in lo..=hi {
        let wl = WL_MIN + i as f64 * WL_STEP;
        let d = (wl - band.center) / sigma;
        let w = (-0.5 * d * d).exp();
        weighted += spectrum[i] * w;
        weight += w;
    }
    weighted / weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prospect::N_WL;
    use approx::assert_relative_eq;

    #[test]
    fn test_band_counts() {
        assert_eq!(platform_bands(Platform::Sentinel2A).len(), 10);
        assert_eq!(platform_bands(Platform::Sentinel2B).len(), 10);
        assert_eq!(platform_bands(Platform::Landsat8).len(), 6);
    }

    #[test]
    fn test_flat_spectrum_preserved() {
        let spectrum = vec![0.37; N_WL];
        for r in resample_to_bands(&spectrum, Platform::Sentinel2A) {
            assert_relative_eq!(r, 0.37, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_step_spectrum_band_separation() {
        // red edge step: B04 should see the low side, B08 the high side
        let spectrum: Vec<f64> = (0..N_WL)
            .map(|i| if WL_MIN + i as f64 > 720.0 { 0.45 } else { 0.05 })
            .collect();
        let bands = resample_to_bands(&spectrum, Platform::Sentinel2A);
        let b04 = band_index(Platform::Sentinel2A, "B04").unwrap();
        let b08 = band_index(Platform::Sentinel2A, "B08").unwrap();
        assert!(bands[b04] < 0.1);
        assert!(bands[b08] > 0.4);
    }

    #[test]
    fn test_band_lookup() {
        assert_eq!(band_index(Platform::Sentinel2A, "b03").unwrap(), 1);
        assert!(band_index(Platform::Sentinel2A, "B99").is_err());
        assert_eq!(band_index(Platform::Landsat9, "nir08").unwrap(), 3);
    }
}
