//! Forward model evaluator: one sampled parameter vector plus an
//! observation geometry in, one sensor-band reflectance spectrum out.
//!
//! The evaluator is a pure function of its inputs and holds only
//! precomputed wavelength-dependent constants, so it is safely shared
//! across parallel LUT workers.

use crate::core::prospect::{LeafModel, LeafParams};
use crate::core::sail::{CanopyParams, SailModel};
use crate::core::sampling::ParameterVector;
use crate::core::sensor;
use crate::types::{
    CanopyTrait, ObservationGeometry, Platform, Reflectance, RetrievalError, RetrievalResult,
};

/// Valid operating range of every model input. Out-of-range values are
/// rejected, never clamped.
const DOMAIN: [(CanopyTrait, f64, f64); 16] = [
    (CanopyTrait::N, 1.0, 3.5),
    (CanopyTrait::Lai, 0.0, 15.0),
    (CanopyTrait::Cab, 0.0, 120.0),
    (CanopyTrait::Car, 0.0, 40.0),
    (CanopyTrait::Cbrown, 0.0, 2.0),
    (CanopyTrait::Cw, 0.0, 0.1),
    (CanopyTrait::Cm, 0.0, 0.05),
    (CanopyTrait::Ant, 0.0, 40.0),
    (CanopyTrait::Lidfa, -1.0, 1.0),
    (CanopyTrait::Lidfb, -1.0, 1.0),
    (CanopyTrait::Hspot, 0.0, 1.0),
    (CanopyTrait::Rsoil, 0.0, 2.0),
    (CanopyTrait::Psoil, 0.0, 1.0),
    (CanopyTrait::Tts, 0.0, 89.0),
    (CanopyTrait::Tto, 0.0, 89.0),
    (CanopyTrait::Psi, 0.0, 360.0),
];

/// Model defaults for parameters without a prior, after the PROSAIL
/// conventions for green vegetation.
fn default_value(name: CanopyTrait) -> f64 {
    match name {
        CanopyTrait::N => 1.5,
        CanopyTrait::Lai => 3.0,
        CanopyTrait::Cab => 40.0,
        CanopyTrait::Car => 8.0,
        CanopyTrait::Cbrown => 0.0,
        CanopyTrait::Cw => 0.01,
        CanopyTrait::Cm => 0.008,
        CanopyTrait::Ant => 0.0,
        CanopyTrait::Lidfa => -0.35,
        CanopyTrait::Lidfb => -0.15,
        CanopyTrait::Hspot => 0.01,
        CanopyTrait::Rsoil => 1.0,
        CanopyTrait::Psoil => 0.7,
        CanopyTrait::Tts => 45.0,
        CanopyTrait::Tto => 0.0,
        CanopyTrait::Psi => 0.0,
    }
}

/// PROSAIL forward simulator bound to one platform's band set.
pub struct ForwardModel {
    leaf: LeafModel,
    canopy: SailModel,
    platform: Platform,
}

impl ForwardModel {
    pub fn new(platform: Platform) -> Self {
        log::debug!("Initializing forward model for {}", platform);
        Self {
            leaf: LeafModel::new(),
            canopy: SailModel::new(),
            platform,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn band_names(&self) -> Vec<String> {
        sensor::platform_band_names(self.platform)
    }

    /// Simulate sensor-band reflectance for one parameter vector under the
    /// given geometry. Angles present in the vector (tts/tto/psi priors)
    /// take precedence over the scene geometry.
    pub fn simulate(
        &self,
        vector: &ParameterVector,
        geometry: &ObservationGeometry,
    ) -> RetrievalResult<Vec<Reflectance>> {
        let spectrum = self.simulate_spectrum(vector, geometry)?;
        Ok(sensor::resample_to_bands(&spectrum, self.platform))
    }

    /// Full-resolution variant of [`simulate`](Self::simulate).
    pub fn simulate_spectrum(
        &self,
        vector: &ParameterVector,
        geometry: &ObservationGeometry,
    ) -> RetrievalResult<Vec<f64>> {
        validate_domain(vector)?;

        let value = |name: CanopyTrait| vector.get(name).unwrap_or_else(|| default_value(name));

        let leaf_params = LeafParams {
            n: value(CanopyTrait::N),
            cab: value(CanopyTrait::Cab),
            car: value(CanopyTrait::Car),
            cbrown: value(CanopyTrait::Cbrown),
            cw: value(CanopyTrait::Cw),
            cm: value(CanopyTrait::Cm),
            ant: value(CanopyTrait::Ant),
        };
        let canopy_params = CanopyParams {
            lai: value(CanopyTrait::Lai),
            lidfa: value(CanopyTrait::Lidfa),
            lidfb: value(CanopyTrait::Lidfb),
            hspot: value(CanopyTrait::Hspot),
            rsoil: value(CanopyTrait::Rsoil),
            psoil: value(CanopyTrait::Psoil),
        };
        let geometry = ObservationGeometry::new(
            vector.get(CanopyTrait::Tts).unwrap_or(geometry.sun_zenith),
            vector.get(CanopyTrait::Tto).unwrap_or(geometry.view_zenith),
            vector
                .get(CanopyTrait::Psi)
                .unwrap_or(geometry.relative_azimuth),
        );
        geometry.validate().map_err(|_| RetrievalError::ModelDomain {
            parameter: CanopyTrait::Tts,
            value: geometry.sun_zenith,
            constraint: format!(
                "geometry ({}, {}, {}) invalid for the canopy model",
                geometry.sun_zenith, geometry.view_zenith, geometry.relative_azimuth
            ),
        })?;

        let optics = self.leaf.simulate(&leaf_params);
        Ok(self.canopy.simulate(&optics, &canopy_params, &geometry))
    }
}

fn domain_bounds(name: CanopyTrait) -> (f64, f64) {
    match DOMAIN.iter().find(|(n, _, _)| *n == name) {
        Some(&(_, lo, hi)) => (lo, hi),
        None => (f64::NEG_INFINITY, f64::INFINITY),
    }
}

/// Reject any value outside the model's operating range.
fn validate_domain(vector: &ParameterVector) -> RetrievalResult<()> {
    for (name, value) in vector.iter() {
        let (lo, hi) = domain_bounds(name);
        if !value.is_finite() || value < lo || value > hi {
            return Err(RetrievalError::ModelDomain {
                parameter: name,
                value,
                constraint: format!("valid range [{}, {}]", lo, hi),
            });
        }
    }

    // the bimodal LIDF is only defined on |a| + |b| <= 1
    let a = vector
        .get(CanopyTrait::Lidfa)
        .unwrap_or_else(|| default_value(CanopyTrait::Lidfa));
    let b = vector
        .get(CanopyTrait::Lidfb)
        .unwrap_or_else(|| default_value(CanopyTrait::Lidfb));
    if a.abs() + b.abs() > 1.0 {
        return Err(RetrievalError::ModelDomain {
            parameter: CanopyTrait::Lidfa,
            value: a,
            constraint: format!("|lidfa| + |lidfb| = {} must not exceed 1", a.abs() + b.abs()),
        });
    }
    Ok(())
}
