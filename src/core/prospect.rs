//! Leaf-level optical model: a generalized plate model in the PROSPECT
//! family. Pigment, water and dry-matter absorption are combined into a
//! per-plate absorption coefficient, a single plate is resolved against the
//! air/leaf interfaces, and the Stokes system extends the plate to a
//! (possibly fractional) stack of `n` layers.
//!
//! Specific absorption and refractive-index spectra are compact analytic
//! fits rather than tabulated coefficients; see DESIGN.md.

/// Lower end of the simulated spectral grid (nm)
pub const WL_MIN: f64 = 400.0;
/// Upper end of the simulated spectral grid (nm)
pub const WL_MAX: f64 = 2500.0;
/// Grid step (nm)
pub const WL_STEP: f64 = 1.0;
/// Number of grid points
pub const N_WL: usize = 2101;

/// Incidence angle of the topmost leaf interface (deg), after the plate
/// model convention.
const INCIDENCE_DEG: f64 = 40.0;

/// The 1 nm wavelength grid shared by the leaf and canopy models.
pub fn wavelength_grid() -> Vec<f64> {
    (0..N_WL).map(|i| WL_MIN + i as f64 * WL_STEP).collect()
}

/// Leaf biochemistry and structure inputs.
#[derive(Debug, Clone, Copy)]
pub struct LeafParams {
    /// Structure parameter (number of plates, may be fractional)
    pub n: f64,
    /// Chlorophyll a+b (ug cm-2)
    pub cab: f64,
    /// Carotenoids (ug cm-2)
    pub car: f64,
    /// Brown pigment fraction
    pub cbrown: f64,
    /// Equivalent water thickness (cm)
    pub cw: f64,
    /// Dry matter (g cm-2)
    pub cm: f64,
    /// Anthocyanins (ug cm-2)
    pub ant: f64,
}

/// Leaf reflectance/transmittance on the full spectral grid.
#[derive(Debug, Clone)]
pub struct LeafOptics {
    pub reflectance: Vec<f64>,
    pub transmittance: Vec<f64>,
}

/// Plate-model evaluator with precomputed interface spectra.
///
/// The refractive index and both interface transmissivities depend only on
/// wavelength, so they are computed once at construction and shared by all
/// simulations.
pub struct LeafModel {
    wavelengths: Vec<f64>,
    /// Directional interface transmissivity (top surface)
    tav_alpha: Vec<f64>,
    /// Hemispherical interface transmissivity (inner interfaces)
    tav_diffuse: Vec<f64>,
    refractive: Vec<f64>,
    sac_cab: Vec<f64>,
    sac_car: Vec<f64>,
    sac_ant: Vec<f64>,
    sac_brown: Vec<f64>,
    sac_water: Vec<f64>,
    sac_dm: Vec<f64>,
}

impl LeafModel {
    pub fn new() -> Self {
        let wavelengths = wavelength_grid();
        let refractive: Vec<f64> = wavelengths.iter().map(|&wl| refractive_index(wl)).collect();
        let tav_alpha = refractive
            .iter()
            .map(|&nr| tav_directional(INCIDENCE_DEG.to_radians(), nr))
            .collect();
        let tav_diffuse = refractive.iter().map(|&nr| tav_hemispherical(nr)).collect();

        let shape = |f: fn(f64) -> f64| -> Vec<f64> { wavelengths.iter().map(|&wl| f(wl)).collect() };

        Self {
            tav_alpha,
            tav_diffuse,
            refractive,
            sac_cab: shape(sac_cab),
            sac_car: shape(sac_car),
            sac_ant: shape(sac_ant),
            sac_brown: shape(sac_brown),
            sac_water: shape(sac_water),
            sac_dm: shape(sac_dm),
            wavelengths,
        }
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Simulate hemispherical leaf reflectance and transmittance. Pure:
    /// identical parameters yield identical spectra.
    pub fn simulate(&self, p: &LeafParams) -> LeafOptics {
        let mut reflectance = Vec::with_capacity(N_WL);
        let mut transmittance = Vec::with_capacity(N_WL);

        for i in 0..N_WL {
            // per-plate absorption coefficient; the floor keeps the Stokes
            // system away from its lossless singularity
            let k = ((p.cab * self.sac_cab[i]
                + p.car * self.sac_car[i]
                + p.ant * self.sac_ant[i]
                + p.cbrown * self.sac_brown[i]
                + p.cw * self.sac_water[i]
                + p.cm * self.sac_dm[i])
                / p.n)
                .max(1e-6);
            let theta = plate_transmissivity(k);

            let nr = self.refractive[i];
            let talf = self.tav_alpha[i];
            let t12 = self.tav_diffuse[i];
            // internal diffuse transmissivity scales with 1/nr^2
            let t21 = t12 / (nr * nr);
            let ralf = 1.0 - talf;
            let r12 = 1.0 - t12;
            let r21 = 1.0 - t21;

            let denom = 1.0 - r21 * r21 * theta * theta;
            // top plate under directional incidence
            let ta = talf * t21 * theta / denom;
            let ra = ralf + r21 * theta * theta * talf * t21 / denom;
            // inner plates under diffuse incidence
            let t90 = t12 * t21 * theta / denom;
            let r90 = r12 + r21 * theta * theta * t12 * t21 / denom;

            let (refl, trans) = stokes_stack(ra, ta, r90, t90, p.n);
            reflectance.push(refl.clamp(0.0, 1.0));
            transmittance.push(trans.clamp(0.0, 1.0));
        }

        LeafOptics {
            reflectance,
            transmittance,
        }
    }
}

impl Default for LeafModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Stokes system: top plate (ra, ta) over n-1 identical diffuse plates
/// (r90, t90).
fn stokes_stack(ra: f64, ta: f64, r90: f64, t90: f64, n: f64) -> (f64, f64) {
    // near-total absorption collapses the stack to the top plate
    if r90 < 1e-9 || t90 < 1e-9 {
        return (ra, ta * t90.max(0.0).powf(n - 1.0));
    }

    let delta = ((t90 * t90 - r90 * r90 - 1.0).powi(2) - 4.0 * r90 * r90).max(0.0);
    let d = delta.sqrt();
    let beta = (1.0 + r90 * r90 - t90 * t90 - d) / (2.0 * r90);
    let va = (1.0 + r90 * r90 - t90 * t90 + d) / (2.0 * r90);
    let vb = (beta * (va - r90) / (va * (beta - r90)).max(1e-12))
        .max(1e-12)
        .sqrt();

    let vbnn = vb.powf(n - 1.0);
    let vbnn_inv = 1.0 / vbnn;
    let va_inv = 1.0 / va;
    let s1 = ta * t90 * (vbnn - vbnn_inv);
    let s2 = ta * (va - va_inv);
    let s3 = va * vbnn - va_inv * vbnn_inv - r90 * (vbnn - vbnn_inv);

    (ra + s1 / s3, s2 / s3)
}

/// Transmissivity of one absorbing plate: (1-k)e^{-k} + k^2 E1(k).
fn plate_transmissivity(k: f64) -> f64 {
    if k <= 0.0 {
        return 1.0;
    }
    ((1.0 - k) * (-k).exp() + k * k * expint_e1(k)).clamp(0.0, 1.0)
}

/// Exponential integral E1 (Abramowitz & Stegun 5.1.53 / 5.1.56).
fn expint_e1(x: f64) -> f64 {
    debug_assert!(x > 0.0);
    if x <= 1.0 {
        let a = [
            -0.577_215_66,
            0.999_991_93,
            -0.249_910_55,
            0.055_199_68,
            -0.009_760_04,
            0.001_078_57,
        ];
        -x.ln() + a[0] + x * (a[1] + x * (a[2] + x * (a[3] + x * (a[4] + x * a[5]))))
    } else {
        let num = x * x + 2.334_733 * x + 0.250_621;
        let den = x * x + 3.330_657 * x + 1.681_534;
        (-x).exp() / x * num / den
    }
}

/// Leaf refractive index, slowly decreasing with wavelength.
fn refractive_index(wl: f64) -> f64 {
    1.40 + 0.12 * (-(wl - WL_MIN) / 800.0).exp()
}

/// Fresnel transmittance (unpolarized) through a dielectric interface at a
/// single incidence angle.
fn tav_directional(theta_i: f64, nr: f64) -> f64 {
    let si = theta_i.sin();
    let ci = theta_i.cos();
    let st = (si / nr).min(1.0);
    let ct = (1.0 - st * st).sqrt();

    let rs = ((ci - nr * ct) / (ci + nr * ct)).powi(2);
    let rp = ((nr * ci - ct) / (nr * ci + ct)).powi(2);
    1.0 - 0.5 * (rs + rp)
}

/// Hemispherical interface transmissivity: Fresnel transmittance integrated
/// over an isotropic incident radiance field.
fn tav_hemispherical(nr: f64) -> f64 {
    const STEPS: usize = 90;
    let mut sum = 0.0;
    let mut weight = 0.0;
    for i in 0..STEPS {
        let theta = (i as f64 + 0.5) / STEPS as f64 * std::f64::consts::FRAC_PI_2;
        // projected solid angle weighting sin(2 theta)
        let w = (2.0 * theta).sin();
        sum += tav_directional(theta, nr) * w;
        weight += w;
    }
    sum / weight
}

// --- specific absorption spectra (analytic fits, see DESIGN.md) ---

fn gauss(wl: f64, center: f64, sigma: f64) -> f64 {
    let d = (wl - center) / sigma;
    (-0.5 * d * d).exp()
}

/// Chlorophyll a+b, per ug cm-2: Soret band plus the red absorption maximum.
fn sac_cab(wl: f64) -> f64 {
    if wl > 780.0 {
        return 0.0;
    }
    0.023 * (0.9 * gauss(wl, 430.0, 35.0) + gauss(wl, 662.0, 30.0) + 0.25 * gauss(wl, 560.0, 90.0))
}

/// Carotenoids, per ug cm-2: blue absorption only.
fn sac_car(wl: f64) -> f64 {
    if wl > 560.0 {
        return 0.0;
    }
    0.06 * (gauss(wl, 450.0, 25.0) + 0.8 * gauss(wl, 482.0, 22.0))
}

/// Anthocyanins, per ug cm-2: green absorption maximum.
fn sac_ant(wl: f64) -> f64 {
    if wl > 700.0 {
        return 0.0;
    }
    0.04 * gauss(wl, 550.0, 30.0)
}

/// Brown pigments: strong in the blue, decaying through the visible.
fn sac_brown(wl: f64) -> f64 {
    if wl > 1100.0 {
        return 0.0;
    }
    3.0 * (-(wl - WL_MIN) / 300.0).exp()
}

/// Liquid water, per cm EWT: the classical absorption maxima at 970, 1200,
/// 1450, 1940 nm and the rise towards 2500 nm.
fn sac_water(wl: f64) -> f64 {
    if wl < 800.0 {
        return 0.0;
    }
    0.4 * gauss(wl, 970.0, 35.0)
        + 1.2 * gauss(wl, 1200.0, 60.0)
        + 30.0 * gauss(wl, 1450.0, 65.0)
        + 100.0 * gauss(wl, 1940.0, 90.0)
        + 50.0 * gauss(wl, 2500.0, 180.0)
}

/// Dry matter, per g cm-2: weak through the VNIR, rising into the SWIR
/// with cellulose/lignin features near 1720 and 2100 nm.
fn sac_dm(wl: f64) -> f64 {
    5.0 + 40.0 * ((wl - 800.0) / 1700.0).max(0.0)
        + 30.0 * gauss(wl, 1720.0, 80.0)
        + 40.0 * gauss(wl, 2100.0, 150.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green_leaf() -> LeafParams {
        LeafParams {
            n: 1.5,
            cab: 40.0,
            car: 8.0,
            cbrown: 0.0,
            cw: 0.01,
            cm: 0.008,
            ant: 0.0,
        }
    }

    #[test]
    fn test_determinism() {
        let model = LeafModel::new();
        let a = model.simulate(&green_leaf());
        let b = model.simulate(&green_leaf());
        assert_eq!(a.reflectance, b.reflectance);
        assert_eq!(a.transmittance, b.transmittance);
    }

    #[test]
    fn test_energy_conservation() {
        let model = LeafModel::new();
        let optics = model.simulate(&green_leaf());
        for i in 0..N_WL {
            let r = optics.reflectance[i];
            let t = optics.transmittance[i];
            assert!(r >= 0.0 && t >= 0.0);
            assert!(
                r + t <= 1.0 + 1e-9,
                "R + T = {} exceeds unity at index {}",
                r + t,
                i
            );
        }
    }

    #[test]
    fn test_green_leaf_spectral_shape() {
        let model = LeafModel::new();
        let optics = model.simulate(&green_leaf());
        let at = |wl: f64| optics.reflectance[(wl - WL_MIN) as usize];

        // red absorption well below the NIR plateau
        assert!(at(670.0) < 0.15);
        assert!(at(850.0) > 0.30);
        // green bump between the blue and red chlorophyll bands
        assert!(at(550.0) > at(670.0));
        assert!(at(550.0) > at(450.0));
        // water absorption dip at 1450 nm relative to 1650 nm
        assert!(at(1450.0) < at(1650.0));
    }

    #[test]
    fn test_chlorophyll_darkens_red() {
        let model = LeafModel::new();
        let mut lo = green_leaf();
        lo.cab = 20.0;
        let mut hi = green_leaf();
        hi.cab = 70.0;
        let r_lo = model.simulate(&lo).reflectance[(670.0 - WL_MIN) as usize];
        let r_hi = model.simulate(&hi).reflectance[(670.0 - WL_MIN) as usize];
        assert!(r_hi < r_lo);
    }

    #[test]
    fn test_structure_parameter_brightens_nir() {
        let model = LeafModel::new();
        let mut thin = green_leaf();
        thin.n = 1.0;
        let mut thick = green_leaf();
        thick.n = 2.5;
        let idx = (850.0 - WL_MIN) as usize;
        assert!(model.simulate(&thick).reflectance[idx] > model.simulate(&thin).reflectance[idx]);
    }

    #[test]
    fn test_expint_values() {
        use approx::assert_relative_eq;
        // E1(1) = 0.21938...
        assert_relative_eq!(expint_e1(1.0), 0.219_384, epsilon = 1e-4);
        assert_relative_eq!(expint_e1(0.5), 0.559_774, epsilon = 1e-4);
        assert_relative_eq!(expint_e1(2.0), 0.048_901, epsilon = 1e-4);
    }

    #[test]
    fn test_plate_transmissivity_monotone() {
        let mut last = plate_transmissivity(0.0);
        assert_eq!(last, 1.0);
        for i in 1..50 {
            let t = plate_transmissivity(i as f64 * 0.1);
            assert!(t <= last);
            last = t;
        }
    }
}
