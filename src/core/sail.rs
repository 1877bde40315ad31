//! Canopy-level bidirectional reflectance in the 4SAIL family: turbid-medium
//! two-stream solution with a Verhoef bimodal leaf inclination distribution,
//! SUITS-type scattering coefficients and a hot-spot correction of the
//! single-scattering term.
//!
//! The soil background is a parametric dry/wet mixture scaled by a
//! brightness factor; see DESIGN.md for the approximation notes.

use crate::core::prospect::{LeafOptics, N_WL, WL_MAX, WL_MIN};
use crate::types::ObservationGeometry;

/// Canopy structure and background inputs.
#[derive(Debug, Clone, Copy)]
pub struct CanopyParams {
    /// Leaf area index (m2 m-2)
    pub lai: f64,
    /// LIDF parameter a (mean inclination control)
    pub lidfa: f64,
    /// LIDF parameter b (bimodality control)
    pub lidfb: f64,
    /// Hot spot size parameter
    pub hspot: f64,
    /// Soil brightness factor
    pub rsoil: f64,
    /// Dry/wet soil mixing fraction (1 = dry)
    pub psoil: f64,
}

/// Canopy reflectance evaluator with precomputed soil spectra.
pub struct SailModel {
    soil_dry: Vec<f64>,
    soil_wet: Vec<f64>,
}

impl SailModel {
    pub fn new() -> Self {
        let mut soil_dry = Vec::with_capacity(N_WL);
        let mut soil_wet = Vec::with_capacity(N_WL);
        for i in 0..N_WL {
            let wl = WL_MIN + i as f64;
            let dry = dry_soil(wl);
            soil_dry.push(dry);
            soil_wet.push(wet_soil(wl, dry));
        }
        Self { soil_dry, soil_wet }
    }

    /// Soil background reflectance for the given brightness/moisture mix.
    pub fn soil_spectrum(&self, rsoil: f64, psoil: f64) -> Vec<f64> {
        self.soil_dry
            .iter()
            .zip(&self.soil_wet)
            .map(|(&dry, &wet)| (rsoil * (psoil * dry + (1.0 - psoil) * wet)).clamp(0.0, 1.0))
            .collect()
    }

    /// Bidirectional top-of-canopy reflectance on the full spectral grid.
    /// Pure function of its inputs.
    pub fn simulate(
        &self,
        leaf: &LeafOptics,
        p: &CanopyParams,
        geometry: &ObservationGeometry,
    ) -> Vec<f64> {
        let soil = self.soil_spectrum(p.rsoil, p.psoil);
        if p.lai < 1e-6 {
            // bare background
            return soil;
        }

        let tts = geometry.sun_zenith.to_radians();
        let tto = geometry.view_zenith.to_radians();
        let psi = geometry.relative_azimuth.to_radians();
        let cts = tts.cos();
        let cto = tto.cos();
        let ctscto = cts * cto;
        let dso = {
            let tants = tts.tan();
            let tanto = tto.tan();
            (tants * tants + tanto * tanto - 2.0 * tants * tanto * psi.cos())
                .max(0.0)
                .sqrt()
        };

        // directional/bidirectional extinction and scattering coefficients,
        // averaged over the leaf inclination distribution
        let lidf = verhoef_lidf(p.lidfa, p.lidfb);
        let (mut ks, mut ko, mut bf, mut sob, mut sof) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(ttl_deg, freq) in &lidf {
            let cttl = ttl_deg.to_radians().cos();
            let vs = volscatt(tts, tto, psi, ttl_deg.to_radians());
            ks += vs.chi_s / cts * freq;
            ko += vs.chi_o / cto * freq;
            sob += vs.frho * std::f64::consts::PI / ctscto * freq;
            sof += vs.ftau * std::f64::consts::PI / ctscto * freq;
            bf += cttl * cttl * freq;
        }
        let sdb = 0.5 * (ks + bf);
        let sdf = 0.5 * (ks - bf);
        let dob = 0.5 * (ko + bf);
        let dof = 0.5 * (ko - bf);
        let ddb = 0.5 * (1.0 + bf);
        let ddf = 0.5 * (1.0 - bf);

        let lai = p.lai;
        let tss = (-ks * lai).exp();
        let too = (-ko * lai).exp();

        // hot-spot correction of the single-scattering path integral
        let (tsstoo, sumint) = hotspot_integral(lai, ks, ko, dso, p.hspot, tss);

        let mut canopy = Vec::with_capacity(N_WL);
        for i in 0..N_WL {
            let rho = leaf.reflectance[i];
            let tau = leaf.transmittance[i];
            let rs = soil[i];

            let sigb = ddb * rho + ddf * tau;
            let sigf = ddf * rho + ddb * tau;
            let att = 1.0 - sigf;
            let m = ((att + sigb) * (att - sigb)).max(0.0).sqrt();
            let sb = sdb * rho + sdf * tau;
            let sf = sdf * rho + sdb * tau;
            let vb = dob * rho + dof * tau;
            let vf = dof * rho + dob * tau;
            let w = sob * rho + sof * tau;

            let e1 = (-m * lai).exp();
            let e2 = e1 * e1;
            let rinf = if sigb > 1e-9 { (att - m) / sigb } else { 0.0 };
            let rinf2 = rinf * rinf;
            let re = rinf * e1;
            let denom = 1.0 - rinf2 * e2;

            let j1ks = jfunc1(ks, m, lai);
            let j2ks = jfunc2(ks, m, lai);
            let j1ko = jfunc1(ko, m, lai);
            let j2ko = jfunc2(ko, m, lai);

            let ps = (sf + sb * rinf) * j1ks;
            let qs = (sf * rinf + sb) * j2ks;
            let pv = (vf + vb * rinf) * j1ko;
            let qv = (vf * rinf + vb) * j2ko;

            let rdd = rinf * (1.0 - e2) / denom;
            let tdd = (1.0 - rinf2) * e1 / denom;
            let tsd = (ps - re * qs) / denom;
            let rsd = (qs - re * ps) / denom;
            let tdo = (pv - re * qv) / denom;
            let rdo = (qv - re * pv) / denom;

            // single scattering with hot spot
            let rsos = w * lai * sumint;
            // multiple scattering, coupled through the diffuse field
            let rsod = if rinf2 < 1.0 {
                (((vf * rinf + vb) * ps - (vb * rinf + vf) * qs - (rdo * qs + tdo * ps) * rinf)
                    / (1.0 - rinf2))
                    .max(0.0)
            } else {
                0.0
            };

            // soil coupling
            let dn = (1.0 - rs * rdd).max(1e-9);
            let rsost = rsos + tsstoo * rs;
            let rsodt =
                rsod + ((tss + tsd) * tdo + (tsd + tss * rs * rdd) * too) * rs / dn;
            let rsot = rsost + rsodt;

            canopy.push(rsot.clamp(0.0, 1.0));
        }
        canopy
    }
}

impl Default for SailModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaf inclination classes: 5..75 deg in 10 deg steps, refined near 90 deg.
const LIDF_ANGLES: [f64; 13] = [
    5.0, 15.0, 25.0, 35.0, 45.0, 55.0, 65.0, 75.0, 81.0, 83.0, 85.0, 87.0, 89.0,
];
const LIDF_BOUNDS: [f64; 13] = [
    10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 82.0, 84.0, 86.0, 88.0, 90.0,
];

/// Verhoef bimodal leaf inclination distribution. Requires |a| + |b| <= 1
/// (validated by the forward evaluator).
fn verhoef_lidf(a: f64, b: f64) -> Vec<(f64, f64)> {
    let mut freqs = Vec::with_capacity(LIDF_ANGLES.len());
    let mut prev = 0.0;
    for (&angle, &bound) in LIDF_ANGLES.iter().zip(&LIDF_BOUNDS) {
        let cum = dcum(a, b, bound);
        freqs.push((angle, (cum - prev).max(0.0)));
        prev = cum;
    }
    // renormalize the discretization residual
    let total: f64 = freqs.iter().map(|(_, f)| f).sum();
    if total > 0.0 {
        for f in &mut freqs {
            f.1 /= total;
        }
    }
    freqs
}

/// Cumulative LIDF at inclination `theta_deg` (Verhoef's fixed-point
/// iteration; spherical shortcut for a > 1).
fn dcum(a: f64, b: f64, theta_deg: f64) -> f64 {
    if a > 1.0 {
        return 1.0 - theta_deg.to_radians().cos();
    }
    let eps = 1e-8;
    let p = 2.0 * theta_deg.to_radians();
    let mut x = p;
    let mut y = 0.0;
    for _ in 0..100 {
        y = a * x.sin() + 0.5 * b * (2.0 * x).sin();
        let dx = 0.5 * (y - x + p);
        x += dx;
        if dx.abs() < eps {
            break;
        }
    }
    (2.0 * y + p) / std::f64::consts::PI
}

struct VolScatt {
    chi_s: f64,
    chi_o: f64,
    frho: f64,
    ftau: f64,
}

/// SUITS-type volume scattering geometry factors for one leaf inclination
/// (all angles in radians).
fn volscatt(tts: f64, tto: f64, psi: f64, ttl: f64) -> VolScatt {
    let cts = tts.cos();
    let cto = tto.cos();
    let sts = tts.sin();
    let sto = tto.sin();
    let cospsi = psi.cos();
    let cttl = ttl.cos();
    let sttl = ttl.sin();

    let cs = cttl * cts;
    let co = cttl * cto;
    let ss = sttl * sts;
    let so = sttl * sto;

    let cosbts = if ss.abs() > 1e-6 { -cs / ss } else { 5.0 };
    let cosbto = if so.abs() > 1e-6 { -co / so } else { 5.0 };

    let (bts, ds) = if cosbts.abs() < 1.0 {
        (cosbts.acos(), ss)
    } else {
        (std::f64::consts::PI, cs)
    };
    let chi_s = 2.0 / std::f64::consts::PI * ((bts - std::f64::consts::FRAC_PI_2) * cs + bts.sin() * ss);

    let (bto, do_) = if cosbto.abs() < 1.0 {
        (cosbto.acos(), so)
    } else if tto < std::f64::consts::FRAC_PI_2 {
        (std::f64::consts::PI, co)
    } else {
        (0.0, -co)
    };
    let chi_o = 2.0 / std::f64::consts::PI * ((bto - std::f64::consts::FRAC_PI_2) * co + bto.sin() * so);

    let btran1 = (bts - bto).abs();
    let btran2 = std::f64::consts::PI - (bts + bto - std::f64::consts::PI).abs();
    let (bt1, bt2, bt3) = if psi <= btran1 {
        (psi, btran1, btran2)
    } else if psi <= btran2 {
        (btran1, psi, btran2)
    } else {
        (btran1, btran2, psi)
    };

    let t1 = 2.0 * cs * co + ss * so * cospsi;
    let t2 = if bt2 > 0.0 {
        bt2.sin() * (2.0 * ds * do_ + ss * so * bt1.cos() * bt3.cos())
    } else {
        0.0
    };
    let denom = 2.0 * std::f64::consts::PI * std::f64::consts::PI;
    let frho = (((std::f64::consts::PI - bt2) * t1 + t2) / denom).max(0.0);
    let ftau = ((-bt2 * t1 + t2) / denom).max(0.0);

    VolScatt {
        chi_s,
        chi_o,
        frho,
        ftau,
    }
}

/// Kuusk-style hot-spot treatment: bidirectional gap fraction and the path
/// integral of the single-scattering term (20-step quadrature).
fn hotspot_integral(lai: f64, ks: f64, ko: f64, dso: f64, hspot: f64, tss: f64) -> (f64, f64) {
    let alf = if hspot > 0.0 {
        (dso / hspot) * 2.0 / (ks + ko)
    } else {
        1e36
    };

    if alf == 0.0 {
        // exact backscatter direction
        let sumint = (1.0 - tss) / (ks * lai);
        return (tss, sumint);
    }

    let fhot = lai * (ko * ks).sqrt();
    let fint = (1.0 - (-alf).exp()) * 0.05;
    let (mut x1, mut y1, mut f1) = (0.0, 0.0, 1.0_f64);
    let mut sumint = 0.0;
    let mut tsstoo = tss;
    for istep in 1..=20 {
        let x2 = if istep < 20 {
            -(1.0 - istep as f64 * fint).ln() / alf
        } else {
            1.0
        };
        let y2 = -(ko + ks) * lai * x2 + fhot * (1.0 - (-alf * x2).exp()) / alf;
        let f2 = y2.exp();
        sumint += (f2 - f1) * (x2 - x1) / (y2 - y1);
        x1 = x2;
        y1 = y2;
        f1 = f2;
        tsstoo = f2;
    }
    if !sumint.is_finite() {
        sumint = 0.0;
    }
    (tsstoo, sumint)
}

/// J1: singularity-safe two-exponential integral.
fn jfunc1(k: f64, l: f64, t: f64) -> f64 {
    let del = (k - l) * t;
    if del.abs() > 1e-3 {
        ((-l * t).exp() - (-k * t).exp()) / (k - l)
    } else {
        0.5 * t * ((-k * t).exp() + (-l * t).exp()) * (1.0 - del * del / 12.0)
    }
}

/// J2 integral.
fn jfunc2(k: f64, l: f64, t: f64) -> f64 {
    (1.0 - (-(k + l) * t).exp()) / (k + l)
}

/// Dry agricultural soil: brightness rising from the visible into the SWIR.
fn dry_soil(wl: f64) -> f64 {
    let base = 0.06 + 0.34 * (1.0 - (-(wl - WL_MIN) / 900.0).exp());
    let clay_dip = 0.03 * gauss(wl, 2210.0, 90.0);
    (base - clay_dip).max(0.01)
}

/// Wet soil: darker overall with pronounced water absorption.
fn wet_soil(wl: f64, dry: f64) -> f64 {
    let water = 0.06 * gauss(wl, 1450.0, 80.0) + 0.10 * gauss(wl, 1940.0, 100.0)
        + 0.05 * gauss(wl, 2500.0, 200.0);
    (0.45 * dry - water).max(0.01)
}

fn gauss(wl: f64, center: f64, sigma: f64) -> f64 {
    let d = (wl - center) / sigma;
    (-0.5 * d * d).exp()
}

#[allow(dead_code)]
fn wl_index(wl: f64) -> usize {
    ((wl - WL_MIN).clamp(0.0, WL_MAX - WL_MIN)) as usize
}
