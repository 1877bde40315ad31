use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Surface reflectance value (dimensionless, 0..1)
pub type Reflectance = f32;

/// 2D raster of one trait or band (row x col)
pub type BandImage = Array2<f32>;

/// 3D reflectance stack (band x row x col)
pub type ReflectanceCube = Array3<f32>;

/// 2D validity mask (row x col); `true` marks no-data pixels
pub type NoDataMask = Array2<bool>;

/// Supported optical satellite platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Sentinel2A,
    Sentinel2B,
    Landsat8,
    Landsat9,
}

impl Platform {
    /// Parse a platform identifier as it appears in scene file names
    /// (e.g. `S2A_2022-06-13_B02-B03-B04-B08.tiff`).
    pub fn from_scene_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_uppercase().as_str() {
            "S2A" | "SENTINEL2A" | "SENTINEL-2A" => Some(Platform::Sentinel2A),
            // plain "Sentinel2" defaults to the A unit
            "S2" | "SENTINEL2" => Some(Platform::Sentinel2A),
            "S2B" | "SENTINEL2B" | "SENTINEL-2B" => Some(Platform::Sentinel2B),
            "L8" | "LANDSAT8" | "LANDSAT_8" => Some(Platform::Landsat8),
            "L9" | "LANDSAT9" | "LANDSAT_9" => Some(Platform::Landsat9),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Sentinel2A => write!(f, "Sentinel2A"),
            Platform::Sentinel2B => write!(f, "Sentinel2B"),
            Platform::Landsat8 => write!(f, "Landsat8"),
            Platform::Landsat9 => write!(f, "Landsat9"),
        }
    }
}

/// Canopy/leaf traits of the radiative transfer model. Every LUT dimension
/// and every retrievable trait is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanopyTrait {
    /// Leaf structure parameter (number of plates)
    N,
    /// Green leaf area index (m2 m-2)
    Lai,
    /// Chlorophyll a+b content (ug cm-2)
    Cab,
    /// Carotenoid content (ug cm-2)
    Car,
    /// Brown pigment fraction (unitless)
    Cbrown,
    /// Equivalent water thickness (cm)
    Cw,
    /// Dry matter content (g cm-2)
    Cm,
    /// Anthocyanin content (ug cm-2)
    Ant,
    /// Leaf inclination distribution parameter a
    Lidfa,
    /// Leaf inclination distribution parameter b
    Lidfb,
    /// Hot spot size parameter (unitless)
    Hspot,
    /// Soil brightness factor
    Rsoil,
    /// Soil moisture mixing fraction (1 = dry)
    Psoil,
    /// Sun zenith angle (deg)
    Tts,
    /// View zenith angle (deg)
    Tto,
    /// Relative azimuth angle (deg)
    Psi,
}

impl CanopyTrait {
    pub const ALL: [CanopyTrait; 16] = [
        CanopyTrait::N,
        CanopyTrait::Lai,
        CanopyTrait::Cab,
        CanopyTrait::Car,
        CanopyTrait::Cbrown,
        CanopyTrait::Cw,
        CanopyTrait::Cm,
        CanopyTrait::Ant,
        CanopyTrait::Lidfa,
        CanopyTrait::Lidfb,
        CanopyTrait::Hspot,
        CanopyTrait::Rsoil,
        CanopyTrait::Psoil,
        CanopyTrait::Tts,
        CanopyTrait::Tto,
        CanopyTrait::Psi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanopyTrait::N => "n",
            CanopyTrait::Lai => "lai",
            CanopyTrait::Cab => "cab",
            CanopyTrait::Car => "car",
            CanopyTrait::Cbrown => "cbrown",
            CanopyTrait::Cw => "cw",
            CanopyTrait::Cm => "cm",
            CanopyTrait::Ant => "ant",
            CanopyTrait::Lidfa => "lidfa",
            CanopyTrait::Lidfb => "lidfb",
            CanopyTrait::Hspot => "hspot",
            CanopyTrait::Rsoil => "rsoil",
            CanopyTrait::Psoil => "psoil",
            CanopyTrait::Tts => "tts",
            CanopyTrait::Tto => "tto",
            CanopyTrait::Psi => "psi",
        }
    }
}

impl std::fmt::Display for CanopyTrait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CanopyTrait {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanopyTrait::ALL
            .iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| RetrievalError::InvalidFormat(format!("unknown trait: {}", s)))
    }
}

/// Sun/view geometry of one acquisition. Angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationGeometry {
    /// Sun zenith angle
    pub sun_zenith: f64,
    /// View (sensor) zenith angle
    pub view_zenith: f64,
    /// Relative azimuth between sun and view directions
    pub relative_azimuth: f64,
}

impl ObservationGeometry {
    pub fn new(sun_zenith: f64, view_zenith: f64, relative_azimuth: f64) -> Self {
        Self {
            sun_zenith,
            view_zenith,
            relative_azimuth,
        }
    }

    /// Nadir view under a default mid-latitude illumination.
    pub fn nadir_default() -> Self {
        Self::new(45.0, 0.0, 0.0)
    }

    /// True when all three angles lie within `tol_deg` of `other`. Used to
    /// decide whether a LUT simulated under `other` is still applicable.
    pub fn within_tolerance(&self, other: &ObservationGeometry, tol_deg: f64) -> bool {
        approx::abs_diff_eq!(self.sun_zenith, other.sun_zenith, epsilon = tol_deg)
            && approx::abs_diff_eq!(self.view_zenith, other.view_zenith, epsilon = tol_deg)
            && azimuth_difference(self.relative_azimuth, other.relative_azimuth) <= tol_deg
    }

    /// Zenith angles must stay below 90 degrees; azimuth only has to be finite.
    pub fn validate(&self) -> RetrievalResult<()> {
        if !self.sun_zenith.is_finite() || !(0.0..90.0).contains(&self.sun_zenith) {
            return Err(RetrievalError::InvalidFormat(format!(
                "sun zenith angle {} outside [0, 90)",
                self.sun_zenith
            )));
        }
        if !self.view_zenith.is_finite() || !(0.0..90.0).contains(&self.view_zenith) {
            return Err(RetrievalError::InvalidFormat(format!(
                "view zenith angle {} outside [0, 90)",
                self.view_zenith
            )));
        }
        if !self.relative_azimuth.is_finite() {
            return Err(RetrievalError::InvalidFormat(
                "relative azimuth is not finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Smallest angular distance between two azimuths in degrees.
fn azimuth_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Geospatial transformation parameters (GDAL order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// One time-stamped satellite acquisition ready for inversion: surface
/// reflectance (already atmospherically corrected), acquisition geometry
/// and georeferencing.
#[derive(Debug, Clone)]
pub struct Scene {
    /// Scene identifier, e.g. `S2A_2022-06-13`
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub geometry: ObservationGeometry,
    /// Reflectance stack (band x row x col)
    pub reflectance: ReflectanceCube,
    /// Band names matching the first axis of `reflectance`
    pub band_names: Vec<String>,
    /// `true` marks pixels excluded from inversion (cloud, no-data)
    pub mask: NoDataMask,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
}

impl Scene {
    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.reflectance.dim();
        (rows, cols)
    }

    pub fn n_bands(&self) -> usize {
        self.reflectance.dim().0
    }
}

/// Observed reflectance of a single pixel together with its geometry.
#[derive(Debug, Clone)]
pub struct PixelObservation {
    pub reflectance: Vec<Reflectance>,
    pub geometry: ObservationGeometry,
}

/// Retrieved value of one trait for one pixel: top-N aggregate plus the
/// dispersion of the candidate ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitEstimate {
    pub value: f64,
    pub dispersion: f64,
    /// Number of candidate solutions behind the aggregate
    pub n_solutions: usize,
}

/// Error types for trait retrieval
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data format: {0}")]
    InvalidFormat(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("parameter {parameter} = {value} outside model domain: {constraint}")]
    ModelDomain {
        parameter: CanopyTrait,
        value: f64,
        constraint: String,
    },

    #[error("LUT build yielded {built} of {requested} requested entries")]
    InsufficientLutSize { requested: usize, built: usize },

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("scene {scene_id} failed: {reason}")]
    SceneFailed { scene_id: String, reason: String },

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

/// Result type for retrieval operations
pub type RetrievalResult<T> = Result<T, RetrievalError>;
