//! Scene sources: the abstract contract the orchestrator consumes plus a
//! directory-backed implementation reading per-scene reflectance GeoTIFFs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use gdal::{Dataset, Metadata};
use ndarray::{Array2, Array3};
use regex::Regex;

use crate::io::metadata;
use crate::types::{
    GeoTransform, ObservationGeometry, Platform, RetrievalError, RetrievalResult, Scene,
};

/// Lazy, finite, restartable sequence of scenes, already atmospherically
/// corrected and band-aligned to one platform.
pub trait SceneSource {
    /// Rewind to the first scene.
    fn restart(&mut self) -> RetrievalResult<()>;

    /// The next scene in time order, or `None` when exhausted.
    fn next_scene(&mut self) -> RetrievalResult<Option<Scene>>;

    /// Identify the scenes not yet consumed, without processing them.
    /// Used by the orchestrator to report skipped scenes on cancellation.
    fn drain_remaining(&mut self) -> RetrievalResult<Vec<(String, DateTime<Utc>)>> {
        let mut remaining = Vec::new();
        while let Some(scene) = self.next_scene()? {
            remaining.push((scene.id, scene.timestamp));
        }
        Ok(remaining)
    }
}

/// In-memory scene sequence, mainly for tests and the Python bindings.
pub struct VecSceneSource {
    scenes: Vec<Scene>,
    cursor: usize,
}

impl VecSceneSource {
    /// Scenes are ordered by timestamp (stable for equal timestamps).
    pub fn new(mut scenes: Vec<Scene>) -> Self {
        scenes.sort_by_key(|s| s.timestamp);
        Self { scenes, cursor: 0 }
    }
}

impl SceneSource for VecSceneSource {
    fn restart(&mut self) -> RetrievalResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_scene(&mut self) -> RetrievalResult<Option<Scene>> {
        let scene = self.scenes.get(self.cursor).cloned();
        if scene.is_some() {
            self.cursor += 1;
        }
        Ok(scene)
    }

    fn drain_remaining(&mut self) -> RetrievalResult<Vec<(String, DateTime<Utc>)>> {
        let remaining = self.scenes[self.cursor..]
            .iter()
            .map(|s| (s.id.clone(), s.timestamp))
            .collect();
        self.cursor = self.scenes.len();
        Ok(remaining)
    }
}

/// One discovered scene file.
#[derive(Debug, Clone)]
struct SceneFile {
    path: PathBuf,
    id: String,
    platform: Platform,
    timestamp: DateTime<Utc>,
}

/// Reads scenes from a directory of GeoTIFFs named
/// `<PLATFORM>_<YYYY-MM-DD>_<bands>.tiff`, with optional sidecar metadata
/// XML (`<PLATFORM>_<YYYY-MM-DD>_MTD.xml`) carrying the acquisition angles.
pub struct SceneDirectorySource {
    directory: PathBuf,
    files: Vec<SceneFile>,
    cursor: usize,
    /// Factor applied to raw pixel values to obtain reflectance
    reflectance_scale: f32,
}

impl SceneDirectorySource {
    pub fn new<P: AsRef<Path>>(directory: P, platform: Option<Platform>) -> RetrievalResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        log::info!("Scanning {} for scenes", directory.display());

        let pattern = Regex::new(r"^([A-Za-z0-9]+)_(\d{4}-\d{2}-\d{2})_[A-Za-z0-9_\-]+\.tiff?$")
            .map_err(|e| RetrievalError::InvalidFormat(format!("bad scene pattern: {}", e)))?;

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let captures = match pattern.captures(&name) {
                Some(c) => c,
                None => continue,
            };
            let file_platform = match Platform::from_scene_prefix(&captures[1]) {
                Some(p) => p,
                None => {
                    log::debug!("Skipping {}: unknown platform prefix", name);
                    continue;
                }
            };
            if let Some(wanted) = platform {
                if file_platform != wanted {
                    continue;
                }
            }
            let date = NaiveDate::parse_from_str(&captures[2], "%Y-%m-%d").map_err(|e| {
                RetrievalError::InvalidFormat(format!("bad scene date in {}: {}", name, e))
            })?;
            let timestamp = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .ok_or_else(|| {
                    RetrievalError::InvalidFormat(format!("bad scene date in {}", name))
                })?;

            files.push(SceneFile {
                path: entry.path(),
                id: format!("{}_{}", &captures[1], &captures[2]),
                platform: file_platform,
                timestamp,
            });
        }
        files.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        log::info!("Found {} scenes", files.len());

        Ok(Self {
            directory,
            files,
            cursor: 0,
            reflectance_scale: 1.0,
        })
    }

    /// Set the factor converting stored pixel values to reflectance
    /// (e.g. 1e-4 for scaled integer products).
    pub fn with_reflectance_scale(mut self, scale: f32) -> Self {
        self.reflectance_scale = scale;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn load(&self, file: &SceneFile) -> RetrievalResult<Scene> {
        log::info!("Loading scene {}", file.path.display());
        let dataset = Dataset::open(&file.path)?;

        let (width, height) = dataset.raster_size();
        let n_bands = dataset.raster_count() as usize;
        if n_bands == 0 {
            return Err(RetrievalError::InvalidFormat(format!(
                "{} has no raster bands",
                file.path.display()
            )));
        }

        let geo_transform = GeoTransform::from_gdal(&dataset.geo_transform()?);
        let epsg = dataset
            .spatial_ref()
            .ok()
            .and_then(|sr| sr.auth_code().ok())
            .unwrap_or(4326) as u32;

        let mut reflectance = Array3::<f32>::zeros((n_bands, height, width));
        let mut mask = Array2::<bool>::from_elem((height, width), false);
        let mut band_names = Vec::with_capacity(n_bands);
        for b in 0..n_bands {
            let band = dataset.rasterband(b as isize + 1)?;
            let nodata = band.no_data_value();
            let description = band.description().unwrap_or_default();
            band_names.push(if description.is_empty() {
                format!("band{}", b + 1)
            } else {
                description
            });

            let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            for (i, value) in buffer.data.iter().enumerate() {
                let (r, c) = (i / width, i % width);
                let is_nodata =
                    !value.is_finite() || nodata.map(|nd| *value as f64 == nd).unwrap_or(false);
                if is_nodata {
                    mask[[r, c]] = true;
                    reflectance[[b, r, c]] = f32::NAN;
                } else {
                    reflectance[[b, r, c]] = value * self.reflectance_scale;
                }
            }
        }

        // acquisition angles from the sidecar metadata, defaults otherwise
        let metadata_path = self.directory.join(format!("{}_MTD.xml", file.id));
        let geometry = if metadata_path.exists() {
            metadata::read_angles_file(&metadata_path)?
        } else {
            log::warn!(
                "Scene {}: no metadata sidecar, assuming default acquisition geometry",
                file.id
            );
            ObservationGeometry::nadir_default()
        };

        Ok(Scene {
            id: file.id.clone(),
            timestamp: file.timestamp,
            platform: file.platform,
            geometry,
            reflectance,
            band_names,
            mask,
            geo_transform,
            epsg,
        })
    }
}

impl SceneSource for SceneDirectorySource {
    fn restart(&mut self) -> RetrievalResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_scene(&mut self) -> RetrievalResult<Option<Scene>> {
        let file = match self.files.get(self.cursor) {
            Some(f) => f.clone(),
            None => return Ok(None),
        };
        self.cursor += 1;
        self.load(&file).map(Some)
    }

    fn drain_remaining(&mut self) -> RetrievalResult<Vec<(String, DateTime<Utc>)>> {
        let remaining = self.files[self.cursor..]
            .iter()
            .map(|f| (f.id.clone(), f.timestamp))
            .collect();
        self.cursor = self.files.len();
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReflectanceCube;
    use ndarray::Array2;

    fn scene(id: &str, day: u32) -> Scene {
        Scene {
            id: id.to_string(),
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(
                NaiveDate::from_ymd_opt(2023, 6, day)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                Utc,
            ),
            platform: Platform::Sentinel2A,
            geometry: ObservationGeometry::nadir_default(),
            reflectance: ReflectanceCube::zeros((1, 2, 2)),
            band_names: vec!["B02".to_string()],
            mask: Array2::from_elem((2, 2), false),
            geo_transform: GeoTransform::from_gdal(&[0.0, 10.0, 0.0, 0.0, 0.0, -10.0]),
            epsg: 32632,
        }
    }

    #[test]
    fn test_vec_source_ordering_and_restart() {
        let mut source = VecSceneSource::new(vec![scene("b", 20), scene("a", 10)]);
        assert_eq!(source.next_scene().unwrap().unwrap().id, "a");
        assert_eq!(source.next_scene().unwrap().unwrap().id, "b");
        assert!(source.next_scene().unwrap().is_none());

        source.restart().unwrap();
        assert_eq!(source.next_scene().unwrap().unwrap().id, "a");
    }

    #[test]
    fn test_vec_source_drain() {
        let mut source = VecSceneSource::new(vec![scene("a", 10), scene("b", 20), scene("c", 25)]);
        let _ = source.next_scene().unwrap();
        let remaining = source.drain_remaining().unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].0, "b");
        assert!(source.next_scene().unwrap().is_none());
    }
}
