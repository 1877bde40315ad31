//! Output sinks: the abstract contract the orchestrator writes to plus a
//! GeoTIFF implementation producing one trait stack per scene.

use std::path::{Path, PathBuf};

use gdal::{DriverManager, Metadata};

use crate::core::inversion::SceneTraits;
use crate::types::{RetrievalResult, Scene};

/// Accepts one georeferenced trait raster stack per scene.
pub trait OutputSink {
    fn write_scene(&mut self, scene: &Scene, traits: &SceneTraits) -> RetrievalResult<()>;
}

/// Collects products in memory; used by tests and the Python bindings.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub products: Vec<(String, SceneTraits)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for MemorySink {
    fn write_scene(&mut self, scene: &Scene, traits: &SceneTraits) -> RetrievalResult<()> {
        self.products.push((scene.id.clone(), traits.clone()));
        Ok(())
    }
}

/// Writes one float32 GeoTIFF per scene under the output directory, one
/// band per trait, NaN no-data, georeferencing carried over from the scene.
pub struct GeoTiffSink {
    output_dir: PathBuf,
}

impl GeoTiffSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> RetrievalResult<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn output_path(&self, scene: &Scene) -> PathBuf {
        self.output_dir.join(format!("{}_traits.tif", scene.id))
    }
}

impl OutputSink for GeoTiffSink {
    fn write_scene(&mut self, scene: &Scene, traits: &SceneTraits) -> RetrievalResult<()> {
        let path = self.output_path(scene);
        log::info!("Saving trait stack: {}", path.display());

        let (height, width) = scene.shape();
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f32, _>(
            &path,
            width as isize,
            height as isize,
            traits.maps.len() as isize,
        )?;

        dataset.set_geo_transform(&scene.geo_transform.to_gdal())?;
        dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(scene.epsg)?)?;

        for (i, (name, map)) in traits.maps.iter().enumerate() {
            let mut band = dataset.rasterband(i as isize + 1)?;
            let flat: Vec<f32> = map.iter().cloned().collect();
            let buffer = gdal::raster::Buffer::new((width, height), flat);
            band.write((0, 0), (width, height), &buffer)?;
            band.set_no_data_value(Some(f32::NAN as f64))?;
            band.set_description(name.as_str())?;
        }

        log::debug!(
            "Wrote {} trait layers for scene {}",
            traits.maps.len(),
            scene.id
        );
        Ok(())
    }
}
