//! Verdine: A Fast, Modular Canopy Trait Retrieval Engine
//!
//! This library retrieves biophysical canopy traits (green leaf area index
//! and companions) from multispectral satellite reflectance by lookup-table
//! inversion of a PROSAIL-style radiative transfer model: prior sampling,
//! forward simulation, spectral matching and top-N ensemble aggregation.

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::config::{
    Aggregation, CostFunction, Distribution, LutBuildMode, ParameterSpec, RetrievalConfig,
    SamplingMethod,
};
pub use crate::core::{
    BatchProcessor, BatchReport, ForwardModel, InversionEngine, LookupTable, ParameterVector,
    Sampler, SceneTraits,
};
pub use crate::types::{
    CanopyTrait, ObservationGeometry, PixelObservation, Platform, RetrievalError, RetrievalResult,
    Scene, TraitEstimate,
};

pub use crate::io::{GeoTiffSink, MemorySink, OutputSink, SceneDirectorySource, SceneSource};

/// Python module definition
#[cfg(feature = "python")]
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyRetrievalConfig>()?;
    m.add_class::<PyLookupTable>()?;
    m.add_function(wrap_pyfunction!(invert_image, m)?)?;
    Ok(())
}

/// Python wrapper for RetrievalConfig
#[cfg(feature = "python")]
#[pyclass(name = "RetrievalConfig")]
#[derive(Clone)]
struct PyRetrievalConfig {
    inner: RetrievalConfig,
}

#[cfg(feature = "python")]
#[pymethods]
impl PyRetrievalConfig {
    #[new]
    #[pyo3(signature = (lut_size = 20_000, n_solutions = 1_000, sampling_method = "frs".to_string(), traits = vec!["lai".to_string(), "cab".to_string()], platform = "Sentinel2A".to_string(), seed = 42))]
    fn new(
        lut_size: usize,
        n_solutions: usize,
        sampling_method: String,
        traits: Vec<String>,
        platform: String,
        seed: u64,
    ) -> PyResult<Self> {
        let parsed_traits = traits
            .iter()
            .map(|t| t.parse::<CanopyTrait>())
            .collect::<RetrievalResult<Vec<_>>>()
            .map_err(to_py_err)?;
        let platform = Platform::from_scene_prefix(&platform).ok_or_else(|| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "Invalid platform: {}",
                platform
            ))
        })?;

        let config = RetrievalConfig {
            lut_size,
            n_solutions,
            sampling_method: sampling_method.parse().map_err(to_py_err)?,
            traits: parsed_traits,
            platform,
            seed,
            ..RetrievalConfig::default()
        };
        config.validate().map_err(to_py_err)?;
        Ok(Self { inner: config })
    }

    /// Replace the default priors with a CSV prior table.
    fn load_priors(&mut self, path: String) -> PyResult<()> {
        self.inner.rtm_params = config::load_priors_csv(&path).map_err(to_py_err)?;
        self.inner.validate().map_err(to_py_err)
    }

    #[getter]
    fn lut_size(&self) -> usize {
        self.inner.lut_size
    }

    #[getter]
    fn n_solutions(&self) -> usize {
        self.inner.n_solutions
    }

    #[getter]
    fn traits(&self) -> Vec<String> {
        self.inner.traits.iter().map(|t| t.to_string()).collect()
    }

    fn __repr__(&self) -> String {
        format!(
            "RetrievalConfig(lut_size={}, n_solutions={}, platform='{}')",
            self.inner.lut_size, self.inner.n_solutions, self.inner.platform
        )
    }
}

/// Python wrapper for LookupTable
#[cfg(feature = "python")]
#[pyclass(name = "LookupTable")]
struct PyLookupTable {
    inner: LookupTable,
}

#[cfg(feature = "python")]
#[pymethods]
impl PyLookupTable {
    #[new]
    fn new(
        config: &PyRetrievalConfig,
        sun_zenith: f64,
        view_zenith: f64,
        relative_azimuth: f64,
    ) -> PyResult<Self> {
        let geometry = ObservationGeometry::new(sun_zenith, view_zenith, relative_azimuth);
        let lut = LookupTable::build(&config.inner, &geometry).map_err(to_py_err)?;
        Ok(Self { inner: lut })
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    #[getter]
    fn dropped(&self) -> usize {
        self.inner.dropped()
    }

    #[getter]
    fn band_names(&self) -> Vec<String> {
        self.inner.band_names().to_vec()
    }

    fn __repr__(&self) -> String {
        format!(
            "LookupTable(size={}, bands={}, platform='{}')",
            self.inner.len(),
            self.inner.n_bands(),
            self.inner.platform()
        )
    }
}

/// Invert a reflectance image (band x row x col) against a LUT; returns a
/// dict mapping trait name to a float32 image with NaN no-data.
#[cfg(feature = "python")]
#[pyfunction]
fn invert_image<'py>(
    py: Python<'py>,
    config: &PyRetrievalConfig,
    lut: &PyLookupTable,
    image: numpy::PyReadonlyArray3<'py, f32>,
) -> PyResult<&'py pyo3::types::PyDict> {
    use numpy::IntoPyArray;

    let cube = image.as_array().to_owned();
    let (_, rows, cols) = cube.dim();
    let scene = Scene {
        id: "python".to_string(),
        timestamp: chrono::Utc::now(),
        platform: lut.inner.platform(),
        geometry: *lut.inner.geometry(),
        reflectance: cube,
        band_names: lut.inner.band_names().to_vec(),
        mask: ndarray::Array2::from_elem((rows, cols), false),
        geo_transform: types::GeoTransform::from_gdal(&[0.0, 1.0, 0.0, 0.0, 0.0, -1.0]),
        epsg: 4326,
    };

    let engine = InversionEngine::new(&config.inner, &lut.inner).map_err(to_py_err)?;
    let result = engine.invert_scene(&scene).map_err(to_py_err)?;

    let dict = pyo3::types::PyDict::new(py);
    for (name, map) in result.maps {
        dict.set_item(name.as_str(), map.into_pyarray(py))?;
    }
    dict.set_item("pixel_failures", result.pixel_failures)?;
    Ok(dict)
}

#[cfg(feature = "python")]
fn to_py_err(e: RetrievalError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
}
