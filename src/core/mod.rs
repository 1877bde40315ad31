//! Core retrieval modules

pub mod forward;
pub mod inversion;
pub mod lut;
pub mod orchestrator;
pub mod prospect;
pub mod sail;
pub mod sampling;
pub mod sensor;

// Re-export main types
pub use forward::ForwardModel;
pub use inversion::{Candidate, CandidateSet, InversionEngine, SceneTraits};
pub use lut::{LookupTable, LutEntry};
pub use orchestrator::{BatchProcessor, BatchReport, SceneOutcome, SceneState};
pub use prospect::{LeafModel, LeafOptics, LeafParams};
pub use sail::{CanopyParams, SailModel};
pub use sampling::{ParameterVector, Sampler};
pub use sensor::{platform_band_names, platform_bands, resample_to_bands, SensorBand};
