//! Scene input and product output

pub mod metadata;
pub mod scene;
pub mod writer;

pub use metadata::{read_angles_file, AngleParser};
pub use scene::{SceneDirectorySource, SceneSource, VecSceneSource};
pub use writer::{GeoTiffSink, MemorySink, OutputSink};
