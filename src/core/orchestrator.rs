//! Scene batch orchestration: walks a time-ordered scene sequence, builds
//! or reuses the LUT per geometry bucket, runs the inversion engine per
//! scene and hands the trait stacks to the output sink.
//!
//! A scene failure never aborts the batch; cancellation takes effect at
//! scene boundaries only, so finished scene products are never corrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::RetrievalConfig;
use crate::core::inversion::InversionEngine;
use crate::core::lut::LookupTable;
use crate::io::scene::SceneSource;
use crate::io::writer::OutputSink;
use crate::types::{RetrievalResult, Scene};

/// Processing state of one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    /// Not processed (remaining at cancellation)
    AwaitingScene,
    /// LUT built or reused for the scene's geometry bucket
    LutReady,
    /// Pixel inversion running
    Inverting,
    /// Trait stack written to the sink
    SceneComplete,
    /// LUT build or inversion setup failed; scene skipped
    SceneFailed,
}

/// Outcome record of one scene.
#[derive(Debug, Clone)]
pub struct SceneOutcome {
    pub scene_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: SceneState,
    pub pixel_failures: usize,
    pub reason: Option<String>,
}

/// Summary of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<SceneOutcome>,
    /// Number of LUTs built (reuse shows up as fewer builds than scenes)
    pub lut_builds: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(SceneState::SceneComplete)
    }

    pub fn failed(&self) -> usize {
        self.count(SceneState::SceneFailed)
    }

    pub fn skipped(&self) -> usize {
        self.count(SceneState::AwaitingScene)
    }

    fn count(&self, state: SceneState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }
}

/// Drives the full retrieval over a scene time series.
pub struct BatchProcessor {
    config: RetrievalConfig,
    cancel: Arc<AtomicBool>,
}

impl BatchProcessor {
    pub fn new(config: RetrievalConfig) -> RetrievalResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag for aborting the batch between scenes.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Process every scene the source yields, in source order.
    pub fn run<S: SceneSource, K: OutputSink>(
        &self,
        source: &mut S,
        sink: &mut K,
    ) -> RetrievalResult<BatchReport> {
        let mut report = BatchReport::default();
        // (bucket id, LUT) cache of the active geometry bucket
        let mut active_lut: Option<(i64, LookupTable)> = None;
        let mut batch_start: Option<DateTime<Utc>> = None;
        let mut last_timestamp: Option<DateTime<Utc>> = None;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                log::warn!("Batch cancelled; skipping remaining scenes");
                report.cancelled = true;
                for (scene_id, timestamp) in source.drain_remaining()? {
                    report.outcomes.push(SceneOutcome {
                        scene_id,
                        timestamp,
                        state: SceneState::AwaitingScene,
                        pixel_failures: 0,
                        reason: Some("batch cancelled".to_string()),
                    });
                }
                break;
            }

            let scene = match source.next_scene()? {
                Some(scene) => scene,
                None => break,
            };
            if let Some(last) = last_timestamp {
                if scene.timestamp < last {
                    log::warn!(
                        "Scene {} is older than its predecessor; output order follows input order",
                        scene.id
                    );
                }
            }
            last_timestamp = Some(scene.timestamp);
            let start = *batch_start.get_or_insert(scene.timestamp);

            let outcome = self.process_scene(&scene, start, &mut active_lut, &mut report.lut_builds, sink);
            report.outcomes.push(outcome);
        }

        log::info!(
            "Batch complete: {} succeeded, {} failed, {} skipped, {} LUT builds",
            report.succeeded(),
            report.failed(),
            report.skipped(),
            report.lut_builds
        );
        Ok(report)
    }

    fn process_scene<K: OutputSink>(
        &self,
        scene: &Scene,
        batch_start: DateTime<Utc>,
        active_lut: &mut Option<(i64, LookupTable)>,
        lut_builds: &mut usize,
        sink: &mut K,
    ) -> SceneOutcome {
        let failed = |reason: String| SceneOutcome {
            scene_id: scene.id.clone(),
            timestamp: scene.timestamp,
            state: SceneState::SceneFailed,
            pixel_failures: 0,
            reason: Some(reason),
        };

        if let Err(e) = scene.geometry.validate() {
            log::error!("Scene {} has invalid geometry: {}", scene.id, e);
            return failed(format!("invalid geometry: {}", e));
        }

        // geometry bucket: scenes within one temporal increment share a LUT
        // as long as their geometry stays within tolerance
        let bucket = (scene.timestamp - batch_start).num_days() / self.config.temporal_increment_days;
        let reusable = matches!(
            active_lut,
            Some((b, lut)) if *b == bucket
                && scene.geometry.within_tolerance(lut.geometry(), self.config.geometry_tolerance_deg)
                && scene.platform == lut.platform()
        );
        if !reusable {
            log::info!(
                "Scene {}: building LUT for bucket {} ({:?})",
                scene.id,
                bucket,
                scene.geometry
            );
            match LookupTable::build(&self.config, &scene.geometry) {
                Ok(lut) => {
                    *lut_builds += 1;
                    *active_lut = Some((bucket, lut));
                }
                Err(e) => {
                    log::error!("Scene {}: LUT build failed: {}", scene.id, e);
                    *active_lut = None;
                    return failed(format!("LUT build failed: {}", e));
                }
            }
        } else {
            log::debug!("Scene {}: reusing bucket {} LUT", scene.id, bucket);
        }
        log::debug!("Scene {}: state {:?}", scene.id, SceneState::LutReady);

        // the cache was populated just above
        let lut = match active_lut {
            Some((_, lut)) => lut,
            None => return failed("LUT cache unexpectedly empty".to_string()),
        };

        let engine = match InversionEngine::new(&self.config, lut) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("Scene {}: inversion setup failed: {}", scene.id, e);
                return failed(format!("inversion setup failed: {}", e));
            }
        };
        log::debug!("Scene {}: state {:?}", scene.id, SceneState::Inverting);

        let traits = match engine.invert_scene(scene) {
            Ok(traits) => traits,
            Err(e) => {
                log::error!("Scene {}: inversion failed: {}", scene.id, e);
                return failed(format!("inversion failed: {}", e));
            }
        };

        // the stack is written only after the whole scene inverted, so a
        // failure here never leaves a partial product behind
        if let Err(e) = sink.write_scene(scene, &traits) {
            log::error!("Scene {}: writing trait stack failed: {}", scene.id, e);
            return failed(format!("output failed: {}", e));
        }

        log::info!(
            "Scene {}: complete ({} failed pixels)",
            scene.id,
            traits.pixel_failures
        );
        SceneOutcome {
            scene_id: scene.id.clone(),
            timestamp: scene.timestamp,
            state: SceneState::SceneComplete,
            pixel_failures: traits.pixel_failures,
            reason: None,
        }
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scenes: {} succeeded, {} failed, {} skipped ({} LUT builds{})",
            self.outcomes.len(),
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.lut_builds,
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}
