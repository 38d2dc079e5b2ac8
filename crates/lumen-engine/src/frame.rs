//! Fixed-timestep frame driver.
//!
//! A [`FrameLoop`] owns a [`Scene`] and advances it one frame at a time.
//! Each frame invokes the scene's `update` event and then its `post_update`
//! event, both carrying the fixed delta in seconds as their only argument.
//! Whatever the scene's systems subscribed to those events runs; the loop
//! itself has no notion of systems.
//!
//! # Example
//!
//! ```
//! use lumen_engine::prelude::*;
//!
//! let config = FrameConfig { fixed_dt: 1.0 / 30.0, ..Default::default() };
//! let mut frames = FrameLoop::new(Scene::new(), config).unwrap();
//! frames.run_frames(30);
//! assert_eq!(frames.frame_count(), 30);
//! assert!((frames.sim_time() - 1.0).abs() < 1e-12);
//! ```

use std::time::{Duration, Instant};

use lumen_ecs::event::{names, DispatchReport, EventArgs};
use lumen_ecs::scene::Scene;
use lumen_ecs::EcsError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// FrameConfig
// ---------------------------------------------------------------------------

/// Configuration for the frame driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Fixed time step in seconds per frame. Must be positive and finite.
    pub fixed_dt: f64,
    /// Start the scene when the driver is constructed.
    pub start_scene: bool,
}

impl Default for FrameConfig {
    /// 60 Hz, scene started on construction.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            start_scene: true,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timing and dispatch outcome of the last frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameDiagnostics {
    /// Wall-clock time spent dispatching `update`.
    pub update_time: Duration,
    /// Wall-clock time spent dispatching `post_update`.
    pub post_update_time: Duration,
    /// Total time for the frame.
    pub total_time: Duration,
    /// Subscribers invoked and failed across both phases.
    pub report: DispatchReport,
}

// ---------------------------------------------------------------------------
// FrameLoop
// ---------------------------------------------------------------------------

/// Drives a scene with a fixed time step.
pub struct FrameLoop {
    scene: Scene,
    frame_counter: u64,
    fixed_dt: f64,
    last_diagnostics: FrameDiagnostics,
}

impl FrameLoop {
    /// Wrap `scene`, starting it if `config.start_scene` is set.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite.
    ///
    /// # Errors
    ///
    /// Returns the scene's error if starting it fails.
    pub fn new(mut scene: Scene, config: FrameConfig) -> Result<Self, EcsError> {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        if config.start_scene {
            scene.start()?;
        }
        Ok(Self {
            scene,
            frame_counter: 0,
            fixed_dt: config.fixed_dt,
            last_diagnostics: FrameDiagnostics::default(),
        })
    }

    /// Run one frame: `update(dt)` then `post_update(dt)`.
    pub fn frame(&mut self) -> FrameDiagnostics {
        let frame_start = Instant::now();

        let update_start = Instant::now();
        let mut report = self.dispatch(names::UPDATE);
        let update_time = update_start.elapsed();

        let post_start = Instant::now();
        report.absorb(self.dispatch(names::POST_UPDATE));
        let post_update_time = post_start.elapsed();

        self.frame_counter += 1;
        if report.failed > 0 {
            warn!(
                frame = self.frame_counter,
                failed = report.failed,
                invoked = report.invoked,
                "frame finished with failing subscribers"
            );
        }

        self.last_diagnostics = FrameDiagnostics {
            update_time,
            post_update_time,
            total_time: frame_start.elapsed(),
            report,
        };
        self.last_diagnostics
    }

    /// Run `count` frames. Returns the frame counter afterwards.
    pub fn run_frames(&mut self, count: u64) -> u64 {
        for _ in 0..count {
            self.frame();
        }
        debug!(frames = count, total = self.frame_counter, "frames run");
        self.frame_counter
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    /// Simulated seconds, computed as `frames * dt` so it never drifts.
    pub fn sim_time(&self) -> f64 {
        self.frame_counter as f64 * self.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Stop the scene and hand it back.
    pub fn into_scene(mut self) -> Result<Scene, EcsError> {
        self.scene.stop()?;
        Ok(self.scene)
    }

    fn dispatch(&mut self, event: &'static str) -> DispatchReport {
        match self.scene.invoke(event, EventArgs::one(self.fixed_dt)) {
            Ok(report) => report,
            // Frame events are core channels, registered by every scene.
            Err(err) => unreachable!("frame event '{event}' missing: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
