//! Lumen Engine -- frame driver, scene records and logging on top of
//! [`lumen_ecs`].
//!
//! The ECS crate knows nothing about time or persistence. This crate adds a
//! fixed-timestep [`FrameLoop`](frame::FrameLoop) that raises the scene's
//! `update`/`post_update` events, a [`loader`] that rebuilds scenes from
//! hashed [`SceneRecord`](loader::SceneRecord)s, and a one-call
//! [`init_logging`](logging::init_logging).
//!
//! # Quick Start
//!
//! ```
//! use lumen_engine::prelude::*;
//!
//! #[derive(Default)]
//! struct Ticker {
//!     ticks: u32,
//! }
//!
//! impl Ticker {
//!     fn on_update(&mut self, _scene: &mut Scene, _args: &EventArgs) -> Result<(), HandlerError> {
//!         self.ticks += 1;
//!         Ok(())
//!     }
//! }
//!
//! impl System for Ticker {
//!     fn subscriptions() -> Vec<Subscription<Self>> {
//!         vec![Subscription::new(names::UPDATE, Self::on_update)]
//!     }
//! }
//!
//! let mut scene = Scene::new();
//! scene.add_system(Ticker::default()).unwrap();
//!
//! let mut frames = FrameLoop::new(scene, FrameConfig::default()).unwrap();
//! frames.run_frames(100);
//! assert_eq!(frames.scene().system::<Ticker>().unwrap().ticks, 100);
//! ```

#![deny(unsafe_code)]

pub mod frame;
pub mod loader;
pub mod logging;

/// Re-export the ECS crate for convenience.
pub use lumen_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Re-export everything from the ECS prelude.
    pub use lumen_ecs::prelude::*;

    // Engine-specific exports.
    pub use crate::frame::{FrameConfig, FrameDiagnostics, FrameLoop};
    pub use crate::loader::{
        capture_scene, load_into, load_scene, load_scene_with, ComponentRecord, GlobalRecord,
        SceneRecord, TypeCatalog,
    };
    pub use crate::logging::init_logging;
}
