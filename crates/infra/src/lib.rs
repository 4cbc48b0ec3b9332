//! Timbre infrastructure: real-time handoff, host audio streams and export
//!
//! The control side talks to the engine through an [`EngineController`]; the
//! audio callback owns the matching [`EngineDriver`]. Everything between the
//! two is lock-free.

pub mod audio;
pub mod error;
pub mod export;

pub use audio::{Engine, EngineController, EngineDriver, RealtimeEngine, SubmitReport};
pub use error::{EngineError, ExportError};
