//! Engine lifecycle and host audio integration
//!
//! - [`driver`]: the lock-free handoff between control and audio threads
//! - [`lockfree_buffer`]: sample FIFO between the input and output callbacks
//! - [`cpal_backend`]: duplex device streams through CPAL

pub mod cpal_backend;
pub mod driver;
pub mod lockfree_buffer;

pub use cpal_backend::{list_devices, RealtimeEngine};
pub use driver::{Engine, EngineController, EngineDriver, SubmitReport};
pub use lockfree_buffer::LockFreeRingBuffer;
