//! Timbre core: audio model, DSP stages and the effect graph
//!
//! Everything in this crate is platform-agnostic. Host integration (audio
//! devices, lock-free handoff to the real-time thread, file export) lives in
//! `timbre-infra`.

pub mod domain;
