//! Cross-crate integration tests for the Timbre pipeline

#[cfg(test)]
mod pipeline_integration;
