//! Integration tests for the canopy clustering engine

mod atomic_failure;
mod pinning;
mod sled_backend;
mod support;
