//! Test Helper Utilities
//!
//! Shared utilities for the scanport-ingest integration tests

#![allow(dead_code)]

pub mod bundles;
pub mod sandbox;

pub use bundles::{breadboard_bundle, BundleSpec};
pub use sandbox::{delivery_trigger, reprocess_trigger, Sandbox};
