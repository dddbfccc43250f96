// src/config/mod.rs

//! Job configuration.
//!
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a job file from disk (`loader.rs`).
//! - Validate it into a [`JobFile`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    DiscoverySection, JobFile, JobSection, MarkerSection, NumberedMarker, RawJobFile,
    RunSection,
};
