//! `geoetl-core`: shared domain types, configuration and secret handling.
//!
//! Every other crate in the workspace depends on this one. It owns no I/O
//! beyond reading the config file.

pub mod config;
pub mod crypto;
pub mod error;
pub mod types;

pub use config::GeoEtlConfig;
pub use error::{BoxError, CoreError, Result};
