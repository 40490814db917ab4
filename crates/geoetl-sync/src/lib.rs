//! `geoetl-sync`: scheduled pulls from external HTTP systems.

pub mod error;
pub mod payload;
pub mod service;

pub use error::{Result, SyncError};
pub use payload::{CoordinatePayload, CoordinatePoint, IngestReceipt};
pub use service::{PayloadIngest, SyncService, SyncStore};
