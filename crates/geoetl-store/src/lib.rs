//! `geoetl-store`: SQLite persistence for data sources, pipelines, external
//! syncs, run sessions and ingested points.
//!
//! [`SqliteStore`] implements every storage seam the other crates define:
//!
//! | Trait          | Crate             | Used by                  |
//! |----------------|-------------------|--------------------------|
//! | `SourceLookup` | `geoetl-pipeline` | the streaming extractor  |
//! | `SessionSink`  | `geoetl-pipeline` | the run orchestrator     |
//! | `SyncStore`    | `geoetl-sync`     | the sync job             |
//! | `PayloadIngest`| `geoetl-sync`     | the sync job             |

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{NewDataSource, NewSync, SqliteStore};
