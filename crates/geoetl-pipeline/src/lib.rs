//! `geoetl-pipeline`: compile pipeline configs to SQL and stream their
//! results through validation.
//!
//! # Flow
//!
//! | Stage      | Module        | Output                          |
//! |------------|---------------|---------------------------------|
//! | Compile    | [`compiler`]  | one sanitised SELECT statement  |
//! | Resolve    | [`resolver`]  | a pinged connection pool        |
//! | Extract    | [`extractor`] | batches of canonical records    |
//! | Run        | [`run`]       | a persisted run session         |

pub mod compiler;
pub mod dialect;
pub mod error;
pub mod extractor;
pub mod resolver;
pub mod run;
pub mod sanitize;
pub mod validate;
pub mod value;

pub use compiler::{compile, compile_document};
pub use dialect::Dialect;
pub use error::{BoxError, PipelineError, Result};
pub use extractor::{BatchHandler, ExtractStats, Extractor, SourceLookup};
pub use resolver::{CredentialResolver, SourcePool};
pub use run::{DetachedTask, InteractiveRun, PipelineRunner, PipelineSource, SessionSink, Validator};
pub use validate::{RemoteValidator, Throttle};
