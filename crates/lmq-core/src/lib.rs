#![deny(missing_docs)]
#![doc = "Core task identity, configuration payload and error types shared by the lmq orchestrator."]

pub mod errors;
pub mod payload;
pub mod provenance;
mod types;

pub use errors::{ErrorInfo, LmqError};
pub use payload::{AwqParams, GptqParams, HqqParams, MxqParams, NamedConfig, QuantConfig};
pub use provenance::{RunProvenance, SchemaVersion};
pub use types::{short_model_id, Algorithm, TaskKey, TaskRecord, TaskType};
