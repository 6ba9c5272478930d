// seqmux core library
//
// Foundation types shared by the seqmux scheduler crates: request headers
// and providers, payloads, per-request stats, model configuration, and
// error types.

pub mod config;
pub mod error;
pub mod payload;
pub mod request;
pub mod stats;

pub use config::{ControlInput, ControlKind, DataType, ModelConfig, SequenceBatching};
pub use error::{SchedulerError, Status};
pub use payload::{CompletionFn, Payload};
pub use request::{
    flags, CorrelationId, InferenceRequest, InferenceResponse, InputOverride, InputOverrideMap,
    NullRequest, RequestHeader, RequestProvider, ResponseProvider,
};
pub use stats::{InferStats, RequestTimer};
