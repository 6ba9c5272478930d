//! Request headers, input overrides, and provider traits.
//!
//! The scheduler only reads a request's header (correlation id, batch
//! size, start/end flags) and rebinds the provider's input-override map
//! before handing the payload to the backend. Everything else about a
//! request is opaque to it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DataType;

/// Client-assigned identifier naming a sequence. Zero is reserved and
/// rejected at admission.
pub type CorrelationId = u64;

/// Request flag bits.
pub mod flags {
    /// The request is the first of its sequence.
    pub const SEQUENCE_START: u32 = 0x1;
    /// The request is the last of its sequence.
    pub const SEQUENCE_END: u32 = 0x2;
}

/// The header fields of an inference request the scheduler inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Sequence this request belongs to.
    pub correlation_id: CorrelationId,
    /// Batch dimension of the request. The sequence scheduler requires 1.
    pub batch_size: u32,
    /// Bitfield of `flags::*` values.
    pub flags: u32,
}

impl RequestHeader {
    pub fn new(correlation_id: CorrelationId, batch_size: u32, flags: u32) -> Self {
        Self { correlation_id, batch_size, flags }
    }

    /// Whether the request starts its sequence.
    pub fn is_sequence_start(&self) -> bool {
        (self.flags & flags::SEQUENCE_START) != 0
    }

    /// Whether the request ends its sequence.
    pub fn is_sequence_end(&self) -> bool {
        (self.flags & flags::SEQUENCE_END) != 0
    }
}

/// A synthesized input tensor carried alongside a request.
///
/// Control signals are delivered to the backend as overrides: shape-`[1]`
/// tensors whose raw little-endian bytes encode the declared true/false
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOverride {
    /// Raw element bytes, little endian.
    pub content: Vec<u8>,
    /// Tensor shape.
    pub dims: Vec<i64>,
    /// Element datatype.
    pub datatype: DataType,
}

/// Overrides keyed by input-tensor name. Built once at scheduler
/// construction and shared immutably across every batcher.
pub type InputOverrideMap = HashMap<String, Arc<InputOverride>>;

/// Read side of a request as seen by the scheduler, plus the one mutation
/// it performs: rebinding the input-override map before each step.
pub trait RequestProvider: Send {
    /// Header of the request.
    fn request_header(&self) -> &RequestHeader;

    /// Name of the model the request targets, for diagnostics.
    fn model_name(&self) -> &str;

    /// Attach the override map the backend should apply this step.
    fn set_input_override(&mut self, overrides: Arc<InputOverrideMap>);

    /// The currently attached override map, if any.
    fn input_override(&self) -> Option<&Arc<InputOverrideMap>>;
}

/// Response channel for a request. Opaque to the scheduler; forwarded
/// through the batch untouched.
pub trait ResponseProvider: Send {}

/// A plain owned inference request.
#[derive(Debug)]
pub struct InferenceRequest {
    model_name: String,
    header: RequestHeader,
    overrides: Option<Arc<InputOverrideMap>>,
}

impl InferenceRequest {
    pub fn new(model_name: impl Into<String>, header: RequestHeader) -> Self {
        Self { model_name: model_name.into(), header, overrides: None }
    }
}

impl RequestProvider for InferenceRequest {
    fn request_header(&self) -> &RequestHeader {
        &self.header
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn set_input_override(&mut self, overrides: Arc<InputOverrideMap>) {
        self.overrides = Some(overrides);
    }

    fn input_override(&self) -> Option<&Arc<InputOverrideMap>> {
        self.overrides.as_ref()
    }
}

/// Placeholder request standing in for an empty batch slot.
///
/// Built from the header captured on the batcher's first enqueue, so its
/// shape matches the live requests executed alongside it. The not-ready
/// override map is what tells the backend to ignore the slot.
#[derive(Debug)]
pub struct NullRequest {
    model_name: String,
    header: RequestHeader,
    overrides: Option<Arc<InputOverrideMap>>,
}

impl NullRequest {
    pub fn new(header: RequestHeader, model_name: impl Into<String>) -> Self {
        Self { model_name: model_name.into(), header, overrides: None }
    }
}

impl RequestProvider for NullRequest {
    fn request_header(&self) -> &RequestHeader {
        &self.header
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn set_input_override(&mut self, overrides: Arc<InputOverrideMap>) {
        self.overrides = Some(overrides);
    }

    fn input_override(&self) -> Option<&Arc<InputOverrideMap>> {
        self.overrides.as_ref()
    }
}

/// A response sink with no delivery target, usable where the caller does
/// not care about the response body.
#[derive(Debug, Default)]
pub struct InferenceResponse;

impl ResponseProvider for InferenceResponse {}
