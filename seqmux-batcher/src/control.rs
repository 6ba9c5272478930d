//! Control-signal override synthesis.
//!
//! At construction the scheduler derives three immutable override maps
//! from the model configuration, one per slot condition:
//!
//! | signal \ map | start | continuation | not_ready |
//! |---|---|---|---|
//! | sequence_start | true  | false | false |
//! | sequence_ready | true  | true  | false |
//!
//! The maps are shared by `Arc` across every batcher and rebound onto each
//! request provider right before the batch is handed to the backend.

use std::sync::Arc;

use seqmux_core::{
    ControlInput, ControlKind, DataType, InputOverride, InputOverrideMap, ModelConfig,
    SchedulerError,
};

/// The three override maps a batcher rebinds per step.
#[derive(Debug, Clone)]
pub struct ControlOverrides {
    /// First request of a sequence: start=true, ready=true.
    pub start: Arc<InputOverrideMap>,
    /// Later request of a sequence: start=false, ready=true.
    pub continuation: Arc<InputOverrideMap>,
    /// Idle slot placeholder: start=false, ready=false.
    pub not_ready: Arc<InputOverrideMap>,
}

impl ControlOverrides {
    /// Derive the override maps from the model's `sequence_batching`
    /// declaration. Both control signals are required.
    pub fn build(config: &ModelConfig) -> Result<Self, SchedulerError> {
        let sequence_batching = config.sequence_batching()?;

        let mut start = InputOverrideMap::new();
        let mut continuation = InputOverrideMap::new();
        let mut not_ready = InputOverrideMap::new();

        {
            let control = sequence_batching.control(ControlKind::SequenceStart, &config.name)?;
            let true_override = Arc::new(encode(control, control.true_value));
            let false_override = Arc::new(encode(control, control.false_value));

            start.insert(control.name.clone(), true_override);
            continuation.insert(control.name.clone(), false_override.clone());
            not_ready.insert(control.name.clone(), false_override);
        }

        {
            let control = sequence_batching.control(ControlKind::SequenceReady, &config.name)?;
            let true_override = Arc::new(encode(control, control.true_value));
            let false_override = Arc::new(encode(control, control.false_value));

            start.insert(control.name.clone(), true_override.clone());
            continuation.insert(control.name.clone(), true_override);
            not_ready.insert(control.name.clone(), false_override);
        }

        Ok(Self {
            start: Arc::new(start),
            continuation: Arc::new(continuation),
            not_ready: Arc::new(not_ready),
        })
    }
}

/// Encode one control value as a shape-`[1]` override tensor in the
/// declared datatype.
fn encode(control: &ControlInput, value: i32) -> InputOverride {
    let content = match control.datatype {
        DataType::Bool => vec![u8::from(value != 0)],
        DataType::Int32 => value.to_le_bytes().to_vec(),
        DataType::Int64 => i64::from(value).to_le_bytes().to_vec(),
        DataType::Fp32 => (value as f32).to_le_bytes().to_vec(),
    };
    InputOverride { content, dims: vec![1], datatype: control.datatype }
}
