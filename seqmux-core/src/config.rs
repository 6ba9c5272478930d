//! Model configuration for sequence-batched models.
//!
//! The scheduler reads a small slice of the model configuration: the model
//! name, the batch width, the worker-thread nice level, and the
//! `sequence_batching` section that declares the control-signal tensors the
//! backend expects. Configurations deserialize from JSON via
//! [`ModelConfig::from_json`].

use serde::Deserialize;

use crate::error::SchedulerError;

/// Nice level applied to scheduler worker threads unless overridden.
const DEFAULT_SCHEDULER_NICE: i32 = 5;

/// Datatype of a control-signal tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int32,
    Int64,
    Fp32,
}

impl DataType {
    /// Size in bytes of one element of this datatype.
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Int32 | DataType::Fp32 => 4,
            DataType::Int64 => 8,
        }
    }
}

/// The control signals a sequence-batched model declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// True on the first request of each sequence.
    SequenceStart,
    /// True whenever the slot carries a live request this step.
    SequenceReady,
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlKind::SequenceStart => write!(f, "sequence_start"),
            ControlKind::SequenceReady => write!(f, "sequence_ready"),
        }
    }
}

/// One declared control-signal input tensor.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlInput {
    /// Name of the input tensor the backend reads the signal from.
    pub name: String,
    /// Which signal this tensor carries.
    pub kind: ControlKind,
    /// Element datatype of the tensor.
    #[serde(default = "default_control_datatype")]
    pub datatype: DataType,
    /// Value placed in the tensor when the signal is false.
    #[serde(default)]
    pub false_value: i32,
    /// Value placed in the tensor when the signal is true.
    #[serde(default = "default_true_value")]
    pub true_value: i32,
}

fn default_control_datatype() -> DataType {
    DataType::Int32
}

fn default_true_value() -> i32 {
    1
}

/// The `sequence_batching` section of a model configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SequenceBatching {
    /// Declared control-signal tensors.
    #[serde(default)]
    pub control_inputs: Vec<ControlInput>,
}

impl SequenceBatching {
    /// Resolve the declared control input of the given kind.
    ///
    /// Both `sequence_start` and `sequence_ready` are required for a model
    /// to be served by the sequence scheduler.
    pub fn control(
        &self,
        kind: ControlKind,
        model_name: &str,
    ) -> Result<&ControlInput, SchedulerError> {
        let mut found = None;
        for control in &self.control_inputs {
            if control.kind == kind {
                if found.is_some() {
                    return Err(SchedulerError::invalid_argument(format!(
                        "model '{model_name}' declares control '{kind}' more than once"
                    )));
                }
                found = Some(control);
            }
        }
        found.ok_or_else(|| {
            SchedulerError::invalid_argument(format!(
                "model '{model_name}' must declare the required control '{kind}'"
            ))
        })
    }
}

/// The slice of a model configuration the sequence scheduler consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model name, used in diagnostics.
    pub name: String,
    /// Maximum batch width. Zero means the model does not support batching;
    /// the scheduler still runs it with a single slot.
    #[serde(default)]
    pub max_batch_size: i32,
    /// Nice level for the scheduler worker threads.
    #[serde(default = "default_nice")]
    pub nice: i32,
    /// Sequence-batching declaration. Required by the sequence scheduler.
    #[serde(default)]
    pub sequence_batching: Option<SequenceBatching>,
}

fn default_nice() -> i32 {
    DEFAULT_SCHEDULER_NICE
}

impl ModelConfig {
    /// Parse a model configuration from JSON.
    pub fn from_json(text: &str) -> Result<Self, SchedulerError> {
        serde_json::from_str(text)
            .map_err(|e| SchedulerError::invalid_argument(format!("model configuration: {e}")))
    }

    /// Batch width the scheduler allocates per runner, at least 1 even for
    /// models that do not support batching.
    pub fn effective_batch_size(&self) -> usize {
        self.max_batch_size.max(1) as usize
    }

    /// The `sequence_batching` section, or an error if the model does not
    /// declare one.
    pub fn sequence_batching(&self) -> Result<&SequenceBatching, SchedulerError> {
        self.sequence_batching.as_ref().ok_or_else(|| {
            SchedulerError::invalid_argument(format!(
                "model '{}' does not specify sequence batching",
                self.name
            ))
        })
    }

    /// Build a configuration with the conventional `START` / `READY`
    /// int32 control tensors.
    pub fn with_standard_controls(name: impl Into<String>, max_batch_size: i32) -> Self {
        Self {
            name: name.into(),
            max_batch_size,
            nice: DEFAULT_SCHEDULER_NICE,
            sequence_batching: Some(SequenceBatching {
                control_inputs: vec![
                    ControlInput {
                        name: "START".to_string(),
                        kind: ControlKind::SequenceStart,
                        datatype: DataType::Int32,
                        false_value: 0,
                        true_value: 1,
                    },
                    ControlInput {
                        name: "READY".to_string(),
                        kind: ControlKind::SequenceReady,
                        datatype: DataType::Int32,
                        false_value: 0,
                        true_value: 1,
                    },
                ],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = ModelConfig::from_json(r#"{ "name": "lstm" }"#).unwrap();
        assert_eq!(config.name, "lstm");
        assert_eq!(config.max_batch_size, 0);
        assert_eq!(config.nice, 5);
        assert!(config.sequence_batching.is_none());
    }

    #[test]
    fn test_parse_controls() {
        let config = ModelConfig::from_json(
            r#"{
                "name": "lstm",
                "max_batch_size": 8,
                "sequence_batching": {
                    "control_inputs": [
                        { "name": "start", "kind": "sequence_start" },
                        { "name": "ready", "kind": "sequence_ready",
                          "datatype": "fp32", "false_value": 0, "true_value": 1 }
                    ]
                }
            }"#,
        )
        .unwrap();

        let sb = config.sequence_batching().unwrap();
        let start = sb.control(ControlKind::SequenceStart, &config.name).unwrap();
        assert_eq!(start.name, "start");
        assert_eq!(start.datatype, DataType::Int32);
        assert_eq!(start.true_value, 1);

        let ready = sb.control(ControlKind::SequenceReady, &config.name).unwrap();
        assert_eq!(ready.datatype, DataType::Fp32);
    }

    #[test]
    fn test_parse_error() {
        let result = ModelConfig::from_json("{ not json");
        assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
    }

    #[test]
    fn test_batch_size_coercion() {
        let mut config = ModelConfig::with_standard_controls("m", 0);
        assert_eq!(config.effective_batch_size(), 1);
        config.max_batch_size = -3;
        assert_eq!(config.effective_batch_size(), 1);
        config.max_batch_size = 4;
        assert_eq!(config.effective_batch_size(), 4);
    }

    #[test]
    fn test_missing_control() {
        let sb = SequenceBatching {
            control_inputs: vec![ControlInput {
                name: "start".to_string(),
                kind: ControlKind::SequenceStart,
                datatype: DataType::Int32,
                false_value: 0,
                true_value: 1,
            }],
        };
        let err = sb.control(ControlKind::SequenceReady, "m").unwrap_err();
        assert!(err.to_string().contains("sequence_ready"));
    }

    #[test]
    fn test_missing_sequence_batching() {
        let config = ModelConfig::from_json(r#"{ "name": "dense" }"#).unwrap();
        let err = config.sequence_batching().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn test_duplicate_control() {
        let mut config = ModelConfig::with_standard_controls("m", 2);
        let sb = config.sequence_batching.as_mut().unwrap();
        let dup = sb.control_inputs[0].clone();
        sb.control_inputs.push(dup);
        let err = sb.control(ControlKind::SequenceStart, "m").unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_datatype_sizes() {
        assert_eq!(DataType::Bool.size_bytes(), 1);
        assert_eq!(DataType::Int32.size_bytes(), 4);
        assert_eq!(DataType::Int64.size_bytes(), 8);
        assert_eq!(DataType::Fp32.size_bytes(), 4);
    }
}
