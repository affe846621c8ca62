//! Error types for the procflow engine.
//!
//! Per-cycle outcomes are never errors: they travel through the graph as
//! [`StepStatus`](crate::core::StepStatus) values. The types here cover the
//! synchronous failures around that: graph validation, configuration,
//! port access, and lifecycle misuse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for procflow operations.
#[derive(Debug, Error)]
pub enum ProcflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A cycle was detected in the pipeline.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A configuration block was rejected.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A port could not be read or written.
    #[error("{0}")]
    Port(#[from] PortError),

    /// A lifecycle operation was refused.
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// A process failed to acquire its resources.
    #[error("Initialization of '{process}' failed: {reason}")]
    Initialization {
        /// The process name.
        process: String,
        /// Why initialization failed.
        reason: String,
    },

    /// A blocking edge operation was interrupted.
    #[error("{0}")]
    Interrupted(#[from] Interrupted),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcflowError {
    /// Creates an initialization error for a process.
    #[must_use]
    pub fn initialization(process: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Initialization {
            process: process.into(),
            reason: reason.into(),
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a graph fails validation at build or connect time.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of nodes forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a data cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the edges in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            nodes: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Errors raised while reading or applying configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The key is not part of the block.
    #[error("Unknown configuration key '{key}'")]
    UnknownKey {
        /// The missing key.
        key: String,
    },

    /// The value could not be converted or failed validation.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// One or more nodes of a pipeline rejected their sub-block.
    #[error("Configuration rejected by {}: {}", nodes.join(", "), reasons.join("; "))]
    Rejected {
        /// The nodes that failed.
        nodes: Vec<String>,
        /// The individual failures.
        reasons: Vec<String>,
    },
}

impl ConfigError {
    /// Creates an unknown key error.
    #[must_use]
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by port access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// The process has no port with this name.
    #[error("Process '{process}' has no port '{port}'")]
    UnknownPort {
        /// The process name.
        process: String,
        /// The requested port.
        port: String,
    },

    /// The payload type does not match the port type.
    #[error("Port '{port}' expects {expected}, got {found}")]
    TypeMismatch {
        /// The port name.
        port: String,
        /// The declared type.
        expected: String,
        /// The delivered type.
        found: String,
    },

    /// The output has not been produced yet.
    #[error("Port '{port}' of '{process}' has no value")]
    NoValue {
        /// The process name.
        process: String,
        /// The port name.
        port: String,
    },
}

impl PortError {
    /// Creates an unknown port error.
    #[must_use]
    pub fn unknown(process: impl Into<String>, port: impl Into<String>) -> Self {
        Self::UnknownPort {
            process: process.into(),
            port: port.into(),
        }
    }

    /// Creates a no value error.
    #[must_use]
    pub fn no_value(process: impl Into<String>, port: impl Into<String>) -> Self {
        Self::NoValue {
            process: process.into(),
            port: port.into(),
        }
    }
}

/// Errors raised when a lifecycle operation is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The node's worker is currently inside a step.
    #[error("Node '{node}' is running")]
    NodeRunning {
        /// The node name.
        node: String,
    },

    /// Queues attached to the node still hold items.
    #[error("Node '{node}' still has {queued} queued item(s)")]
    QueuesNotEmpty {
        /// The node name.
        node: String,
        /// Total number of queued items.
        queued: usize,
    },

    /// The pipeline's workers are alive.
    #[error("Pipeline '{pipeline}' is already running")]
    PipelineRunning {
        /// The pipeline name.
        pipeline: String,
    },

    /// No node with this name exists.
    #[error("No node named '{node}'")]
    UnknownNode {
        /// The node name.
        node: String,
    },

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker for '{node}': {reason}")]
    SpawnFailed {
        /// The node name.
        node: String,
        /// The OS error.
        reason: String,
    },
}

/// Returned by blocking edge operations when their interrupt token fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Edge operation interrupted")]
pub struct Interrupted;

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-004-CYCLE" => Some(
                "Check your edges for circular references. \
                 Data must flow from sources to sinks without returning.",
            ),
            "CONTRACT-004-DUPLICATE" => Some(
                "Every node in a pipeline needs a unique name. \
                 Rename one of the processes.",
            ),
            "CONTRACT-004-MISSING_NODE" => Some(
                "Add both endpoints to the builder before connecting them. \
                 Check for typos in node names.",
            ),
            "CONTRACT-005-PORT" => Some(
                "The port does not exist or has the wrong direction. \
                 Inspect the process's ports() listing.",
            ),
            "CONTRACT-005-TYPE" => Some(
                "Both ends of an edge must carry the same Rust type.",
            ),
            "CONTRACT-005-FANIN" => Some(
                "An input port accepts exactly one edge. \
                 Use a merging process to combine several producers.",
            ),
            "CONTRACT-006-NO_EXECUTE" => Some(
                "Nodes added without execute never step and cannot be wired.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("node", "my_node");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("node"), Some(&"my_node".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");

        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(validation.nodes.len(), 4);
    }

    #[test]
    fn test_config_rejected_message() {
        let err = ConfigError::Rejected {
            nodes: vec!["src".to_string(), "sink".to_string()],
            reasons: vec!["bad".to_string(), "worse".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Configuration rejected by src, sink: bad; worse"
        );
    }

    #[test]
    fn test_lifecycle_error_converts() {
        let err: ProcflowError = LifecycleError::NodeRunning {
            node: "pass".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            ProcflowError::Lifecycle(LifecycleError::NodeRunning { .. })
        ));
    }

    #[test]
    fn test_suggestions() {
        assert!(ContractSuggestions::get("CONTRACT-004-CYCLE").is_some());
        assert!(ContractSuggestions::get("CONTRACT-005-TYPE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}
