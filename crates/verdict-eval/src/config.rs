//! Evaluator configuration.

use serde::{Deserialize, Serialize};

/// Knobs for an [`EvaluatorContext`](crate::EvaluatorContext).
///
/// Missing keys take their defaults when deserializing, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Maximum machine steps in one pass, counted across resumptions.
    pub gas_limit: u64,
    /// Record derivation traces. When off, results carry an empty trace.
    pub capture_trace: bool,
    /// Treat a placeholder without a registered handler as an error instead
    /// of suspending on it silently.
    pub require_handlers: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            gas_limit: 1_000_000,
            capture_trace: true,
            require_handlers: false,
        }
    }
}

impl EvaluatorConfig {
    /// Parse a JSON configuration.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn without_trace(mut self) -> Self {
        self.capture_trace = false;
        self
    }
}
