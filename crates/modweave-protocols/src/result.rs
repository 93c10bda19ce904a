//! Module result envelope.
//!
//! Every module invocation, leaf or composed, yields the same envelope shape:
//! `{ ok: true, meta, data }` on success and `{ ok: false, meta, error }` on failure.

#[cfg(test)]
#[path = "result_tests.rs"]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

static NULL: Value = Value::Null;

/// Ordinal risk ranking carried in result metadata.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Wire name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Self-reported confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Risk assessment.
    #[serde(default)]
    pub risk: RiskLevel,
    /// Short human-readable explanation.
    #[serde(default)]
    pub explain: String,
}

impl ResultMeta {
    /// Create metadata.
    pub fn new(confidence: f64, risk: RiskLevel, explain: impl Into<String>) -> Self {
        Self {
            confidence,
            risk,
            explain: explain.into(),
        }
    }

    /// Full confidence, no risk, no explanation.
    pub fn neutral() -> Self {
        Self::new(1.0, RiskLevel::None, "")
    }
}

impl Default for ResultMeta {
    fn default() -> Self {
        Self::new(0.0, RiskLevel::None, "")
    }
}

/// Error payload of a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    pub code: String,
    pub message: String,
}

impl ResultError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Envelope produced by a single module invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Whether the module succeeded.
    pub ok: bool,
    /// Metadata.
    #[serde(default)]
    pub meta: ResultMeta,
    /// Output payload (successful results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error payload (failed results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl ModuleResult {
    /// Create a successful result with neutral metadata.
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            meta: ResultMeta::neutral(),
            data: Some(data),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            meta: ResultMeta::default(),
            data: None,
            error: Some(ResultError::new(code, message)),
        }
    }

    /// Replace the metadata.
    pub fn with_meta(mut self, meta: ResultMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Payload, or JSON null when absent.
    pub fn data_or_null(&self) -> &Value {
        self.data.as_ref().unwrap_or(&NULL)
    }

    /// Error code, if failed.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// JSON view of the envelope used as the subject of conditions.
    pub fn to_envelope(&self) -> Value {
        let mut envelope = json!({
            "ok": self.ok,
            "meta": {
                "confidence": self.meta.confidence,
                "risk": self.meta.risk.as_str(),
                "explain": self.meta.explain,
            },
        });
        if let Some(data) = &self.data {
            envelope["data"] = data.clone();
        }
        if let Some(error) = &self.error {
            envelope["error"] = json!({ "code": error.code, "message": error.message });
        }
        envelope
    }
}
