use serde::{Deserialize, Serialize};
use std::fmt;

/// Cancellation tier as labelled by the catalog.
///
/// Labels the engine does not know are kept verbatim so the snapshot stays
/// faithful to what the guest was shown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PolicyTier {
    Flexible,
    Moderate,
    Strict,
    NonRefundable,
    Unrecognized(String),
}

impl PolicyTier {
    pub fn as_str(&self) -> &str {
        match self {
            PolicyTier::Flexible => "FLEXIBLE",
            PolicyTier::Moderate => "MODERATE",
            PolicyTier::Strict => "STRICT",
            PolicyTier::NonRefundable => "NON_REFUNDABLE",
            PolicyTier::Unrecognized(label) => label,
        }
    }
}

impl From<String> for PolicyTier {
    fn from(value: String) -> Self {
        match value.as_str() {
            "FLEXIBLE" => PolicyTier::Flexible,
            "MODERATE" => PolicyTier::Moderate,
            "STRICT" => PolicyTier::Strict,
            "NON_REFUNDABLE" => PolicyTier::NonRefundable,
            _ => PolicyTier::Unrecognized(value),
        }
    }
}

impl From<&str> for PolicyTier {
    fn from(value: &str) -> Self {
        PolicyTier::from(value.to_string())
    }
}

impl From<PolicyTier> for String {
    fn from(value: PolicyTier) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy snapshot copied onto a booking at quote time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub tier: PolicyTier,
    pub name: String,
    pub description: Option<String>,
}

impl CancellationPolicy {
    pub fn new(tier: PolicyTier, name: impl Into<String>) -> Self {
        Self {
            tier,
            name: name.into(),
            description: None,
        }
    }
}
