//! Error types for the decision gate

/// Errors raised while configuring the gate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    /// Tier boundaries are out of order or above 100
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),
}
