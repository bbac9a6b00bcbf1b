//! Error types for the Commvault exporter.
//!
//! Only [`CommvaultError::TargetNotFound`] ever leaves a probe as an error.
//! The category-level variants (`Auth`, `Network`, `Upstream`, `Parse`) are
//! turned into success gauges by the probe orchestrator.

use thiserror::Error;

/// Main error type for Commvault exporter operations.
#[derive(Debug, Error)]
pub enum CommvaultError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Probe requested for a target missing from the configuration
    #[error("Target '{0}' not found in configuration")]
    TargetNotFound(String),

    /// Authentication failed or the upstream rejected the session token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure talking to the Commvault API
    #[error("Commvault API request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response other than 401
    #[error("Commvault API returned HTTP {status}")]
    Upstream { status: u16 },

    /// Response body did not match the expected schema
    #[error("Failed to parse Commvault API response: {0}")]
    Parse(String),

    /// Metrics error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommvaultError {
    /// Short, stable name of the error class, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::TargetNotFound(_) => "target_not_found",
            Self::Auth(_) => "auth",
            Self::Network(_) => "network",
            Self::Upstream { .. } => "upstream",
            Self::Parse(_) => "parse",
            Self::Metrics(_) => "metrics",
            Self::Server(_) => "server",
            Self::Io(_) => "io",
        }
    }
}

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, CommvaultError>;
