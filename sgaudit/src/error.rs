//! Error types for sgaudit application
use crate::credentials::CredentialError;

/// Custom error type for sgaudit operations
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    /// AWS client error
    #[error("AWS error: {0}")]
    Aws(#[from] sgaudit_api::AwsError),

    /// EC2 error
    #[error("EC2 error: {0}")]
    Ec2(#[from] sgaudit_api::Ec2Error),

    /// CloudTrail error
    #[error("CloudTrail error: {0}")]
    CloudTrail(#[from] sgaudit_api::CloudTrailError),

    /// Logs Insights error
    #[error("Logs Insights error: {0}")]
    Insights(#[from] sgaudit_api::InsightsError),

    /// Credential error
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Email construction or delivery error
    #[error("Email error: {0}")]
    Email(String),

    /// Invalid datetime format
    #[error("Invalid datetime format: {0}")]
    InvalidDateTimeFormat(String),

    /// Invalid date range
    #[error("Invalid date range: {0}")]
    DateRangeInvalid(String),

    /// Invalid input value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every region in a multi-region report failed
    #[error("All regions failed: {0}")]
    AllRegionsFailed(String),
}

impl From<lettre::error::Error> for ReportError {
    fn from(err: lettre::error::Error) -> Self {
        ReportError::Email(format!("message build failed: {err}"))
    }
}

impl From<lettre::transport::smtp::Error> for ReportError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        ReportError::Email(format!("SMTP delivery failed: {err}"))
    }
}

impl From<lettre::address::AddressError> for ReportError {
    fn from(err: lettre::address::AddressError) -> Self {
        ReportError::Email(format!("invalid address: {err}"))
    }
}

/// Result type alias for sgaudit operations
pub type Result<T> = std::result::Result<T, ReportError>;
