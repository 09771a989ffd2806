//! Sgaudit library - security group audit reports for AWS
//!
//! This library exports security group rules, attached instances, CloudTrail
//! rule changes and rejected VPC flow log traffic as CSV reports.
pub mod cli;
pub mod credentials;
pub mod datetime;
pub mod email;
pub mod error;
pub mod flowlogs;
pub mod instances;
pub mod output;
pub mod report;
pub mod rules;
pub mod trail;
pub mod validation;
pub mod vault_client;

// Re-export commonly used types
pub use error::{ReportError, Result};
pub use report::ReportOutcome;
