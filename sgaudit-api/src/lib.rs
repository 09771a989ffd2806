//! # sgaudit API Library
//!
//! Typed access to the AWS APIs needed to audit EC2 security groups:
//! EC2 (security groups and instances), CloudTrail event history and
//! CloudWatch Logs Insights.
//!
//! The SDK response shapes are converted into small owned domain types so
//! report code can flatten them without touching the SDK builders.
//!
//! ## Features
//!
//! - 🔐 **Standard credential chain** - environment, shared profile, SSO or instance role
//! - 🌍 **Per-region clients** - one [`AwsClient`] per region, cheap to clone
//! - 🛡️ **EC2 API** - security groups with ingress/egress rules, instances by group
//! - 📜 **CloudTrail API** - paginated `LookupEvents` by resource name
//! - 🔍 **Logs Insights API** - start a query and poll it with a hard timeout
//!
//! ## Quick Start
//!
//! ```no_run
//! use sgaudit_api::{AwsClient, AwsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AwsConfig::new().with_region("us-east-1");
//!     let client = AwsClient::new(config).await?;
//!
//!     let groups = client
//!         .ec2_api()
//!         .describe_security_groups(&["sg-0e8395d957c1caa7d".to_string()])
//!         .await?;
//!     println!("{} security group(s)", groups.len());
//!
//!     Ok(())
//! }
//! ```

pub mod cloudtrail;
pub mod ec2;
pub mod insights;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use log::{debug, warn};

// Re-export common types for convenience
pub use cloudtrail::{CloudTrailApi, CloudTrailError, LookupRequest, TrailEvent};
pub use ec2::{
    Ec2Api, Ec2Error, GroupIdentifier, Instance, IpPermission, RuleSource, SecurityGroup,
};
pub use insights::{
    InsightsApi, InsightsError, PollConfig, QueryRequest, QueryResults, QueryStatus, ResultField,
    ResultRow,
};

/// Region used when neither the CLI nor the environment provides one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Error type shared by every API module.
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    /// An AWS service call failed
    #[error("{operation} failed: {message}")]
    Service { operation: String, message: String },

    /// Client configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AwsError {
    /// Wrap an SDK error, keeping the full error context chain in the message.
    pub(crate) fn service<E>(operation: &str, err: E) -> Self
    where
        E: std::error::Error,
    {
        AwsError::Service {
            operation: operation.to_string(),
            message: aws_sdk_ec2::error::DisplayErrorContext(err).to_string(),
        }
    }
}

/// Configuration for building an [`AwsClient`].
///
/// Anything left unset falls through to the standard AWS configuration
/// chain (`AWS_REGION`, `AWS_PROFILE`, `~/.aws/config`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsConfig {
    /// Region override
    pub region: Option<String>,
    /// Named profile override
    pub profile: Option<String>,
}

impl AwsConfig {
    /// Create an empty configuration that defers to the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the client to a region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Use a named profile from the shared config files.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

/// Pin [`DEFAULT_REGION`] when the configuration chain resolved no region.
fn with_default_region(sdk_config: SdkConfig) -> SdkConfig {
    if sdk_config.region().is_some() {
        return sdk_config;
    }

    warn!("No AWS region configured, falling back to {DEFAULT_REGION}");
    sdk_config
        .into_builder()
        .region(Region::new(DEFAULT_REGION))
        .build()
}

/// Loaded AWS configuration plus accessors for each API family.
#[derive(Debug, Clone)]
pub struct AwsClient {
    sdk_config: SdkConfig,
}

impl AwsClient {
    /// Resolve credentials and region and build a client.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError::InvalidConfig`] if a profile name is empty.
    pub async fn new(config: AwsConfig) -> Result<Self, AwsError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = config.region {
            loader = loader.region(Region::new(region));
        }

        if let Some(profile) = config.profile {
            if profile.trim().is_empty() {
                return Err(AwsError::InvalidConfig(
                    "Profile name cannot be empty".to_string(),
                ));
            }
            loader = loader.profile_name(profile);
        }

        let client = Self::from_sdk_config(loader.load().await);
        debug!("Loaded AWS configuration for region {}", client.region());

        Ok(client)
    }

    /// Build a client from an already loaded SDK configuration.
    #[must_use]
    pub fn from_sdk_config(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config: with_default_region(sdk_config),
        }
    }

    /// Resolved region name.
    #[must_use]
    pub fn region(&self) -> &str {
        self.sdk_config
            .region()
            .map(|r| r.as_ref())
            .unwrap_or(DEFAULT_REGION)
    }

    /// Get an EC2 API instance.
    #[must_use]
    pub fn ec2_api(&self) -> Ec2Api {
        Ec2Api::new(aws_sdk_ec2::Client::new(&self.sdk_config))
    }

    /// Get a CloudTrail API instance.
    #[must_use]
    pub fn cloudtrail_api(&self) -> CloudTrailApi {
        CloudTrailApi::new(aws_sdk_cloudtrail::Client::new(&self.sdk_config))
    }

    /// Get a CloudWatch Logs Insights API instance.
    #[must_use]
    pub fn insights_api(&self) -> InsightsApi {
        InsightsApi::new(aws_sdk_cloudwatchlogs::Client::new(&self.sdk_config))
    }
}
