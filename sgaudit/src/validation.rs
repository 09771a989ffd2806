//! Input validation for CLI parameters
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Security group ids: `sg-` followed by 8 or 17 lowercase hex digits
const SECURITY_GROUP_ID_PATTERN: &str = r"^sg-[0-9a-f]{8}([0-9a-f]{9})?$";

/// AWS region names such as `us-east-1` or `us-gov-west-1`
const REGION_PATTERN: &str = r"^[a-z]{2}(-gov)?-[a-z]+-\d$";

/// Characters CloudWatch Logs accepts in a log group name
const LOG_GROUP_PATTERN: &str = r"^[\.\-_/#A-Za-z0-9]+$";

const MAX_LOG_GROUP_LENGTH: usize = 512;

fn matches(pattern: &str, value: &str) -> Result<bool, String> {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .map_err(|e| format!("Failed to compile validation pattern: {e}"))
}

/// Rule direction of a security group report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

impl Direction {
    /// Get the lowercase CLI representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    /// Value written to the `Type` column of the rules report
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Inbound => "Inbound",
            Self::Outbound => "Outbound",
        }
    }

    /// List all valid values for help text
    #[must_use]
    pub fn valid_values() -> &'static str {
        "inbound, outbound"
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" | "ingress" => Ok(Self::Inbound),
            "outbound" | "egress" => Ok(Self::Outbound),
            _ => Err(format!(
                "Invalid direction '{}'. Valid values: {}",
                s,
                Self::valid_values()
            )),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A non-empty, de-duplicated list of security group ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupIds(Vec<String>);

impl SecurityGroupIds {
    /// Borrow the ids in the order they were given
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// A non-empty, de-duplicated list of AWS regions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regions(Vec<String>);

impl Regions {
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Validate a single security group id
pub fn validate_security_group_id(s: &str) -> Result<String, String> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        return Err("Security group id cannot be empty".to_string());
    }

    if !matches(SECURITY_GROUP_ID_PATTERN, trimmed)? {
        return Err(format!(
            "Invalid security group id '{trimmed}'. Expected 'sg-' followed by 8 or 17 lowercase hex characters"
        ));
    }

    Ok(trimmed.to_string())
}

/// Parse a comma-separated list of security group ids (trimmed, de-duplicated)
pub fn parse_security_group_ids(s: &str) -> Result<SecurityGroupIds, String> {
    let mut ids: Vec<String> = Vec::new();

    for part in s.split(',') {
        if part.trim().is_empty() {
            continue;
        }
        let id = validate_security_group_id(part)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err("At least one security group id is required".to_string());
    }

    Ok(SecurityGroupIds(ids))
}

/// Validate an AWS region name
pub fn validate_region(s: &str) -> Result<String, String> {
    let trimmed = s.trim();

    if !matches(REGION_PATTERN, trimmed)? {
        return Err(format!(
            "Invalid AWS region '{trimmed}'. Expected a region name such as 'us-east-1'"
        ));
    }

    Ok(trimmed.to_string())
}

/// Parse a comma-separated list of AWS regions (trimmed, de-duplicated)
pub fn parse_regions(s: &str) -> Result<Regions, String> {
    let mut regions: Vec<String> = Vec::new();

    for part in s.split(',').filter(|p| !p.trim().is_empty()) {
        let region = validate_region(part)?;
        if !regions.contains(&region) {
            regions.push(region);
        }
    }

    if regions.is_empty() {
        return Err("At least one region is required".to_string());
    }

    Ok(Regions(regions))
}

/// Validate an IPv4 address before it is interpolated into a query string
pub fn validate_private_ip(s: &str) -> Result<String, String> {
    let trimmed = s.trim();
    Ipv4Addr::from_str(trimmed)
        .map(|ip| ip.to_string())
        .map_err(|_| format!("Invalid IPv4 address '{trimmed}'"))
}

/// Validate a CloudWatch Logs log group name
pub fn validate_log_group_name(s: &str) -> Result<String, String> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        return Err("Log group name cannot be empty".to_string());
    }

    if trimmed.len() > MAX_LOG_GROUP_LENGTH {
        return Err(format!(
            "Log group name must not exceed {MAX_LOG_GROUP_LENGTH} characters"
        ));
    }

    if !matches(LOG_GROUP_PATTERN, trimmed)? {
        return Err(format!(
            "Log group name '{trimmed}' contains invalid characters. Allowed: alphanumeric and . - _ / #"
        ));
    }

    Ok(trimmed.to_string())
}
