//! CLI argument parsing for sgaudit
use crate::flowlogs::validate_limit;
use crate::validation::{
    Direction, Regions, SecurityGroupIds, parse_regions, parse_security_group_ids,
    validate_log_group_name, validate_region, validate_security_group_id,
};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "sgaudit",
    version,
    about = "AWS security group audit tool",
    long_about = "CLI tool for exporting EC2 security group rules, attached instances, CloudTrail rule changes and rejected VPC flow log traffic to CSV",
    after_help = "AWS CREDENTIALS:

Credentials and region are resolved through the standard AWS chain:
  • AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_SESSION_TOKEN
  • AWS_PROFILE or --profile (shared config and SSO)
  • Instance or container role

EXAMPLES:
  # Inbound rules of two groups
  sgaudit rules --sg-ids sg-081eaa2ddb056954c,sg-03dc1e65602297291

  # Instances attached to a group in three regions
  sgaudit instances --sg-ids sg-0e8395d957c1caa7d --regions us-east-1,us-west-2,eu-west-1

  # Rule changes over the last week
  sgaudit changes --sg-ids sg-081eaa2ddb056954c --start-offset 7d

  # Rejected flows from a group's instances, emailed when done
  sgaudit flow-rejects --sg-id sg-0f88628462b1ae545 --log-group flgg-traditional-devtest --email

For email settings, run: sgaudit help-env"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// AWS region (defaults to the AWS configuration chain, then us-east-1)
    #[arg(long, global = true, value_parser = validate_region)]
    pub region: Option<String>,

    /// Named AWS profile from the shared config files
    #[arg(long, global = true)]
    pub profile: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the rules of one or more security groups
    Rules {
        /// Comma-separated security group ids
        #[arg(long = "sg-ids", value_parser = parse_security_group_ids)]
        sg_ids: SecurityGroupIds,

        /// Rule direction: inbound or outbound
        #[arg(long, default_value = "inbound", value_parser = clap::value_parser!(Direction))]
        direction: Direction,

        /// Output CSV file (defaults to ibound_Sg_rules.csv or outbound_Sg_rules.csv)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Export the instances attached to security groups across regions
    Instances {
        /// Comma-separated security group ids
        #[arg(long = "sg-ids", value_parser = parse_security_group_ids)]
        sg_ids: SecurityGroupIds,

        /// Comma-separated AWS regions to search
        #[arg(long, default_value = crate::instances::DEFAULT_REGIONS, value_parser = parse_regions)]
        regions: Regions,

        /// Output CSV file
        #[arg(short, long, default_value = crate::instances::DEFAULT_OUTPUT)]
        output: String,
    },

    /// Export every CloudTrail event recorded against a security group
    Events {
        /// Security group id
        #[arg(long = "sg-id", value_parser = validate_security_group_id)]
        sg_id: String,

        /// Start datetime. Format: YYYY-MM-DD or YYYY-MM-DD HH:MM:SS
        /// Cannot be used with --start-offset
        #[arg(short, long, conflicts_with = "start_offset", value_parser = validate_datetime)]
        start: Option<String>,

        /// Start offset from now. Format: Nm, Nh, Nd or N (minutes)
        /// Defaults to 2d
        #[arg(long, conflicts_with = "start", value_parser = validate_time_offset)]
        start_offset: Option<String>,

        /// End datetime. Format: YYYY-MM-DD or YYYY-MM-DD HH:MM:SS
        /// Defaults to now
        #[arg(short, long, value_parser = validate_datetime)]
        end: Option<String>,

        /// Treat input datetimes as UTC (default: local timezone)
        #[arg(long)]
        utc: bool,

        /// Output CSV file
        #[arg(short, long, default_value = crate::trail::DEFAULT_EVENTS_OUTPUT)]
        output: String,
    },

    /// Export added and removed CIDR rules from CloudTrail
    Changes {
        /// Comma-separated security group ids
        #[arg(long = "sg-ids", value_parser = parse_security_group_ids)]
        sg_ids: SecurityGroupIds,

        /// Start offset from now. Format: Nm, Nh, Nd or N (minutes)
        #[arg(long, default_value = "24h", value_parser = validate_time_offset)]
        start_offset: String,

        /// Maximum CloudTrail events examined per security group
        #[arg(long, default_value_t = crate::trail::DEFAULT_MAX_CHANGE_EVENTS, value_parser = validate_max_results)]
        max_results: i32,

        /// Output CSV file
        #[arg(short, long, default_value = crate::trail::DEFAULT_CHANGES_OUTPUT)]
        output: String,
    },

    /// Export REJECTed VPC flow log traffic from a security group's instances
    FlowRejects {
        /// Security group whose instances' private IPs are queried
        #[arg(long = "sg-id", value_parser = validate_security_group_id)]
        sg_id: String,

        /// CloudWatch Logs group holding the VPC flow logs
        #[arg(long, value_parser = validate_log_group_name)]
        log_group: String,

        /// Query window ending now. Format: Nm, Nh, Nd or N (minutes)
        #[arg(long, default_value = "1h", value_parser = validate_time_offset)]
        start_offset: String,

        /// Maximum rows returned by the query (1-10000)
        #[arg(long, default_value_t = crate::flowlogs::DEFAULT_LIMIT, value_parser = validate_limit)]
        limit: i32,

        /// Seconds between query status checks
        #[arg(long, default_value_t = 1, value_parser = validate_poll_interval)]
        poll_interval: u64,

        /// Give up waiting for the query after this long. Format: Nm, Nh or N (minutes)
        #[arg(long, default_value = "15m", value_parser = validate_poll_timeout)]
        poll_timeout: String,

        /// Output CSV file
        #[arg(short, long, default_value = crate::flowlogs::DEFAULT_OUTPUT)]
        output: String,

        /// Email the CSV when rows were found
        #[arg(long)]
        email: bool,
    },

    /// Display help for environment variables
    HelpEnv,
}

/// Validate datetime format (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
fn validate_datetime(s: &str) -> Result<String, String> {
    use chrono::{NaiveDate, NaiveDateTime};

    let s_trimmed = s.trim();

    if s_trimmed.is_empty() {
        return Err("Datetime cannot be empty".to_string());
    }

    if NaiveDateTime::parse_from_str(s_trimmed, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(s_trimmed, "%Y-%m-%d").is_ok()
    {
        return Ok(s_trimmed.to_string());
    }

    Err(format!(
        "Invalid datetime format: '{s}'. Expected: YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
    ))
}

/// Validate time offset format (Nm, Nh, Nd, or just N for minutes)
fn validate_time_offset(s: &str) -> Result<String, String> {
    crate::datetime::parse_time_offset(s)
        .map(|_| s.trim().to_string())
        .map_err(|_| {
            format!(
                "Invalid time offset: '{s}'. Expected a positive number optionally followed by 'm', 'h', or 'd'"
            )
        })
}

/// Validate the query wait limit; it must fit in a wall-clock duration
fn validate_poll_timeout(s: &str) -> Result<String, String> {
    crate::datetime::parse_offset_duration(s)
        .map(|_| s.trim().to_string())
        .map_err(|e| format!("Invalid poll timeout: '{s}': {e}"))
}

/// Validate CloudTrail max results (> 0)
fn validate_max_results(s: &str) -> Result<i32, String> {
    let value: i32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value <= 0 {
        return Err("Max results must be greater than 0".to_string());
    }
    Ok(value)
}

/// Validate poll interval (1-60 seconds)
fn validate_poll_interval(s: &str) -> Result<u64, String> {
    let value: u64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(1..=60).contains(&value) {
        return Err(format!(
            "Poll interval must be between 1 and 60 seconds (got {value})"
        ));
    }
    Ok(value)
}

/// Text printed by `sgaudit help-env`
#[must_use]
pub fn env_help() -> &'static str {
    "ENVIRONMENT VARIABLES:

Logging:
  RUST_LOG                         Log filter (default: info)

AWS (standard SDK chain):
  AWS_REGION                       Region when --region is not given
  AWS_PROFILE                      Profile when --profile is not given
  AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN

Email (flow-rejects --email):
  SGAUDIT_SMTP_TO                  Comma-separated recipients (required)
  SGAUDIT_SMTP_FROM                Sender address (default: SMTP username)
  SGAUDIT_SMTP_HOST                SMTP relay (default: smtp.gmail.com)
  SGAUDIT_SMTP_PORT                STARTTLS port (default: 587)

SMTP credentials from Vault (preferred):
  VAULT_CLI_ADDR                   Vault address (https only)
  VAULT_CLI_JWT                    JWT used for login
  VAULT_CLI_ROLE                   Vault role
  VAULT_CLI_SECRET_PATH            Secret path, optionally path@engine (default engine: kvv2)
                                   Keys: smtp_username, smtp_password
  VAULT_CLI_NAMESPACE              Vault namespace (optional)
  VAULT_CLI_AUTH_PATH              Auth mount (default: auth/jwt)
  SGAUDIT_DISABLE_CERT_VALIDATION  Set to 'true' to skip Vault TLS verification

SMTP credentials from the environment (fallback):
  SGAUDIT_SMTP_USERNAME
  SGAUDIT_SMTP_PASSWORD"
}
