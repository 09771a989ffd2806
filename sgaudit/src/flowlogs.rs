//! Logs Insights query construction for rejected VPC flow log traffic
use crate::error::{ReportError, Result};
use crate::validation::validate_private_ip;
use sgaudit_api::Instance;

/// Default output file for the flow-log report
pub const DEFAULT_OUTPUT: &str = "vpc_flow_results.csv";

/// Rows returned by the query unless overridden
pub const DEFAULT_LIMIT: i32 = 100;

/// Largest limit Logs Insights accepts
pub const MAX_LIMIT: i32 = 10_000;

/// Private IPs of the given instances, validated and de-duplicated
///
/// Instances without a private IP are skipped.
///
/// # Errors
///
/// Returns error if an address is not a valid IPv4 address
pub fn private_ips(instances: &[Instance]) -> Result<Vec<String>> {
    let mut ips: Vec<String> = Vec::new();

    for ip in instances
        .iter()
        .filter_map(|i| i.private_ip_address.as_deref())
    {
        let ip = validate_private_ip(ip).map_err(ReportError::InvalidInput)?;
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    Ok(ips)
}

/// Instance id owning `ip` among the described instances
#[must_use]
pub fn instance_id_for_ip<'a>(instances: &'a [Instance], ip: &str) -> Option<&'a str> {
    instances
        .iter()
        .find(|i| i.private_ip_address.as_deref() == Some(ip))
        .and_then(|i| i.instance_id.as_deref())
}

/// Build the query counting REJECTed flows whose source is one of `ips`
///
/// # Errors
///
/// Returns error if `ips` is empty or contains anything but IPv4 addresses
pub fn build_reject_query(ips: &[String]) -> Result<String> {
    if ips.is_empty() {
        return Err(ReportError::InvalidInput(
            "At least one source IP is required".to_string(),
        ));
    }

    let conditions = ips
        .iter()
        .map(|ip| {
            validate_private_ip(ip)
                .map(|ip| format!("srcAddr = '{ip}'"))
                .map_err(ReportError::InvalidInput)
        })
        .collect::<Result<Vec<String>>>()?
        .join(" or ");

    Ok(format!(
        "fields @timestamp, @message, @logStream, @log\n\
         | filter ({conditions}) and action = 'REJECT' and protocol != -1\n\
         | sort @timestamp desc\n\
         | stats count(*) by @timestamp, srcAddr, srcPort, dstAddr, dstPort, protocol"
    ))
}

/// Validate a query row limit (1-10000)
pub fn validate_limit(s: &str) -> std::result::Result<i32, String> {
    let value: i32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(1..=MAX_LIMIT).contains(&value) {
        return Err(format!("Limit must be between 1 and {MAX_LIMIT}"));
    }
    Ok(value)
}
