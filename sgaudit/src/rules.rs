//! Flattening of security group rules into report rows
use crate::validation::Direction;
use serde::Serialize;
use sgaudit_api::{IpPermission, RuleSource, SecurityGroup};

/// Placeholder for values AWS did not return
pub const NOT_AVAILABLE: &str = "N/A";

/// Default output file for the inbound rules report
pub const DEFAULT_INBOUND_OUTPUT: &str = "ibound_Sg_rules.csv";

/// Default output file for the outbound rules report
pub const DEFAULT_OUTBOUND_OUTPUT: &str = "outbound_Sg_rules.csv";

/// One rule source of one security group permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRow {
    #[serde(rename = "SecurityGroupID")]
    pub security_group_id: String,
    #[serde(rename = "GroupName")]
    pub group_name: String,
    #[serde(rename = "Type")]
    pub rule_type: String,
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "PortRange")]
    pub port_range: String,
    #[serde(rename = "SourceCIDR")]
    pub source_cidr: String,
    #[serde(rename = "Description")]
    pub description: String,
}

/// Default output path for a direction
#[must_use]
pub fn default_output(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => DEFAULT_INBOUND_OUTPUT,
        Direction::Outbound => DEFAULT_OUTBOUND_OUTPUT,
    }
}

/// Render `from-to`, or `All` when the rule has no port bounds
#[must_use]
pub fn format_port_range(from_port: Option<i32>, to_port: Option<i32>) -> String {
    match from_port {
        Some(from) => format!(
            "{from}-{}",
            to_port.map_or_else(|| "All".to_string(), |to| to.to_string())
        ),
        None => "All".to_string(),
    }
}

fn sources(permission: &IpPermission) -> impl Iterator<Item = &RuleSource> {
    permission
        .ipv4_ranges
        .iter()
        .chain(permission.ipv6_ranges.iter())
        .chain(permission.group_pairs.iter())
        .chain(permission.prefix_lists.iter())
}

/// Flatten the rules of the given direction into one row per rule source
#[must_use]
pub fn flatten_rules(groups: &[SecurityGroup], direction: Direction) -> Vec<RuleRow> {
    let mut rows = Vec::new();

    for group in groups {
        let permissions = match direction {
            Direction::Inbound => &group.ingress,
            Direction::Outbound => &group.egress,
        };

        for permission in permissions {
            let protocol = permission
                .ip_protocol
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            let port_range = format_port_range(permission.from_port, permission.to_port);

            for source in sources(permission) {
                rows.push(RuleRow {
                    security_group_id: group.group_id.clone(),
                    group_name: group.group_name.clone(),
                    rule_type: direction.label().to_string(),
                    protocol: protocol.clone(),
                    port_range: port_range.clone(),
                    source_cidr: source.value.clone(),
                    description: source
                        .description
                        .clone()
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                });
            }
        }
    }

    rows
}
