//! CloudTrail event listing and security group rule-change analysis
use crate::datetime::format_report_time;
use crate::rules::NOT_AVAILABLE;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use sgaudit_api::TrailEvent;

/// Default output file for the event listing
pub const DEFAULT_EVENTS_OUTPUT: &str = "outbound_rules_sg.csv";

/// Default output file for the rule-change analysis
pub const DEFAULT_CHANGES_OUTPUT: &str = "Modify_security_group_changes.csv";

/// Events fetched per security group by the change analysis
pub const DEFAULT_MAX_CHANGE_EVENTS: i32 = 50;

/// One CloudTrail event with its raw payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRow {
    #[serde(rename = "EventTime")]
    pub event_time: String,
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "Details")]
    pub details: String,
}

/// One added or removed CIDR rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRow {
    #[serde(rename = "Event Time")]
    pub event_time: String,
    #[serde(rename = "Event Name")]
    pub event_name: String,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "CIDR")]
    pub cidr: String,
    #[serde(rename = "Port")]
    pub port: String,
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "Change Type")]
    pub change_type: String,
    #[serde(rename = "Before State")]
    pub before_state: String,
    #[serde(rename = "After State")]
    pub after_state: String,
}

/// Whether a rule was granted or taken away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Removed,
}

impl ChangeType {
    /// Classify a CloudTrail event name; `None` for events that don't change rules
    #[must_use]
    pub fn from_event_name(event_name: &str) -> Option<Self> {
        match event_name {
            "AuthorizeSecurityGroupIngress" | "AuthorizeSecurityGroupEgress" => Some(Self::Added),
            "RevokeSecurityGroupIngress" | "RevokeSecurityGroupEgress" => Some(Self::Removed),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Added => "Added",
            Self::Removed => "Removed",
        }
    }
}

/// A CloudTrail event that carried request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SgChange {
    pub event_time: Option<DateTime<Utc>>,
    pub event_name: String,
    pub request_parameters: Value,
    /// `userIdentity.arn` of the caller
    pub user: String,
    pub source_ip: String,
}

#[derive(Serialize)]
struct RuleState<'a> {
    #[serde(rename = "Port")]
    port: &'a Value,
    #[serde(rename = "Protocol")]
    protocol: &'a Value,
    #[serde(rename = "CIDR")]
    cidr: &'a Value,
}

fn render_time(event_time: Option<&DateTime<Utc>>) -> String {
    event_time.map(format_report_time).unwrap_or_default()
}

/// Flatten events into rows for the event listing
#[must_use]
pub fn flatten_events(events: &[TrailEvent]) -> Vec<EventRow> {
    events
        .iter()
        .map(|event| EventRow {
            event_time: render_time(event.event_time.as_ref()),
            event_name: event.event_name.clone().unwrap_or_default(),
            details: event.raw.clone(),
        })
        .collect()
}

/// Parse the raw payload of an event into an [`SgChange`]
///
/// Returns `None` when the payload isn't valid JSON or has no request
/// parameters.
#[must_use]
pub fn extract_change(event: &TrailEvent) -> Option<SgChange> {
    let details: Value = match serde_json::from_str(&event.raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Skipping CloudTrail event {} with unparseable payload: {e}",
                event.event_id.as_deref().unwrap_or(NOT_AVAILABLE)
            );
            return None;
        }
    };

    let request_parameters = details.get("requestParameters")?;
    let has_parameters = match request_parameters {
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
        _ => true,
    };
    if !has_parameters {
        return None;
    }

    let event_name = event
        .event_name
        .clone()
        .or_else(|| details.get("eventName")?.as_str().map(str::to_string))
        .unwrap_or_default();

    Some(SgChange {
        event_time: event.event_time,
        event_name,
        request_parameters: request_parameters.clone(),
        user: details
            .pointer("/userIdentity/arn")
            .and_then(Value::as_str)
            .unwrap_or(NOT_AVAILABLE)
            .to_string(),
        source_ip: details
            .get("sourceIPAddress")
            .and_then(Value::as_str)
            .unwrap_or(NOT_AVAILABLE)
            .to_string(),
    })
}

/// Elements of a CloudTrail list, which is either a plain array or an
/// object wrapping the array in `items`
fn list_items(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => match map.get("items") {
            Some(Value::Array(items)) => items,
            _ => &[],
        },
        _ => &[],
    }
}

/// Missing keys become `N/A`; an explicit `null` is kept as `null`
fn value_or_na(value: Option<&Value>) -> Value {
    value
        .cloned()
        .unwrap_or_else(|| Value::String(NOT_AVAILABLE.to_string()))
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expand authorize/revoke events into one row per IPv4 range
///
/// # Errors
///
/// Returns error if a state column fails to serialize
pub fn analyze_changes(changes: &[SgChange]) -> serde_json::Result<Vec<ChangeRow>> {
    let mut rows = Vec::new();

    for change in changes {
        let Some(change_type) = ChangeType::from_event_name(&change.event_name) else {
            debug!("Ignoring CloudTrail event {}", change.event_name);
            continue;
        };

        for permission in list_items(change.request_parameters.get("ipPermissions")) {
            let port = value_or_na(permission.get("fromPort"));
            let protocol = value_or_na(permission.get("ipProtocol"));

            for ip_range in list_items(permission.get("ipRanges")) {
                let cidr = value_or_na(ip_range.get("cidrIp"));
                let state = serde_json::to_string(&RuleState {
                    port: &port,
                    protocol: &protocol,
                    cidr: &cidr,
                })?;
                let null = Value::Null.to_string();

                let (before_state, after_state) = match change_type {
                    ChangeType::Added => (null, state),
                    ChangeType::Removed => (state, null),
                };

                rows.push(ChangeRow {
                    event_time: render_time(change.event_time.as_ref()),
                    event_name: change.event_name.clone(),
                    user: change.user.clone(),
                    cidr: render_cell(&cidr),
                    port: render_cell(&port),
                    protocol: render_cell(&protocol),
                    change_type: change_type.as_str().to_string(),
                    before_state,
                    after_state,
                });
            }
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(name: &str, raw: Value) -> TrailEvent {
        TrailEvent {
            event_id: Some("evt-1".to_string()),
            event_time: Some(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()),
            event_name: Some(name.to_string()),
            username: Some("alice".to_string()),
            raw: raw.to_string(),
        }
    }

    fn authorize_payload_with_items() -> Value {
        json!({
            "eventName": "AuthorizeSecurityGroupIngress",
            "sourceIPAddress": "203.0.113.10",
            "userIdentity": { "arn": "arn:aws:iam::123456789012:user/alice" },
            "requestParameters": {
                "groupId": "sg-081eaa2ddb056954c",
                "ipPermissions": {
                    "items": [{
                        "ipProtocol": "tcp",
                        "fromPort": 22,
                        "toPort": 22,
                        "ipRanges": { "items": [
                            { "cidrIp": "198.51.100.0/24" },
                            { "cidrIp": "203.0.113.0/24" }
                        ]}
                    }]
                }
            }
        })
    }

    #[test]
    fn test_flatten_events() {
        let events = vec![event("ModifySecurityGroupRules", json!({"a": 1}))];
        let rows = flatten_events(&events);
        assert_eq!(
            rows,
            vec![EventRow {
                event_time: "2025-01-15 12:00:00+00:00".to_string(),
                event_name: "ModifySecurityGroupRules".to_string(),
                details: r#"{"a":1}"#.to_string(),
            }]
        );
    }

    #[test]
    fn test_extract_change_fields() {
        let change = extract_change(&event(
            "AuthorizeSecurityGroupIngress",
            authorize_payload_with_items(),
        ))
        .unwrap();

        assert_eq!(change.event_name, "AuthorizeSecurityGroupIngress");
        assert_eq!(change.user, "arn:aws:iam::123456789012:user/alice");
        assert_eq!(change.source_ip, "203.0.113.10");
    }

    #[test]
    fn test_extract_change_skips_empty_parameters() {
        let empty = event("DescribeSecurityGroups", json!({"requestParameters": {}}));
        assert!(extract_change(&empty).is_none());

        let null = event("DescribeSecurityGroups", json!({"requestParameters": null}));
        assert!(extract_change(&null).is_none());

        let missing = event("DescribeSecurityGroups", json!({"eventName": "x"}));
        assert!(extract_change(&missing).is_none());
    }

    #[test]
    fn test_extract_change_bad_json() {
        let mut bad = event("AuthorizeSecurityGroupIngress", json!({}));
        bad.raw = "{not json".to_string();
        assert!(extract_change(&bad).is_none());
    }

    #[test]
    fn test_extract_change_defaults_user() {
        let change = extract_change(&event(
            "AuthorizeSecurityGroupIngress",
            json!({"requestParameters": {"groupId": "sg-1"}}),
        ))
        .unwrap();
        assert_eq!(change.user, "N/A");
        assert_eq!(change.source_ip, "N/A");
    }

    #[test]
    fn test_analyze_authorize_with_items_wrapping() {
        let change = extract_change(&event(
            "AuthorizeSecurityGroupIngress",
            authorize_payload_with_items(),
        ))
        .unwrap();

        let rows = analyze_changes(&[change]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            ChangeRow {
                event_time: "2025-01-15 12:00:00+00:00".to_string(),
                event_name: "AuthorizeSecurityGroupIngress".to_string(),
                user: "arn:aws:iam::123456789012:user/alice".to_string(),
                cidr: "198.51.100.0/24".to_string(),
                port: "22".to_string(),
                protocol: "tcp".to_string(),
                change_type: "Added".to_string(),
                before_state: "null".to_string(),
                after_state: r#"{"Port":22,"Protocol":"tcp","CIDR":"198.51.100.0/24"}"#
                    .to_string(),
            }
        );
        assert_eq!(rows[1].cidr, "203.0.113.0/24");
    }

    #[test]
    fn test_analyze_revoke_plain_arrays() {
        let payload = json!({
            "requestParameters": {
                "ipPermissions": [{
                    "ipProtocol": "-1",
                    "ipRanges": [{ "cidrIp": "0.0.0.0/0" }]
                }]
            }
        });
        let change = extract_change(&event("RevokeSecurityGroupEgress", payload)).unwrap();

        let rows = analyze_changes(&[change]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].change_type, "Removed");
        assert_eq!(rows[0].port, "N/A");
        assert_eq!(
            rows[0].before_state,
            r#"{"Port":"N/A","Protocol":"-1","CIDR":"0.0.0.0/0"}"#
        );
        assert_eq!(rows[0].after_state, "null");
    }

    #[test]
    fn test_analyze_keeps_explicit_null() {
        let payload = json!({
            "requestParameters": {
                "ipPermissions": [{
                    "ipProtocol": "tcp",
                    "fromPort": null,
                    "ipRanges": [{ "cidrIp": "10.0.0.0/8" }]
                }]
            }
        });
        let change = extract_change(&event("AuthorizeSecurityGroupIngress", payload)).unwrap();

        let rows = analyze_changes(&[change]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].port, "");
        assert_eq!(
            rows[0].after_state,
            r#"{"Port":null,"Protocol":"tcp","CIDR":"10.0.0.0/8"}"#
        );
    }

    #[test]
    fn test_analyze_ignores_other_events() {
        let payload = json!({
            "requestParameters": {
                "groupId": "sg-1234abcd",
                "ipPermissions": [{ "ipRanges": [{ "cidrIp": "10.0.0.0/8" }] }]
            }
        });
        let change = extract_change(&event("ModifySecurityGroupRules", payload)).unwrap();
        assert!(analyze_changes(&[change]).unwrap().is_empty());
    }

    #[test]
    fn test_change_type_classification() {
        assert_eq!(
            ChangeType::from_event_name("AuthorizeSecurityGroupEgress"),
            Some(ChangeType::Added)
        );
        assert_eq!(
            ChangeType::from_event_name("RevokeSecurityGroupIngress"),
            Some(ChangeType::Removed)
        );
        assert_eq!(ChangeType::from_event_name("CreateSecurityGroup"), None);
    }

    #[test]
    fn test_change_csv_header_order() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let change = extract_change(&event(
            "AuthorizeSecurityGroupIngress",
            authorize_payload_with_items(),
        ))
        .unwrap();
        for row in analyze_changes(&[change]).unwrap() {
            writer.serialize(row).unwrap();
        }
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(data.starts_with(
            "Event Time,Event Name,User,CIDR,Port,Protocol,Change Type,Before State,After State\n"
        ));
    }
}
