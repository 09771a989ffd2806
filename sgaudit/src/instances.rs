//! Flattening of EC2 instances and their attached security groups
use crate::rules::NOT_AVAILABLE;
use serde::Serialize;
use sgaudit_api::Instance;

/// Default output file for the instances report
pub const DEFAULT_OUTPUT: &str = "ec2_instance_sg_details.csv";

/// Regions searched when none are given
pub const DEFAULT_REGIONS: &str = "us-east-1,us-west-2";

/// One (instance, attached security group) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRow {
    #[serde(rename = "InstanceName")]
    pub instance_name: String,
    #[serde(rename = "InstanceID")]
    pub instance_id: String,
    #[serde(rename = "PrivateIPAddress")]
    pub private_ip_address: String,
    #[serde(rename = "NIC_Count")]
    pub nic_count: usize,
    #[serde(rename = "SG_GroupID")]
    pub sg_group_id: String,
    #[serde(rename = "SG_GroupName")]
    pub sg_group_name: String,
    #[serde(rename = "Region")]
    pub region: String,
}

fn or_na(value: Option<&String>) -> String {
    value.cloned().unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Emit one row per security group attached to each instance
///
/// Instances without any attached group produce no rows.
#[must_use]
pub fn flatten_instances(instances: &[Instance], region: &str) -> Vec<InstanceRow> {
    instances
        .iter()
        .flat_map(|instance| {
            instance.security_groups.iter().map(move |group| InstanceRow {
                instance_name: or_na(instance.name_tag.as_ref()),
                instance_id: or_na(instance.instance_id.as_ref()),
                private_ip_address: or_na(instance.private_ip_address.as_ref()),
                nic_count: instance.network_interface_count,
                sg_group_id: or_na(group.group_id.as_ref()),
                sg_group_name: or_na(group.group_name.as_ref()),
                region: region.to_string(),
            })
        })
        .collect()
}
