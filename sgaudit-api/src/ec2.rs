//! EC2 API functionality for security groups and the instances attached to them.
//!
//! Responses are converted into owned domain types ([`SecurityGroup`],
//! [`Instance`]) so report code never depends on the SDK builders.

use aws_sdk_ec2::Client;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::Filter;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::AwsError;

/// EC2 error code returned when a requested group id does not exist
const GROUP_NOT_FOUND_CODE: &str = "InvalidGroup.NotFound";

/// Error types specific to EC2 operations
#[derive(Debug, thiserror::Error)]
pub enum Ec2Error {
    #[error("Security group not found: {0}")]
    GroupNotFound(String),
    #[error("No security group ids supplied")]
    NoGroupIds,
    #[error("API error: {0}")]
    Api(#[from] AwsError),
}

/// A source or destination attached to a security group rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSource {
    /// CIDR block, referenced group id or prefix list id
    pub value: String,
    pub description: Option<String>,
}

/// One ingress or egress permission of a security group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPermission {
    /// Protocol name or number; `-1` means all protocols
    pub ip_protocol: Option<String>,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub ipv4_ranges: Vec<RuleSource>,
    pub ipv6_ranges: Vec<RuleSource>,
    /// Other security groups referenced by this rule
    pub group_pairs: Vec<RuleSource>,
    pub prefix_lists: Vec<RuleSource>,
}

/// A security group with its inbound and outbound rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
    pub ingress: Vec<IpPermission>,
    pub egress: Vec<IpPermission>,
}

/// Security group reference as attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIdentifier {
    pub group_id: Option<String>,
    pub group_name: Option<String>,
}

/// The subset of an EC2 instance the reports need
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: Option<String>,
    pub private_ip_address: Option<String>,
    /// Value of the `Name` tag
    pub name_tag: Option<String>,
    pub network_interface_count: usize,
    pub security_groups: Vec<GroupIdentifier>,
}

impl From<&aws_sdk_ec2::types::IpPermission> for IpPermission {
    fn from(permission: &aws_sdk_ec2::types::IpPermission) -> Self {
        Self {
            ip_protocol: permission.ip_protocol().map(str::to_string),
            from_port: permission.from_port(),
            to_port: permission.to_port(),
            ipv4_ranges: permission
                .ip_ranges()
                .iter()
                .filter_map(|range| {
                    range.cidr_ip().map(|cidr| RuleSource {
                        value: cidr.to_string(),
                        description: range.description().map(str::to_string),
                    })
                })
                .collect(),
            ipv6_ranges: permission
                .ipv6_ranges()
                .iter()
                .filter_map(|range| {
                    range.cidr_ipv6().map(|cidr| RuleSource {
                        value: cidr.to_string(),
                        description: range.description().map(str::to_string),
                    })
                })
                .collect(),
            group_pairs: permission
                .user_id_group_pairs()
                .iter()
                .filter_map(|pair| {
                    pair.group_id().map(|id| RuleSource {
                        value: id.to_string(),
                        description: pair.description().map(str::to_string),
                    })
                })
                .collect(),
            prefix_lists: permission
                .prefix_list_ids()
                .iter()
                .filter_map(|prefix| {
                    prefix.prefix_list_id().map(|id| RuleSource {
                        value: id.to_string(),
                        description: prefix.description().map(str::to_string),
                    })
                })
                .collect(),
        }
    }
}

impl From<&aws_sdk_ec2::types::SecurityGroup> for SecurityGroup {
    fn from(group: &aws_sdk_ec2::types::SecurityGroup) -> Self {
        Self {
            group_id: group.group_id().unwrap_or_default().to_string(),
            group_name: group.group_name().unwrap_or_default().to_string(),
            description: group.description().unwrap_or_default().to_string(),
            vpc_id: group.vpc_id().map(str::to_string),
            ingress: group.ip_permissions().iter().map(IpPermission::from).collect(),
            egress: group
                .ip_permissions_egress()
                .iter()
                .map(IpPermission::from)
                .collect(),
        }
    }
}

impl From<&aws_sdk_ec2::types::Instance> for Instance {
    fn from(instance: &aws_sdk_ec2::types::Instance) -> Self {
        let name_tag = instance
            .tags()
            .iter()
            .find(|tag| tag.key() == Some("Name"))
            .and_then(|tag| tag.value())
            .map(str::to_string);

        Self {
            instance_id: instance.instance_id().map(str::to_string),
            private_ip_address: instance.private_ip_address().map(str::to_string),
            name_tag,
            network_interface_count: instance.network_interfaces().len(),
            security_groups: instance
                .security_groups()
                .iter()
                .map(|sg| GroupIdentifier {
                    group_id: sg.group_id().map(str::to_string),
                    group_name: sg.group_name().map(str::to_string),
                })
                .collect(),
        }
    }
}

/// EC2 API operations
#[derive(Debug, Clone)]
pub struct Ec2Api {
    client: Client,
}

impl Ec2Api {
    /// Create a new EC2 API instance
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Describe the given security groups, including ingress and egress rules.
    ///
    /// # Errors
    ///
    /// Returns [`Ec2Error::GroupNotFound`] if any id is unknown in this
    /// region, [`Ec2Error::NoGroupIds`] for an empty id list, or an API
    /// error for any other failure.
    pub async fn describe_security_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<SecurityGroup>, Ec2Error> {
        if group_ids.is_empty() {
            return Err(Ec2Error::NoGroupIds);
        }

        debug!("Describing security groups: {:?}", group_ids);

        let response = self
            .client
            .describe_security_groups()
            .set_group_ids(Some(group_ids.to_vec()))
            .send()
            .await
            .map_err(|e| {
                if e.code() == Some(GROUP_NOT_FOUND_CODE) {
                    Ec2Error::GroupNotFound(
                        e.message().unwrap_or(&group_ids.join(",")).to_string(),
                    )
                } else {
                    Ec2Error::Api(AwsError::service("DescribeSecurityGroups", e))
                }
            })?;

        let groups: Vec<SecurityGroup> = response
            .security_groups()
            .iter()
            .map(SecurityGroup::from)
            .collect();

        info!("Retrieved {} security group(s)", groups.len());
        Ok(groups)
    }

    /// Describe every instance that has one of the given security groups attached.
    ///
    /// Follows `NextToken` pagination until the result set is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails.
    pub async fn describe_instances_in_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<Instance>, Ec2Error> {
        if group_ids.is_empty() {
            return Err(Ec2Error::NoGroupIds);
        }

        let filter = Filter::builder()
            .name("instance.group-id")
            .set_values(Some(group_ids.to_vec()))
            .build();

        self.describe_instances_with_filter(filter).await
    }

    async fn describe_instances_with_filter(
        &self,
        filter: Filter,
    ) -> Result<Vec<Instance>, Ec2Error> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        let mut page: u32 = 0;

        loop {
            page = page.saturating_add(1);
            debug!("Describing instances (page {page}) with filter {:?}", filter.name());

            let response = self
                .client
                .describe_instances()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| AwsError::service("DescribeInstances", e))?;

            for reservation in response.reservations() {
                instances.extend(reservation.instances().iter().map(Instance::from));
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!("Found {} instance(s) across {page} page(s)", instances.len());
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::operation::describe_instances::DescribeInstancesOutput;
    use aws_sdk_ec2::types as sdk;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};

    fn sdk_permission() -> sdk::IpPermission {
        sdk::IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(443)
            .to_port(443)
            .ip_ranges(
                sdk::IpRange::builder()
                    .cidr_ip("10.0.0.0/16")
                    .description("internal https")
                    .build(),
            )
            .ipv6_ranges(sdk::Ipv6Range::builder().cidr_ipv6("::/0").build())
            .user_id_group_pairs(
                sdk::UserIdGroupPair::builder()
                    .group_id("sg-0aaaaaaaaaaaaaaaa")
                    .description("load balancer")
                    .build(),
            )
            .prefix_list_ids(sdk::PrefixListId::builder().prefix_list_id("pl-12345678").build())
            .build()
    }

    #[test]
    fn test_permission_conversion() {
        let permission = IpPermission::from(&sdk_permission());

        assert_eq!(permission.ip_protocol.as_deref(), Some("tcp"));
        assert_eq!(permission.from_port, Some(443));
        assert_eq!(permission.to_port, Some(443));
        assert_eq!(
            permission.ipv4_ranges,
            vec![RuleSource {
                value: "10.0.0.0/16".to_string(),
                description: Some("internal https".to_string()),
            }]
        );
        assert_eq!(permission.ipv6_ranges[0].value, "::/0");
        assert_eq!(permission.ipv6_ranges[0].description, None);
        assert_eq!(permission.group_pairs[0].value, "sg-0aaaaaaaaaaaaaaaa");
        assert_eq!(permission.prefix_lists[0].value, "pl-12345678");
    }

    #[test]
    fn test_permission_without_ports() {
        let permission =
            IpPermission::from(&sdk::IpPermission::builder().ip_protocol("-1").build());

        assert_eq!(permission.ip_protocol.as_deref(), Some("-1"));
        assert_eq!(permission.from_port, None);
        assert!(permission.ipv4_ranges.is_empty());
    }

    #[test]
    fn test_range_without_cidr_is_skipped() {
        let permission = IpPermission::from(
            &sdk::IpPermission::builder()
                .ip_ranges(sdk::IpRange::builder().description("orphan").build())
                .build(),
        );
        assert!(permission.ipv4_ranges.is_empty());
    }

    #[test]
    fn test_security_group_conversion() {
        let group = sdk::SecurityGroup::builder()
            .group_id("sg-0e8395d957c1caa7d")
            .group_name("web")
            .description("web tier")
            .vpc_id("vpc-1234")
            .ip_permissions(sdk_permission())
            .ip_permissions_egress(sdk::IpPermission::builder().ip_protocol("-1").build())
            .build();

        let converted = SecurityGroup::from(&group);
        assert_eq!(converted.group_id, "sg-0e8395d957c1caa7d");
        assert_eq!(converted.group_name, "web");
        assert_eq!(converted.vpc_id.as_deref(), Some("vpc-1234"));
        assert_eq!(converted.ingress.len(), 1);
        assert_eq!(converted.egress.len(), 1);
    }

    #[test]
    fn test_instance_conversion() {
        let instance = sdk::Instance::builder()
            .instance_id("i-0123456789abcdef0")
            .private_ip_address("10.200.132.88")
            .tags(sdk::Tag::builder().key("Env").value("dev").build())
            .tags(sdk::Tag::builder().key("Name").value("bastion").build())
            .network_interfaces(sdk::InstanceNetworkInterface::builder().build())
            .network_interfaces(sdk::InstanceNetworkInterface::builder().build())
            .security_groups(
                sdk::GroupIdentifier::builder()
                    .group_id("sg-0e8395d957c1caa7d")
                    .group_name("web")
                    .build(),
            )
            .build();

        let converted = Instance::from(&instance);
        assert_eq!(converted.instance_id.as_deref(), Some("i-0123456789abcdef0"));
        assert_eq!(converted.private_ip_address.as_deref(), Some("10.200.132.88"));
        assert_eq!(converted.name_tag.as_deref(), Some("bastion"));
        assert_eq!(converted.network_interface_count, 2);
        assert_eq!(converted.security_groups.len(), 1);
        assert_eq!(
            converted.security_groups[0].group_name.as_deref(),
            Some("web")
        );
    }

    #[test]
    fn test_instance_without_name_tag() {
        let instance = Instance::from(&sdk::Instance::builder().instance_id("i-1").build());
        assert_eq!(instance.name_tag, None);
        assert_eq!(instance.network_interface_count, 0);
    }

    fn reservation(instance_id: &str, ip: &str) -> sdk::Reservation {
        sdk::Reservation::builder()
            .instances(
                sdk::Instance::builder()
                    .instance_id(instance_id)
                    .private_ip_address(ip)
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn test_describe_instances_follows_next_token() {
        let first_page = mock!(Client::describe_instances)
            .match_requests(|req| req.next_token().is_none())
            .then_output(|| {
                DescribeInstancesOutput::builder()
                    .reservations(reservation("i-0aaaaaaaaaaaaaaaa", "10.0.0.5"))
                    .next_token("page-2")
                    .build()
            });
        let second_page = mock!(Client::describe_instances)
            .match_requests(|req| req.next_token() == Some("page-2"))
            .then_output(|| {
                DescribeInstancesOutput::builder()
                    .reservations(reservation("i-0bbbbbbbbbbbbbbbb", "10.0.0.6"))
                    .next_token("")
                    .build()
            });

        let client = mock_client!(aws_sdk_ec2, RuleMode::MatchAny, [&first_page, &second_page]);
        let instances = Ec2Api::new(client)
            .describe_instances_in_groups(&["sg-1234abcd".to_string()])
            .await
            .unwrap();

        let ids: Vec<&str> = instances
            .iter()
            .filter_map(|i| i.instance_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["i-0aaaaaaaaaaaaaaaa", "i-0bbbbbbbbbbbbbbbb"]);
        assert_eq!(first_page.num_calls(), 1);
        assert_eq!(second_page.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_describe_instances_stops_without_token() {
        let only_page = mock!(Client::describe_instances).then_output(|| {
            DescribeInstancesOutput::builder()
                .reservations(reservation("i-0aaaaaaaaaaaaaaaa", "10.0.0.5"))
                .build()
        });

        let client = mock_client!(aws_sdk_ec2, RuleMode::MatchAny, [&only_page]);
        let instances = Ec2Api::new(client)
            .describe_instances_in_groups(&["sg-1234abcd".to_string()])
            .await
            .unwrap();

        assert_eq!(instances.len(), 1);
        assert_eq!(only_page.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_describe_instances_requires_group_ids() {
        let unused = mock!(Client::describe_instances)
            .then_output(|| DescribeInstancesOutput::builder().build());
        let client = mock_client!(aws_sdk_ec2, RuleMode::MatchAny, [&unused]);

        let result = Ec2Api::new(client).describe_instances_in_groups(&[]).await;
        assert!(matches!(result, Err(Ec2Error::NoGroupIds)));
        assert_eq!(unused.num_calls(), 0);
    }
}
