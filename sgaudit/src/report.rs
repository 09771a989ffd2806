//! Report pipelines: fetch from AWS, flatten into rows, write CSV
use crate::datetime::TimeWindow;
use crate::email::{EmailConfig, send_report};
use crate::error::{ReportError, Result};
use crate::validation::Direction;
use crate::{flowlogs, instances, output, rules, trail};
use log::{debug, error, info, warn};
use sgaudit_api::{AwsClient, AwsConfig, LookupRequest, PollConfig, QueryRequest};
use std::path::{Path, PathBuf};

/// Result of running one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// CSV written with this many data rows
    Written(PathBuf, usize),
    /// Nothing matched; no file was written
    NoData,
}

impl ReportOutcome {
    fn from_write(written: Option<PathBuf>, rows: usize) -> Self {
        match written {
            Some(path) => ReportOutcome::Written(path, rows),
            None => ReportOutcome::NoData,
        }
    }
}

/// Parameters of the flow-log REJECT report
#[derive(Debug, Clone)]
pub struct FlowRejectsParams {
    pub security_group_id: String,
    pub log_group_name: String,
    pub window: TimeWindow,
    pub limit: i32,
    pub poll: PollConfig,
}

/// Export the inbound or outbound rules of the given security groups
///
/// # Errors
///
/// Returns error if the groups cannot be described or the CSV cannot be written
pub async fn run_rules_report(
    client: &AwsClient,
    group_ids: &[String],
    direction: Direction,
    output_path: &Path,
) -> Result<ReportOutcome> {
    info!(
        "Fetching {direction} rules in {} for security groups: {}",
        client.region(),
        group_ids.join(", ")
    );

    let groups = client.ec2_api().describe_security_groups(group_ids).await?;
    let rows = rules::flatten_rules(&groups, direction);
    debug!("Flattened {} group(s) into {} row(s)", groups.len(), rows.len());

    let written = output::write_rows(output_path, &rows)?;
    Ok(ReportOutcome::from_write(written, rows.len()))
}

/// Export the instances attached to the given security groups across regions
///
/// A failing region is logged and skipped.
///
/// # Errors
///
/// Returns [`ReportError::AllRegionsFailed`] if no region succeeded, or an
/// error if the CSV cannot be written
pub async fn run_instances_report(
    base_config: &AwsConfig,
    group_ids: &[String],
    regions: &[String],
    output_path: &Path,
) -> Result<ReportOutcome> {
    info!("Fetching EC2 instances for the specified security groups...");

    let mut rows = Vec::new();
    let mut failures: Vec<String> = Vec::new();

    for region in regions {
        info!("Checking region: {region}");

        let result = async {
            let client = AwsClient::new(base_config.clone().with_region(region)).await?;
            let found = client
                .ec2_api()
                .describe_instances_in_groups(group_ids)
                .await?;
            Ok::<_, ReportError>(found)
        }
        .await;

        match result {
            Ok(found) => {
                debug!("{} instance(s) in {region}", found.len());
                rows.extend(instances::flatten_instances(&found, region));
            }
            Err(e) => {
                error!("Error fetching EC2 instance details in {region}: {e}");
                failures.push(format!("{region}: {e}"));
            }
        }
    }

    if !regions.is_empty() && failures.len() == regions.len() {
        return Err(ReportError::AllRegionsFailed(failures.join("; ")));
    }

    let written = output::write_rows(output_path, &rows)?;
    Ok(ReportOutcome::from_write(written, rows.len()))
}

/// Export every CloudTrail event recorded against a security group
///
/// # Errors
///
/// Returns error if the lookup fails or the CSV cannot be written
pub async fn run_events_report(
    client: &AwsClient,
    group_id: &str,
    window: &TimeWindow,
    output_path: &Path,
) -> Result<ReportOutcome> {
    info!(
        "Fetching CloudTrail events for {group_id} in {} between {} and {}",
        client.region(),
        window.start,
        window.end
    );

    let events = client
        .cloudtrail_api()
        .lookup_events(&LookupRequest::new(group_id, window.start, window.end))
        .await?;

    if events.is_empty() {
        info!("No changes found for {group_id} in the requested window.");
    }

    let rows = trail::flatten_events(&events);
    let written = output::write_rows(output_path, &rows)?;
    if let Some(path) = &written {
        info!("Security group changes have been written to {}", path.display());
    }
    Ok(ReportOutcome::from_write(written, rows.len()))
}

/// Export added and removed CIDR rules for each security group
///
/// # Errors
///
/// Returns error if a lookup fails or the CSV cannot be written
pub async fn run_changes_report(
    client: &AwsClient,
    group_ids: &[String],
    window: &TimeWindow,
    max_results: i32,
    output_path: &Path,
) -> Result<ReportOutcome> {
    let cloudtrail = client.cloudtrail_api();
    let mut rows = Vec::new();

    for group_id in group_ids {
        info!("Fetching changes from CloudTrail for Security Group: {group_id}...");

        let request =
            LookupRequest::new(group_id, window.start, window.end).with_max_results(max_results);
        let events = cloudtrail.lookup_events(&request).await?;

        let changes: Vec<trail::SgChange> = events.iter().filter_map(trail::extract_change).collect();
        if changes.is_empty() {
            debug!("No request parameters in events for {group_id}");
            continue;
        }

        info!("Analyzing {} change(s) for Security Group: {group_id}...", changes.len());
        rows.extend(trail::analyze_changes(&changes)?);
    }

    if rows.is_empty() {
        info!("No changes detected for the provided Security Groups.");
    }

    let written = output::write_rows(output_path, &rows)?;
    Ok(ReportOutcome::from_write(written, rows.len()))
}

/// Export REJECTed flow log traffic sourced from instances in a security group
///
/// # Errors
///
/// Returns error if instance lookup or the Insights query fails, or the CSV
/// cannot be written
pub async fn run_flow_rejects_report(
    client: &AwsClient,
    params: &FlowRejectsParams,
    output_path: &Path,
) -> Result<ReportOutcome> {
    let group_ids = vec![params.security_group_id.clone()];

    let found = client
        .ec2_api()
        .describe_instances_in_groups(&group_ids)
        .await?;
    let ips = flowlogs::private_ips(&found)?;

    if ips.is_empty() {
        info!(
            "No instances with a private IP are attached to {}",
            params.security_group_id
        );
        return Ok(ReportOutcome::NoData);
    }

    for ip in &ips {
        match flowlogs::instance_id_for_ip(&found, ip) {
            Some(instance_id) => debug!("Instance ID for private IP {ip}: {instance_id}"),
            None => warn!("No instance ID found for private IP: {ip}"),
        }
    }

    let request = QueryRequest {
        log_group_name: params.log_group_name.clone(),
        query_string: flowlogs::build_reject_query(&ips)?,
        start: params.window.start,
        end: params.window.end,
        limit: Some(params.limit),
    };

    let rows = client.insights_api().run_query(&request, &params.poll).await?;

    if rows.is_empty() {
        info!(
            "No logs found for private IP {} in log group {}.",
            ips.join(", "),
            params.log_group_name
        );
        return Ok(ReportOutcome::NoData);
    }

    info!("Query Results: {} row(s)", rows.len());
    for row in &rows {
        debug!("{row:?}");
    }

    let written = output::write_dynamic_rows(output_path, &rows)?;
    Ok(ReportOutcome::from_write(written, rows.len()))
}

/// Email a written report once; `NoData` sends nothing
///
/// # Errors
///
/// Returns error if delivery fails
pub async fn deliver_report(outcome: &ReportOutcome, config: &EmailConfig) -> Result<bool> {
    match outcome {
        ReportOutcome::Written(path, _) => {
            info!("preparing for sending mail...");
            send_report(config, path).await?;
            Ok(true)
        }
        ReportOutcome::NoData => {
            info!("No report written, skipping email");
            Ok(false)
        }
    }
}
