//! Sgaudit - AWS Security Group Audit Tool
//!
//! CLI tool for exporting security group rules, instances, changes and
//! rejected flow log traffic to CSV
use clap::Parser;
use log::info;
use sgaudit::datetime::{self, TimeWindow};
use sgaudit::{ReportOutcome, Result, cli, email::EmailConfig, report, rules, vault_client};
use sgaudit_api::{AwsClient, AwsConfig, PollConfig};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse CLI arguments
    let args = cli::Cli::parse();

    if matches!(args.command, cli::Commands::HelpEnv) {
        println!("{}", cli::env_help());
        return Ok(());
    }

    info!("Sgaudit - AWS Security Group Audit Tool");

    let mut aws_config = AwsConfig::new();
    if let Some(region) = &args.region {
        aws_config = aws_config.with_region(region);
    }
    if let Some(profile) = &args.profile {
        aws_config = aws_config.with_profile(profile);
    }

    let outcome = match args.command {
        cli::Commands::Rules {
            sg_ids,
            direction,
            output,
        } => {
            let output = output.unwrap_or_else(|| rules::default_output(direction).to_string());
            let client = AwsClient::new(aws_config).await?;
            report::run_rules_report(&client, sg_ids.as_slice(), direction, &PathBuf::from(output))
                .await?
        }
        cli::Commands::Instances {
            sg_ids,
            regions,
            output,
        } => {
            report::run_instances_report(
                &aws_config,
                sg_ids.as_slice(),
                regions.as_slice(),
                &PathBuf::from(output),
            )
            .await?
        }
        cli::Commands::Events {
            sg_id,
            start,
            start_offset,
            end,
            utc,
            output,
        } => {
            let window = TimeWindow::from_args(
                start.as_deref(),
                start_offset.as_deref(),
                end.as_deref(),
                "2d",
                utc,
            )?;
            let client = AwsClient::new(aws_config).await?;
            report::run_events_report(&client, &sg_id, &window, &PathBuf::from(output)).await?
        }
        cli::Commands::Changes {
            sg_ids,
            start_offset,
            max_results,
            output,
        } => {
            let window = TimeWindow::last(&start_offset)?;
            let client = AwsClient::new(aws_config).await?;
            report::run_changes_report(
                &client,
                sg_ids.as_slice(),
                &window,
                max_results,
                &PathBuf::from(output),
            )
            .await?
        }
        cli::Commands::FlowRejects {
            sg_id,
            log_group,
            start_offset,
            limit,
            poll_interval,
            poll_timeout,
            output,
            email,
        } => {
            // Mail settings are resolved before the query runs
            let email_config = if email {
                let credentials = vault_client::load_smtp_credentials().await?;
                Some(EmailConfig::from_env(credentials)?)
            } else {
                None
            };

            let params = report::FlowRejectsParams {
                security_group_id: sg_id,
                log_group_name: log_group,
                window: TimeWindow::last(&start_offset)?,
                limit,
                poll: PollConfig {
                    interval: Duration::from_secs(poll_interval),
                    timeout: datetime::parse_offset_duration(&poll_timeout)?,
                },
            };

            let client = AwsClient::new(aws_config).await?;
            let outcome =
                report::run_flow_rejects_report(&client, &params, &PathBuf::from(output)).await?;

            if let Some(config) = &email_config {
                report::deliver_report(&outcome, config).await?;
            }
            outcome
        }
        cli::Commands::HelpEnv => return Ok(()),
    };

    match outcome {
        ReportOutcome::Written(path, rows) => {
            info!("Report complete: {rows} row(s) written to {}", path.display());
        }
        ReportOutcome::NoData => info!("Report complete: no matching data"),
    }

    Ok(())
}
