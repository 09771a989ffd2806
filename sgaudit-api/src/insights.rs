//! CloudWatch Logs Insights query functionality.
//!
//! Queries are asynchronous on the service side: `StartQuery` returns an id
//! and `GetQueryResults` is polled until the query reaches a terminal
//! status. Polling here is always bounded by [`PollConfig::timeout`].

use std::future::Future;
use std::time::Duration;

use aws_sdk_cloudwatchlogs::Client;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::AwsError;

/// Error types specific to Logs Insights operations
#[derive(Debug, thiserror::Error)]
pub enum InsightsError {
    #[error("StartQuery returned no query id")]
    MissingQueryId,
    #[error("Query {query_id} ended with status {status}")]
    QueryFailed {
        query_id: String,
        status: QueryStatus,
    },
    #[error("Query {query_id} did not complete within {waited_secs} seconds")]
    PollTimeout { query_id: String, waited_secs: u64 },
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("API error: {0}")]
    Api(#[from] AwsError),
}

/// Status of a Logs Insights query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    Timeout,
    Unknown,
}

impl QueryStatus {
    /// Parse the status string used by the service
    #[must_use]
    pub fn from_service(status: &str) -> Self {
        match status {
            "Scheduled" => Self::Scheduled,
            "Running" => Self::Running,
            "Complete" => Self::Complete,
            "Failed" => Self::Failed,
            "Cancelled" => Self::Cancelled,
            "Timeout" => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    /// Check if the query finished and results are final
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, QueryStatus::Complete)
    }

    /// Check if the query ended without results
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            QueryStatus::Failed | QueryStatus::Cancelled | QueryStatus::Timeout
        )
    }

    /// Check if polling should stop
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_failed()
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStatus::Scheduled => write!(f, "Scheduled"),
            QueryStatus::Running => write!(f, "Running"),
            QueryStatus::Complete => write!(f, "Complete"),
            QueryStatus::Failed => write!(f, "Failed"),
            QueryStatus::Cancelled => write!(f, "Cancelled"),
            QueryStatus::Timeout => write!(f, "Timeout"),
            QueryStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One `field`/`value` pair of a result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultField {
    pub field: String,
    pub value: String,
}

impl ResultField {
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A result row, fields in the order the service returned them
pub type ResultRow = Vec<ResultField>;

/// Snapshot returned by one `GetQueryResults` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResults {
    pub status: QueryStatus,
    pub rows: Vec<ResultRow>,
}

/// A Logs Insights query over one log group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub log_group_name: String,
    pub query_string: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Maximum rows returned by the service
    pub limit: Option<i32>,
}

/// Polling behaviour for [`InsightsApi::run_query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

fn convert_rows(rows: &[Vec<aws_sdk_cloudwatchlogs::types::ResultField>]) -> Vec<ResultRow> {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|f| {
                    ResultField::new(
                        f.field().unwrap_or_default(),
                        f.value().unwrap_or_default(),
                    )
                })
                .collect()
        })
        .collect()
}

/// Poll `fetch` until the query is complete, fails, or `poll.timeout` elapses.
///
/// `fetch` is called immediately, then every `poll.interval`.
///
/// # Errors
///
/// Returns [`InsightsError::QueryFailed`] for a `Failed`, `Cancelled` or
/// `Timeout` status, [`InsightsError::PollTimeout`] when the deadline
/// passes, or whatever error `fetch` returns.
pub async fn wait_for_query<F, Fut>(
    query_id: &str,
    mut fetch: F,
    poll: &PollConfig,
) -> Result<Vec<ResultRow>, InsightsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<QueryResults, InsightsError>>,
{
    let started = Instant::now();

    loop {
        let results = fetch().await?;

        if results.status.is_complete() {
            info!("Query {query_id} complete with {} row(s)", results.rows.len());
            return Ok(results.rows);
        }

        if results.status.is_failed() {
            warn!("Query {query_id} {}", results.status);
            return Err(InsightsError::QueryFailed {
                query_id: query_id.to_string(),
                status: results.status,
            });
        }

        let elapsed = started.elapsed();
        if elapsed >= poll.timeout {
            return Err(InsightsError::PollTimeout {
                query_id: query_id.to_string(),
                waited_secs: elapsed.as_secs(),
            });
        }

        debug!("Query {query_id} is {}, waiting...", results.status);
        tokio::time::sleep(poll.interval.min(poll.timeout.saturating_sub(elapsed))).await;
    }
}

/// CloudWatch Logs Insights API operations
#[derive(Debug, Clone)]
pub struct InsightsApi {
    client: Client,
}

impl InsightsApi {
    /// Create a new Insights API instance
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Submit a query and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response has no query id.
    pub async fn start_query(&self, request: &QueryRequest) -> Result<String, InsightsError> {
        if request.start >= request.end {
            return Err(InsightsError::InvalidQuery(format!(
                "start {} is not before end {}",
                request.start, request.end
            )));
        }

        let response = self
            .client
            .start_query()
            .log_group_name(&request.log_group_name)
            .start_time(request.start.timestamp())
            .end_time(request.end.timestamp())
            .query_string(&request.query_string)
            .set_limit(request.limit)
            .send()
            .await
            .map_err(|e| AwsError::service("StartQuery", e))?;

        let query_id = response
            .query_id()
            .filter(|id| !id.is_empty())
            .ok_or(InsightsError::MissingQueryId)?
            .to_string();

        info!("Query started with ID: {query_id}");
        Ok(query_id)
    }

    /// Fetch the current status and rows of a query.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_query_results(&self, query_id: &str) -> Result<QueryResults, InsightsError> {
        let response = self
            .client
            .get_query_results()
            .query_id(query_id)
            .send()
            .await
            .map_err(|e| AwsError::service("GetQueryResults", e))?;

        let status = response
            .status()
            .map(|s| QueryStatus::from_service(s.as_str()))
            .unwrap_or(QueryStatus::Unknown);

        Ok(QueryResults {
            status,
            rows: convert_rows(response.results()),
        })
    }

    /// Start a query and wait for its rows.
    ///
    /// # Errors
    ///
    /// See [`InsightsApi::start_query`] and [`wait_for_query`].
    pub async fn run_query(
        &self,
        request: &QueryRequest,
        poll: &PollConfig,
    ) -> Result<Vec<ResultRow>, InsightsError> {
        debug!("Insights query on {}:\n{}", request.log_group_name, request.query_string);

        let query_id = self.start_query(request).await?;
        wait_for_query(&query_id, || self.get_query_results(&query_id), poll).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        }
    }

    fn row() -> ResultRow {
        vec![
            ResultField::new("srcAddr", "10.0.0.5"),
            ResultField::new("count(*)", "3"),
        ]
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(QueryStatus::from_service("Complete"), QueryStatus::Complete);
        assert_eq!(QueryStatus::from_service("Running"), QueryStatus::Running);
        assert_eq!(QueryStatus::from_service("Cancelled"), QueryStatus::Cancelled);
        assert_eq!(QueryStatus::from_service("bogus"), QueryStatus::Unknown);
    }

    #[test]
    fn test_status_classification() {
        assert!(QueryStatus::Complete.is_terminal());
        assert!(QueryStatus::Failed.is_failed());
        assert!(QueryStatus::Timeout.is_failed());
        assert!(!QueryStatus::Running.is_terminal());
        assert!(!QueryStatus::Scheduled.is_terminal());
        assert!(!QueryStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_convert_rows() {
        let sdk_rows = vec![vec![
            aws_sdk_cloudwatchlogs::types::ResultField::builder()
                .field("@timestamp")
                .value("2025-01-15 10:00:00.000")
                .build(),
            aws_sdk_cloudwatchlogs::types::ResultField::builder()
                .field("srcAddr")
                .build(),
        ]];

        let rows = convert_rows(&sdk_rows);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ResultField::new("@timestamp", "2025-01-15 10:00:00.000"));
        assert_eq!(rows[0][1], ResultField::new("srcAddr", ""));
    }

    #[tokio::test]
    async fn test_wait_returns_rows_when_complete() {
        let calls = AtomicUsize::new(0);

        let result = wait_for_query(
            "q-1",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let status = if n < 2 {
                        QueryStatus::Running
                    } else {
                        QueryStatus::Complete
                    };
                    Ok(QueryResults {
                        status,
                        rows: vec![row()],
                    })
                }
            },
            &fast_poll(),
        )
        .await;

        let rows = tokio_test::assert_ok!(result);
        assert_eq!(rows, vec![row()]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_fails_on_cancelled() {
        let result = wait_for_query(
            "q-2",
            || async {
                Ok(QueryResults {
                    status: QueryStatus::Cancelled,
                    rows: Vec::new(),
                })
            },
            &fast_poll(),
        )
        .await;

        assert!(matches!(
            result,
            Err(InsightsError::QueryFailed {
                status: QueryStatus::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let result = wait_for_query(
            "q-3",
            || async {
                Ok(QueryResults {
                    status: QueryStatus::Running,
                    rows: Vec::new(),
                })
            },
            &fast_poll(),
        )
        .await;

        assert!(matches!(result, Err(InsightsError::PollTimeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_propagates_fetch_error() {
        let result = wait_for_query(
            "q-4",
            || async { Err(InsightsError::MissingQueryId) },
            &fast_poll(),
        )
        .await;

        tokio_test::assert_err!(result);
    }
}
