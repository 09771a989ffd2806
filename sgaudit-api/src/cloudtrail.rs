//! CloudTrail event history lookup.
//!
//! Wraps `LookupEvents` filtered by resource name, which is how security
//! group changes are found: every EC2 call touching a group records the
//! group id as a resource.

use aws_sdk_cloudtrail::Client;
use aws_sdk_cloudtrail::primitives::DateTime as SdkDateTime;
use aws_sdk_cloudtrail::types::{LookupAttribute, LookupAttributeKey};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::AwsError;

/// Largest page size accepted by `LookupEvents`
const MAX_PAGE_SIZE: i32 = 50;

/// Error types specific to CloudTrail operations
#[derive(Debug, thiserror::Error)]
pub enum CloudTrailError {
    #[error("Invalid time range: start {start} is not before end {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("API error: {0}")]
    Api(#[from] AwsError),
}

/// A management event returned by `LookupEvents`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailEvent {
    pub event_id: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
    pub username: Option<String>,
    /// The full CloudTrail record as a JSON string
    pub raw: String,
}

impl From<&aws_sdk_cloudtrail::types::Event> for TrailEvent {
    fn from(event: &aws_sdk_cloudtrail::types::Event) -> Self {
        Self {
            event_id: event.event_id().map(str::to_string),
            event_time: event
                .event_time()
                .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
            event_name: event.event_name().map(str::to_string),
            username: event.username().map(str::to_string),
            raw: event.cloud_trail_event().unwrap_or("{}").to_string(),
        }
    }
}

/// Parameters for a resource-name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub resource_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Stop after this many events; `None` reads every page
    pub max_results: Option<i32>,
}

impl LookupRequest {
    /// Create a lookup for a resource name over a time window
    #[must_use]
    pub fn new(resource_name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            resource_name: resource_name.into(),
            start,
            end,
            max_results: None,
        }
    }

    /// Cap the number of returned events
    #[must_use]
    pub fn with_max_results(mut self, max_results: i32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    fn validate(&self) -> Result<(), CloudTrailError> {
        if self.start >= self.end {
            return Err(CloudTrailError::InvalidTimeRange {
                start: self.start,
                end: self.end,
            });
        }
        if self.resource_name.trim().is_empty() {
            return Err(CloudTrailError::InvalidRequest(
                "Resource name cannot be empty".to_string(),
            ));
        }
        if matches!(self.max_results, Some(n) if n <= 0) {
            return Err(CloudTrailError::InvalidRequest(
                "max_results must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn page_size(&self, collected: usize) -> i32 {
        match self.max_results {
            Some(max) => {
                let remaining = i64::from(max).saturating_sub(collected as i64);
                i32::try_from(remaining)
                    .unwrap_or(MAX_PAGE_SIZE)
                    .clamp(1, MAX_PAGE_SIZE)
            }
            None => MAX_PAGE_SIZE,
        }
    }
}

/// CloudTrail API operations
#[derive(Debug, Clone)]
pub struct CloudTrailApi {
    client: Client,
}

impl CloudTrailApi {
    /// Create a new CloudTrail API instance
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Look up events recorded against a resource within a time window.
    ///
    /// Events come back newest first, as CloudTrail returns them.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or any page request fails.
    pub async fn lookup_events(
        &self,
        request: &LookupRequest,
    ) -> Result<Vec<TrailEvent>, CloudTrailError> {
        request.validate()?;

        let attribute = LookupAttribute::builder()
            .attribute_key(LookupAttributeKey::ResourceName)
            .attribute_value(&request.resource_name)
            .build()
            .map_err(|e| CloudTrailError::InvalidRequest(e.to_string()))?;

        debug!(
            "Looking up CloudTrail events for {} between {} and {}",
            request.resource_name, request.start, request.end
        );

        let mut events: Vec<TrailEvent> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .lookup_events()
                .lookup_attributes(attribute.clone())
                .start_time(SdkDateTime::from_secs(request.start.timestamp()))
                .end_time(SdkDateTime::from_secs(request.end.timestamp()))
                .max_results(request.page_size(events.len()))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| AwsError::service("LookupEvents", e))?;

            events.extend(response.events().iter().map(TrailEvent::from));

            if let Some(max) = request.max_results
                && events.len() >= max as usize
            {
                events.truncate(max as usize);
                break;
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        info!(
            "Retrieved {} CloudTrail event(s) for {}",
            events.len(),
            request.resource_name
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudtrail::operation::lookup_events::LookupEventsOutput;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use chrono::{Duration, TimeZone};

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let end = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        (end - Duration::hours(24), end)
    }

    #[test]
    fn test_event_conversion() {
        let event = aws_sdk_cloudtrail::types::Event::builder()
            .event_id("abc-123")
            .event_name("AuthorizeSecurityGroupIngress")
            .event_time(SdkDateTime::from_secs(1_736_942_400))
            .username("alice")
            .cloud_trail_event(r#"{"eventName":"AuthorizeSecurityGroupIngress"}"#)
            .build();

        let converted = TrailEvent::from(&event);
        assert_eq!(converted.event_id.as_deref(), Some("abc-123"));
        assert_eq!(
            converted.event_name.as_deref(),
            Some("AuthorizeSecurityGroupIngress")
        );
        assert_eq!(
            converted.event_time,
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap())
        );
        assert!(converted.raw.contains("AuthorizeSecurityGroupIngress"));
    }

    #[test]
    fn test_event_without_payload() {
        let converted = TrailEvent::from(&aws_sdk_cloudtrail::types::Event::builder().build());
        assert_eq!(converted.raw, "{}");
        assert_eq!(converted.event_time, None);
    }

    #[test]
    fn test_request_validation() {
        let (start, end) = window();
        assert!(LookupRequest::new("sg-1", start, end).validate().is_ok());

        let reversed = LookupRequest::new("sg-1", end, start);
        assert!(matches!(
            reversed.validate(),
            Err(CloudTrailError::InvalidTimeRange { .. })
        ));

        let blank = LookupRequest::new("  ", start, end);
        assert!(matches!(
            blank.validate(),
            Err(CloudTrailError::InvalidRequest(_))
        ));

        let zero = LookupRequest::new("sg-1", start, end).with_max_results(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_page_size() {
        let (start, end) = window();
        let unbounded = LookupRequest::new("sg-1", start, end);
        assert_eq!(unbounded.page_size(0), 50);
        assert_eq!(unbounded.page_size(500), 50);

        let capped = LookupRequest::new("sg-1", start, end).with_max_results(70);
        assert_eq!(capped.page_size(0), 50);
        assert_eq!(capped.page_size(50), 20);
        assert_eq!(capped.page_size(70), 1);

        let small = LookupRequest::new("sg-1", start, end).with_max_results(10);
        assert_eq!(small.page_size(0), 10);
    }

    fn events(prefix: &str, count: usize) -> Vec<aws_sdk_cloudtrail::types::Event> {
        (0..count)
            .map(|i| {
                aws_sdk_cloudtrail::types::Event::builder()
                    .event_id(format!("{prefix}-{i}"))
                    .event_name("AuthorizeSecurityGroupIngress")
                    .build()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_lookup_events_truncates_across_pages() {
        let first_page = mock!(Client::lookup_events)
            .match_requests(|req| req.next_token().is_none() && req.max_results() == Some(50))
            .then_output(|| {
                LookupEventsOutput::builder()
                    .set_events(Some(events("first", 50)))
                    .next_token("page-2")
                    .build()
            });
        let second_page = mock!(Client::lookup_events)
            .match_requests(|req| {
                req.next_token() == Some("page-2") && req.max_results() == Some(20)
            })
            .then_output(|| {
                LookupEventsOutput::builder()
                    .set_events(Some(events("second", 50)))
                    .next_token("page-3")
                    .build()
            });
        let third_page = mock!(Client::lookup_events)
            .match_requests(|req| req.next_token() == Some("page-3"))
            .then_output(|| LookupEventsOutput::builder().build());

        let client = mock_client!(
            aws_sdk_cloudtrail,
            RuleMode::MatchAny,
            [&first_page, &second_page, &third_page]
        );
        let (start, end) = window();
        let request = LookupRequest::new("sg-1234abcd", start, end).with_max_results(70);

        let found = CloudTrailApi::new(client).lookup_events(&request).await.unwrap();

        assert_eq!(found.len(), 70);
        assert_eq!(found[49].event_id.as_deref(), Some("first-49"));
        assert_eq!(found[69].event_id.as_deref(), Some("second-19"));
        assert_eq!(first_page.num_calls(), 1);
        assert_eq!(second_page.num_calls(), 1);
        assert_eq!(third_page.num_calls(), 0);
    }

    #[tokio::test]
    async fn test_lookup_events_stops_on_empty_token() {
        let first_page = mock!(Client::lookup_events)
            .match_requests(|req| req.next_token().is_none())
            .then_output(|| {
                LookupEventsOutput::builder()
                    .set_events(Some(events("first", 3)))
                    .next_token("page-2")
                    .build()
            });
        let last_page = mock!(Client::lookup_events)
            .match_requests(|req| req.next_token() == Some("page-2"))
            .then_output(|| {
                LookupEventsOutput::builder()
                    .set_events(Some(events("last", 2)))
                    .next_token("")
                    .build()
            });

        let client = mock_client!(aws_sdk_cloudtrail, RuleMode::MatchAny, [&first_page, &last_page]);
        let (start, end) = window();

        let found = CloudTrailApi::new(client)
            .lookup_events(&LookupRequest::new("sg-1234abcd", start, end))
            .await
            .unwrap();

        assert_eq!(found.len(), 5);
        assert_eq!(first_page.num_calls(), 1);
        assert_eq!(last_page.num_calls(), 1);
    }
}
