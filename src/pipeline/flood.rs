//! Flood control and hourly status digests.
//!
//! A cooperative rate limiter for one operator's mailbox: replies are spaced
//! by a minimum interval, and one digest goes out per hour bucket that saw
//! traffic. Persisted by the store as `state.json`.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::types::Request;

/// Characters of a request id that form its hour bucket (`YYYY-MM-DD-HH`).
const HOUR_BUCKET_LEN: usize = 13;

/// Minutes after which a missed top-of-hour digest is still sent.
const DIGEST_CATCH_UP_MINUTES: i64 = 65;

/// Counters and timestamps that gate sending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodState {
    /// Replies sent over the lifetime of the state file. Never decreases.
    pub total_sent: u64,
    /// Time of the last successful reply.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_sent_ts: Option<DateTime<Utc>>,
    pub last_received_request_id: Option<String>,
    /// Hour bucket of the last digest actually sent.
    pub last_status_hour: Option<String>,
    /// Most recent recorded error. Last write wins.
    pub last_error: Option<String>,
}

impl FloodState {
    /// Whether at least `min_interval` has passed since the last reply.
    pub fn can_send_now(&self, now: DateTime<Utc>, min_interval: Duration) -> bool {
        let Some(last) = self.last_sent_ts else {
            return true;
        };
        let elapsed_ms = (now - last).num_milliseconds();
        i128::from(elapsed_ms) >= min_interval.as_millis() as i128
    }

    pub fn record_sent(&mut self, now: DateTime<Utc>) {
        self.total_sent += 1;
        self.last_sent_ts = Some(now);
    }

    pub fn record_received(&mut self, request: &Request) {
        self.last_received_request_id = Some(request.id.clone());
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Hour bucket of the last received request, if any.
    pub fn current_hour_bucket(&self) -> Option<String> {
        self.last_received_request_id
            .as_deref()
            .map(|id| id.chars().take(HOUR_BUCKET_LEN).collect())
    }

    /// Whether the digest for the last received hour bucket is due.
    ///
    /// Due at the top of any hour, or once the bucket is more than 65 minutes
    /// old. Never due twice for one bucket, and never due before any request
    /// arrived. An unparseable bucket is only due on the hour.
    pub fn should_send_digest(&self, now: DateTime<Utc>) -> bool {
        let Some(bucket) = self.current_hour_bucket() else {
            return false;
        };
        if self.last_status_hour.as_deref() == Some(bucket.as_str()) {
            return false;
        }
        if now.minute() == 0 {
            return true;
        }

        match NaiveDateTime::parse_from_str(&format!("{bucket}:00"), "%Y-%m-%d-%H:%M") {
            Ok(start) => now - start.and_utc() > TimeDelta::minutes(DIGEST_CATCH_UP_MINUTES),
            Err(_) => false,
        }
    }

    /// Mark the digest for `bucket` as sent.
    pub fn record_digest_sent(&mut self, bucket: impl Into<String>) {
        self.last_status_hour = Some(bucket.into());
    }
}

/// Accept RFC 3339 or a naive ISO timestamp (taken as UTC). Anything else
/// reads as "never sent".
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }))
}
