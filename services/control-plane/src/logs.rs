//! Log streaming.

use bytes::Bytes;
use chrono::DateTime;
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::runtime::{ByteStream, LogOptions};

/// Query options accepted by the logs endpoint. Timestamps are RFC 3339.
///
/// Flags may be given bare (`?follow`), which reads as `true`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default, deserialize_with = "query_flag")]
    pub stdout: Option<bool>,
    #[serde(default, deserialize_with = "query_flag")]
    pub stderr: Option<bool>,
    #[serde(default, deserialize_with = "query_flag")]
    pub follow: Option<bool>,
    #[serde(default, deserialize_with = "query_flag")]
    pub timestamps: Option<bool>,
    #[serde(default)]
    pub tail: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
}

/// Boolean query value: empty, `1` and `true` are on, `0` and `false` off.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn query_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_flag(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a boolean, got {value:?}")))
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {field} timestamp '{value}': {reason}")]
pub struct LogQueryError {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Seconds since the epoch; the runtime takes 32-bit values.
fn unix_seconds(field: &'static str, value: Option<&str>) -> Result<Option<i64>, LogQueryError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let error = |reason| LogQueryError {
        field,
        value: value.to_string(),
        reason,
    };
    let seconds = DateTime::parse_from_rfc3339(value)
        .map_err(|_| error("expected RFC 3339"))?
        .timestamp();
    i32::try_from(seconds).map_err(|_| error("out of range"))?;
    Ok(Some(seconds))
}

impl LogQuery {
    /// Runtime log options. Both streams are on unless turned off; `follow`
    /// defaults to on.
    pub fn into_options(self) -> Result<LogOptions, LogQueryError> {
        Ok(LogOptions {
            stdout: self.stdout.unwrap_or(true),
            stderr: self.stderr.unwrap_or(true),
            follow: self.follow.unwrap_or(true),
            timestamps: self.timestamps.unwrap_or(false),
            tail: self.tail.filter(|t| !t.is_empty()),
            since: unix_seconds("since", self.since.as_deref())?,
            until: unix_seconds("until", self.until.as_deref())?,
        })
    }
}

/// Why a log stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamEnd {
    SourceEnded,
    SourceFailed,
    ClientGone,
}

/// Copies runtime log chunks to a client until either side closes.
pub struct LogStream {
    source: ByteStream,
}

impl LogStream {
    pub fn new(source: ByteStream) -> Self {
        Self { source }
    }

    pub async fn forward(mut self, outbound: mpsc::Sender<Bytes>) -> LogStreamEnd {
        loop {
            tokio::select! {
                _ = outbound.closed() => {
                    debug!("Log client went away");
                    return LogStreamEnd::ClientGone;
                }
                chunk = self.source.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if outbound.send(bytes).await.is_err() {
                            return LogStreamEnd::ClientGone;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Log stream failed");
                        return LogStreamEnd::SourceFailed;
                    }
                    None => return LogStreamEnd::SourceEnded,
                },
            }
        }
    }
}
