//! Operator settings read from the shared key/value store.
//!
//! Resource caps are read on every container creation, so changes apply to
//! the next container without a restart.

use berth_routing::KvStore;
use thiserror::Error;
use tracing::debug;

use crate::runtime::ResourceLimits;

pub const CPU_MAX_USAGE_KEY: &str = "berth/cpu/max_usage";
pub const MEMORY_MAX_USAGE_KEY: &str = "berth/memory/max_usage";
pub const STORAGE_MAX_USAGE_KEY: &str = "berth/storage/max_usage";

const CPU_PERIOD: i64 = 100_000;

/// Key of the per-user default shell.
pub fn user_default_shell_key(owner_id: &str) -> String {
    format!("berth/users/{owner_id}/defaultShell")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ByteSizeError {
    #[error("byte size {0:?} has no number")]
    MissingNumber(String),

    #[error("byte size {0:?} has an unknown unit")]
    UnknownUnit(String),

    #[error("byte size {0:?} must be positive")]
    NotPositive(String),
}

/// Parse a human byte size such as `512M`, `1.5GB` or `64k`.
///
/// Units are 1024-based and case-insensitive; a unit is required.
pub fn parse_byte_size(input: &str) -> Result<u64, ByteSizeError> {
    let trimmed = input.trim().to_ascii_uppercase();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| ByteSizeError::MissingNumber(input.to_string()))?;

    let multiplier: u64 = match unit.trim() {
        "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        "T" | "TB" => 1 << 40,
        _ => return Err(ByteSizeError::UnknownUnit(input.to_string())),
    };

    let bytes = value * multiplier as f64;
    if bytes < 1.0 {
        return Err(ByteSizeError::NotPositive(input.to_string()));
    }
    Ok(bytes as u64)
}

/// CPU period and quota for a usage percentage; `None` when uncapped or
/// invalid.
fn cpu_limits(percent: &str) -> Option<(i64, i64)> {
    match percent.trim().parse::<i64>() {
        Ok(p) if p > 0 && p < 100 => Some((CPU_PERIOD, p * 1000)),
        _ => None,
    }
}

async fn read_setting(kv: &dyn KvStore, key: &str) -> Option<String> {
    match kv.try_get(key).await {
        Ok(value) => value,
        Err(e) => {
            debug!(key = %key, error = %e, "Ignoring unreadable setting");
            None
        }
    }
}

/// Resource caps currently configured. Missing or invalid values are left
/// unset.
pub async fn load_limits(kv: &dyn KvStore) -> ResourceLimits {
    let mut limits = ResourceLimits::default();

    if let Some((period, quota)) = read_setting(kv, CPU_MAX_USAGE_KEY)
        .await
        .as_deref()
        .and_then(cpu_limits)
    {
        limits.cpu_period = Some(period);
        limits.cpu_quota = Some(quota);
    }

    if let Some(memory) = read_setting(kv, MEMORY_MAX_USAGE_KEY).await {
        limits.memory = parse_byte_size(&memory)
            .ok()
            .and_then(|bytes| i64::try_from(bytes).ok());
    }

    if let Some(storage) = read_setting(kv, STORAGE_MAX_USAGE_KEY).await {
        if parse_byte_size(&storage).is_ok() {
            limits.storage_size = Some(storage.trim().to_string());
        }
    }

    limits
}
