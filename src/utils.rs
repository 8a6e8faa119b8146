//! Utility functions

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};

const APP_DIR: &str = "playsync";

// ============================================================================
// Directories
// ============================================================================

/// Directory holding `settings.json`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

/// Directory holding persisted client data (credentials)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR))
}

// ============================================================================
// Time Formatting
// ============================================================================

/// Parse a track duration written as "MM:SS" or "H:MM:SS" into seconds
pub fn parse_duration(text: &str) -> Option<f64> {
    let parts: Vec<u64> = text
        .trim()
        .split(':')
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;

    match parts.as_slice() {
        [m, s] => Some((m * 60 + s) as f64),
        [h, m, s] => Some((h * 3600 + m * 60 + s) as f64),
        _ => None,
    }
}

/// Format seconds as "m:ss" for display
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Parse an ISO-8601 timestamp; a missing offset is read as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// URLs
// ============================================================================

/// Join a base URL and a path without doubling or dropping the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
