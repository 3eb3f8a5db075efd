//! Compact UTC timestamp handling.
//!
//! Sources publish timestamps at different precisions (`YYYYMMDDHHMM`,
//! `YYYYMMDD_HHMM`, `YYYYMMDDHHMMSS`). Frames from different sources are only
//! comparable after truncating to a common precision and rounding down to the
//! synchronization interval.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::{RadarError, RadarResult};

/// Default synchronization interval between sources, in minutes.
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 5;

const FORMAT_FULL: &str = "%Y%m%d%H%M%S";
const FORMAT_SHORT: &str = "%Y%m%d%H%M";

/// Parse a compact timestamp, auto-detecting its precision.
pub fn parse_timestamp(ts: &str) -> RadarResult<DateTime<Utc>> {
    let cleaned: String = ts.trim().chars().filter(|c| *c != '_').collect();

    if !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(RadarError::InvalidTimestamp(ts.to_string()));
    }

    let parsed = match cleaned.len() {
        len if len >= 14 => NaiveDateTime::parse_from_str(&cleaned[..14], FORMAT_FULL),
        12 | 13 => NaiveDateTime::parse_from_str(&cleaned[..12], FORMAT_SHORT),
        _ => return Err(RadarError::InvalidTimestamp(ts.to_string())),
    };

    parsed
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|_| RadarError::InvalidTimestamp(ts.to_string()))
}

/// Normalize a compact timestamp to 12 (`YYYYMMDDHHMM`) or 14 characters.
///
/// Underscores are dropped; 12-character input is padded with `00` seconds
/// when 14 characters are requested.
pub fn normalize_timestamp(ts: &str, target_len: usize) -> String {
    let cleaned: String = ts.trim().chars().filter(|c| *c != '_').collect();

    match target_len {
        14 if cleaned.len() == 12 => format!("{}00", cleaned),
        14 => cleaned.chars().take(14).collect(),
        12 => cleaned.chars().take(12).collect(),
        _ => cleaned,
    }
}

/// Round down to the start of the enclosing interval.
pub fn round_to_interval(dt: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval = interval_minutes.max(1);
    let minute = (dt.minute() / interval) * interval;
    dt.with_minute(minute)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

/// Synchronization bucket key (`YYYYMMDDHHMM`) for a source timestamp.
pub fn sync_bucket(ts: &str, interval_minutes: u32) -> RadarResult<String> {
    let dt = parse_timestamp(ts)?;
    Ok(round_to_interval(dt, interval_minutes)
        .format(FORMAT_SHORT)
        .to_string())
}

/// Format a datetime as a 12-character compact timestamp.
pub fn format_compact(dt: DateTime<Utc>) -> String {
    dt.format(FORMAT_SHORT).to_string()
}

/// Find the most recent timestamp for which every required source has data
/// within `tolerance_minutes`.
///
/// `by_source` maps a source name to the timestamps it has available.
/// Returns the anchor timestamp and, for each source, its closest timestamp.
pub fn find_common_timestamp(
    by_source: &HashMap<String, Vec<String>>,
    required: &HashSet<String>,
    tolerance_minutes: i64,
) -> Option<(String, HashMap<String, String>)> {
    let mut parsed: Vec<(String, String, DateTime<Utc>)> = by_source
        .iter()
        .flat_map(|(source, stamps)| {
            stamps.iter().filter_map(move |ts| {
                parse_timestamp(ts)
                    .ok()
                    .map(|dt| (source.clone(), ts.clone(), dt))
            })
        })
        .collect();

    if parsed.is_empty() {
        return None;
    }

    parsed.sort_by(|a, b| b.2.cmp(&a.2));
    let tolerance = Duration::minutes(tolerance_minutes);

    for (_, anchor_ts, anchor) in &parsed {
        let mut closest: HashMap<String, (String, Duration)> = HashMap::new();

        for (source, ts, dt) in &parsed {
            let diff = if dt >= anchor { *dt - *anchor } else { *anchor - *dt };
            if diff > tolerance {
                continue;
            }
            let better = closest
                .get(source)
                .map_or(true, |(_, existing)| diff < *existing);
            if better {
                closest.insert(source.clone(), (ts.clone(), diff));
            }
        }

        if required.iter().all(|s| closest.contains_key(s)) {
            let matched = closest
                .into_iter()
                .map(|(source, (ts, _))| (source, ts))
                .collect();
            return Some((anchor_ts.clone(), matched));
        }
    }

    None
}
