//! Deterministic names for cached artifacts.
//!
//! A fingerprint is `(source, subject, timestamp, version)` where the subject
//! is a product for per-source frames or `merged_{strategy}` for composites.
//! Every component ends up in a file name or object key, so each is checked
//! here before any path is built.

use std::fmt;

use radar_common::time::{normalize_timestamp, parse_timestamp};
use radar_common::{validate_source_name, MergeStrategy, RadarError, RadarResult};

/// Pseudo-source under which composites are stored.
pub const COMPOSITE_SOURCE: &str = "composite";

const MAX_SUBJECT_LEN: usize = 64;

/// Identity of one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    source: String,
    subject: String,
    timestamp: String,
    version: String,
}

impl Fingerprint {
    /// Build a fingerprint, normalizing the timestamp to `YYYYMMDDHHMM`.
    pub fn new(source: &str, subject: &str, timestamp: &str, version: &str) -> RadarResult<Self> {
        let source = validate_source_name(source)?;
        let subject = validate_subject(subject)?;
        parse_timestamp(timestamp)?;
        let version = validate_version(version)?;

        Ok(Self {
            source,
            subject,
            timestamp: normalize_timestamp(timestamp, 12),
            version,
        })
    }

    /// Fingerprint of a composite built with `strategy`.
    pub fn composite(strategy: MergeStrategy, timestamp: &str, version: &str) -> RadarResult<Self> {
        Self::new(
            COMPOSITE_SOURCE,
            &format!("merged_{}", strategy),
            timestamp,
            version,
        )
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// File stem shared by the payload and its sidecar.
    /// Format: {subject}_{timestamp}_{version}
    pub fn stem(&self) -> String {
        format!("{}_{}_{}", self.subject, self.timestamp, self.version)
    }

    pub fn data_file(&self) -> String {
        format!("{}.bin", self.stem())
    }

    pub fn meta_file(&self) -> String {
        format!("{}.json", self.stem())
    }

    /// Recover a fingerprint from a file stem under `source`.
    ///
    /// Returns `None` for names this cache did not write.
    pub fn from_stem(source: &str, stem: &str) -> Option<Self> {
        let mut parts = stem.rsplitn(3, '_');
        let version = parts.next()?;
        let timestamp = parts.next()?;
        let subject = parts.next()?;
        Self::new(source, subject, timestamp, version).ok()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.source, self.subject, self.timestamp, self.version
        )
    }
}

fn validate_subject(subject: &str) -> RadarResult<String> {
    let normalized = subject.trim().to_lowercase();
    let ok = !normalized.is_empty()
        && normalized.len() <= MAX_SUBJECT_LEN
        && normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if ok {
        Ok(normalized)
    } else {
        Err(RadarError::cache(format!(
            "invalid artifact subject '{}': expected lowercase letters, digits, '_' or '-'",
            subject
        )))
    }
}

pub(crate) fn validate_version(version: &str) -> RadarResult<String> {
    let ok = version.len() > 1
        && version.starts_with('v')
        && version[1..].chars().all(|c| c.is_ascii_alphanumeric());

    if ok {
        Ok(version.to_string())
    } else {
        Err(RadarError::Config(format!(
            "cache format version must look like 'v1', got '{}'",
            version
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_and_display() {
        let fp = Fingerprint::new("DWD", "pg", "20250128_1005", "v1").unwrap();
        assert_eq!(fp.stem(), "pg_202501281005_v1");
        assert_eq!(fp.data_file(), "pg_202501281005_v1.bin");
        assert_eq!(fp.to_string(), "dwd_pg_202501281005_v1");
    }

    #[test]
    fn test_seconds_truncated() {
        let fp = Fingerprint::new("shmu", "zmax", "20250128100530", "v1").unwrap();
        assert_eq!(fp.timestamp(), "202501281005");
    }

    #[test]
    fn test_composite() {
        let fp = Fingerprint::composite(MergeStrategy::Max, "202501281005", "v1").unwrap();
        assert_eq!(fp.source(), COMPOSITE_SOURCE);
        assert_eq!(fp.stem(), "merged_max_202501281005_v1");
    }

    #[test]
    fn test_from_stem_roundtrip_with_underscored_subject() {
        let fp = Fingerprint::composite(MergeStrategy::Average, "202501281005", "v2").unwrap();
        let parsed = Fingerprint::from_stem(COMPOSITE_SOURCE, &fp.stem()).unwrap();
        assert_eq!(parsed, fp);
        assert!(Fingerprint::from_stem("dwd", "garbage").is_none());
    }

    #[test]
    fn test_rejects_unsafe_components() {
        assert!(Fingerprint::new("dwd", "../pg", "202501281005", "v1").is_err());
        assert!(Fingerprint::new("dwd", "pg", "2025", "v1").is_err());
        assert!(Fingerprint::new("dwd", "pg", "202501281005", "1").is_err());
        assert!(Fingerprint::new("dwd", "pg", "202501281005", "v1/..").is_err());
        assert!(Fingerprint::new("d/w", "pg", "202501281005", "v1").is_err());
    }
}
