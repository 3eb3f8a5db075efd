//! Per-source failure tracking with threshold alerting.
//!
//! The manager counts consecutive failures for each source. When a source's
//! count reaches the threshold an [`Alert`] is built and dispatched to the
//! log and to every registered [`AlertSink`]. Alerting never changes how the
//! caller handles the underlying error.
//!
//! One manager is created at process start and shared by reference
//! (`Arc<AlertManager>`) with everything that records outcomes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use radar_common::RadarResult;

/// Default consecutive failures before an alert fires.
pub const DEFAULT_ALERT_THRESHOLD: u32 = 3;

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// An alert event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
}

/// Destination for dispatched alerts (paging, chat, webhooks...).
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert) -> RadarResult<()>;
}

/// Writes alerts to the tracing log at a matching severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn send(&self, alert: &Alert) -> RadarResult<()> {
        let details = alert
            .details
            .as_ref()
            .map(|d| serde_json::to_string(d).unwrap_or_default())
            .unwrap_or_default();

        match alert.level {
            AlertLevel::Info => info!(
                alert = true,
                level = %alert.level,
                source = %alert.source,
                details = %details,
                "[ALERT] {}", alert.message
            ),
            AlertLevel::Warning => warn!(
                alert = true,
                level = %alert.level,
                source = %alert.source,
                details = %details,
                "[ALERT] {}", alert.message
            ),
            AlertLevel::Error | AlertLevel::Critical => error!(
                alert = true,
                level = %alert.level,
                source = %alert.source,
                details = %details,
                "[ALERT] {}", alert.message
            ),
        }
        Ok(())
    }
}

/// When alerts fire once a source is at or past the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Only on the failure where the count first reaches the threshold.
    #[default]
    OnceAtThreshold,
    /// On every failure at or above the threshold.
    EveryFailure,
}

/// Tracks consecutive failures per source and escalates to alerts.
pub struct AlertManager {
    threshold: u32,
    repeat: RepeatPolicy,
    failures: Mutex<HashMap<String, u32>>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_THRESHOLD)
    }
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertManager")
            .field("threshold", &self.threshold)
            .field("repeat", &self.repeat)
            .field("failures", &self.all_failure_counts())
            .finish()
    }
}

impl AlertManager {
    /// Create a manager that logs alerts once `threshold` consecutive
    /// failures are reached. A threshold of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            repeat: RepeatPolicy::default(),
            failures: Mutex::new(HashMap::new()),
            sinks: RwLock::new(vec![Arc::new(LogSink)]),
        }
    }

    pub fn with_repeat_policy(mut self, repeat: RepeatPolicy) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Register an additional sink. The log sink always stays registered.
    pub fn add_handler(&self, sink: Arc<dyn AlertSink>) {
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sink);
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failure at the default `error` level.
    ///
    /// Returns the alert if one was dispatched.
    pub fn record_failure(&self, source: &str, message: &str) -> Option<Alert> {
        self.record_failure_with(source, message, AlertLevel::Error, None)
    }

    /// Record a failure, choosing the level and extra details of any alert.
    pub fn record_failure_with(
        &self,
        source: &str,
        message: &str,
        level: AlertLevel,
        details: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Option<Alert> {
        let count = {
            let mut counts = self.counts();
            let entry = counts.entry(source.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let fire = match self.repeat {
            RepeatPolicy::OnceAtThreshold => count == self.threshold,
            RepeatPolicy::EveryFailure => count >= self.threshold,
        };

        if !fire {
            warn!(
                source = %source,
                consecutive_failures = count,
                threshold = self.threshold,
                error = %message,
                "Source failure recorded"
            );
            return None;
        }

        let mut all_details = details.unwrap_or_default();
        all_details.insert("last_error".to_string(), serde_json::Value::from(message));
        all_details.insert("consecutive_failures".to_string(), serde_json::Value::from(count));

        let alert = Alert {
            level,
            source: source.to_string(),
            message: format!("Source {} has failed {} consecutive times", source, count),
            details: Some(all_details),
        };

        self.send_alert(&alert);
        Some(alert)
    }

    /// Reset the failure count for one source.
    pub fn record_success(&self, source: &str) {
        let previous = self.counts().insert(source.to_string(), 0).unwrap_or(0);
        if previous >= self.threshold {
            info!(source = %source, previous_failures = previous, "Source recovered");
        }
    }

    /// Dispatch an alert to every sink. A failing sink is logged and skipped.
    pub fn send_alert(&self, alert: &Alert) {
        let sinks: Vec<Arc<dyn AlertSink>> = self
            .sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for sink in sinks {
            if let Err(e) = sink.send(alert) {
                error!(source = %alert.source, error = %e, "Alert handler failed");
            }
        }
    }

    pub fn failure_count(&self, source: &str) -> u32 {
        self.counts().get(source).copied().unwrap_or(0)
    }

    pub fn all_failure_counts(&self) -> HashMap<String, u32> {
        self.counts().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_zero_clamped() {
        let manager = AlertManager::new(0);
        assert_eq!(manager.threshold(), 1);
        assert!(manager.record_failure("dwd", "boom").is_some());
    }

    #[test]
    fn test_unknown_source_count_is_zero() {
        let manager = AlertManager::default();
        assert_eq!(manager.failure_count("omsz"), 0);
        assert!(manager.all_failure_counts().is_empty());
    }

    #[test]
    fn test_alert_level_serde() {
        let json = serde_json::to_string(&AlertLevel::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
