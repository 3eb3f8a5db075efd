//! Operational resilience for network-driven fetches.
//!
//! - [`retry`]: bounded retry with exponential backoff around any fallible
//!   async operation
//! - [`alerts`]: consecutive-failure tracking per source with threshold
//!   escalation to pluggable alert sinks

pub mod alerts;
pub mod retry;

pub use alerts::{Alert, AlertLevel, AlertManager, AlertSink, LogSink, RepeatPolicy};
pub use retry::{Classify, RetryEvent, RetryHook, RetryOn, RetryPolicy, RetryableOperation};
