//! Error aggregation: classified, timestamped failure records collected into a
//! bounded batch and reported once as a single summary.
//!
//! # How errors flow (for beginners)
//!
//! Most operations in LAN-Chat touch the network several times (connect, send,
//! close) and any of those calls may fail.  Instead of reporting each failure
//! separately, every operation creates a fresh [`ErrorBatch`], passes it by
//! `&mut` to the calls it makes, and reports the batch once when it finishes.
//! The host application then sees one message with the worst [`Severity`]
//! observed, which it uses to decide whether to keep going or tear down.
//!
//! A batch keeps at most [`MAX_ERROR_RECORDS`] records, and its rendered
//! summary is capped at [`MAX_SUMMARY_BYTES`].  Severity tracking is *not*
//! capped: a record dropped because the batch is full still raises
//! [`ErrorBatch::max_severity`].

use std::fmt;
use std::time::SystemTime;

use tracing::{error, warn};

use crate::events::EventSink;

/// Maximum number of records kept in one [`ErrorBatch`].
pub const MAX_ERROR_RECORDS: usize = 10;

/// Maximum length of the rendered summary in bytes.
pub const MAX_SUMMARY_BYTES: usize = 1024;

/// How serious a failure is for the task that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The operation or session continues.
    NonCritical,
    /// The owning task terminates.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::NonCritical => f.write_str("non-critical"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// Portable error code, independent of the platform's native error numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Transport taxonomy
    ConnectionReset,
    Interrupted,
    AddressInUse,
    AddressUnavailable,
    NetworkDown,
    NetworkUnreachable,
    TimedOut,
    ConnectionRefused,
    HostUnreachable,
    Unknown,
    // Application codes
    Resource,
    ServerDisconnected,
    SecretKeyLength,
    UsernameTooLong,
    AddressResolution,
    NoResponseBody,
    IpTooLong,
    LocalIpFailure,
    MalformedFrame,
}

impl ErrorCode {
    /// Stable kebab-case name used in summaries and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConnectionReset => "connection-reset",
            ErrorCode::Interrupted => "interrupted",
            ErrorCode::AddressInUse => "address-in-use",
            ErrorCode::AddressUnavailable => "address-unavailable",
            ErrorCode::NetworkDown => "network-down",
            ErrorCode::NetworkUnreachable => "network-unreachable",
            ErrorCode::TimedOut => "timed-out",
            ErrorCode::ConnectionRefused => "connection-refused",
            ErrorCode::HostUnreachable => "host-unreachable",
            ErrorCode::Unknown => "unknown",
            ErrorCode::Resource => "resource",
            ErrorCode::ServerDisconnected => "server-disconnected",
            ErrorCode::SecretKeyLength => "secret-key-length",
            ErrorCode::UsernameTooLong => "username-too-long",
            ErrorCode::AddressResolution => "address-resolution",
            ErrorCode::NoResponseBody => "no-response-body",
            ErrorCode::IpTooLong => "ip-too-long",
            ErrorCode::LocalIpFailure => "local-ip-failure",
            ErrorCode::MalformedFrame => "malformed-frame",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    /// Short tag naming the call site, e.g. `"connect"` or `"accept-loop"`.
    pub location: &'static str,
    pub timestamp: SystemTime,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error in {}: {} (Code: {})",
            self.location, self.message, self.code
        )
    }
}

/// A bounded collection of [`ErrorRecord`]s with the worst severity seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBatch {
    records: Vec<ErrorRecord>,
    max_severity: Option<Severity>,
}

impl ErrorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and emits it as a `tracing` event.
    ///
    /// Once the batch holds [`MAX_ERROR_RECORDS`] records the record itself is
    /// dropped, but its severity still counts towards [`Self::max_severity`].
    pub fn add(
        &mut self,
        code: ErrorCode,
        severity: Severity,
        message: impl Into<String>,
        location: &'static str,
    ) {
        let message = message.into();
        match severity {
            Severity::Critical => error!(%code, location, "{message}"),
            Severity::NonCritical => warn!(%code, location, "{message}"),
        }

        self.max_severity = self.max_severity.max(Some(severity));
        if self.records.len() < MAX_ERROR_RECORDS {
            self.records.push(ErrorRecord {
                code,
                severity,
                message,
                location,
                timestamp: SystemTime::now(),
            });
        }
    }

    /// Moves every record of `other` into `self`, keeping the cap.
    pub fn merge(&mut self, other: ErrorBatch) {
        for record in other.records {
            self.max_severity = self.max_severity.max(Some(record.severity));
            if self.records.len() < MAX_ERROR_RECORDS {
                self.records.push(record);
            }
        }
        self.max_severity = self.max_severity.max(other.max_severity);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.max_severity.is_none()
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    /// Worst severity ever added, including records dropped by the cap.
    pub fn max_severity(&self) -> Option<Severity> {
        self.max_severity
    }

    /// `true` when at least one critical failure was added.
    pub fn is_critical(&self) -> bool {
        self.max_severity == Some(Severity::Critical)
    }

    /// Renders one line per record, truncated to [`MAX_SUMMARY_BYTES`] on a
    /// character boundary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let line = format!("{record}\n");
            if out.len() + line.len() > MAX_SUMMARY_BYTES {
                let room = MAX_SUMMARY_BYTES - out.len();
                let mut cut = room;
                while !line.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.push_str(&line[..cut]);
                break;
            }
            out.push_str(&line);
        }
        out
    }

    /// Sends the summary to the host's error callback.  Does nothing when
    /// the batch is empty.
    pub fn report(&self, sink: &dyn EventSink) {
        if let Some(severity) = self.max_severity {
            sink.on_error(&self.summary(), severity);
        }
    }

    /// `Ok(())` for an empty batch, otherwise the batch itself as the error.
    pub fn into_result(self) -> Result<(), ErrorBatch> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ErrorBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary().trim_end())
    }
}

impl std::error::Error for ErrorBatch {}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockEventSink;
    use mockall::predicate::eq;

    #[test]
    fn test_new_batch_is_empty_without_severity() {
        let batch = ErrorBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.max_severity(), None);
        assert_eq!(batch.summary(), "");
    }

    #[test]
    fn test_add_renders_location_message_and_code() {
        // Arrange
        let mut batch = ErrorBatch::new();

        // Act
        batch.add(
            ErrorCode::ConnectionRefused,
            Severity::Critical,
            "connect failed",
            "connect",
        );

        // Assert
        assert_eq!(
            batch.summary(),
            "Error in connect: connect failed (Code: connection-refused)\n"
        );
    }

    #[test]
    fn test_max_severity_is_highest_added() {
        let mut batch = ErrorBatch::new();
        batch.add(ErrorCode::Interrupted, Severity::NonCritical, "a", "x");
        assert_eq!(batch.max_severity(), Some(Severity::NonCritical));
        batch.add(ErrorCode::Unknown, Severity::Critical, "b", "x");
        batch.add(ErrorCode::Interrupted, Severity::NonCritical, "c", "x");
        assert_eq!(batch.max_severity(), Some(Severity::Critical));
        assert!(batch.is_critical());
    }

    #[test]
    fn test_eleventh_record_is_dropped_but_its_severity_counts() {
        // Arrange – fill the batch with non-critical records
        let mut batch = ErrorBatch::new();
        for i in 0..MAX_ERROR_RECORDS {
            batch.add(ErrorCode::Unknown, Severity::NonCritical, format!("e{i}"), "x");
        }

        // Act – the 11th record is the only critical one
        batch.add(ErrorCode::Resource, Severity::Critical, "oom", "x");

        // Assert
        assert_eq!(batch.len(), MAX_ERROR_RECORDS);
        assert!(batch.records().iter().all(|r| r.code == ErrorCode::Unknown));
        assert_eq!(batch.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_summary_never_exceeds_byte_cap() {
        let mut batch = ErrorBatch::new();
        for _ in 0..MAX_ERROR_RECORDS {
            batch.add(ErrorCode::Unknown, Severity::NonCritical, "é".repeat(200), "x");
        }
        let summary = batch.summary();
        assert!(summary.len() <= MAX_SUMMARY_BYTES);
        assert!(summary.starts_with("Error in x: "));
    }

    #[test]
    fn test_merge_keeps_cap_and_severity() {
        let mut a = ErrorBatch::new();
        for _ in 0..8 {
            a.add(ErrorCode::Unknown, Severity::NonCritical, "a", "x");
        }
        let mut b = ErrorBatch::new();
        for _ in 0..5 {
            b.add(ErrorCode::TimedOut, Severity::Critical, "b", "y");
        }

        a.merge(b);

        assert_eq!(a.len(), MAX_ERROR_RECORDS);
        assert_eq!(a.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_report_calls_sink_once_with_summary_and_severity() {
        // Arrange
        let mut batch = ErrorBatch::new();
        batch.add(ErrorCode::TimedOut, Severity::NonCritical, "slow", "close");
        let mut sink = MockEventSink::new();
        sink.expect_on_error()
            .with(
                eq("Error in close: slow (Code: timed-out)\n"),
                eq(Severity::NonCritical),
            )
            .times(1)
            .return_const(());

        // Act
        batch.report(&sink);
    }

    #[test]
    fn test_report_skips_empty_batch() {
        let mut sink = MockEventSink::new();
        sink.expect_on_error().times(0);
        ErrorBatch::new().report(&sink);
    }

    #[test]
    fn test_into_result_returns_batch_as_error() {
        assert!(ErrorBatch::new().into_result().is_ok());

        let mut batch = ErrorBatch::new();
        batch.add(ErrorCode::Resource, Severity::Critical, "spawn failed", "accept-loop");
        let err = batch.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error in accept-loop: spawn failed (Code: resource)"
        );
    }
}
