// src/session/reconciler.rs
//! Folds streamed progress events into a [`Session`].

use super::{Phase, Session, Severity};
use crate::error::GatewayError;
use crate::models::{AnalysisReport, EventKind, ProgressEvent};
use chrono::Utc;

/// Transport teardown signal emitted when a stream closes cleanly without trailers. Not an application error.
pub const BENIGN_TEARDOWN: &str = "connection closed without an explicit status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The session is not streaming (not yet attached, or already terminal)
    NotStreaming,
    /// The event belongs to a superseded job
    ForeignJob,
}

/// What folding one input did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Dropped(DropReason),
    Suppressed,
    Progressed,
    Completed,
    Failed,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Completed | Outcome::Failed)
    }

    pub fn changed_state(&self) -> bool {
        !matches!(self, Outcome::Dropped(_) | Outcome::Suppressed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamReconciler;

impl StreamReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn is_benign_teardown(message: &str) -> bool {
        message.to_ascii_lowercase().contains(BENIGN_TEARDOWN)
    }

    /// Apply one event. Every accepted event appends exactly one log entry.
    pub fn apply(&self, session: &mut Session, event: &ProgressEvent) -> Outcome {
        if session.phase() != Phase::Streaming {
            return Outcome::Dropped(DropReason::NotStreaming);
        }
        if session.job_id() != Some(&event.job_id) {
            tracing::debug!(
                "Dropping event for job {} (active job: {:?})",
                event.job_id,
                session.job_id()
            );
            return Outcome::Dropped(DropReason::ForeignJob);
        }

        match event.kind {
            EventKind::Info | EventKind::Success | EventKind::Warning => {
                let severity = match event.kind {
                    EventKind::Success => Severity::Success,
                    EventKind::Warning => Severity::Warning,
                    _ => Severity::Info,
                };
                session.advance(event.progress);
                session.set_status(&event.message);
                session.log(severity, &event.message, event.timestamp);
                Outcome::Progressed
            }
            EventKind::Error => {
                if Self::is_benign_teardown(&event.message) {
                    tracing::debug!("Suppressing benign teardown for job {}", event.job_id);
                    return Outcome::Suppressed;
                }
                tracing::error!("❌ Analysis job {} failed: {}", event.job_id, event.message);
                session.fail(&event.message, event.timestamp);
                Outcome::Failed
            }
            EventKind::Complete => {
                let fallback = if event.message.trim().is_empty() {
                    session.status_message().to_string()
                } else {
                    event.message.clone()
                };
                let report = AnalysisReport::parse_or_degraded(&event.message, &fallback);
                let severity = if report.degraded {
                    Severity::Warning
                } else {
                    Severity::Success
                };
                let summary = report.summary.clone();

                session.set_status(&summary);
                session.log(severity, &summary, event.timestamp);
                session.complete(Some(report), true);
                tracing::info!("✅ Analysis job {} completed", event.job_id);
                Outcome::Completed
            }
        }
    }

    /// The stream ended without a terminal event: treat as an implicit success.
    pub fn finish(&self, session: &mut Session) -> Outcome {
        if session.phase() != Phase::Streaming {
            return Outcome::Dropped(DropReason::NotStreaming);
        }
        session.log(Severity::Info, "Analysis stream closed", Utc::now());
        session.complete(None, false);
        tracing::info!("Stream for job {:?} closed without a terminal event", session.job_id());
        Outcome::Completed
    }

    /// The transport failed mid-stream.
    pub fn transport_error(&self, session: &mut Session, error: &GatewayError) -> Outcome {
        if session.phase() != Phase::Streaming {
            return Outcome::Dropped(DropReason::NotStreaming);
        }
        let message = error.to_string();
        if Self::is_benign_teardown(&message) {
            tracing::debug!("Suppressing benign transport teardown: {}", message);
            return Outcome::Suppressed;
        }
        tracing::error!("Stream for job {:?} failed: {}", session.job_id(), message);
        session.fail(&format!("Connection error: {}", message), Utc::now());
        Outcome::Failed
    }
}
