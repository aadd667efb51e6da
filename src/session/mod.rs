// src/session/mod.rs
//! Client-side analysis session: one attempt to analyze one video, from submission to a terminal outcome.
//! Fields are read-only outside this module; every mutation goes through a named transition.

use crate::models::{AnalysisReport, JobId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub mod reconciler;
pub mod store;
pub mod subscription;

pub use reconciler::{DropReason, Outcome, StreamReconciler, BENIGN_TEARDOWN};
pub use store::SessionStore;
pub use subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    /// A live session owns (or is about to own) a stream subscription.
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Submitting | Phase::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// View model handed to renderers. Cloned out of the store after every transition.
pub type SessionSnapshot = Session;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Session {
    job_id: Option<JobId>,
    video_reference: Option<String>,
    phase: Phase,
    progress: u8,
    status_message: String,
    result: Option<AnalysisReport>,
    log_entries: Vec<LogEntry>,
}

impl Session {
    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn video_reference(&self) -> Option<&str> {
        self.video_reference.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn result(&self) -> Option<&AnalysisReport> {
        self.result.as_ref()
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    /// Idle or terminal -> Submitting. Starts from a clean slate.
    pub(crate) fn begin(&mut self, video_reference: String) {
        *self = Session {
            video_reference: Some(video_reference),
            phase: Phase::Submitting,
            ..Session::default()
        };
    }

    /// Submitting -> Streaming once the gateway assigned a job id.
    pub(crate) fn attach(&mut self, job_id: JobId, message: &str) -> bool {
        if self.phase != Phase::Submitting || self.job_id.is_some() {
            return false;
        }
        self.job_id = Some(job_id);
        self.phase = Phase::Streaming;
        if !message.trim().is_empty() {
            self.status_message = message.to_string();
            self.log(Severity::Info, message, Utc::now());
        }
        true
    }

    /// Monotonic: a lower value than the current one is ignored.
    pub(crate) fn advance(&mut self, progress: Option<u8>) {
        if let Some(p) = progress {
            self.progress = self.progress.max(p.min(100));
        }
    }

    pub(crate) fn set_status(&mut self, message: &str) {
        if !message.trim().is_empty() {
            self.status_message = message.to_string();
        }
    }

    pub(crate) fn log(&mut self, severity: Severity, message: &str, timestamp: DateTime<Utc>) {
        self.log_entries.push(LogEntry {
            id: Uuid::new_v4(),
            timestamp,
            severity,
            message: message.to_string(),
        });
    }

    /// Streaming -> Completed. `result` is only ever set once.
    pub(crate) fn complete(&mut self, result: Option<AnalysisReport>, force_full: bool) -> bool {
        if self.phase != Phase::Streaming {
            return false;
        }
        if force_full {
            self.progress = 100;
        }
        if self.result.is_none() {
            self.result = result;
        }
        self.phase = Phase::Completed;
        true
    }

    /// Submitting | Streaming -> Failed. Progress is left as it was.
    pub(crate) fn fail(&mut self, message: &str, timestamp: DateTime<Utc>) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.phase = Phase::Failed;
        self.set_status(message);
        self.log(Severity::Error, message, timestamp);
        true
    }

    /// Submitting | Streaming -> Cancelled.
    pub(crate) fn cancel(&mut self, message: &str) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.phase = Phase::Cancelled;
        self.set_status(message);
        self.log(Severity::Info, message, Utc::now());
        true
    }

    pub(crate) fn reset(&mut self) {
        *self = Session::default();
    }
}
