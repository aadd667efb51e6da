// src/report.rs
//! Subscription-gated view of a fetched analysis result.

use crate::auth::Identity;
use crate::models::{AnalysisResult, TopComment, VideoMetadata};
use serde::Serialize;
use std::fmt;

/// What the viewer must do to unlock a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unlock {
    LoginRequired,
    SubscriptionRequired,
}

impl Unlock {
    pub fn call_to_action(&self) -> &'static str {
        match self {
            Unlock::LoginRequired => "Log in to see this section",
            Unlock::SubscriptionRequired => "Subscribe to Pro to see this section",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Gated<T> {
    Unlocked(T),
    Locked(Unlock),
}

impl<T> Gated<T> {
    fn for_viewer(value: T, gate: Option<Unlock>) -> Self {
        match gate {
            None => Gated::Unlocked(value),
            Some(unlock) => Gated::Locked(unlock),
        }
    }

    pub fn as_unlocked(&self) -> Option<&T> {
        match self {
            Gated::Unlocked(value) => Some(value),
            Gated::Locked(_) => None,
        }
    }
}

/// Report as shown to one viewer. Score, metadata and summary are public; the rest is Pro-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    pub job_id: String,
    pub video_id: String,
    pub safety_score: u8,
    pub summary: String,
    pub metadata: Option<VideoMetadata>,
    pub reasoning: Gated<String>,
    pub concerns: Gated<Vec<String>>,
    pub top_comments: Gated<Vec<TopComment>>,
}

impl ReportView {
    pub fn build(result: &AnalysisResult, identity: &dyn Identity) -> Self {
        let gate = if identity.is_pro() {
            None
        } else if identity.is_logged_in() {
            Some(Unlock::SubscriptionRequired)
        } else {
            Some(Unlock::LoginRequired)
        };

        let report = result.report();

        Self {
            job_id: result.job_id.clone(),
            video_id: result.video_id.clone(),
            safety_score: report.safety_score.unwrap_or(result.safety_score),
            summary: report.summary,
            metadata: result.metadata.clone(),
            reasoning: Gated::for_viewer(report.reasoning, gate),
            concerns: Gated::for_viewer(report.concerns, gate),
            top_comments: Gated::for_viewer(result.top_comments.clone(), gate),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.reasoning, Gated::Locked(_))
    }
}

impl fmt::Display for ReportView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Safety score: {}/100", self.safety_score)?;
        if let Some(meta) = &self.metadata {
            writeln!(f, "Video: {} ({})", meta.title, meta.channel)?;
        }
        writeln!(f, "Summary: {}", self.summary)?;

        match &self.reasoning {
            Gated::Unlocked(reasoning) if !reasoning.is_empty() => writeln!(f, "Reasoning: {}", reasoning)?,
            Gated::Unlocked(_) => {}
            Gated::Locked(unlock) => writeln!(f, "Reasoning: [locked] {}", unlock.call_to_action())?,
        }

        match &self.concerns {
            Gated::Unlocked(concerns) => {
                for concern in concerns {
                    writeln!(f, "  - {}", concern)?;
                }
            }
            Gated::Locked(unlock) => writeln!(f, "Concerns: [locked] {}", unlock.call_to_action())?,
        }

        match &self.top_comments {
            Gated::Unlocked(comments) => {
                for comment in comments {
                    writeln!(f, "  #{} {} ({} likes): {}", comment.rank, comment.author, comment.likes, comment.text)?;
                }
            }
            Gated::Locked(unlock) => writeln!(f, "Top comments: [locked] {}", unlock.call_to_action())?,
        }
        Ok(())
    }
}
