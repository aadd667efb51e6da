// src/models.rs
//! Wire models exchanged with the analysis gateway.
//! Field spellings are lenient: the backend has shipped both camelCase and snake_case payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Job identifier assigned by the gateway on submit
pub type JobId = String;

/// Summary used when neither the payload nor the event stream offers any text.
pub const FALLBACK_SUMMARY: &str = "Analysis finished";

fn de_percent<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
    let raw = Option::<f64>::deserialize(d)?;
    Ok(raw.map(|p| p.round().clamp(0.0, 100.0) as u8))
}

fn de_score<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    Ok(de_percent(d)?.unwrap_or(0))
}

fn default_title() -> String {
    "Untitled".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            other => Err(format!("unknown sensitivity '{}'", other)),
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    pub sensitivity: Sensitivity,
    pub analyze_comments: bool,
    pub top_comments_count: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::Medium,
            analyze_comments: true,
            top_comments_count: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub video_url: String,
    pub options: AnalysisOptions,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(alias = "job_id")]
    pub job_id: JobId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Kind of a streamed progress event. The backend's `log` and `progress` kinds are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[serde(alias = "log", alias = "progress")]
    Info,
    Success,
    Warning,
    Error,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(alias = "job_id")]
    pub job_id: JobId,
    #[serde(alias = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "de_percent")]
    pub progress: Option<u8>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: impl Into<JobId>, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            message: message.into(),
            progress: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn info(job_id: impl Into<JobId>, message: impl Into<String>) -> Self {
        Self::new(job_id, EventKind::Info, message)
    }

    pub fn error(job_id: impl Into<JobId>, message: impl Into<String>) -> Self {
        Self::new(job_id, EventKind::Error, message)
    }

    pub fn complete(job_id: impl Into<JobId>, message: impl Into<String>) -> Self {
        Self::new(job_id, EventKind::Complete, message)
    }
}

/// Structured report carried by a `complete` event or a fetched result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default, alias = "safetyScore", deserialize_with = "de_percent")]
    pub safety_score: Option<u8>,
    /// Set when the payload could not be parsed and the summary was substituted.
    #[serde(skip)]
    pub degraded: bool,
}

impl AnalysisReport {
    /// Strict parse of a serialized report. Anything but a JSON object is rejected.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload.trim())
    }

    pub fn degraded(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            degraded: true,
            ..Default::default()
        }
    }

    /// Parse `payload`, substituting `fallback_summary` for a missing summary or an unparsable payload.
    pub fn parse_or_degraded(payload: &str, fallback_summary: &str) -> Self {
        let fallback = if fallback_summary.trim().is_empty() {
            FALLBACK_SUMMARY
        } else {
            fallback_summary
        };

        match Self::parse(payload) {
            Ok(mut report) => {
                if report.summary.trim().is_empty() {
                    report.summary = fallback.to_string();
                }
                report
            }
            Err(e) => {
                tracing::warn!("Malformed analysis report, using fallback summary: {}", e);
                Self::degraded(fallback)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, alias = "view_count")]
    pub view_count: i64,
    #[serde(default, alias = "published_at")]
    pub published_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopComment {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub rank: i32,
}

/// Durable result returned by `fetch_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(alias = "job_id")]
    pub job_id: JobId,
    #[serde(default, alias = "video_id")]
    pub video_id: String,
    #[serde(default, alias = "safety_score", deserialize_with = "de_score")]
    pub safety_score: u8,
    #[serde(default, alias = "summary_report", alias = "geminiResponse", alias = "gemini_response")]
    pub summary_report: String,
    #[serde(default)]
    pub metadata: Option<VideoMetadata>,
    #[serde(default, alias = "top_comments")]
    pub top_comments: Vec<TopComment>,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default, alias = "completed_at")]
    pub completed_at: Option<String>,
}

impl AnalysisResult {
    /// Structured view of `summary_report`; the raw text stands in for an unparsable report.
    pub fn report(&self) -> AnalysisReport {
        let mut report = AnalysisReport::parse_or_degraded(&self.summary_report, &self.summary_report);
        if report.safety_score.is_none() {
            report.safety_score = Some(self.safety_score);
        }
        report
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    #[serde(alias = "job_id")]
    pub job_id: JobId,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub id_token: String,
    pub email: String,
    pub name: String,
    pub picture_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "picture_url")]
    pub picture_url: Option<String>,
    #[serde(default, alias = "is_pro")]
    pub is_pro: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "access_token")]
    pub access_token: String,
    pub user: UserProfile,
}

/// One row of a user's analysis history.
///
/// Rows arrive in several spellings; the first non-null spelling of each field wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub job_id: JobId,
    pub video_url: String,
    pub title: String,
    pub safety_score: u8,
    pub created_at: Option<String>,
}

impl<'de> Deserialize<'de> for HistoryItem {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let fields = Map::<String, Value>::deserialize(d)?;
        let pick = |keys: &[&str]| keys.iter().find_map(|k| fields.get(*k).filter(|v| !v.is_null()));
        let text = |keys: &[&str]| {
            pick(keys).and_then(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };

        Ok(Self {
            job_id: text(&["jobId", "job_id"]).unwrap_or_default(),
            video_url: text(&["videoUrl", "video_url", "videoId", "video_id"]).unwrap_or_default(),
            title: text(&["videoTitle", "video_title", "title"]).unwrap_or_else(default_title),
            safety_score: pick(&["safetyScore", "safety_score"])
                .and_then(Value::as_f64)
                .map(|p| p.round().clamp(0.0, 100.0) as u8)
                .unwrap_or(0),
            created_at: text(&["analyzedAt", "analyzed_at", "createdAt", "created_at"]),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct HistoryPage {
    #[serde(default, alias = "history", alias = "analysisHistory")]
    items: Vec<HistoryItem>,
}

impl HistoryPage {
    /// Rows in page order. A row without a job id is keyed by its position.
    pub fn into_items(self) -> Vec<HistoryItem> {
        self.items
            .into_iter()
            .enumerate()
            .map(|(index, mut item)| {
                if item.job_id.is_empty() {
                    item.job_id = format!("item-{}", index);
                }
                item
            })
            .collect()
    }
}
