// src/gateway/scripted.rs
//! In-memory gateway for tests: submissions and streams are fed through channels.

use super::{AnalysisGateway, EventStream};
use crate::error::GatewayError;
use crate::models::{
    AnalysisOptions, AnalysisResult, CancelResponse, HistoryItem, LoginRequest, LoginResponse, ProgressEvent,
    SubmitResponse, UserProfile,
};
use crate::video_ref::extract_video_id;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

pub(crate) type EventSender = mpsc::UnboundedSender<Result<ProgressEvent, GatewayError>>;
type EventReceiver = mpsc::UnboundedReceiver<Result<ProgressEvent, GatewayError>>;

#[derive(Default)]
pub(crate) struct ScriptedGateway {
    submissions: Mutex<VecDeque<oneshot::Receiver<Result<SubmitResponse, GatewayError>>>>,
    streams: Mutex<HashMap<String, EventReceiver>>,
    pub submitted: Mutex<Vec<(String, AnalysisOptions, String)>>,
    pub cancelled: Mutex<Vec<String>>,
    hang_cancel: AtomicBool,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(job_id: &str) -> Result<SubmitResponse, GatewayError> {
        Ok(SubmitResponse {
            job_id: job_id.to_string(),
            status: "accepted".to_string(),
            message: "Analysis started successfully".to_string(),
        })
    }

    /// Queue an immediate submit outcome.
    pub fn queue_submit(&self, outcome: Result<SubmitResponse, GatewayError>) {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        self.submissions.lock().unwrap().push_back(rx);
    }

    /// Queue a submit that stays pending until the returned sender fires.
    pub fn queue_pending_submit(&self) -> oneshot::Sender<Result<SubmitResponse, GatewayError>> {
        let (tx, rx) = oneshot::channel();
        self.submissions.lock().unwrap().push_back(rx);
        tx
    }

    /// Register the event stream for a job. Dropping the sender closes the stream.
    pub fn open_stream(&self, job_id: &str) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(job_id.to_string(), rx);
        tx
    }

    /// Make `cancel_job` record the call and then never resolve.
    pub fn hang_remote_cancel(&self) {
        self.hang_cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisGateway for ScriptedGateway {
    async fn submit(
        &self,
        video_reference: &str,
        options: &AnalysisOptions,
        user_id: &str,
    ) -> Result<SubmitResponse, GatewayError> {
        let video_id =
            extract_video_id(video_reference).ok_or_else(|| GatewayError::Validation(video_reference.to_string()))?;
        self.submitted
            .lock()
            .unwrap()
            .push((video_id, options.clone(), user_id.to_string()));

        let next = self.submissions.lock().unwrap().pop_front();
        match next {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(GatewayError::Transport("submission dropped".to_string()))),
            None => Err(GatewayError::Transport("no scripted submission".to_string())),
        }
    }

    async fn stream(&self, job_id: &str) -> Result<EventStream, GatewayError> {
        let rx = self.streams.lock().unwrap().remove(job_id).ok_or_else(|| GatewayError::Status {
            status: 404,
            message: format!("no stream for {}", job_id),
        })?;
        let events = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        Ok(events.boxed())
    }

    async fn fetch_result(&self, job_id: &str) -> Result<AnalysisResult, GatewayError> {
        Ok(AnalysisResult {
            job_id: job_id.to_string(),
            video_id: "dQw4w9WgXcQ".to_string(),
            safety_score: 90,
            summary_report: r#"{"summary":"ok","reasoning":"calm","concerns":[]}"#.to_string(),
            metadata: None,
            top_comments: Vec::new(),
            status: "completed".to_string(),
            created_at: None,
            completed_at: None,
        })
    }

    async fn cancel_job(&self, job_id: &str) -> Result<CancelResponse, GatewayError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        if self.hang_cancel.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(CancelResponse {
            job_id: job_id.to_string(),
            cancelled: true,
            message: "cancelled".to_string(),
        })
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError> {
        Ok(LoginResponse {
            access_token: "scripted-token".to_string(),
            user: UserProfile {
                id: "user-1".to_string(),
                email: request.email.clone(),
                name: request.name.clone(),
                picture_url: Some(request.picture_url.clone()),
                is_pro: false,
            },
        })
    }

    async fn get_history(&self, _user_id: &str, _page: u32, _page_size: u32) -> Result<Vec<HistoryItem>, GatewayError> {
        Ok(Vec::new())
    }
}
