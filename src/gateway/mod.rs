// src/gateway/mod.rs
//! Boundary to the remote analysis service.

use crate::error::GatewayError;
use crate::models::{
    AnalysisOptions, AnalysisResult, CancelResponse, HistoryItem, LoginRequest, LoginResponse, ProgressEvent,
    SubmitResponse,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod http;
pub mod ndjson;
#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpGateway;

/// Progress events for one job. Dropping the stream cancels it.
pub type EventStream = BoxStream<'static, Result<ProgressEvent, GatewayError>>;

#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    /// Create a job. Fails with `Validation` when the reference has no recognizable video id.
    async fn submit(
        &self,
        video_reference: &str,
        options: &AnalysisOptions,
        user_id: &str,
    ) -> Result<SubmitResponse, GatewayError>;

    /// Open the progress stream of a job.
    async fn stream(&self, job_id: &str) -> Result<EventStream, GatewayError>;

    async fn fetch_result(&self, job_id: &str) -> Result<AnalysisResult, GatewayError>;

    async fn cancel_job(&self, job_id: &str) -> Result<CancelResponse, GatewayError>;

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError>;

    async fn get_history(&self, user_id: &str, page: u32, page_size: u32) -> Result<Vec<HistoryItem>, GatewayError>;
}
