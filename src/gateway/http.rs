// src/gateway/http.rs
use super::ndjson::decode_stream;
use super::{AnalysisGateway, EventStream};
use crate::config::ClientConfig;
use crate::error::GatewayError;
use crate::models::{
    AnalysisOptions, AnalysisResult, CancelResponse, HistoryItem, HistoryPage, LoginRequest, LoginResponse,
    SubmitRequest, SubmitResponse,
};
use crate::video_ref::extract_video_id;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// JSON-over-HTTP client for the analysis service. Progress is streamed as NDJSON.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    retry_max_elapsed: Duration,
    bearer_token: Arc<RwLock<Option<String>>>,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            retry_max_elapsed: config.retry_max_elapsed,
            bearer_token: Arc::new(RwLock::new(config.access_token.clone())),
        })
    }

    /// Replace the bearer token sent with every request (e.g. after login).
    pub fn set_bearer_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.bearer_token.write() {
            *guard = token;
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn job_url(&self, job_id: &str, suffix: &str) -> String {
        self.url(&format!("/v1/analyses/{}{}", urlencoding::encode(job_id), suffix))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.bearer_token.read().ok().and_then(|guard| guard.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a unary request, retrying transient failures with exponential backoff.
    async fn call<T, F>(&self, label: &str, build: F) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        with_retry(retry_policy(self.retry_max_elapsed), label, || async {
            let response = self.authorize(build()).timeout(self.request_timeout).send().await?;

            let status = response.status();
            let body = response.text().await?;

            tracing::debug!("{} response (status {}): {}", label, status, body);

            if !status.is_success() {
                return Err(status_error(status.as_u16(), body));
            }

            Ok(serde_json::from_str::<T>(&body)?)
        })
        .await
    }
}

fn retry_policy(max_elapsed: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(10),
        multiplier: 2.0,
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the policy gives up.
async fn with_retry<T, F, Fut>(policy: ExponentialBackoff, label: &str, mut attempt: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    retry(policy, || {
        let pending = attempt();
        async move { pending.await.map_err(|e| classify(label, e)) }
    })
    .await
}

fn status_error(status: u16, body: String) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Unauthorized(body),
        _ => GatewayError::Status { status, message: body },
    }
}

fn classify(label: &str, error: GatewayError) -> backoff::Error<GatewayError> {
    if error.is_transient() {
        tracing::warn!("{} failed (retrying): {}", label, error);
        backoff::Error::transient(error)
    } else {
        tracing::error!("{} failed: {}", label, error);
        backoff::Error::permanent(error)
    }
}

#[async_trait]
impl AnalysisGateway for HttpGateway {
    async fn submit(
        &self,
        video_reference: &str,
        options: &AnalysisOptions,
        user_id: &str,
    ) -> Result<SubmitResponse, GatewayError> {
        let video_id =
            extract_video_id(video_reference).ok_or_else(|| GatewayError::Validation(video_reference.to_string()))?;

        let request = SubmitRequest {
            video_url: video_id,
            options: options.clone(),
            user_id: user_id.to_string(),
        };

        let response: SubmitResponse = self
            .call("StartAnalysis", || self.client.post(self.url("/v1/analyses")).json(&request))
            .await?;

        tracing::info!("🎬 Analysis job {} accepted ({})", response.job_id, response.status);
        Ok(response)
    }

    async fn stream(&self, job_id: &str) -> Result<EventStream, GatewayError> {
        let response = self
            .authorize(self.client.get(self.job_url(job_id, "/events")))
            .header(header::ACCEPT, "application/x-ndjson")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }

        tracing::info!("📡 Subscribed to progress stream for job {}", job_id);

        Ok(decode_stream(response.bytes_stream()))
    }

    async fn fetch_result(&self, job_id: &str) -> Result<AnalysisResult, GatewayError> {
        self.call("GetResult", || self.client.get(self.job_url(job_id, "/result")))
            .await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<CancelResponse, GatewayError> {
        let response: CancelResponse = self
            .call("CancelAnalysis", || self.client.post(self.job_url(job_id, "/cancel")))
            .await?;
        tracing::info!("🛑 Cancel requested for job {}: {}", job_id, response.message);
        Ok(response)
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError> {
        let response: LoginResponse = self
            .call("LoginWithGoogle", || self.client.post(self.url("/v1/auth/google")).json(request))
            .await?;
        self.set_bearer_token(Some(response.access_token.clone()));
        Ok(response)
    }

    async fn get_history(&self, user_id: &str, page: u32, page_size: u32) -> Result<Vec<HistoryItem>, GatewayError> {
        let url = self.url(&format!("/v1/users/{}/history", urlencoding::encode(user_id)));
        let history: HistoryPage = self
            .call("GetUserHistory", || {
                self.client
                    .get(&url)
                    .query(&[("page", page), ("page_size", page_size)])
            })
            .await?;
        Ok(history.into_items())
    }
}
