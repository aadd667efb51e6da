// src/session/store.rs
//! Single-writer owner of the active analysis session.
//!
//! Every transition runs to completion under one lock, so readers only ever observe whole
//! transitions. The store holds at most one [`Subscription`]; it is released before a new one is
//! acquired, and a pump whose subscription was released drops whatever it receives afterwards.

use super::reconciler::{Outcome, StreamReconciler};
use super::subscription::Subscription;
use super::{Session, SessionSnapshot};
use crate::auth::Identity;
use crate::error::{GatewayError, SessionError};
use crate::gateway::AnalysisGateway;
use crate::models::{AnalysisOptions, JobId};
use crate::video_ref::extract_video_id;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

struct StoreInner {
    session: Session,
    /// Bumped whenever the live session is superseded (restart, cancel, reset)
    generation: u64,
    subscription: Option<Subscription>,
    updates: watch::Sender<SessionSnapshot>,
}

impl StoreInner {
    /// Release the live subscription and invalidate everything issued under the current generation.
    fn supersede(&mut self) -> u64 {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.release();
        }
        self.generation += 1;
        self.generation
    }

    fn owns(&self, generation: u64, token: &CancellationToken) -> bool {
        self.generation == generation && !token.is_cancelled()
    }

    /// Drop the subscription of a pump that reached the end of its stream.
    fn retire(&mut self, generation: u64) {
        if let Some(mut subscription) = self.subscription.take() {
            if subscription.generation() == generation {
                subscription.retire();
            } else {
                self.subscription = Some(subscription);
            }
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.session.clone());
    }
}

/// Owns the lifecycle of one analysis session at a time.
///
/// Re-entrant [`start`](Self::start) cancels the live session and starts over.
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
    snapshots: watch::Receiver<SessionSnapshot>,
    gateway: Arc<dyn AnalysisGateway>,
    reconciler: StreamReconciler,
    cancel_remote: bool,
    /// Parent of every subscription token; cancelled when the store is dropped
    shutdown: CancellationToken,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn AnalysisGateway>) -> Self {
        let (updates, snapshots) = watch::channel(Session::default());
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                session: Session::default(),
                generation: 0,
                subscription: None,
                updates,
            })),
            snapshots,
            gateway,
            reconciler: StreamReconciler::new(),
            cancel_remote: true,
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether `cancel` also asks the gateway to stop the remote job.
    pub fn with_remote_cancel(mut self, enabled: bool) -> Self {
        self.cancel_remote = enabled;
        self
    }

    pub fn gateway(&self) -> Arc<dyn AnalysisGateway> {
        self.gateway.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().await.session.clone()
    }

    /// Receiver that sees a fresh snapshot after every transition.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Submit `video_reference` and attach to its progress stream.
    ///
    /// An unrecognizable reference is rejected without touching the session. A live session is
    /// cancelled first. Returns the job id once the stream is attached.
    pub async fn start(
        &self,
        video_reference: &str,
        options: &AnalysisOptions,
        identity: &dyn Identity,
    ) -> Result<JobId, SessionError> {
        let video_id = extract_video_id(video_reference).ok_or_else(|| {
            tracing::warn!("Rejected video reference: {}", video_reference);
            SessionError::Validation(video_reference.to_string())
        })?;

        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.session.phase().is_active() {
                let previous = inner.session.job_id().cloned();
                tracing::info!("🔁 Restarting: cancelling live session (job {:?})", previous);
                inner.session.cancel("Superseded by a new analysis");
                if let Some(job_id) = previous {
                    self.spawn_remote_cancel(job_id);
                }
            }
            let generation = inner.supersede();
            inner.session.begin(video_id.clone());
            inner.publish();
            generation
        };

        tracing::info!("🎬 Submitting video {} for analysis", video_id);
        let user_id = identity.user_id().unwrap_or_default();
        let submitted = self.gateway.submit(&video_id, options, &user_id).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            tracing::info!("Submission for {} resolved after the session was superseded", video_id);
            if let Ok(response) = &submitted {
                self.spawn_remote_cancel(response.job_id.clone());
            }
            return Err(SessionError::Superseded);
        }

        let response = match submitted {
            Ok(response) if response.job_id.trim().is_empty() => {
                let error = GatewayError::Transport("Job ID was not received".to_string());
                inner.session.fail(&format!("Failed to start: {}", error), Utc::now());
                inner.publish();
                return Err(SessionError::Submit(error));
            }
            Ok(response) => response,
            Err(error) => {
                tracing::error!("❌ Failed to start analysis for {}: {}", video_id, error);
                inner.session.fail(&format!("Failed to start: {}", error), Utc::now());
                inner.publish();
                return Err(SessionError::from(error));
            }
        };

        let job_id = response.job_id.clone();
        inner.session.attach(job_id.clone(), &response.message);
        inner.publish();

        let token = self.shutdown.child_token();
        let task = tokio::spawn(pump(
            self.inner.clone(),
            self.gateway.clone(),
            self.reconciler,
            generation,
            job_id.clone(),
            token.clone(),
        ));
        inner.subscription = Some(Subscription::new(generation, job_id.clone(), token, task));

        Ok(job_id)
    }

    /// Cancel the live session. Idempotent: returns `false` when nothing was live.
    ///
    /// The remote job is cancelled in the background; this never waits on the gateway.
    pub async fn cancel(&self) -> bool {
        let job_id = {
            let mut inner = self.inner.lock().await;
            if !inner.session.phase().is_active() {
                return false;
            }
            inner.supersede();
            inner.session.cancel("Analysis cancelled");
            inner.publish();
            inner.session.job_id().cloned()
        };

        tracing::info!("🛑 Cancelled analysis session (job {:?})", job_id);

        if let Some(job_id) = job_id {
            self.spawn_remote_cancel(job_id);
        }
        true
    }

    /// Return to `Idle`, severing a live session first.
    pub async fn reset(&self) {
        let live_job = {
            let mut inner = self.inner.lock().await;
            let live_job = if inner.session.phase().is_active() {
                inner.session.job_id().cloned()
            } else {
                None
            };
            inner.supersede();
            inner.session.reset();
            inner.publish();
            live_job
        };

        if let Some(job_id) = live_job {
            self.spawn_remote_cancel(job_id);
        }
    }

    fn spawn_remote_cancel(&self, job_id: JobId) {
        if !self.cancel_remote {
            return;
        }
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.cancel_job(&job_id).await {
                tracing::warn!("Remote cancel for job {} failed: {}", job_id, e);
            }
        });
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.supersede();
        }
    }
}

/// Folds one job's stream into the store until the stream ends, turns terminal, or is released.
async fn pump(
    inner: Arc<Mutex<StoreInner>>,
    gateway: Arc<dyn AnalysisGateway>,
    reconciler: StreamReconciler,
    generation: u64,
    job_id: JobId,
    token: CancellationToken,
) {
    let opened = tokio::select! {
        _ = token.cancelled() => return,
        opened = gateway.stream(&job_id) => opened,
    };

    let mut events = match opened {
        Ok(events) => events,
        Err(e) => {
            let mut guard = inner.lock().await;
            if guard.owns(generation, &token) {
                let outcome = match reconciler.transport_error(&mut guard.session, &e) {
                    Outcome::Suppressed => reconciler.finish(&mut guard.session),
                    other => other,
                };
                tracing::debug!("Stream open for job {} ended with {:?}", job_id, outcome);
                guard.retire(generation);
                guard.publish();
            }
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = events.next() => next,
        };

        let mut guard = inner.lock().await;
        if !guard.owns(generation, &token) {
            tracing::debug!("Dropping event for job {} from a released subscription", job_id);
            break;
        }

        let exhausted = next.is_none();
        let outcome = match next {
            Some(Ok(event)) => reconciler.apply(&mut guard.session, &event),
            Some(Err(e)) => reconciler.transport_error(&mut guard.session, &e),
            None => reconciler.finish(&mut guard.session),
        };
        tracing::debug!("Job {} event folded: {:?}", job_id, outcome);

        if outcome.changed_state() {
            guard.publish();
        }
        if exhausted || outcome.is_terminal() {
            guard.retire(generation);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSession;
    use crate::gateway::scripted::ScriptedGateway;
    use crate::models::ProgressEvent;
    use crate::session::{Phase, Severity};
    use std::time::Duration;

    const URL: &str = "https://youtu.be/dQw4w9WgXcQ";

    fn store_with(gateway: &Arc<ScriptedGateway>) -> SessionStore {
        SessionStore::new(gateway.clone())
    }

    async fn wait_for<F>(store: &SessionStore, predicate: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let mut rx = store.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("store dropped")
            .clone();
        snapshot
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_full_successful_session() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);

        let job_id = store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        assert_eq!(job_id, "J1");
        assert_eq!(store.snapshot().await.phase(), Phase::Streaming);

        tx.send(Ok(ProgressEvent::info("J1", "Extracting frames").with_progress(10))).unwrap();
        tx.send(Ok(ProgressEvent::info("J1", "Analyzing").with_progress(55))).unwrap();
        tx.send(Ok(ProgressEvent::complete("J1", r#"{"summary":"ok","safety_score":90}"#).with_progress(100)))
            .unwrap();

        let session = wait_for(&store, |s| s.phase().is_terminal()).await;
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(session.progress(), 100);
        assert_eq!(session.result().unwrap().summary, "ok");
        assert_eq!(session.video_reference(), Some("dQw4w9WgXcQ"));
        // acceptance message + three events
        assert_eq!(session.log_entries().len(), 4);

        let submitted = gateway.submitted.lock().unwrap().clone();
        assert_eq!(submitted[0].0, "dQw4w9WgXcQ");
        assert_eq!(submitted[0].2, "");
    }

    #[tokio::test]
    async fn test_invalid_reference_leaves_store_idle() {
        let gateway = Arc::new(ScriptedGateway::new());
        let store = store_with(&gateway);

        let err = store
            .start("https://vimeo.com/1", &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(store.snapshot().await, Session::default());
        assert_eq!(gateway.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_failure_moves_to_failed() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(Err(GatewayError::Transport("connection refused".to_string())));
        let store = store_with(&gateway);

        let err = store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Submit(_)));

        let session = store.snapshot().await;
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.progress(), 0);
        assert!(session.job_id().is_none());
        assert_eq!(session.log_entries().len(), 1);
        assert_eq!(session.log_entries()[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_benign_teardown_keeps_streaming() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();

        tx.send(Ok(ProgressEvent::error("J1", "connection closed without an explicit status")))
            .unwrap();
        tx.send(Ok(ProgressEvent::info("J1", "still scanning"))).unwrap();

        let session = wait_for(&store, |s| s.status_message() == "still scanning").await;
        assert_eq!(session.phase(), Phase::Streaming);
        assert!(session
            .log_entries()
            .iter()
            .all(|entry| entry.severity != Severity::Error));
        assert_eq!(session.log_entries().len(), 2);
    }

    #[tokio::test]
    async fn test_restart_ignores_superseded_job() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx1 = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        tx1.send(Ok(ProgressEvent::info("J1", "J1 working").with_progress(40))).unwrap();
        wait_for(&store, |s| s.progress() == 40).await;

        gateway.queue_submit(ScriptedGateway::accept("J2"));
        let tx2 = gateway.open_stream("J2");
        let job_id = store
            .start("aaaaaaaaaaa", &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        assert_eq!(job_id, "J2");

        // late events for J1, on its own (released) stream and on J2's
        let _ = tx1.send(Ok(ProgressEvent::complete("J1", r#"{"summary":"stale"}"#)));
        tx2.send(Ok(ProgressEvent::info("J1", "J1 stray").with_progress(95))).unwrap();
        tx2.send(Ok(ProgressEvent::info("J2", "J2 working").with_progress(20))).unwrap();

        let session = wait_for(&store, |s| s.status_message() == "J2 working").await;
        assert_eq!(session.job_id().map(String::as_str), Some("J2"));
        assert_eq!(session.phase(), Phase::Streaming);
        assert_eq!(session.progress(), 20);
        assert!(session.result().is_none());
        assert!(session.log_entries().iter().all(|entry| !entry.message.starts_with("J1")));

        settle().await;
        assert!(gateway.cancelled_jobs().contains(&"J1".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_final() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        tx.send(Ok(ProgressEvent::info("J1", "working").with_progress(40))).unwrap();
        wait_for(&store, |s| s.progress() == 40).await;

        assert!(store.cancel().await);
        assert!(!store.cancel().await);

        let _ = tx.send(Ok(ProgressEvent::complete("J1", r#"{"summary":"late"}"#)));
        settle().await;

        let session = store.snapshot().await;
        assert_eq!(session.phase(), Phase::Cancelled);
        assert_eq!(session.progress(), 40);
        assert!(session.result().is_none());
        assert_eq!(gateway.cancelled_jobs(), vec!["J1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_does_not_wait_for_the_gateway() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.hang_remote_cancel();
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let _tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(500), store.cancel())
            .await
            .expect("cancel waited on the gateway");
        assert!(cancelled);
        assert_eq!(store.snapshot().await.phase(), Phase::Cancelled);

        settle().await;
        assert_eq!(gateway.cancelled_jobs(), vec!["J1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_after_natural_close_is_a_no_op() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        tx.send(Ok(ProgressEvent::info("J1", "Monitoring active").with_progress(70))).unwrap();
        drop(tx);

        let before = wait_for(&store, |s| s.phase() == Phase::Completed).await;
        assert!(!store.cancel().await);
        assert!(!store.cancel().await);

        settle().await;
        assert_eq!(store.snapshot().await, before);
        assert!(gateway.cancelled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_stream_while_pump_waits_for_lock() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();

        let guard = store.inner.clone().lock_owned().await;
        tx.send(Ok(ProgressEvent::info("J1", "working"))).unwrap();
        settle().await;

        drop(store);
        drop(guard);

        tokio::time::timeout(Duration::from_secs(2), tx.closed())
            .await
            .expect("stream still held after the store was dropped");
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_a_no_op() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        tx.send(Ok(ProgressEvent::complete("J1", "literal text, not json"))).unwrap();
        let before = wait_for(&store, |s| s.phase() == Phase::Completed).await;
        assert_eq!(before.progress(), 100);
        assert!(!before.result().unwrap().summary.is_empty());

        assert!(!store.cancel().await);
        assert!(!store.cancel().await);
        assert_eq!(store.snapshot().await, before);
        assert!(gateway.cancelled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_submitting_discards_late_job() {
        let gateway = Arc::new(ScriptedGateway::new());
        let resolve = gateway.queue_pending_submit();
        let store = Arc::new(store_with(&gateway));

        let starting = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
                    .await
            })
        };
        wait_for(&store, |s| s.phase() == Phase::Submitting).await;

        assert!(store.cancel().await);
        resolve.send(ScriptedGateway::accept("J1")).unwrap();

        let outcome = starting.await.unwrap();
        assert!(matches!(outcome, Err(SessionError::Superseded)));

        let session = store.snapshot().await;
        assert_eq!(session.phase(), Phase::Cancelled);
        assert!(session.job_id().is_none());

        settle().await;
        assert_eq!(gateway.cancelled_jobs(), vec!["J1".to_string()]);
    }

    #[tokio::test]
    async fn test_natural_close_completes() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();

        tx.send(Ok(ProgressEvent::info("J1", "Monitoring active").with_progress(95))).unwrap();
        drop(tx);

        let session = wait_for(&store, |s| s.phase().is_terminal()).await;
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(session.progress(), 95);
        assert!(session.result().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_fails_session() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();

        tx.send(Err(GatewayError::Transport("connection reset by peer".to_string())))
            .unwrap();

        let session = wait_for(&store, |s| s.phase().is_terminal()).await;
        assert_eq!(session.phase(), Phase::Failed);
        assert!(session
            .log_entries()
            .last()
            .unwrap()
            .message
            .contains("connection reset by peer"));
    }

    #[tokio::test]
    async fn test_reset_restores_idle_defaults() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let tx = gateway.open_stream("J1");
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();
        tx.send(Ok(ProgressEvent::complete("J1", r#"{"summary":"ok"}"#))).unwrap();
        wait_for(&store, |s| s.phase() == Phase::Completed).await;

        store.reset().await;
        let session = store.snapshot().await;
        assert_eq!(session, Session::default());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.progress(), 0);
        assert!(session.result().is_none());
        assert!(session.log_entries().is_empty());
        assert!(session.job_id().is_none());
        assert_eq!(*store.watch().borrow(), Session::default());
    }

    #[tokio::test]
    async fn test_missing_stream_fails_session() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.queue_submit(ScriptedGateway::accept("J1"));
        let store = store_with(&gateway);
        store
            .start(URL, &AnalysisOptions::default(), &AuthSession::anonymous())
            .await
            .unwrap();

        let session = wait_for(&store, |s| s.phase().is_terminal()).await;
        assert_eq!(session.phase(), Phase::Failed);
    }
}
