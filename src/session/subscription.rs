// src/session/subscription.rs
use crate::models::JobId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owned handle on the task pumping one job's event stream into the store.
/// Releasing is idempotent; a released subscription can never mutate the session again.
#[derive(Debug)]
pub struct Subscription {
    generation: u64,
    job_id: JobId,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(generation: u64, job_id: JobId, token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            generation,
            job_id,
            token,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sever the stream: cancel the token and abort the pump task.
    pub fn release(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("📡 Released subscription for job {}", self.job_id);
        }
    }

    /// Called by the pump itself once its stream is exhausted. Detaches the task instead of aborting it.
    pub(crate) fn retire(&mut self) {
        self.token.cancel();
        drop(self.task.take());
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_is_idempotent_and_aborts() {
        let token = CancellationToken::new();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let mut sub = Subscription::new(1, "J1".to_string(), token.clone(), task);
        assert!(!sub.is_released());

        sub.release();
        sub.release();
        assert!(sub.is_released());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_retire_does_not_abort() {
        let token = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<u8>();
        let task = tokio::spawn(async move {
            let _ = tx.send(7);
        });
        let mut sub = Subscription::new(1, "J1".to_string(), token, task);
        sub.retire();
        drop(sub);
        assert_eq!(rx.await.unwrap(), 7);
    }
}
