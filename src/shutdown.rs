use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Process-wide stop flag shared by the HTTP server, the scheduler and the
/// Ctrl-C task.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("Shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Call `attempt` every `every` until it succeeds. Used to stop the
/// dispatcher, whose token refuses while it is still starting up.
pub async fn retry_until_ok<T, E: Display>(mut attempt: impl FnMut() -> Result<T, E>, every: Duration) -> T {
    loop {
        match attempt() {
            Ok(value) => return value,
            Err(e) => {
                tracing::debug!(error = %e, "Not ready yet, retrying");
                tokio::time::sleep(every).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        });
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(shutdown.is_triggered());

        // Late waiters return at once.
        tokio::time::timeout(Duration::from_millis(100), shutdown.wait()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_ok_waits_for_success() {
        let mut calls = 0;
        let value = retry_until_ok(
            || {
                calls += 1;
                if calls < 3 { Err("idle") } else { Ok(calls) }
            },
            Duration::from_millis(200),
        )
        .await;
        assert_eq!(value, 3);
    }
}
