//! Shutdown coordination for the dispatcher daemon.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Background tasks (health monitor, sticky cleanup, admin server) each hold
/// a receiver and exit their loop when the signal fires.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let receivers = self.tx.send(()).unwrap_or(0);
        tracing::info!(receivers, "Shutdown triggered");
    }

    /// Number of tasks still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait for `tasks` to finish, aborting whatever is left after `deadline`.
    /// Returns how many tasks had to be aborted.
    pub async fn drain(mut tasks: Vec<JoinHandle<()>>, deadline: Duration) -> usize {
        let joined = futures_util::future::join_all(tasks.iter_mut());

        match tokio::time::timeout(deadline, joined).await {
            Ok(results) => {
                for err in results.into_iter().filter_map(Result::err) {
                    tracing::error!(error = %err, "Background task failed during shutdown");
                }
                0
            }
            Err(_) => {
                let pending: Vec<_> = tasks.iter().filter(|t| !t.is_finished()).collect();
                tracing::warn!(pending = pending.len(), ?deadline, "Shutdown deadline exceeded, aborting tasks");
                pending.iter().for_each(|t| t.abort());
                pending.len()
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_trigger() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            rx.recv().await.ok();
        });
        assert_eq!(shutdown.receiver_count(), 1);

        shutdown.trigger();
        assert_eq!(Shutdown::drain(vec![task], Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_stuck_tasks() {
        let stuck = tokio::spawn(std::future::pending::<()>());
        let done = tokio::spawn(async {});

        let aborted = Shutdown::drain(vec![stuck, done], Duration::from_secs(5)).await;
        assert_eq!(aborted, 1);
    }
}
