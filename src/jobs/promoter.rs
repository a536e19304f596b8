//! Retry promoter: background loop moving due retries back to pending.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::jobs::queue::JobQueue;

/// Spawn a background task that calls [`JobQueue::promote_due`] every
/// `interval`.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_retry_promoter(
    queue: Arc<JobQueue>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Retry promoter started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Retry promoter shutting down");
                return;
            }

            match queue.promote_due(Utc::now()).await {
                Ok(0) => {}
                Ok(count) => match queue.stats().await {
                    Ok(stats) => debug!(
                        promoted = count,
                        pending = stats.pending,
                        retry = stats.retry,
                        dead = stats.dead,
                        "Retries promoted"
                    ),
                    Err(_) => debug!(promoted = count, "Retries promoted"),
                },
                Err(e) => error!(error = %e, "Retry promotion failed"),
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::EmailJob;
    use crate::store::{Database, LibSqlBackend};

    #[tokio::test]
    async fn promoter_moves_due_jobs_and_stops() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(JobQueue::new(db, "promo"));

        let job = EmailJob::new("abc", "widget", "p", "a@b.c", "s", "<m>");
        // Due immediately: scheduled one unit in the past.
        queue
            .schedule_retry_at(job.clone(), "e", Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();

        let (handle, shutdown) = spawn_retry_promoter(Arc::clone(&queue), Duration::from_millis(10));

        let got = queue.dequeue_blocking(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.map(|j| (j.id, j.retry_count)), Some((job.id, 1)));

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("promoter should stop")
            .unwrap();
    }
}
