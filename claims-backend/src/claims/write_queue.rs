//! Single-worker FIFO queue that totally orders disk work.
//!
//! Jobs are boxed futures pushed onto a `VecDeque`. One worker task pops and
//! awaits them one at a time, so job N+1 never starts before job N has
//! settled, no matter how many callers enqueue concurrently.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

/// A queued job resolves to a completion callback that hands the output to the caller
type Job = BoxFuture<'static, Box<dyn FnOnce() + Send>>;

pub struct WriteQueue {
    jobs: Mutex<VecDeque<Job>>,
    wake: Notify,
    /// Jobs enqueued but not yet finished (queued + running)
    outstanding: AtomicUsize,
    completed: AtomicU64,
    shutdown: CancellationToken,
}

impl WriteQueue {
    /// Create the queue and spawn its worker on the current tokio runtime
    pub fn start() -> Arc<Self> {
        let queue = Arc::new(Self {
            jobs: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            outstanding: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(Self::run(queue.clone()));
        queue
    }

    /// Append a job. The receiver resolves with the job's output once it has
    /// run; it errors if the queue was shut down before the job was accepted.
    pub fn enqueue<F, T>(&self, job: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if self.shutdown.is_cancelled() {
            log::warn!("[WRITE_QUEUE] Rejecting job, queue is shut down");
            return rx;
        }

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push_back(Box::pin(async move {
            let output = job.await;
            Box::new(move || {
                // Caller may have dropped the receiver
                let _ = tx.send(output);
            }) as Box<dyn FnOnce() + Send>
        }));
        self.wake.notify_one();
        rx
    }

    /// True while any job is queued or running
    pub fn is_busy(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) > 0
    }

    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Wait until every job enqueued before this call has finished
    pub async fn flush(&self) {
        let _ = self.enqueue(async {}).await;
    }

    /// Stop accepting jobs; the worker drains what is already queued, then exits
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.wake.notify_one();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn run(queue: Arc<Self>) {
        loop {
            let next = queue.jobs.lock().pop_front();
            match next {
                Some(job) => {
                    let complete = job.await;
                    // Counters settle before the caller is woken
                    queue.completed.fetch_add(1, Ordering::SeqCst);
                    queue.outstanding.fetch_sub(1, Ordering::SeqCst);
                    complete();
                }
                None => {
                    if queue.shutdown.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = queue.wake.notified() => {}
                        _ = queue.shutdown.cancelled() => {}
                    }
                }
            }
        }
        log::debug!(
            "[WRITE_QUEUE] Worker stopped after {} jobs",
            queue.completed.load(Ordering::SeqCst)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_fifo_order_without_overlap() {
        let queue = WriteQueue::start();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..5u64 {
            let log = log.clone();
            receivers.push(queue.enqueue(async move {
                log.lock().push(format!("start {i}"));
                // Earlier jobs sleep longer; they must still finish first
                tokio::time::sleep(Duration::from_millis(25 - i * 5)).await;
                log.lock().push(format!("end {i}"));
                i
            }));
        }

        let mut outputs = Vec::new();
        for rx in receivers {
            outputs.push(rx.await.unwrap());
        }
        assert_eq!(outputs, vec![0, 1, 2, 3, 4]);

        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("start {i}"), format!("end {i}")])
            .collect();
        assert_eq!(*log.lock(), expected);
        assert_eq!(queue.completed(), 5);
    }

    #[tokio::test]
    async fn test_busy_flag_tracks_outstanding_jobs() {
        let queue = WriteQueue::start();
        assert!(!queue.is_busy());

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let done = queue.enqueue(async move {
            let _ = release_rx.await;
        });
        assert!(queue.is_busy());

        release_tx.send(()).unwrap();
        done.await.unwrap();
        assert!(!queue.is_busy());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let queue = WriteQueue::start();
        let first = queue.enqueue(async { 1 });
        queue.shutdown();

        assert_eq!(first.await.unwrap(), 1);
        let rejected = queue.enqueue(async { 2 });
        assert!(rejected.await.is_err());
        assert!(queue.is_shut_down());
    }
}
