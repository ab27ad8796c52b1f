//! Background execution of queries
//!
//! Work is submitted to a worker and its result is posted back to the
//! caller's [`CompletionQueue`], which the caller drains on its own thread.
//! A result whose queue is gone is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};

use super::context::QueryContext;

type Completion = Box<dyn FnOnce() + Send + 'static>;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Create a connected completion handle and queue
pub fn completion_queue() -> (CompletionHandle, CompletionQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionHandle { tx }, CompletionQueue { rx })
}

/// Posts completions to a [`CompletionQueue`] from any thread
#[derive(Clone)]
pub struct CompletionHandle {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionHandle {
    /// Post a completion. Returns false when the queue has been dropped.
    pub fn post(&self, completion: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(completion)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The caller-side end of the redelivery hop
pub struct CompletionQueue {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionQueue {
    /// Run every completion that has already arrived
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.rx.try_recv() {
            completion();
            ran += 1;
        }
        ran
    }

    /// Block until one completion arrives and run it. Must not be called
    /// from inside an async task.
    pub fn wait_one(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(completion) => {
                completion();
                true
            }
            None => false,
        }
    }

    /// Like [`wait_one`](Self::wait_one) but gives up after `timeout`
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.try_recv() {
                Ok(completion) => {
                    completion();
                    return true;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
                Err(mpsc::error::TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

/// Bounded worker pool on a tokio runtime.
///
/// Each job runs on the blocking pool; at most `max_in_flight` jobs run at
/// once and the rest wait for a permit.
#[derive(Clone)]
pub struct AsyncRunner {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl AsyncRunner {
    pub fn new(handle: Handle, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// A runner on the current tokio runtime, if there is one
    pub fn current(max_in_flight: usize) -> Option<Self> {
        Handle::try_current()
            .ok()
            .map(|handle| Self::new(handle, max_in_flight))
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job();
            })
            .await;
            if let Err(e) = joined {
                tracing::error!(error = %e, "Background query job failed");
            }
        });
    }
}

/// Run `job` off the calling thread and redeliver its result to `callback`
/// through the context's completion handle.
///
/// Uses the context's runner when it has one, otherwise one dedicated thread
/// per call.
pub(crate) fn dispatch<T, J, C>(ctx: &QueryContext, label: &'static str, job: J, callback: C)
where
    T: Send + 'static,
    J: FnOnce() -> T + Send + 'static,
    C: FnOnce(T) + Send + 'static,
{
    let completions = ctx.completions().cloned();
    let context = ctx.name().to_string();
    let work = move || {
        let result = job();
        match completions {
            Some(handle) => {
                if !handle.post(move || callback(result)) {
                    tracing::debug!(context = %context, label, "Completion queue gone, dropping result");
                }
            }
            None => tracing::debug!(context = %context, label, "No completion handle, dropping result"),
        }
    };

    match ctx.runner() {
        Some(runner) => runner.submit(work),
        None => {
            let spawned = std::thread::Builder::new()
                .name(format!("airquery-{}", label))
                .spawn(work);
            if let Err(e) = spawned {
                tracing::warn!(error = %e, label, "Could not start query worker thread");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_completion_queue_runs_on_pump() {
        let (handle, mut queue) = completion_queue();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            assert!(handle.post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pump(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_post_after_queue_dropped() {
        let (handle, queue) = completion_queue();
        drop(queue);
        assert!(handle.is_closed());
        assert!(!handle.post(|| {}));
    }

    #[test]
    fn test_runner_bounds_in_flight_jobs() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let runner = AsyncRunner::new(rt.handle().clone(), 2);
        let (handle, mut queue) = completion_queue();
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let handle = handle.clone();
            let peak = Arc::clone(&peak);
            let running = Arc::clone(&running);
            runner.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                handle.post(|| {});
            });
        }

        for _ in 0..6 {
            assert!(queue.wait_timeout(Duration::from_secs(5)));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(runner.max_in_flight(), 2);
    }
}
