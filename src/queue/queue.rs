//! Request Queue
//!
//! Bounded-concurrency, rate-windowed task queue. Higher priorities start
//! first, FIFO within a priority. Ordering and limits are decided under one
//! mutex; admitted tasks run as spawned tokio tasks holding a slot guard that
//! frees the slot and admits the next task when dropped.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::error::{ApiError, Result};
use crate::queue::QueueConfig;
use crate::retry::with_timeout;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

// == Queue Stats ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Tasks waiting to start
    pub size: usize,
    /// Tasks running
    pub pending: usize,
    pub is_paused: bool,
}

// == Queue State ==
#[derive(Default)]
struct QueueState {
    buckets: BTreeMap<i32, VecDeque<Job>>,
    size: usize,
    active: usize,
    paused: bool,
    window_started: Option<Instant>,
    window_count: usize,
    window_timer_armed: bool,
}

impl QueueState {
    fn push(&mut self, priority: i32, job: Job) {
        self.buckets.entry(priority).or_default().push_back(job);
        self.size += 1;
    }

    fn pop_next(&mut self) -> Option<Job> {
        let mut bucket = self.buckets.last_entry()?;
        let job = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        if job.is_some() {
            self.size -= 1;
        }
        job
    }

    fn is_idle(&self) -> bool {
        self.size == 0 && self.active == 0
    }
}

struct QueueInner {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    idle: Notify,
}

impl QueueInner {
    /// Starts as many waiting tasks as the limits allow.
    fn dispatch(self: &Arc<Self>) {
        let mut admitted = Vec::new();
        let mut window_deadline = None;

        {
            let mut state = self.state.lock();
            while !state.paused && state.active < self.config.concurrency && state.size > 0 {
                if let Some(interval) = self.config.interval() {
                    let now = Instant::now();
                    let window_over = state
                        .window_started
                        .map_or(true, |started| now.duration_since(started) >= interval);
                    if window_over {
                        state.window_started = Some(now);
                        state.window_count = 0;
                    }

                    if state.window_count >= self.config.interval_cap {
                        if !state.window_timer_armed {
                            state.window_timer_armed = true;
                            window_deadline =
                                state.window_started.map(|started| started + interval);
                        }
                        break;
                    }
                    state.window_count += 1;
                }

                let Some(job) = state.pop_next() else {
                    break;
                };
                state.active += 1;
                admitted.push(job);
            }
        }

        for job in admitted {
            let slot = SlotGuard(Arc::clone(self));
            tokio::spawn(async move {
                let _slot = slot;
                job().await;
            });
        }

        if let Some(deadline) = window_deadline {
            debug!("{} queue hit its interval cap, waiting for next window", self.name);
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                sleep_until(deadline).await;
                inner.state.lock().window_timer_armed = false;
                inner.dispatch();
            });
        }
    }

    fn notify_if_idle(&self) {
        if self.state.lock().is_idle() {
            self.idle.notify_waiters();
        }
    }
}

/// Held by a running task; releases its slot on completion, failure or panic.
struct SlotGuard(Arc<QueueInner>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.state.lock().active -= 1;
        self.0.dispatch();
        self.0.notify_if_idle();
    }
}

// == Request Queue ==
/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                config: config.normalized(),
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn enqueue<T, F, Fut>(&self, operation: F, priority: i32) -> oneshot::Receiver<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let timeout = self.inner.config.task_timeout();
        let name = self.inner.name.clone();

        let job: Job = Box::new(move || {
            async move {
                let run = async move {
                    match timeout {
                        Some(timeout) => with_timeout(operation(), timeout).await,
                        None => operation().await,
                    }
                };
                let result = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        error!("{} queue task panicked", name);
                        Err(ApiError::Internal(format!("{} queue task panicked", name)))
                    }
                };
                // The caller may have stopped waiting.
                let _ = tx.send(result);
            }
            .boxed()
        });

        self.inner.state.lock().push(priority, job);
        self.inner.dispatch();
        rx
    }

    fn outcome<T>(
        name: &str,
        received: std::result::Result<Result<T>, oneshot::error::RecvError>,
    ) -> Result<T> {
        received.unwrap_or_else(|_| {
            Err(ApiError::ServiceUnavailable(format!(
                "{} queue was cleared before the task started",
                name
            )))
        })
    }

    // == Add ==
    /// Queues `operation` immediately; the returned future resolves with its
    /// result, its error, or a timeout error.
    pub fn add<T, F, Fut>(
        &self,
        operation: F,
        priority: i32,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let rx = self.enqueue(operation, priority);
        let name = self.inner.name.clone();
        async move { Self::outcome(&name, rx.await) }
    }

    // == Add All ==
    /// Queues every operation at `priority` and resolves with the results in
    /// input order, or the first error encountered in that order.
    pub fn add_all<T, F, Fut, I>(
        &self,
        operations: I,
        priority: i32,
    ) -> impl Future<Output = Result<Vec<T>>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let receivers: Vec<_> = operations
            .into_iter()
            .map(|operation| self.enqueue(operation, priority))
            .collect();
        let name = self.inner.name.clone();

        async move {
            let mut results = Vec::with_capacity(receivers.len());
            for rx in receivers {
                results.push(Self::outcome(&name, rx.await)?);
            }
            Ok(results)
        }
    }

    // == Introspection ==
    /// Tasks waiting to start.
    pub fn size(&self) -> usize {
        self.inner.state.lock().size
    }

    /// Tasks currently running.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            size: state.size,
            pending: state.active,
            is_paused: state.paused,
        }
    }

    // == Control ==
    /// Stops starting new tasks. Running tasks are unaffected.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        info!("{} queue paused", self.inner.name);
    }

    pub fn start(&self) {
        self.inner.state.lock().paused = false;
        info!("{} queue resumed", self.inner.name);
        self.inner.dispatch();
    }

    /// Drops every task not yet started; their callers get
    /// `ServiceUnavailable`.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            let dropped = std::mem::take(&mut state.buckets);
            let count = state.size;
            state.size = 0;
            if count > 0 {
                info!("{} queue cleared {} waiting tasks", self.inner.name, count);
            }
            dropped
        };
        drop(dropped);
        self.inner.notify_if_idle();
    }

    /// Resolves once nothing is waiting or running.
    pub async fn on_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;
    use tokio_test::{assert_pending, assert_ready};

    fn unlimited(concurrency: usize) -> QueueConfig {
        QueueConfig {
            concurrency,
            interval_ms: 0,
            interval_cap: 1,
            task_timeout_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let queue = RequestQueue::new("test", unlimited(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();

        queue.add_all(tasks, 0).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_one_over_concurrency_waits() {
        let queue = RequestQueue::new("test", unlimited(2));
        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let tasks: Vec<_> = (0..3)
            .map(|n| {
                let mut release = release_tx.subscribe();
                queue.add(
                    move || async move {
                        let _ = release.recv().await;
                        Ok(n)
                    },
                    0,
                )
            })
            .collect();

        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.size(), 1);

        release_tx.send(()).unwrap();
        let results: Vec<i32> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_cap_spaces_starts() {
        let queue = RequestQueue::new(
            "test",
            QueueConfig {
                concurrency: 10,
                interval_ms: 1000,
                interval_cap: 2,
                task_timeout_ms: 0,
            },
        );
        let origin = Instant::now();

        let tasks: Vec<_> = (0..5)
            .map(|_| move || async move { Ok(origin.elapsed()) })
            .collect();
        let started = queue.add_all(tasks, 0).await.unwrap();

        let windows: Vec<u128> = started.iter().map(|d| d.as_millis() / 1000).collect();
        assert_eq!(windows, vec![0, 0, 1, 1, 2]);
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let queue = RequestQueue::new("test", unlimited(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        queue.pause();

        let record = |label: &'static str| {
            let order = order.clone();
            move || async move {
                order.lock().push(label);
                Ok(())
            }
        };

        let low = queue.add(record("low"), 0);
        let high_a = queue.add(record("high-a"), 5);
        let mid = queue.add(record("mid"), 1);
        let high_b = queue.add(record("high-b"), 5);
        assert_eq!(queue.size(), 4);

        queue.start();
        let _ = tokio::join!(low, high_a, mid, high_b);

        assert_eq!(*order.lock(), vec!["high-a", "high-b", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_add_all_preserves_input_order() {
        let queue = RequestQueue::new("test", unlimited(3));

        let tasks: Vec<_> = [30u64, 10, 20]
            .into_iter()
            .map(|ms| move || async move {
                sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .collect();

        assert_eq!(queue.add_all(tasks, 0).await.unwrap(), vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_add_all_fails_on_first_error() {
        let queue = RequestQueue::new("test", unlimited(2));

        let tasks: Vec<_> = [1u32, 2, 3]
            .into_iter()
            .map(|n| move || async move {
                if n == 2 {
                    Err(ApiError::NotFound(format!("item {}", n)))
                } else {
                    Ok(n)
                }
            })
            .collect();

        let result = queue.add_all(tasks, 0).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_task_error_reaches_only_its_caller() {
        let queue = RequestQueue::new("test", unlimited(2));

        let failing = queue.add(
            || async { Err::<u32, _>(ApiError::UpstreamFetch("HTTP 500".to_string())) },
            0,
        );
        let fine = queue.add(|| async { Ok(7u32) }, 0);

        let (failing, fine) = tokio::join!(failing, fine);
        assert!(matches!(failing, Err(ApiError::UpstreamFetch(_))));
        assert_eq!(fine.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panicking_task_reports_internal_error() {
        let queue = RequestQueue::new("test", unlimited(1));

        let result = queue
            .add(
                || async {
                    let parsed: Option<u32> = None;
                    Ok(parsed.expect("parser blew up"))
                },
                0,
            )
            .await;
        match result {
            Err(ApiError::Internal(msg)) => assert!(msg.contains("panicked")),
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(queue.add(|| async { Ok(5u32) }, 0).await.unwrap(), 5);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_isolates_siblings() {
        let queue = RequestQueue::new(
            "test",
            QueueConfig {
                concurrency: 2,
                interval_ms: 0,
                interval_cap: 1,
                task_timeout_ms: 100,
            },
        );

        let slow = queue.add(
            || async {
                sleep(Duration::from_secs(5)).await;
                Ok(1u32)
            },
            0,
        );
        let quick = queue.add(|| async { Ok(2u32) }, 0);

        let (slow, quick) = tokio::join!(slow, quick);
        assert!(matches!(slow, Err(ApiError::Timeout(_))));
        assert_eq!(quick.unwrap(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_pause_holds_tasks() {
        let queue = RequestQueue::new("test", unlimited(2));
        queue.pause();
        assert!(queue.is_paused());

        let task = queue.add(|| async { Ok(()) }, 0);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.pending(), 0);

        queue.start();
        task.await.unwrap();
        assert!(!queue.is_paused());
    }

    #[tokio::test]
    async fn test_clear_rejects_waiting_callers() {
        let queue = RequestQueue::new("test", unlimited(1));
        queue.pause();

        let first = queue.add(|| async { Ok(1u32) }, 0);
        let second = queue.add(|| async { Ok(2u32) }, 3);
        queue.clear();

        assert_eq!(queue.size(), 0);
        assert!(matches!(first.await, Err(ApiError::ServiceUnavailable(_))));
        assert!(matches!(second.await, Err(ApiError::ServiceUnavailable(_))));
        queue.on_idle().await;
    }

    #[tokio::test]
    async fn test_on_idle_waits_for_running_tasks() {
        let queue = RequestQueue::new("test", unlimited(1));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let task = queue.add(
            move || async move {
                let _ = gate_rx.await;
                Ok(1u32)
            },
            0,
        );

        let mut idle = tokio_test::task::spawn(queue.on_idle());
        assert_pending!(idle.poll());
        assert_eq!(queue.stats().pending, 1);

        gate_tx.send(()).unwrap();
        assert_eq!(task.await.unwrap(), 1);
        sleep(Duration::from_millis(20)).await;

        assert!(idle.is_woken());
        assert_ready!(idle.poll());
    }

    #[tokio::test]
    async fn test_on_idle_ready_when_empty() {
        let queue = RequestQueue::new("test", QueueConfig::priority());
        let mut idle = tokio_test::task::spawn(queue.on_idle());
        assert_ready!(idle.poll());
    }
}
