//! Serialized task queue
//!
//! Many UI-side callers share one worker channel. Submissions never block;
//! a single dispatcher task forwards them to the worker strictly in
//! submission order, one at a time, and hands each outcome back to its own
//! submitter only.

use crate::channel::WorkerChannel;
use crate::error::QueueError;
use crate::protocol::WorkerRequest;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, info, warn};

pub type TaskId = u64;

type Outcome = Result<Value, QueueError>;

struct Task {
    id: TaskId,
    operation: String,
    params: Vec<Value>,
    completion: oneshot::Sender<Outcome>,
}

impl Task {
    /// Consumes the task, so a completion fires at most once.
    fn complete(self, outcome: Outcome) {
        if self.completion.send(outcome).is_err() {
            debug!(task_id = self.id, operation = %self.operation, "Submitter dropped its completion");
        }
    }
}

struct QueueState {
    pending: VecDeque<Task>,
    accepting: bool,
    next_id: TaskId,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    in_flight: watch::Sender<Option<TaskId>>,
    channel: Arc<dyn WorkerChannel>,
}

/// Handle to the queue. Cheap to clone; every clone submits into the same
/// ordered stream.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

/// Result of [`TaskQueue::drain_and_stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Pending tasks completed with [`QueueError::Stopped`].
    pub discarded: usize,
    /// Task that was running against the worker when draining began.
    pub in_flight: Option<TaskId>,
    /// False when the in-flight task outlived the drain timeout.
    pub in_flight_finished: bool,
}

/// Resolves exactly once with the outcome of one submission.
pub struct Completion {
    task_id: Option<TaskId>,
    receiver: oneshot::Receiver<Outcome>,
}

impl Completion {
    /// `None` when the submission was refused without being queued.
    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the queue went away without running the task.
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Stopped)))
    }
}

impl TaskQueue {
    /// Start the dispatcher on the current tokio runtime.
    pub fn start(channel: Arc<dyn WorkerChannel>) -> Self {
        let (in_flight, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                accepting: true,
                next_id: 1,
            }),
            wake: Notify::new(),
            in_flight,
            channel,
        });

        tokio::spawn(dispatch_loop(shared.clone()));
        Self { shared }
    }

    /// Enqueue `operation` and return immediately.
    pub fn submit(&self, operation: impl Into<String>, params: Vec<Value>) -> Completion {
        let operation = operation.into();
        let (sender, receiver) = oneshot::channel();

        let task_id = {
            let mut state = self.shared.state.lock();
            if state.accepting {
                let id = state.next_id;
                state.next_id += 1;
                state.pending.push_back(Task {
                    id,
                    operation: operation.clone(),
                    params,
                    completion: sender,
                });
                Some(id)
            } else {
                let _ = sender.send(Err(QueueError::Stopped));
                None
            }
        };

        match task_id {
            Some(id) => {
                debug!(task_id = id, operation = %operation, "Task queued");
                self.shared.wake.notify_one();
            }
            None => debug!(operation = %operation, "Submission refused, queue stopped"),
        }

        Completion { task_id, receiver }
    }

    /// Callback flavour of [`submit`](Self::submit). `completion` runs exactly
    /// once on the tokio runtime.
    pub fn push<F>(&self, operation: impl Into<String>, params: Vec<Value>, completion: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let pending = self.submit(operation, params);
        tokio::spawn(async move {
            completion(pending.await);
        });
    }

    /// Refuse new submissions, fail everything not yet started, then wait
    /// up to `timeout` for the in-flight task.
    pub async fn drain_and_stop(&self, timeout: Duration) -> DrainReport {
        let (discarded, in_flight) = {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            let discarded: Vec<Task> = state.pending.drain(..).collect();
            (discarded, *self.shared.in_flight.borrow())
        };
        self.shared.wake.notify_one();

        let discarded_count = discarded.len();
        for task in discarded {
            task.complete(Err(QueueError::Stopped));
        }

        let started = Instant::now();
        let mut watcher = self.shared.in_flight.subscribe();
        let in_flight_finished = matches!(
            tokio::time::timeout(timeout, watcher.wait_for(Option::is_none)).await,
            Ok(Ok(_))
        );

        if in_flight_finished {
            info!(
                discarded = discarded_count,
                in_flight = ?in_flight,
                waited_ms = started.elapsed().as_millis() as u64,
                "Task queue drained"
            );
        } else {
            warn!(
                discarded = discarded_count,
                in_flight = ?in_flight,
                timeout_ms = timeout.as_millis() as u64,
                "In-flight task did not finish before drain timeout"
            );
        }

        DrainReport {
            discarded: discarded_count,
            in_flight,
            in_flight_finished,
        }
    }

    /// Close the worker channel's request direction. Only meaningful once
    /// the queue has been drained.
    pub async fn close_channel(&self) {
        self.shared.channel.close().await;
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn in_flight(&self) -> Option<TaskId> {
        *self.shared.in_flight.borrow()
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut state = shared.state.lock();
            match state.pending.pop_front() {
                Some(task) => {
                    // Published under the lock so a concurrent drain either
                    // sees this task in flight or sees it still pending.
                    shared.in_flight.send_replace(Some(task.id));
                    Some(task)
                }
                None if !state.accepting => break,
                None => None,
            }
        };

        let Some(mut task) = next else {
            shared.wake.notified().await;
            continue;
        };

        let started = Instant::now();
        let request = WorkerRequest {
            id: task.id,
            operation: task.operation.clone(),
            params: std::mem::take(&mut task.params),
        };
        debug!(task_id = task.id, operation = %task.operation, "Dispatching task");

        let outcome = shared
            .channel
            .call(request)
            .await
            .map_err(|err| QueueError::from_channel(&task.operation, err));

        match &outcome {
            Ok(_) => debug!(
                task_id = task.id,
                operation = %task.operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            ),
            Err(err) => warn!(
                task_id = task.id,
                operation = %task.operation,
                error = %err,
                "Task failed"
            ),
        }

        task.complete(outcome);
        shared.in_flight.send_replace(None);
    }

    debug!("Task queue dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingChannel {
        seen: Mutex<Vec<String>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        delay: Duration,
        closed: AtomicUsize,
    }

    impl RecordingChannel {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl WorkerChannel for RecordingChannel {
        async fn call(&self, request: WorkerRequest) -> Result<Value, ChannelError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().push(request.operation.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if request.operation.starts_with("fail") {
                Err(ChannelError::Rejected(format!("{} rejected", request.operation)))
            } else {
                Ok(json!({ "op": request.operation, "params": request.params }))
            }
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn failing_task_does_not_disturb_neighbours() {
        let channel = Arc::new(RecordingChannel::default());
        let queue = TaskQueue::start(channel.clone());

        let first = queue.submit("op1", vec![]);
        let second = queue.submit("fail-op2", vec![]);
        let third = queue.submit("op3", vec![json!(3)]);

        assert_eq!(first.await.unwrap()["op"], "op1");
        assert!(matches!(second.await, Err(QueueError::Operation { .. })));
        assert_eq!(third.await.unwrap()["params"], json!([3]));

        // still usable afterwards
        assert_eq!(queue.submit("op4", vec![]).await.unwrap()["op"], "op4");
        assert_eq!(channel.seen(), vec!["op1", "fail-op2", "op3", "op4"]);
    }

    #[tokio::test]
    async fn never_more_than_one_in_flight() {
        let channel = Arc::new(RecordingChannel::with_delay(Duration::from_millis(2)));
        let queue = TaskQueue::start(channel.clone());

        let completions: Vec<_> = (0..20)
            .map(|i| queue.submit(format!("op{i}"), vec![]))
            .collect();
        for completion in completions {
            completion.await.unwrap();
        }

        assert_eq!(channel.max_active.load(Ordering::SeqCst), 1);
        let expected: Vec<String> = (0..20).map(|i| format!("op{i}")).collect();
        assert_eq!(channel.seen(), expected);
    }

    #[tokio::test]
    async fn push_invokes_callback_once() {
        let channel = Arc::new(RecordingChannel::default());
        let queue = TaskQueue::start(channel);
        let (tx, rx) = oneshot::channel();

        queue.push("fetchWalletBalance", vec![], move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap()["op"], "fetchWalletBalance");
    }

    #[tokio::test]
    async fn drain_discards_pending_and_waits_for_in_flight() {
        let channel = Arc::new(RecordingChannel::with_delay(Duration::from_millis(100)));
        let queue = TaskQueue::start(channel.clone());

        let running = queue.submit("op1", vec![]);
        let queued = queue.submit("op2", vec![]);
        // let the dispatcher pick op1 up
        let mut watcher = queue.shared.in_flight.subscribe();
        watcher.wait_for(Option::is_some).await.unwrap();

        let report = queue.drain_and_stop(Duration::from_secs(2)).await;
        assert_eq!(report.discarded, 1);
        assert_eq!(report.in_flight, running.task_id());
        assert!(report.in_flight_finished);

        assert!(running.await.is_ok());
        assert_eq!(queued.await, Err(QueueError::Stopped));
        assert_eq!(queue.submit("op3", vec![]).await, Err(QueueError::Stopped));
        assert_eq!(channel.seen(), vec!["op1"]);
    }

    #[tokio::test]
    async fn drain_times_out_on_slow_task() {
        let channel = Arc::new(RecordingChannel::with_delay(Duration::from_millis(500)));
        let queue = TaskQueue::start(channel);

        let slow = queue.submit("op1", vec![]);
        let mut watcher = queue.shared.in_flight.subscribe();
        watcher.wait_for(Option::is_some).await.unwrap();

        let report = queue.drain_and_stop(Duration::from_millis(20)).await;
        assert!(!report.in_flight_finished);
        // the task itself still runs to completion
        assert!(slow.await.is_ok());
    }

    #[tokio::test]
    async fn refused_submission_has_no_task_id() {
        let channel = Arc::new(RecordingChannel::default());
        let queue = TaskQueue::start(channel.clone());
        queue.drain_and_stop(Duration::from_millis(10)).await;

        let refused = queue.submit("op1", vec![]);
        assert_eq!(refused.task_id(), None);
        assert_eq!(refused.await, Err(QueueError::Stopped));
        assert!(!queue.is_accepting());

        queue.close_channel().await;
        assert_eq!(channel.closed.load(Ordering::SeqCst), 1);
    }
}
