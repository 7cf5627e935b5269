//! Single-lane FIFO task executor with nested-enqueue deadlock detection
//! (spec §4.7).
//!
//! Structurally this is the teacher's `ResourceActor`/`ResourceClient` pair
//! (framework/core.rs) generalized one step further: instead of an actor
//! that only understands CRUD-on-an-entity messages, `Queue` runs one
//! opaque boxed async closure at a time, handing each a
//! `tokio_util::sync::CancellationToken` derived from the queue-wide
//! controller, and replying over a `oneshot` channel exactly like
//! `ResourceClient`'s request/response round trip.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::any_value::{self, AnyValue};
use crate::clock::now_millis;
use crate::error::FrameworkError;
use crate::event::EventManager;
use crate::id::{id, Id};

tokio::task_local! {
    /// Ids of queues whose background loop is currently executing *on this
    /// task* — ambient marker for nested self-enqueue detection (spec §4.7,
    /// §5 "Cycle & deadlock safety"). Distinct from [`crate::event`]'s
    /// emission stack but built the same way: a `RefCell` inside a
    /// `task_local!`, sound because only the owning task ever touches it.
    static RUNNING_QUEUES: RefCell<HashSet<Id>>;
}

fn is_running_on_this_task(queue_id: &Id) -> bool {
    RUNNING_QUEUES
        .try_with(|set| set.borrow().contains(queue_id))
        .unwrap_or(false)
}

/// Runs `body` with `queue_id` marked as "currently executing on this task"
/// for the duration, so a task spawned *from inside* `body` that calls
/// `run` on the same queue is detected as a deadlock.
async fn with_running_marker<F, R>(queue_id: Id, body: F) -> R
where
    F: std::future::Future<Output = R>,
{
    let mut set = RUNNING_QUEUES.try_with(|s| s.borrow().clone()).unwrap_or_default();
    set.insert(queue_id);
    RUNNING_QUEUES.scope(RefCell::new(set), body).await
}

/// Telemetry emitted on a queue's own local bus (spec §4.7: "not the global
/// EventManager"). Carries the same shape regardless of kind; `error` is
/// only populated for the `Error` kind.
#[derive(Clone, Debug)]
pub struct QueueLifecycleEvent {
    pub queue_id: Id,
    pub kind: QueueLifecycleKind,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueLifecycleKind {
    Enqueue,
    Start,
    Finish,
    Error,
    Cancel,
    Disposed,
}

type Job = Box<dyn FnOnce(CancellationToken) -> crate::event::BoxFuture<'static, Result<AnyValue, FrameworkError>> + Send>;

struct Envelope {
    job: Job,
    reply: oneshot::Sender<Result<AnyValue, FrameworkError>>,
}

/// A single-lane FIFO executor. Tasks submitted with [`Queue::run`] execute
/// strictly in submission order; the next starts only once the previous has
/// settled (spec §5 "Queue executes tasks in strict FIFO").
pub struct Queue {
    id: Id,
    sender: mpsc::UnboundedSender<Envelope>,
    cancellation: CancellationToken,
    disposed: Arc<AtomicBool>,
    events: Arc<EventManager<QueueLifecycleEvent>>,
    worker: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Queue {
    pub fn new(queue_id: impl AsRef<str>) -> Self {
        let queue_id = id(queue_id);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();
        let cancellation = CancellationToken::new();
        let events: Arc<EventManager<QueueLifecycleEvent>> = Arc::new(EventManager::new());
        let disposed = Arc::new(AtomicBool::new(false));

        let worker_id = queue_id.clone();
        let worker_cancellation = cancellation.clone();
        let worker_events = events.clone();
        let handle = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let start_event = QueueLifecycleEvent {
                    queue_id: worker_id.clone(),
                    kind: QueueLifecycleKind::Start,
                    timestamp: now_millis(),
                };
                let _ = worker_events
                    .emit(&id(format!("{worker_id}.start")), start_event, worker_id.clone(), false, now_millis())
                    .await;

                let cancelled_before = worker_cancellation.is_cancelled();
                let result = with_running_marker(worker_id.clone(), (envelope.job)(worker_cancellation.clone())).await;

                let kind = match (&result, cancelled_before) {
                    (_, true) => QueueLifecycleKind::Cancel,
                    (Ok(_), false) => QueueLifecycleKind::Finish,
                    (Err(_), false) => QueueLifecycleKind::Error,
                };
                let lifecycle = QueueLifecycleEvent {
                    queue_id: worker_id.clone(),
                    kind,
                    timestamp: now_millis(),
                };
                let _ = worker_events
                    .emit(&id(format!("{worker_id}.{kind:?}")), lifecycle, worker_id.clone(), false, now_millis())
                    .await;

                let _ = envelope.reply.send(result);
            }
        });

        Self {
            id: queue_id,
            sender,
            cancellation,
            disposed,
            events,
            worker: SyncMutex::new(Some(handle)),
        }
    }

    pub fn events(&self) -> &Arc<EventManager<QueueLifecycleEvent>> {
        &self.events
    }

    /// Runs `task` on this queue once every task ahead of it has settled.
    /// Returns `DeadlockError` *synchronously*, without enqueuing anything,
    /// if called from inside a task this same queue is currently running
    /// (spec §4.7, §8 scenario 6).
    pub async fn run<F, Fut, T>(&self, task: F) -> Result<T, FrameworkError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, FrameworkError>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        if is_running_on_this_task(&self.id) {
            return Err(FrameworkError::Deadlock(self.id.clone()));
        }
        if self.disposed.load(Ordering::SeqCst) {
            return Err(FrameworkError::Disposed(self.id.clone()));
        }

        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move |token| Box::pin(async move { task(token).await.map(any_value::boxed) }));
        let queue_id = self.id.clone();
        let _ = self
            .events
            .emit(
                &id(format!("{queue_id}.enqueue")),
                QueueLifecycleEvent {
                    queue_id: queue_id.clone(),
                    kind: QueueLifecycleKind::Enqueue,
                    timestamp: now_millis(),
                },
                queue_id.clone(),
                false,
                now_millis(),
            )
            .await;

        self.sender
            .send(Envelope { job, reply })
            .map_err(|_| FrameworkError::Disposed(self.id.clone()))?;

        let boxed = response.await.map_err(|_| FrameworkError::Disposed(self.id.clone()))??;
        let typed = any_value::downcast::<T>(&boxed, &self.id)?;
        // `boxed` was freshly created from this single `run` call and
        // nothing else holds a reference, so the Arc always has exactly one
        // owner here.
        Arc::try_unwrap(typed).map_err(|_| {
            FrameworkError::ContractViolation(self.id.clone(), "queue task result was unexpectedly shared".into())
        })
    }

    /// Disposes the queue. With `cancel: true`, the shared cancellation
    /// token fires, so any in-flight task observing it can cooperatively
    /// stop; without it, in-flight work runs to completion (spec §5
    /// "Disposal is graceful"). Either way, further `run` calls reject with
    /// `DisposedError` and the worker task is asked to shut down once
    /// the channel drains.
    pub async fn dispose(&self, cancel: bool) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if cancel {
            self.cancellation.cancel();
        }
        let _ = self
            .events
            .emit(
                &id(format!("{}.disposed", self.id)),
                QueueLifecycleEvent {
                    queue_id: self.id.clone(),
                    kind: QueueLifecycleKind::Disposed,
                    timestamp: now_millis(),
                },
                self.id.clone(),
                false,
                now_millis(),
            )
            .await;
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}
