//! Task manager: the persisted FIFO queues and their workers.
//!
//! The manager keeps two queues in memory, one per [`Lane`], and mirrors
//! persistent definitions into a single [`TaskStore`]. Sequence numbers are
//! shared across lanes so they stay unique store keys. Within a lane only
//! the head runs, and only one spool per lane is active at a time. A spool
//! executes the head on a private copy, then applies the outcome according
//! to [`TaskError::disposition`]:
//!
//! | disposition | outgoing lane | incoming lane |
//! |---|---|---|
//! | success | removed, handle resolves `Ok` | same |
//! | fatal | removed, handle resolves with the error | same |
//! | precondition | kept interrupted at the head when `retry` is set | removed with the error |
//! | retryable | retried after backoff while the policy allows it | same |
//!
//! An interrupted outgoing head stops its lane until the next spool. A
//! failed incoming task is not kept: the relay or the mediator delivers it
//! again on the next connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use task_core::{
    decode_task, encode_task, AccessState, Lane, QueuedTask, RetryPolicy, TaskDefinition,
    TaskQueue, TaskState,
};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::access::AccessCoordinator;
use crate::context::TaskContext;
use crate::error::{Disposition, ManagerError, TaskError, TransactionError};
use crate::execution::ExecuteTask;
use crate::store::TaskStore;

type Completion = oneshot::Sender<Result<(), TaskError>>;

/// Awaitable completion of an enqueued task.
#[derive(Debug)]
pub struct TaskHandle {
    seq: u64,
    rx: oneshot::Receiver<Result<(), TaskError>>,
}

impl TaskHandle {
    /// Queue sequence number of the task.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait for the task to complete.
    ///
    /// Resolves to [`TaskError::Removed`] if the task left the queue without
    /// running to completion.
    pub async fn wait(self) -> Result<(), TaskError> {
        self.rx.await.unwrap_or(Err(TaskError::Removed))
    }
}

struct LaneQueue {
    queue: Mutex<TaskQueue>,
    running: Mutex<()>,
}

impl LaneQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(TaskQueue::new(capacity)),
            running: Mutex::new(()),
        }
    }
}

/// Persisted FIFO task queues, one executor per lane.
pub struct TaskManager {
    incoming: LaneQueue,
    outgoing: LaneQueue,
    /// Next sequence number; `None` until [`TaskManager::load`] ran.
    next_seq: Mutex<Option<u64>>,
    capacity: usize,
    store: Arc<dyn TaskStore>,
    context: TaskContext,
    policy: RetryPolicy,
    completions: StdMutex<HashMap<u64, Completion>>,
    notify: Notify,
    access: Option<Arc<AccessCoordinator>>,
}

impl TaskManager {
    /// Create a manager with empty queues.
    ///
    /// Nothing can be enqueued before [`TaskManager::load`].
    pub fn new(
        context: TaskContext,
        store: Arc<dyn TaskStore>,
        policy: RetryPolicy,
        capacity: usize,
    ) -> Self {
        Self {
            incoming: LaneQueue::new(capacity),
            outgoing: LaneQueue::new(capacity),
            next_seq: Mutex::new(None),
            capacity,
            store,
            context,
            policy,
            completions: StdMutex::new(HashMap::new()),
            notify: Notify::new(),
            access: None,
        }
    }

    /// Only spool while the coordinator grants access.
    pub fn with_access(mut self, access: Arc<AccessCoordinator>) -> Self {
        self.access = Some(access);
        self
    }

    /// Rebuild the queues from the store.
    ///
    /// Call once at startup. Records that fail to decode are logged and
    /// deleted; the rest load in sequence order, each into its lane. New
    /// tasks continue after the highest sequence number in the store.
    pub async fn load(&self) -> Result<usize, ManagerError> {
        let mut next_seq = self.next_seq.lock().await;
        let records = self.store.load_all().await?;
        let last_seq = records.iter().map(|record| record.seq).max().unwrap_or(0);
        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();

        for record in records {
            match decode_task(&record.payload) {
                Ok(definition) => {
                    let task = QueuedTask {
                        seq: record.seq,
                        definition,
                    };
                    match Lane::of(&task.definition) {
                        Lane::Incoming => incoming.push(task),
                        Lane::Outgoing => outgoing.push(task),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Removing corrupt task record {} ({}): {}",
                        record.seq,
                        record.kind,
                        e
                    );
                    self.store.remove(record.seq).await?;
                }
            }
        }

        let count = incoming.len() + outgoing.len();
        *self.incoming.queue.lock().await = TaskQueue::restore(self.capacity, incoming);
        *self.outgoing.queue.lock().await = TaskQueue::restore(self.capacity, outgoing);
        *next_seq = Some(last_seq + 1);
        tracing::info!("Loaded {} persisted tasks", count);

        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }

    /// Append a task to its lane and wake the worker.
    pub async fn enqueue(&self, definition: TaskDefinition) -> Result<TaskHandle, ManagerError> {
        let payload = if definition.meta.is_persistent {
            Some(encode_task(&definition)?)
        } else {
            None
        };
        let kind = definition.discriminant();
        let name = definition.to_string();
        let lane = Lane::of(&definition);
        let (tx, rx) = oneshot::channel();

        let seq = {
            let mut next_seq = self.next_seq.lock().await;
            let seq = next_seq.ok_or(ManagerError::NotLoaded)?;
            let mut queue = self.lane(lane).queue.lock().await;
            queue.push(seq, definition)?;
            if let Some(payload) = payload {
                if let Err(e) = self.store.append(seq, kind, &payload).await {
                    queue.remove(seq);
                    return Err(e.into());
                }
            }
            *next_seq = Some(seq + 1);
            self.completions_lock().insert(seq, tx);
            seq
        };

        tracing::info!("Task {} enqueued (seq {}, {})", name, seq, lane);
        self.notify.notify_one();
        Ok(TaskHandle { seq, rx })
    }

    /// Run both lanes until each is empty or blocked on a precondition.
    ///
    /// A lane that another spool is already running is left alone. Returns
    /// immediately if access is denied.
    pub async fn spool(&self) -> Result<(), ManagerError> {
        if let Some(access) = &self.access {
            if access.state() != AccessState::Using
                && access.request_access().await != AccessState::Using
            {
                tracing::debug!("Access not granted; queue stays idle");
                return Ok(());
            }
        }

        let (incoming, outgoing) = tokio::join!(
            self.spool_lane(Lane::Incoming),
            self.spool_lane(Lane::Outgoing)
        );
        incoming.and(outgoing)
    }

    async fn spool_lane(&self, lane: Lane) -> Result<(), ManagerError> {
        let Ok(_running) = self.lane(lane).running.try_lock() else {
            return Ok(());
        };

        loop {
            let Some(QueuedTask {
                seq,
                mut definition,
            }) = self.begin_head(lane).await?
            else {
                break;
            };

            tracing::info!("Task {} execute", definition);
            let error = match definition.execute(&self.context).await {
                Ok(()) => {
                    tracing::info!("Task {} done", definition);
                    self.finish(lane, seq, &definition, Ok(())).await?;
                    continue;
                }
                Err(error) => error,
            };

            match error.disposition() {
                Disposition::Success => {
                    if matches!(error, TaskError::Transaction(TransactionError::ShouldSkip)) {
                        tracing::info!("Task {} skipped", definition);
                    } else {
                        tracing::info!("Task {} dropped", definition);
                    }
                    self.finish(lane, seq, &definition, Ok(())).await?;
                }
                Disposition::Precondition if lane == Lane::Outgoing && definition.meta.retry => {
                    tracing::warn!("Task {} interrupted: {}", definition, error);
                    definition.meta.state = TaskState::Interrupted;
                    self.write_back(lane, seq, &definition).await?;
                    break;
                }
                Disposition::Retryable if self.policy.should_retry(&definition.meta) => {
                    definition.meta.retry_count += 1;
                    definition.meta.state = TaskState::Pending;
                    self.write_back(lane, seq, &definition).await?;

                    let delay = self.policy.delay_for(definition.meta.retry_count);
                    tracing::warn!(
                        "Task {} retry {}/{} in {:?}: {}",
                        definition,
                        definition.meta.retry_count,
                        self.policy.max_retries,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
                Disposition::Fatal | Disposition::Precondition | Disposition::Retryable => {
                    if lane == Lane::Incoming {
                        tracing::warn!(
                            "Task {} failed, left for the next connection: {}",
                            definition,
                            error
                        );
                    } else {
                        tracing::error!("Task {} failed: {}", definition, error);
                    }
                    definition.meta.state = TaskState::Failed;
                    self.finish(lane, seq, &definition, Err(error)).await?;
                }
            }
        }
        Ok(())
    }

    /// Wake the worker, e.g. after a reconnect.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Spawn the worker loop: spool, then sleep until woken.
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.spool().await {
                    tracing::error!("Task queue spool failed: {}", e);
                }
                self.notify.notified().await;
            }
        })
    }

    /// Mark the executing head of a lane interrupted so it reruns on the
    /// next spool.
    pub async fn interrupt(&self, lane: Lane) -> Result<Option<u64>, ManagerError> {
        let mut queue = self.lane(lane).queue.lock().await;
        let Some(seq) = queue.interrupt() else {
            return Ok(None);
        };
        if let Some(head) = queue.front() {
            if head.definition.meta.is_persistent {
                self.store
                    .update(seq, &encode_task(&head.definition)?)
                    .await?;
            }
        }
        tracing::info!("Task queue interrupted at seq {} ({})", seq, lane);
        Ok(Some(seq))
    }

    /// Remove every task. Pending handles resolve to [`TaskError::Removed`].
    pub async fn remove_all(&self) -> Result<usize, ManagerError> {
        let mut removed = 0;
        for lane in Lane::ALL {
            removed += self.lane(lane).queue.lock().await.drain().len();
        }
        self.store.clear().await?;
        self.completions_lock().clear();
        tracing::info!("Removed {} queued tasks", removed);
        Ok(removed)
    }

    /// Number of queued tasks across both lanes.
    pub async fn len(&self) -> usize {
        self.incoming.queue.lock().await.len() + self.outgoing.queue.lock().await.len()
    }

    /// Whether both lanes are empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Definitions of one lane in execution order.
    pub async fn snapshot(&self, lane: Lane) -> Vec<QueuedTask> {
        self.lane(lane).queue.lock().await.iter().cloned().collect()
    }

    fn lane(&self, lane: Lane) -> &LaneQueue {
        match lane {
            Lane::Incoming => &self.incoming,
            Lane::Outgoing => &self.outgoing,
        }
    }

    /// Mark the head executing, in memory and in the store.
    async fn begin_head(&self, lane: Lane) -> Result<Option<QueuedTask>, ManagerError> {
        let Some(head) = self.lane(lane).queue.lock().await.begin_head() else {
            return Ok(None);
        };
        if head.definition.meta.is_persistent {
            self.store
                .update(head.seq, &encode_task(&head.definition)?)
                .await?;
        }
        Ok(Some(head))
    }

    async fn write_back(
        &self,
        lane: Lane,
        seq: u64,
        definition: &TaskDefinition,
    ) -> Result<(), ManagerError> {
        if !self.lane(lane).queue.lock().await.update(seq, definition.clone()) {
            return Ok(());
        }
        if definition.meta.is_persistent {
            self.store.update(seq, &encode_task(definition)?).await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        lane: Lane,
        seq: u64,
        definition: &TaskDefinition,
        result: Result<(), TaskError>,
    ) -> Result<(), ManagerError> {
        self.lane(lane).queue.lock().await.remove(seq);
        if definition.meta.is_persistent {
            self.store.remove(seq).await?;
        }
        if let Some(tx) = self.completions_lock().remove(&seq) {
            let _ = tx.send(result);
        }
        Ok(())
    }

    fn completions_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Completion>> {
        self.completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
