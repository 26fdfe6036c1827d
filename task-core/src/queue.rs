//! FIFO task queues.
//!
//! Every task carries a sequence number assigned by its owner on enqueue.
//! The sequence number is the key in the persisted task store, so reloading
//! the store sorted by sequence restores the original order.
//!
//! Work is split into two lanes. Incoming tasks (messages from the relay or
//! a sibling device) never wait behind an outgoing task stuck on a
//! precondition, and the other way round. Within a lane only the head ever
//! runs. The manager in `task-client` marks it executing, runs it, then
//! either pops it or leaves it at the head for a retry.

use std::collections::VecDeque;

use crate::definition::{TaskDefinition, TaskState};

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is at capacity.
    Full {
        /// Queue capacity.
        capacity: usize,
    },
    /// Sequence number not above the current tail.
    OutOfOrder {
        /// Rejected sequence number.
        seq: u64,
        /// Sequence number of the tail.
        tail: u64,
    },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Full { capacity } => {
                write!(f, "task queue full (capacity: {})", capacity)
            }
            QueueError::OutOfOrder { seq, tail } => {
                write!(f, "sequence {} does not follow tail {}", seq, tail)
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Which queue a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Messages delivered by the relay or reflected by a sibling device.
    Incoming,
    /// Everything the user originates.
    Outgoing,
}

impl Lane {
    /// Both lanes.
    pub const ALL: [Lane; 2] = [Lane::Incoming, Lane::Outgoing];

    /// The lane a definition belongs to.
    pub fn of(definition: &TaskDefinition) -> Lane {
        if definition.kind.is_incoming() {
            Lane::Incoming
        } else {
            Lane::Outgoing
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Incoming => write!(f, "incoming"),
            Lane::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// A definition together with its queue position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    /// Sequence number assigned on enqueue.
    pub seq: u64,
    /// The task.
    pub definition: TaskDefinition,
}

/// Ordered queue of task definitions.
#[derive(Debug)]
pub struct TaskQueue {
    capacity: usize,
    items: VecDeque<QueuedTask>,
}

impl TaskQueue {
    /// Create an empty queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    /// Rebuild a queue from persisted tasks.
    ///
    /// Tasks are ordered by sequence number regardless of input order. Tasks
    /// that were executing when the process stopped come back `Interrupted`.
    pub fn restore(capacity: usize, mut tasks: Vec<QueuedTask>) -> Self {
        tasks.sort_by_key(|task| task.seq);
        tasks.dedup_by_key(|task| task.seq);
        for task in &mut tasks {
            if task.definition.meta.state == TaskState::Executing {
                task.definition.meta.state = TaskState::Interrupted;
            }
        }
        Self {
            capacity,
            items: tasks.into(),
        }
    }

    /// Append a task under `seq`, which must be above every queued one.
    pub fn push(&mut self, seq: u64, definition: TaskDefinition) -> Result<(), QueueError> {
        if self.items.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        if let Some(tail) = self.items.back() {
            if seq <= tail.seq {
                return Err(QueueError::OutOfOrder {
                    seq,
                    tail: tail.seq,
                });
            }
        }
        self.items.push_back(QueuedTask { seq, definition });
        Ok(())
    }

    /// The task that runs next.
    pub fn front(&self) -> Option<&QueuedTask> {
        self.items.front()
    }

    /// Mark the head executing and return a copy to run.
    ///
    /// The copy is what the execution mutates; write it back with
    /// [`TaskQueue::update`] once the run finishes.
    pub fn begin_head(&mut self) -> Option<QueuedTask> {
        let head = self.items.front_mut()?;
        head.definition.meta.state = TaskState::Executing;
        Some(head.clone())
    }

    /// Replace the definition of a queued task.
    ///
    /// Returns false if the task is no longer queued.
    pub fn update(&mut self, seq: u64, definition: TaskDefinition) -> bool {
        match self.items.iter_mut().find(|task| task.seq == seq) {
            Some(task) => {
                task.definition = definition;
                true
            }
            None => false,
        }
    }

    /// Remove a task by sequence number.
    pub fn remove(&mut self, seq: u64) -> Option<QueuedTask> {
        let index = self.items.iter().position(|task| task.seq == seq)?;
        self.items.remove(index)
    }

    /// Move an executing head to `Interrupted`.
    ///
    /// Returns the sequence number of the interrupted task.
    pub fn interrupt(&mut self) -> Option<u64> {
        let head = self.items.front_mut()?;
        if head.definition.meta.state != TaskState::Executing {
            return None;
        }
        head.definition.meta.state = TaskState::Interrupted;
        Some(head.seq)
    }

    /// Iterate in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedTask> {
        self.items.iter()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every task, returning them in order.
    pub fn drain(&mut self) -> Vec<QueuedTask> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DeleteContactSyncTask, ReceiveMessageTask, TaskKind};
    use task_types::{Identity, IncomingMessage, MessageId, Nonce};

    fn make_task(tag: &str) -> TaskDefinition {
        TaskDefinition::new(TaskKind::DeleteContactSync(DeleteContactSyncTask {
            contacts: vec![Identity::parse(tag).unwrap()],
        }))
    }

    fn contact_of(task: &QueuedTask) -> String {
        match &task.definition.kind {
            TaskKind::DeleteContactSync(t) => t.contacts[0].to_string(),
            _ => unreachable!(),
        }
    }

    fn filled(tags: &[&str]) -> TaskQueue {
        let mut queue = TaskQueue::new(10);
        for (seq, tag) in (1..).zip(tags) {
            queue.push(seq, make_task(tag)).unwrap();
        }
        queue
    }

    #[test]
    fn push_requires_increasing_sequence() {
        let mut queue = TaskQueue::new(10);
        queue.push(1, make_task("AAAAAAAA")).unwrap();
        queue.push(5, make_task("BBBBBBBB")).unwrap();
        assert_eq!(queue.len(), 2);

        let stale = queue.push(5, make_task("CCCCCCCC"));
        assert_eq!(stale, Err(QueueError::OutOfOrder { seq: 5, tail: 5 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn queue_respects_capacity() {
        let mut queue = TaskQueue::new(1);
        queue.push(1, make_task("AAAAAAAA")).unwrap();
        let overflow = queue.push(2, make_task("BBBBBBBB"));
        assert_eq!(overflow, Err(QueueError::Full { capacity: 1 }));
        assert_eq!(
            overflow.unwrap_err().to_string(),
            "task queue full (capacity: 1)"
        );
    }

    #[test]
    fn head_is_first_pushed() {
        let queue = filled(&["AAAAAAAA", "BBBBBBBB"]);
        assert_eq!(contact_of(queue.front().unwrap()), "AAAAAAAA");
    }

    #[test]
    fn lanes_split_incoming_work() {
        let receive = TaskDefinition::new(TaskKind::ReceiveMessage(ReceiveMessageTask {
            message: IncomingMessage {
                message_id: MessageId::random(),
                sender: Identity::parse("AAAAAAAA").unwrap(),
                receiver: Identity::parse("ECHOECHO").unwrap(),
                nonce: Nonce::random(),
                message_type: 0x01,
                payload: vec![],
                created_at: 0,
            },
        }));
        assert_eq!(Lane::of(&receive), Lane::Incoming);
        assert_eq!(Lane::of(&make_task("AAAAAAAA")), Lane::Outgoing);
        assert_eq!(Lane::Incoming.to_string(), "incoming");
    }

    #[test]
    fn begin_head_marks_executing() {
        let mut queue = filled(&["AAAAAAAA"]);

        let running = queue.begin_head().unwrap();
        assert_eq!(running.seq, 1);
        assert_eq!(running.definition.meta.state, TaskState::Executing);
        assert_eq!(
            queue.front().unwrap().definition.meta.state,
            TaskState::Executing
        );
    }

    #[test]
    fn update_writes_back_changes() {
        let mut queue = filled(&["AAAAAAAA"]);

        let mut running = queue.begin_head().unwrap();
        running.definition.meta.retry_count = 1;
        assert!(queue.update(1, running.definition));
        assert_eq!(queue.front().unwrap().definition.meta.retry_count, 1);

        assert!(!queue.update(100, make_task("BBBBBBBB")));
    }

    #[test]
    fn remove_by_sequence() {
        let mut queue = filled(&["AAAAAAAA", "BBBBBBBB"]);

        assert!(queue.remove(1).is_some());
        assert!(queue.remove(1).is_none());
        assert_eq!(contact_of(queue.front().unwrap()), "BBBBBBBB");
    }

    #[test]
    fn interrupt_only_affects_executing_head() {
        let mut queue = filled(&["AAAAAAAA"]);
        assert_eq!(queue.interrupt(), None);

        queue.begin_head();
        assert_eq!(queue.interrupt(), Some(1));
        assert_eq!(
            queue.front().unwrap().definition.meta.state,
            TaskState::Interrupted
        );
    }

    #[test]
    fn restore_sorts_and_interrupts_executing() {
        let mut executing = make_task("CCCCCCCC");
        executing.meta.state = TaskState::Executing;
        let tasks = vec![
            QueuedTask {
                seq: 7,
                definition: make_task("BBBBBBBB"),
            },
            QueuedTask {
                seq: 3,
                definition: executing,
            },
        ];

        let mut queue = TaskQueue::restore(10, tasks);
        let order: Vec<String> = queue.iter().map(contact_of).collect();
        assert_eq!(order, vec!["CCCCCCCC", "BBBBBBBB"]);
        assert_eq!(
            queue.front().unwrap().definition.meta.state,
            TaskState::Interrupted
        );

        assert!(queue.push(6, make_task("DDDDDDDD")).is_err());
        queue.push(8, make_task("DDDDDDDD")).unwrap();
    }

    #[test]
    fn drain_empties_in_order() {
        let mut queue = filled(&["AAAAAAAA", "BBBBBBBB"]);

        let drained: Vec<String> = queue.drain().iter().map(contact_of).collect();
        assert_eq!(drained, vec!["AAAAAAAA", "BBBBBBBB"]);
        assert!(queue.is_empty());
    }
}
