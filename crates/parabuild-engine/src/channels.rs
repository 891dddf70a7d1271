//! Channels shared between the engine and its workers.
//!
//! - the task queue is multi-producer multi-consumer and carries tasks or
//!   shutdown sentinels; workers pull from it with a blocking receive.
//! - the result channel carries exactly one terminal value per worker that
//!   shut down normally.
//! - the error channel carries at most one [`TaskError`] per worker.
//! - the liveness channel carries one tick per completed task.
//!
//! Workers only ever hold the receiving end of the task queue, so dropping the
//! engine closes the queue and lets idle workers exit.

use parabuild_core::{TaskArgs, TaskError, WorkerIndex};
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Item pulled from the task queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// Run a task with these arguments.
    Task(TaskArgs),
    /// No more work for the worker that receives this.
    Shutdown,
}

/// Producer side of the task queue, owned by the engine.
#[derive(Debug)]
pub struct TaskQueue {
    tx: async_channel::Sender<QueueItem>,
}

impl TaskQueue {
    /// Create an unbounded queue, returning the producer and a receiver that
    /// can be cloned for every worker.
    pub fn unbounded() -> (Self, async_channel::Receiver<QueueItem>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Enqueue a task without blocking.
    pub fn push(&self, args: TaskArgs) -> Result<(), EngineError> {
        self.tx
            .try_send(QueueItem::Task(args))
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Enqueue one shutdown sentinel per worker.
    pub fn push_sentinels(&self, workers: usize) -> Result<(), EngineError> {
        for _ in 0..workers {
            self.tx
                .try_send(QueueItem::Shutdown)
                .map_err(|_| EngineError::QueueClosed)?;
        }
        Ok(())
    }

    /// Number of items waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Worker-side senders, cloned once per worker.
#[derive(Debug)]
pub struct WorkerChannels<O> {
    pub tasks: async_channel::Receiver<QueueItem>,
    pub results: mpsc::UnboundedSender<(WorkerIndex, O)>,
    pub errors: mpsc::UnboundedSender<TaskError>,
    pub liveness: mpsc::UnboundedSender<WorkerIndex>,
}

impl<O> Clone for WorkerChannels<O> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            results: self.results.clone(),
            errors: self.errors.clone(),
            liveness: self.liveness.clone(),
        }
    }
}

/// Engine-side receivers.
#[derive(Debug)]
pub struct EngineChannels<O> {
    pub results: mpsc::UnboundedReceiver<(WorkerIndex, O)>,
    pub errors: mpsc::UnboundedReceiver<TaskError>,
    pub liveness: mpsc::UnboundedReceiver<WorkerIndex>,
}

/// Create the task queue and the result, error and liveness channels.
pub fn channels<O>() -> (TaskQueue, WorkerChannels<O>, EngineChannels<O>) {
    let (queue, tasks) = TaskQueue::unbounded();
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    let (liveness_tx, liveness_rx) = mpsc::unbounded_channel();

    (
        queue,
        WorkerChannels {
            tasks,
            results: results_tx,
            errors: errors_tx,
            liveness: liveness_tx,
        },
        EngineChannels {
            results: results_rx,
            errors: errors_rx,
            liveness: liveness_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo_and_shared() {
        let (queue, rx) = TaskQueue::unbounded();
        let rx2 = rx.clone();
        queue.push(TaskArgs::new().with("id", 1)).unwrap();
        queue.push(TaskArgs::new().with("id", 2)).unwrap();
        queue.push_sentinels(2).unwrap();
        assert_eq!(queue.len(), 4);

        assert_eq!(rx.recv_blocking().unwrap(), QueueItem::Task(TaskArgs::new().with("id", 1)));
        assert_eq!(rx2.recv_blocking().unwrap(), QueueItem::Task(TaskArgs::new().with("id", 2)));
        assert_eq!(rx2.recv_blocking().unwrap(), QueueItem::Shutdown);
        assert_eq!(rx.recv_blocking().unwrap(), QueueItem::Shutdown);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_after_receivers_dropped() {
        let (queue, rx) = TaskQueue::unbounded();
        drop(rx);
        assert!(matches!(queue.push(TaskArgs::new()), Err(EngineError::QueueClosed)));
    }

    #[test]
    fn test_dropping_queue_closes_receivers() {
        let (queue, rx) = TaskQueue::unbounded();
        drop(queue);
        assert!(rx.recv_blocking().is_err());
    }
}
