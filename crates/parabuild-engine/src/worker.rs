//! Persistent worker pool.
//!
//! Each worker is an OS thread bound to one provisioned workspace. It pulls
//! tasks from the shared queue until it receives a shutdown sentinel, folds
//! every output into its own reducer, and reports the reducer's terminal value
//! when it exits. The first failing task stops the worker for good: its
//! workspace may be left half-built, so it must not run anything else.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parabuild_core::{Reducer, ReducerFactory, Task, TaskError, WorkerIndex, Workspace};
use tracing::{debug, error, info, warn};

use crate::channels::{QueueItem, WorkerChannels};
use crate::error::EngineError;

/// A unit of work run inside a worker's workspace.
///
/// Implemented for every `Fn(&Task) -> anyhow::Result<T>` closure. Returning
/// an error or panicking marks the task, and the worker, as failed.
pub trait TaskFn<T>: Send + Sync + 'static {
    fn run(&self, task: &Task) -> anyhow::Result<T>;
}

impl<T, F> TaskFn<T> for F
where
    F: Fn(&Task) -> anyhow::Result<T> + Send + Sync + 'static,
{
    fn run(&self, task: &Task) -> anyhow::Result<T> {
        self(task)
    }
}

/// How a worker thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Received a sentinel (or found the queue closed) and delivered a result.
    Finished,
    /// A task failed; an error record was sent instead of a result.
    Failed,
}

/// Handle to a running worker thread.
struct WorkerHandle {
    index: WorkerIndex,
    thread: thread::JoinHandle<WorkerExit>,
}

/// N worker threads, one per workspace.
pub(crate) struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Start one worker per workspace.
    ///
    /// `channels` is the template the per-worker senders are cloned from; it is
    /// consumed so the pool does not keep any channel open on its own.
    pub(crate) fn spawn<T, F, R>(
        workspaces: &[Workspace],
        task_fn: F,
        reducer_factory: R,
        channels: WorkerChannels<<R::Reducer as Reducer<T>>::Output>,
    ) -> Result<Self, EngineError>
    where
        T: 'static,
        F: TaskFn<T>,
        R: ReducerFactory<T>,
    {
        let task_fn = Arc::new(task_fn);
        let reducer_factory = Arc::new(reducer_factory);
        let mut workers = Vec::with_capacity(workspaces.len());

        for workspace in workspaces {
            let index = workspace.index();
            let context = WorkerContext {
                workspace: workspace.clone(),
                task_fn: task_fn.clone(),
                reducer_factory: reducer_factory.clone(),
                channels: channels.clone(),
            };
            let thread = thread::Builder::new()
                .name(format!("parabuild-worker-{index}"))
                .spawn(move || context.run::<T>())
                .map_err(|source| EngineError::Spawn {
                    worker: index,
                    source,
                })?;
            workers.push(WorkerHandle { index, thread });
        }

        info!(workers = workers.len(), "Worker pool started");
        Ok(Self { workers })
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Block until every worker thread has exited.
    ///
    /// A worker whose thread died outside a task (its reducer panicked)
    /// reports `None`.
    pub(crate) fn join_blocking(self) -> Vec<(WorkerIndex, Option<WorkerExit>)> {
        self.workers
            .into_iter()
            .map(|worker| {
                let exit = worker.thread.join().ok();
                if exit.is_none() {
                    error!(worker = %worker.index, "Worker thread panicked");
                }
                (worker.index, exit)
            })
            .collect()
    }
}

/// Everything one worker needs, passed explicitly into its thread.
struct WorkerContext<F, R, O> {
    workspace: Workspace,
    task_fn: Arc<F>,
    reducer_factory: Arc<R>,
    channels: WorkerChannels<O>,
}

impl<F, R, O> WorkerContext<F, R, O> {
    fn run<T>(self) -> WorkerExit
    where
        F: TaskFn<T>,
        R: ReducerFactory<T>,
        <R as ReducerFactory<T>>::Reducer: Reducer<T, Output = O>,
    {
        let index = self.workspace.index();
        let mut reducer = self.reducer_factory.create();
        let mut completed = 0usize;
        debug!(worker = %index, "Worker waiting for tasks");

        loop {
            let args = match self.channels.tasks.recv_blocking() {
                Ok(QueueItem::Task(args)) => args,
                Ok(QueueItem::Shutdown) => break,
                Err(_) => {
                    debug!(worker = %index, "Task queue closed");
                    break;
                }
            };

            let task = Task::new(self.workspace.clone(), args);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.task_fn.run(&task)));
            let message = match outcome {
                Ok(Ok(output)) => {
                    reducer.fold(output);
                    completed += 1;
                    debug!(worker = %index, completed, "Task completed");
                    let _ = self.channels.liveness.send(index);
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => format!("task panicked: {}", panic_message(payload.as_ref())),
            };

            warn!(
                worker = %index,
                args = %task.args,
                error = %message,
                "Task failed, stopping worker"
            );
            let record = TaskError::new(index, self.workspace.path(), task.args, message);
            if self.channels.errors.send(record).is_err() {
                error!(worker = %index, "Error channel closed, failure not reported");
            }
            return WorkerExit::Failed;
        }

        info!(worker = %index, completed, "Worker finished");
        if self.channels.results.send((index, reducer.finish())).is_err() {
            debug!(worker = %index, "Result channel closed, engine is gone");
        }
        WorkerExit::Finished
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
