//! Engine orchestration: provision, start the pool, accept tasks, join.

use parabuild_core::{Collect, Reducer, ReducerFactory, RunId, TaskArgs, WorkerIndex, Workspace};
use tracing::{debug, error, info, warn};

use crate::channels::{channels, EngineChannels, TaskQueue};
use crate::config::EngineConfig;
use crate::error::{EngineError, RunError};
use crate::progress::{default_reporter, MonitorOutcome, ProgressMonitor, ProgressReporter};
use crate::provision::WorkspaceProvisioner;
use crate::worker::{TaskFn, WorkerPool};

/// Runs one task function over many argument sets, in parallel, one isolated
/// workspace per worker.
///
/// `O` is the terminal reducer value each worker delivers.
///
/// # Example
///
/// ```rust,no_run
/// use parabuild_core::{Sum, Task, TaskArgs};
/// use parabuild_engine::{Engine, EngineConfig};
///
/// async fn sweep() -> Result<i64, Box<dyn std::error::Error>> {
///     let config = EngineConfig::new("example_project")
///         .with_init_command(["cmake", "-B", "build", "."])
///         .with_exclude(".git")
///         .with_exclude("build")
///         .with_clean(true);
///
///     let task = |task: &Task| -> anyhow::Result<i64> {
///         let n: i64 = task.arg("n")?;
///         task.workspace.replace_line("main.cpp", 2, &format!("#define N {n}"))?;
///         task.workspace.run_in("build", &["make"])?;
///         let out = task.workspace.output_in("build", &["./main"])?;
///         Ok(out.trim().parse()?)
///     };
///
///     let mut engine = Engine::start(config, task, Sum::<i64>::default).await?;
///     for n in 10000..10100 {
///         engine.submit(TaskArgs::new().with("n", n))?;
///     }
///     let partials = engine.join(None).await?;
///     Ok(partials.into_iter().sum())
/// }
/// ```
pub struct Engine<O> {
    run_id: RunId,
    config: EngineConfig,
    workspaces: Vec<Workspace>,
    queue: TaskQueue,
    channels: EngineChannels<O>,
    pool: WorkerPool,
    reporter: Option<Box<dyn ProgressReporter>>,
    submitted: usize,
}

impl<T: Send + 'static> Engine<Vec<T>> {
    /// Start an engine that collects every output, per worker, in pull order.
    pub async fn collecting<F>(config: EngineConfig, task_fn: F) -> Result<Self, EngineError>
    where
        F: TaskFn<T>,
    {
        Self::start::<T, F, _>(config, task_fn, Collect::<T>::default).await
    }
}

impl<O: Send + 'static> Engine<O> {
    /// Provision the workspaces and start the worker pool.
    ///
    /// Returns only once every workspace is initialized and every worker is
    /// running. Nothing is started if provisioning fails.
    pub async fn start<T, F, R>(
        config: EngineConfig,
        task_fn: F,
        reducer_factory: R,
    ) -> Result<Self, EngineError>
    where
        T: 'static,
        F: TaskFn<T>,
        R: ReducerFactory<T>,
        R::Reducer: Reducer<T, Output = O>,
    {
        if !tokio::fs::try_exists(&config.project_path)
            .await
            .unwrap_or(false)
        {
            return Err(EngineError::ProjectNotFound(config.project_path.clone()));
        }
        config.validate()?;

        let run_id = RunId::generate();
        info!(
            run_id = %run_id,
            project = %config.project_path.display(),
            workers = config.num_workers,
            "Starting engine"
        );

        let provisioner = WorkspaceProvisioner::from_config(&config)?;
        let workspaces = provisioner
            .provision(config.num_workers, config.clean)
            .await?;

        let (queue, worker_channels, engine_channels) = channels();
        let pool = WorkerPool::spawn(&workspaces, task_fn, reducer_factory, worker_channels)?;

        Ok(Self {
            run_id,
            config,
            workspaces,
            queue,
            channels: engine_channels,
            pool,
            reporter: None,
            submitted: 0,
        })
    }

    /// Replace the progress reporter used by [`Engine::join`].
    pub fn with_progress_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Enqueue a task. Never blocks.
    pub fn submit(&mut self, args: TaskArgs) -> Result<(), EngineError> {
        self.queue.push(args)?;
        self.submitted += 1;
        Ok(())
    }

    /// Number of tasks submitted so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Provisioned workspaces, in worker-index order.
    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn num_workers(&self) -> usize {
        self.pool.len()
    }

    /// Signal the end of input, wait for every worker, and return one
    /// terminal reducer value per worker in worker-index order.
    ///
    /// `expected_total` sizes the progress display and defaults to the number
    /// of submitted tasks. If any task failed, the surviving workers still
    /// drain the queue before the first failure is returned as a
    /// [`RunError`].
    pub async fn join(self, expected_total: Option<usize>) -> Result<Vec<O>, EngineError> {
        let Self {
            run_id,
            config,
            queue,
            channels,
            pool,
            reporter,
            submitted,
            ..
        } = self;
        let EngineChannels {
            results: mut results_rx,
            errors: mut errors_rx,
            liveness: mut liveness_rx,
        } = channels;
        let num_workers = pool.len();
        let total = expected_total.unwrap_or(submitted);

        if let Err(e) = queue.push_sentinels(num_workers) {
            // Every worker already stopped; nothing is left to signal.
            debug!(run_id = %run_id, error = %e, "Could not enqueue sentinels");
        }
        drop(queue);
        info!(run_id = %run_id, submitted, total, "Waiting for workers");

        let mut first_error = None;
        if config.progress {
            let reporter = reporter.unwrap_or_else(default_reporter);
            let mut monitor = ProgressMonitor::new(reporter);
            match monitor.watch(total, &mut liveness_rx, &mut errors_rx).await {
                MonitorOutcome::Failed { completed, error } => {
                    warn!(
                        run_id = %run_id,
                        completed,
                        worker = %error.worker,
                        "Task failed, waiting for remaining workers"
                    );
                    first_error = Some(error);
                }
                MonitorOutcome::WorkersExited { completed } if completed < total => {
                    debug!(run_id = %run_id, completed, total, "Workers exited early");
                }
                _ => {}
            }
        }

        let exits = tokio::task::spawn_blocking(move || pool.join_blocking()).await?;

        let mut failed_workers = usize::from(first_error.is_some());
        while let Ok(error) = errors_rx.try_recv() {
            failed_workers += 1;
            first_error.get_or_insert(error);
        }
        if let Some(first) = first_error {
            error!(
                run_id = %run_id,
                failed_workers,
                worker = %first.worker,
                error = %first.message,
                "Run failed"
            );
            return Err(RunError::new(first, failed_workers).into());
        }

        let mut slots: Vec<Option<O>> = (0..num_workers).map(|_| None).collect();
        while let Ok((index, value)) = results_rx.try_recv() {
            if let Some(slot) = slots.get_mut(index.get()) {
                *slot = Some(value);
            }
        }

        let mut values = Vec::with_capacity(num_workers);
        for (index, slot) in slots.into_iter().enumerate() {
            let worker = WorkerIndex::new(index);
            match slot {
                Some(value) => values.push(value),
                None => {
                    let exit = exits
                        .iter()
                        .find(|(i, _)| *i == worker)
                        .and_then(|(_, exit)| *exit);
                    error!(run_id = %run_id, worker = %worker, exit = ?exit, "Missing worker result");
                    return Err(EngineError::WorkerLost(worker));
                }
            }
        }

        info!(run_id = %run_id, workers = num_workers, "Run complete");
        Ok(values)
    }
}
