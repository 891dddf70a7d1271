//! Progress reporting and early failure detection while a run drains.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::tty::IsTty;
use crossterm::queue;
use parabuild_core::{TaskError, WorkerIndex};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

const BAR_WIDTH: usize = 30;

/// Receives progress updates from the monitor.
pub trait ProgressReporter: Send {
    /// Called once before any update with the expected number of tasks.
    fn start(&mut self, total: usize);

    /// Called after each completed task with the running count.
    fn advance(&mut self, completed: usize);

    /// Called when monitoring ends without a task failure.
    fn finish(&mut self, completed: usize);

    /// Called on the first task failure; no further updates follow.
    fn abort(&mut self, completed: usize, error: &TaskError);
}

/// Pick a reporter for stderr: a live bar on a terminal, log lines otherwise.
pub fn default_reporter() -> Box<dyn ProgressReporter> {
    if io::stderr().is_tty() {
        Box::new(TerminalProgress::stderr())
    } else {
        Box::new(LogProgress::default())
    }
}

/// Single-line progress bar redrawn in place.
pub struct TerminalProgress<W: Write + Send = io::Stderr> {
    out: W,
    total: usize,
    started: Instant,
}

impl TerminalProgress<io::Stderr> {
    pub fn stderr() -> Self {
        Self::with_writer(io::stderr())
    }
}

impl<W: Write + Send> TerminalProgress<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out,
            total: 0,
            started: Instant::now(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, completed: usize, suffix: &str) -> io::Result<()> {
        let line = render_line(completed, self.total, self.started.elapsed());
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line),
            Print(suffix)
        )?;
        self.out.flush()
    }
}

impl<W: Write + Send> ProgressReporter for TerminalProgress<W> {
    fn start(&mut self, total: usize) {
        self.total = total;
        self.started = Instant::now();
        let _ = self.draw(0, "");
    }

    fn advance(&mut self, completed: usize) {
        let _ = self.draw(completed, "");
    }

    fn finish(&mut self, completed: usize) {
        let _ = self.draw(completed, "\n");
    }

    fn abort(&mut self, completed: usize, error: &TaskError) {
        let suffix = format!(" aborted: worker {} failed\n", error.worker);
        let _ = self.draw(completed, &suffix);
    }
}

/// Reports progress through `tracing`, once per tenth of the run.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: usize,
    last_decile: usize,
}

impl ProgressReporter for LogProgress {
    fn start(&mut self, total: usize) {
        self.total = total;
        self.last_decile = 0;
        info!(total, "Waiting for tasks");
    }

    fn advance(&mut self, completed: usize) {
        let decile = percent(completed, self.total) / 10;
        if decile > self.last_decile {
            self.last_decile = decile;
            info!(completed, total = self.total, "Progress {}%", decile * 10);
        }
    }

    fn finish(&mut self, completed: usize) {
        info!(completed, total = self.total, "Tasks done");
    }

    fn abort(&mut self, completed: usize, error: &TaskError) {
        warn!(completed, total = self.total, worker = %error.worker, "Progress stopped by task failure");
    }
}

/// Discards all updates.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _total: usize) {}
    fn advance(&mut self, _completed: usize) {}
    fn finish(&mut self, _completed: usize) {}
    fn abort(&mut self, _completed: usize, _error: &TaskError) {}
}

/// Why monitoring stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// The expected number of tasks completed.
    Completed { completed: usize },
    /// Every worker exited before the expected count was reached.
    WorkersExited { completed: usize },
    /// A task failed.
    Failed { completed: usize, error: TaskError },
}

/// Waits on the liveness and error channels and drives a reporter.
pub struct ProgressMonitor {
    reporter: Box<dyn ProgressReporter>,
}

impl ProgressMonitor {
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self { reporter }
    }

    /// Count liveness ticks until `total` is reached, all workers are gone,
    /// or an error arrives, whichever comes first.
    ///
    /// Errors win over ticks that are ready at the same time.
    pub async fn watch(
        &mut self,
        total: usize,
        liveness: &mut mpsc::UnboundedReceiver<WorkerIndex>,
        errors: &mut mpsc::UnboundedReceiver<TaskError>,
    ) -> MonitorOutcome {
        self.reporter.start(total);
        let mut completed = 0usize;
        let mut errors_open = true;

        while completed < total {
            tokio::select! {
                biased;
                error = errors.recv(), if errors_open => match error {
                    Some(error) => {
                        self.reporter.abort(completed, &error);
                        return MonitorOutcome::Failed { completed, error };
                    }
                    None => errors_open = false,
                },
                tick = liveness.recv() => match tick {
                    Some(worker) => {
                        completed += 1;
                        trace!(worker = %worker, completed, total, "Task tick");
                        self.reporter.advance(completed);
                    }
                    None => {
                        self.reporter.finish(completed);
                        return MonitorOutcome::WorkersExited { completed };
                    }
                },
            }
        }

        self.reporter.finish(completed);
        MonitorOutcome::Completed { completed }
    }
}

fn percent(completed: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        (completed.min(total) * 100) / total
    }
}

/// Render `[#####.....] 5/10 (50%) 2.5 it/s 00:02`.
fn render_line(completed: usize, total: usize, elapsed: Duration) -> String {
    let filled = percent(completed, total) * BAR_WIDTH / 100;
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { completed as f64 / secs } else { 0.0 };
    let whole = elapsed.as_secs();
    format!(
        "[{}{}] {}/{} ({}%) {:.1} it/s {:02}:{:02}",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        completed,
        total,
        percent(completed, total),
        rate,
        whole / 60,
        whole % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parabuild_core::TaskArgs;
    use std::sync::{Arc, Mutex};

    /// Records every call for assertions.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ProgressReporter for Recorder {
        fn start(&mut self, total: usize) {
            self.0.lock().unwrap().push(format!("start {total}"));
        }
        fn advance(&mut self, completed: usize) {
            self.0.lock().unwrap().push(format!("advance {completed}"));
        }
        fn finish(&mut self, completed: usize) {
            self.0.lock().unwrap().push(format!("finish {completed}"));
        }
        fn abort(&mut self, completed: usize, error: &TaskError) {
            self.0.lock().unwrap().push(format!("abort {completed} {}", error.worker));
        }
    }

    fn error(worker: usize) -> TaskError {
        TaskError::new(WorkerIndex::new(worker), "/w", TaskArgs::new(), "boom")
    }

    #[test]
    fn test_render_line() {
        let line = render_line(5, 10, Duration::from_secs(2));
        assert!(line.starts_with("[###############...............] 5/10 (50%)"));
        assert!(line.contains("2.5 it/s"));
        assert!(line.ends_with("00:02"));
        assert!(render_line(0, 0, Duration::ZERO).contains("(100%)"));
    }

    #[tokio::test]
    async fn test_completes_on_expected_count() {
        let (tick_tx, mut ticks) = mpsc::unbounded_channel();
        let (_err_tx, mut errors) = mpsc::unbounded_channel();
        for i in 0..3 {
            tick_tx.send(WorkerIndex::new(i)).unwrap();
        }

        let recorder = Recorder::default();
        let mut monitor = ProgressMonitor::new(Box::new(recorder.clone()));
        let outcome = monitor.watch(3, &mut ticks, &mut errors).await;

        assert_eq!(outcome, MonitorOutcome::Completed { completed: 3 });
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["start 3", "advance 1", "advance 2", "advance 3", "finish 3"]
        );
    }

    #[tokio::test]
    async fn test_error_stops_progress() {
        let (tick_tx, mut ticks) = mpsc::unbounded_channel();
        let (err_tx, mut errors) = mpsc::unbounded_channel();
        tick_tx.send(WorkerIndex::new(0)).unwrap();
        err_tx.send(error(1)).unwrap();
        tick_tx.send(WorkerIndex::new(0)).unwrap();

        let recorder = Recorder::default();
        let mut monitor = ProgressMonitor::new(Box::new(recorder.clone()));
        let outcome = monitor.watch(10, &mut ticks, &mut errors).await;

        match outcome {
            MonitorOutcome::Failed { completed, error } => {
                assert_eq!(completed, 0);
                assert_eq!(error.worker, WorkerIndex::new(1));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let calls = recorder.0.lock().unwrap();
        assert_eq!(*calls, vec!["start 10", "abort 0 1"]);
    }

    #[tokio::test]
    async fn test_workers_exiting_ends_watch() {
        let (tick_tx, mut ticks) = mpsc::unbounded_channel();
        let (err_tx, mut errors) = mpsc::unbounded_channel::<TaskError>();
        tick_tx.send(WorkerIndex::new(0)).unwrap();
        drop(tick_tx);
        drop(err_tx);

        let mut monitor = ProgressMonitor::new(Box::new(NoProgress));
        let outcome = monitor.watch(5, &mut ticks, &mut errors).await;
        assert_eq!(outcome, MonitorOutcome::WorkersExited { completed: 1 });
    }

    #[test]
    fn test_terminal_progress_writes_bar() {
        let mut progress = TerminalProgress::with_writer(Vec::new());
        progress.start(4);
        progress.advance(2);
        progress.finish(4);
        let out = String::from_utf8(progress.into_inner()).unwrap();
        assert!(out.contains("2/4 (50%)"));
        assert!(out.contains("4/4 (100%)"));
        assert!(out.ends_with('\n'));
    }
}
