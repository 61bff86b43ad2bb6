//! Quiet-period debouncing as an owned background task

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

enum Command {
    Schedule,
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Collapses bursts of [`schedule`](Debouncer::schedule) calls into one run of
/// an action, fired once no new request has arrived for the quiet period.
/// Each request pushes the deadline back.
pub struct Debouncer {
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Start the debounce task. Runs of `action` never overlap.
    pub fn spawn<F, Fut>(quiet: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(Command::Schedule) => {
                            deadline = Some(Instant::now() + quiet);
                        }
                        Some(Command::Flush(done)) => {
                            if deadline.take().is_some() {
                                action().await;
                            }
                            let _ = done.send(());
                        }
                        Some(Command::Shutdown(done)) => {
                            if deadline.take().is_some() {
                                action().await;
                            }
                            let _ = done.send(());
                            break;
                        }
                        None => {
                            if deadline.take().is_some() {
                                action().await;
                            }
                            break;
                        }
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        action().await;
                    }
                }
            }
        });

        Self {
            commands,
            task: Mutex::new(Some(task)),
        }
    }

    /// Request a run after the quiet period, replacing any pending one
    pub fn schedule(&self) {
        let _ = self.commands.send(Command::Schedule);
    }

    /// Run a pending action now and wait for it. No-op if nothing is pending.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Flush and stop the task. Later schedules are dropped.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
