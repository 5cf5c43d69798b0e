use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

#[derive(Debug, Error)]
pub enum FailureKind {
    #[error("{0:#}")]
    Error(anyhow::Error),
    #[error("panicked: {0}")]
    Panic(String),
}

#[derive(Debug, Error)]
#[error("task '{task}' failed: {kind}")]
pub struct TaskFailure {
    pub task: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("too many pending tasks")]
    Full,
    #[error("supervisor has shut down")]
    Closed,
}

/// Runs `fut` to completion, turning both errors and panics into a [`TaskFailure`].
pub async fn guard<F, T>(task: &str, fut: F) -> Result<T, TaskFailure>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure { task: task.to_owned(), kind: FailureKind::Error(err) }),
        Err(payload) => Err(TaskFailure { task: task.to_owned(), kind: FailureKind::Panic(panic_message(payload)) }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}

struct Job {
    name: String,
    work: BoxFuture<'static, anyhow::Result<()>>,
}

/// Fire-and-forget executor for command work.
///
/// Jobs arrive over a bounded channel and run at most `concurrency` at a time.
/// Nothing a job does, error or panic, reaches the caller or stops the worker.
pub struct TaskSupervisor {
    rx: mpsc::Receiver<Job>,
    concurrency: usize,
    failures: Option<mpsc::UnboundedSender<TaskFailure>>,
}

#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Job>,
}

impl TaskSupervisor {
    pub fn new(capacity: usize, concurrency: usize) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let supervisor = Self {
            rx,
            concurrency: concurrency.max(1),
            failures: None,
        };

        (supervisor, SupervisorHandle { tx })
    }

    /// Failures are always logged; this additionally forwards them.
    pub fn subscribe_failures(&mut self) -> mpsc::UnboundedReceiver<TaskFailure> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.failures = Some(tx);
        rx
    }

    pub async fn run(mut self) {
        tracing::info!("Task supervisor started (concurrency {})", self.concurrency);

        let mut running: JoinSet<Result<(), TaskFailure>> = JoinSet::new();

        loop {
            tokio::select! {
                job = self.rx.recv(), if running.len() < self.concurrency => match job {
                    Some(job) => {
                        tracing::debug!("Running task '{}'", job.name);
                        running.spawn(async move { guard(&job.name, job.work).await });
                    }
                    None => break,
                },
                Some(joined) = running.join_next() => self.report(joined),
            }
        }

        while let Some(joined) = running.join_next().await {
            self.report(joined);
        }

        tracing::info!("Task supervisor stopped");
    }

    fn report(&self, joined: Result<Result<(), TaskFailure>, JoinError>) {
        let failure = match joined {
            Ok(Ok(())) => return,
            Ok(Err(failure)) => failure,
            Err(err) => TaskFailure {
                task: String::from("<unknown>"),
                kind: FailureKind::Panic(err.to_string()),
            },
        };

        tracing::error!("Background task failed: {}", failure);

        if let Some(tx) = &self.failures {
            let _ = tx.send(failure);
        }
    }
}

impl SupervisorHandle {
    /// Queues `work` without waiting; fails fast when the backlog is full.
    pub fn submit<F>(&self, name: impl Into<String>, work: F) -> Result<(), SubmitError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job = Job { name: name.into(), work: work.boxed() };

        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use super::*;

    async fn explode() -> anyhow::Result<()> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn errors_and_panics_are_reported_and_worker_survives() {
        let (mut supervisor, handle) = TaskSupervisor::new(8, 2);
        let mut failures = supervisor.subscribe_failures();
        let worker = tokio::spawn(supervisor.run());

        let done = Arc::new(AtomicUsize::new(0));

        handle.submit("fails", async { Err(anyhow::anyhow!("boom")) }).unwrap();
        handle.submit("panics", explode()).unwrap();
        let counter = done.clone();
        handle.submit("works", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }).unwrap();

        let mut seen = vec![failures.recv().await.unwrap(), failures.recv().await.unwrap()];
        seen.sort_by(|a, b| a.task.cmp(&b.task));

        assert_eq!(seen[0].task, "fails");
        assert!(matches!(seen[0].kind, FailureKind::Error(_)));
        assert_eq!(seen[1].task, "panics");
        assert!(matches!(&seen[1].kind, FailureKind::Panic(msg) if msg == "kaboom"));

        drop(handle);
        worker.await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_backlog_is_rejected() {
        let (supervisor, handle) = TaskSupervisor::new(1, 1);

        handle.submit("first", async { Ok(()) }).unwrap();
        assert_eq!(handle.submit("second", async { Ok(()) }), Err(SubmitError::Full));

        drop(supervisor);
        assert_eq!(handle.submit("third", async { Ok(()) }), Err(SubmitError::Closed));
    }

    #[tokio::test]
    async fn guard_passes_success_through() {
        assert!(guard("ok", async { Ok(()) }).await.is_ok());

        let failure = guard::<_, ()>("bad", async { anyhow::bail!("nope") }).await.unwrap_err();
        assert_eq!(failure.to_string(), "task 'bad' failed: nope");
    }
}
