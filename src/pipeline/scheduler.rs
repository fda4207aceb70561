//! Background scheduler: detaches pipeline runs from the request that submitted them.
//!
//! Work items travel over an mpsc channel to a single dispatcher task, which
//! spawns each one on its own tokio task. A task id is accepted again only
//! once its earlier item has finished, so one id never has two live runs.
//! A panicking item is logged (and reported through the panic hook) without
//! disturbing the dispatcher or any other item.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Error, Debug, PartialEq)]
pub enum SchedulerError {
    #[error("Task {0} is already queued or running")]
    AlreadySubmitted(String),

    #[error("Scheduler is shut down")]
    Closed,
}

type WorkItem = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Called with `(task_id, panic message)` when a work item panics.
pub type PanicHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Ids of items queued or running.
type ActiveSet = Arc<Mutex<HashSet<String>>>;

struct Job {
    task_id: String,
    work: WorkItem,
}

/// Submission side of the scheduler. Cheap to share behind an `Arc`.
pub struct BackgroundScheduler {
    sender: mpsc::UnboundedSender<Job>,
    active: ActiveSet,
}

/// Owns the dispatcher task.
///
/// `shutdown()` stops intake and waits for in-flight items; dropping the
/// handle stops intake without waiting.
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl BackgroundScheduler {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(on_panic: Option<PanicHook>) -> (Self, SchedulerHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let active = ActiveSet::default();

        let dispatcher = tokio::spawn(dispatch(receiver, shutdown_rx, on_panic, active.clone()));
        tracing::info!("Background scheduler started");

        (
            Self {
                sender,
                active,
            },
            SchedulerHandle {
                shutdown: Some(shutdown_tx),
                dispatcher: Some(dispatcher),
            },
        )
    }

    /// Queue `work` for `task_id` and return immediately.
    pub fn submit<F>(&self, task_id: &str, work: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !lock_active(&self.active).insert(task_id.to_string()) {
            tracing::warn!(task_id, "Duplicate submission rejected");
            return Err(SchedulerError::AlreadySubmitted(task_id.to_string()));
        }

        let job = Job {
            task_id: task_id.to_string(),
            work: Box::pin(work),
        };
        if self.sender.send(job).is_err() {
            lock_active(&self.active).remove(task_id);
            tracing::error!(task_id, "Submission after scheduler shutdown");
            return Err(SchedulerError::Closed);
        }

        tracing::debug!(task_id, "Task queued");
        Ok(())
    }

    /// Number of items queued or running.
    pub fn active_count(&self) -> usize {
        lock_active(&self.active).len()
    }
}

impl SchedulerHandle {
    /// Stop accepting work, then wait for every accepted item to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                tracing::error!(error = %e, "Scheduler dispatcher ended abnormally");
            }
        }
        tracing::info!("Background scheduler stopped");
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    mut shutdown: oneshot::Receiver<()>,
    on_panic: Option<PanicHook>,
    active: ActiveSet,
) {
    let mut running: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => {
                    running.spawn(supervise(job, on_panic.clone(), active.clone()));
                }
                None => break,
            },
            _ = &mut shutdown => {
                // Already-queued items were accepted; run them too.
                receiver.close();
                while let Some(job) = receiver.recv().await {
                    running.spawn(supervise(job, on_panic.clone(), active.clone()));
                }
                break;
            }
            Some(_) = running.join_next(), if !running.is_empty() => {}
        }
    }

    if !running.is_empty() {
        tracing::info!(in_flight = running.len(), "Waiting for in-flight tasks");
    }
    while running.join_next().await.is_some() {}
}

/// Run one item on its own task so a panic is contained and attributable.
async fn supervise(job: Job, on_panic: Option<PanicHook>, active: ActiveSet) {
    let Job { task_id, work } = job;

    match tokio::spawn(work).await {
        Ok(()) => tracing::debug!(task_id = %task_id, "Task finished"),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            tracing::error!(task_id = %task_id, panic = %message, "Task panicked");
            if let Some(hook) = on_panic {
                hook(&task_id, &message);
            }
        }
        Err(e) => tracing::warn!(task_id = %task_id, error = %e, "Task cancelled"),
    }

    lock_active(&active).remove(&task_id);
}

fn lock_active(active: &ActiveSet) -> MutexGuard<'_, HashSet<String>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
