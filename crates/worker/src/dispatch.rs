use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{DeliveryWorker, ProcessOutcome};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("dispatcher is shut down")]
    Closed,
    #[error("no async runtime available to run the worker")]
    NoRuntime,
}

pub type SubmitFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SubmitError>> + Send + 'a>>;

/// Hands a record id to the Delivery Worker. Resolves once the invocation is
/// running, not when the attempt finishes, so callers feel backpressure when
/// every slot is busy.
pub trait Submitter: Send + Sync {
    fn submit<'a>(&'a self, id: Uuid) -> SubmitFuture<'a>;
}

/// Runs each submission as its own tokio task, holding one permit per task.
#[derive(Clone)]
pub struct TaskDispatcher {
    worker: DeliveryWorker,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl TaskDispatcher {
    pub fn new(worker: DeliveryWorker, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            worker,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Waits for in-flight attempts to finish, then refuses new submissions.
    /// Submissions still waiting for a slot fail with [`SubmitError::Closed`].
    pub async fn shutdown(&self) {
        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        match self.permits.acquire_many(permits).await {
            Ok(_all) => self.permits.close(),
            Err(_) => debug!("dispatcher already shut down"),
        }
    }

    async fn spawn_invocation(&self, id: Uuid) -> Result<(), SubmitError> {
        let handle = Handle::try_current().map_err(|_| SubmitError::NoRuntime)?;
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SubmitError::Closed)?;

        let worker = self.worker.clone();
        handle.spawn(async move {
            let _permit = permit;
            run_invocation(&worker, id).await;
        });

        Ok(())
    }
}

impl Submitter for TaskDispatcher {
    fn submit<'a>(&'a self, id: Uuid) -> SubmitFuture<'a> {
        Box::pin(self.spawn_invocation(id))
    }
}

async fn run_invocation(worker: &DeliveryWorker, id: Uuid) {
    let table = worker.table().table_name();

    match worker.process(id).await {
        Ok(ProcessOutcome::Reserved) => debug!(
            table,
            delivery_id = %id,
            "invocation skipped; record busy elsewhere"
        ),
        Ok(outcome) => debug!(
            table,
            delivery_id = %id,
            outcome = outcome.label(),
            "invocation finished"
        ),
        Err(err) => error!(
            table,
            delivery_id = %id,
            worker_id = %worker.worker_id(),
            "invocation failed: {err}"
        ),
    }
}
