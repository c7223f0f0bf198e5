use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, FleetError, Result};

/// Outcome of one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    Success(R),
    Failure { kind: ErrorKind, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult<T, R> {
    pub item: T,
    pub outcome: Outcome<R>,
}

impl<T, R> OperationResult<T, R> {
    fn failed(item: T, err: &FleetError) -> Self {
        Self {
            item,
            outcome: Outcome::Failure {
                kind: err.kind(),
                detail: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

/// Runs a batch of independent operations on a fixed number of workers.
///
/// Every input item yields exactly one [`OperationResult`]; a failing or
/// panicking item never affects its siblings. `run` returns only once all
/// items have finished. Results come back in input order.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    worker_limit: usize,
}

impl BoundedExecutor {
    pub fn new(worker_limit: usize) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
        }
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, op: F) -> Vec<OperationResult<T, R>>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.run_with(
            items,
            || async { Ok::<(), FleetError>(()) },
            move |_: Arc<()>, item| op(item),
        )
        .await
    }

    /// Like [`run`](Self::run), but each worker first acquires a session with
    /// `acquire` and hands it to every item it processes. The session is
    /// dropped when the worker finishes. A failed acquisition fails the item
    /// at hand and is retried for the worker's next item.
    pub async fn run_with<T, S, R, A, AFut, F, Fut>(
        &self,
        items: Vec<T>,
        acquire: A,
        op: F,
    ) -> Vec<OperationResult<T, R>>
    where
        T: Clone + Send + 'static,
        S: Send + Sync + 'static,
        R: Send + 'static,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: Future<Output = Result<S>> + Send + 'static,
        F: Fn(Arc<S>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let pending = items.clone();
        let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
            Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<OperationResult<T, R>>>>> =
            Arc::new(Mutex::new((0..total).map(|_| None).collect()));
        let acquire = Arc::new(acquire);
        let op = Arc::new(op);

        let workers = self.worker_limit.min(total);
        debug!("Dispatching {} item(s) to {} worker(s)", total, workers);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let acquire = acquire.clone();
            let op = op.clone();
            let slots = slots.clone();

            handles.push(tokio::spawn(async move {
                let mut session: Option<Arc<S>> = None;

                loop {
                    let Some((index, item)) = queue.lock().await.pop_front() else {
                        break;
                    };

                    let current = match &session {
                        Some(s) => s.clone(),
                        None => match acquire_isolated(acquire.clone()).await {
                            Ok(s) => {
                                let s = Arc::new(s);
                                session = Some(s.clone());
                                s
                            }
                            Err(e) => {
                                warn!("Worker {} failed to acquire session: {}", worker, e);
                                let failed = OperationResult::failed(item, &e);
                                slots.lock().await[index] = Some(failed);
                                continue;
                            }
                        },
                    };

                    let result = {
                        let op = op.clone();
                        let item = item.clone();
                        tokio::spawn(async move { op(current, item).await }).await
                    };

                    let outcome = match result {
                        Ok(Ok(value)) => OperationResult {
                            item,
                            outcome: Outcome::Success(value),
                        },
                        Ok(Err(e)) => OperationResult::failed(item, &e),
                        Err(join) => {
                            OperationResult::failed(item, &FleetError::Panicked(join.to_string()))
                        }
                    };
                    slots.lock().await[index] = Some(outcome);
                }
            }));
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                error!("Executor worker aborted: {}", e);
            }
        }

        let slots = std::mem::take(&mut *slots.lock().await);
        fill_unfinished(slots, pending)
    }
}

/// Pair every slot with its input item; items left without a result by an
/// aborted worker are reported as panicked.
fn fill_unfinished<T, R>(
    slots: Vec<Option<OperationResult<T, R>>>,
    items: Vec<T>,
) -> Vec<OperationResult<T, R>> {
    slots
        .into_iter()
        .zip(items)
        .map(|(slot, item)| {
            slot.unwrap_or_else(|| {
                OperationResult::failed(
                    item,
                    &FleetError::Panicked("worker aborted before finishing item".to_string()),
                )
            })
        })
        .collect()
}

async fn acquire_isolated<S, A, AFut>(acquire: Arc<A>) -> Result<S>
where
    S: Send + 'static,
    A: Fn() -> AFut + Send + Sync + 'static,
    AFut: Future<Output = Result<S>> + Send + 'static,
{
    tokio::spawn(async move { acquire().await })
        .await
        .map_err(|e| FleetError::Panicked(e.to_string()))?
}
