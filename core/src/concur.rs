use crate::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs `task_fn` over every task with at most `worker_limit` tasks in flight.
///
/// Successful results come back in the order of their tasks; errors are collected separately,
/// also in task order. When `filter` is given, only results it accepts are kept.
///
/// Once `cancel` fires, workers stop picking up tasks and drop the outcome of any task that
/// finishes afterwards. Tasks already running are not aborted; they receive a child token
/// and may observe it themselves.
pub async fn process_concurrently<T, R, F, Fut>(
    cancel: &CancellationToken,
    worker_limit: usize,
    tasks: Vec<T>,
    task_fn: F,
    filter: Option<&(dyn Fn(&R) -> bool + Sync)>,
) -> (Vec<R>, Vec<Error>)
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let worker_limit = worker_limit.max(1);
    let total = tasks.len();
    let queue = Arc::new(Mutex::new(tasks.into_iter().enumerate().collect::<VecDeque<_>>()));
    let task_fn = Arc::new(task_fn);

    let mut workers = Vec::with_capacity(worker_limit);
    for _ in 0..worker_limit.min(total) {
        let queue = queue.clone();
        let task_fn = task_fn.clone();
        let cancel = cancel.clone();

        workers.push(tokio::spawn(async move {
            let mut outcomes = Vec::new();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some((index, task)) = next else {
                    break;
                };

                let outcome = task_fn(cancel.child_token(), task).await;
                if cancel.is_cancelled() {
                    break;
                }
                outcomes.push((index, outcome));
            }
            outcomes
        }));
    }

    let mut outcomes = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for worker in workers {
        match worker.await {
            Ok(done) => outcomes.extend(done),
            Err(e) => {
                warn!(error = %e, "Worker task failed");
                errors.push(Error::Task(e.to_string()));
            }
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut results = Vec::with_capacity(outcomes.len());
    for (_, outcome) in outcomes {
        match outcome {
            Ok(result) if filter.is_none_or(|keep| keep(&result)) => results.push(result),
            Ok(_) => {}
            Err(e) => errors.push(e),
        }
    }

    debug!(
        total,
        succeeded = results.len(),
        failed = errors.len(),
        "Processed tasks"
    );
    (results, errors)
}
