//! Bounded, order-preserving fan-out.
//!
//! [`ParallelExecutor`] spawns every task up front and gates execution with a
//! semaphore of `parallelism` permits. Results are collected by awaiting the
//! join handles in submission order, so the output order never depends on
//! which task finished first. A failed task surfaces when its index is
//! reached; the siblings keep running to completion in the background.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// A type-erased task, for fanning out closures of different concrete types.
pub type Task<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutor {
    parallelism: usize,
}

impl ParallelExecutor {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run zero-argument tasks with at most `parallelism` in flight and
    /// return their results in submission order.
    pub async fn run_all<T, F, Fut>(&self, tasks: Vec<F>) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.parallelism));
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let permits = permits.clone();
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| Error::Upstream(anyhow::anyhow!("executor closed")))?;
                    task().await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await??);
        }
        Ok(results)
    }

    /// Fan a single-argument method out over `args`, sharing `receiver`
    /// read-only across every call.
    pub async fn map<S, A, T, F, Fut>(&self, receiver: &Arc<S>, args: Vec<A>, f: F) -> Result<Vec<T>>
    where
        S: Send + Sync + 'static + ?Sized,
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let f = Arc::new(f);
        let tasks: Vec<_> = args
            .into_iter()
            .map(|arg| {
                let receiver = receiver.clone();
                let f = f.clone();
                move || (*f)(receiver, arg)
            })
            .collect();
        self.run_all(tasks).await
    }
}

/// Erase a future-returning closure into a [`Task`].
pub fn task<T, F, Fut>(f: F) -> Task<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move || Box::pin(f()) as BoxFuture<'static, Result<T>>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let executor = ParallelExecutor::new(3);
        let delays = [30u64, 1, 10]; // slow, fast, medium
        let tasks: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(i)
                }
            })
            .collect();

        let results = executor.run_all(tasks).await.unwrap();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let executor = ParallelExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let results = executor.run_all(tasks).await.unwrap();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let executor = ParallelExecutor::new(3);
        let sibling_done = Arc::new(AtomicBool::new(false));
        let flag = sibling_done.clone();

        let tasks: Vec<Task<u32>> = vec![
            task(|| async { Ok(1) }),
            task(|| async { Err(anyhow::anyhow!("boom").into()) }),
            task(move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(3)
            }),
        ];

        let err = executor.run_all(tasks).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sibling_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_map_shares_receiver() {
        struct Multiplier {
            factor: usize,
        }

        let executor = ParallelExecutor::new(4);
        let receiver = Arc::new(Multiplier { factor: 3 });
        let results = executor
            .map(&receiver, vec![1, 2, 3, 4], |m, x: usize| async move {
                Ok(m.factor * x)
            })
            .await
            .unwrap();
        assert_eq!(results, vec![3, 6, 9, 12]);
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let executor = ParallelExecutor::new(2);
        let tasks: Vec<Task<()>> = Vec::new();
        assert!(executor.run_all(tasks).await.unwrap().is_empty());
    }

    #[test]
    fn test_zero_parallelism_is_clamped() {
        assert_eq!(ParallelExecutor::new(0).parallelism(), 1);
    }
}
