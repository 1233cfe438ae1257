//! Bounded fan-out/fan-in task dispatch, one task per gene-set index.

use crate::config::ParallelBackend;
use crate::error::{Result, TcgsaError};
use rayon::prelude::*;

/// Run `n_tasks` independent tasks and return their results in index order.
///
/// Each task receives only its index; all shared data is captured read-only
/// by the closure. Tasks may complete in any order; results come back as
/// `(index, record)` pairs and are placed into a pre-sized slot vector, so
/// the output order is always `0..n_tasks` regardless of completion order.
/// The call blocks until every task has returned; there is no cancellation.
pub fn run_tasks<T, F>(
    n_tasks: usize,
    n_workers: usize,
    backend: ParallelBackend,
    task: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let indexed: Vec<(usize, T)> = match backend {
        ParallelBackend::Sequential => (0..n_tasks).map(|i| (i, task(i))).collect(),
        ParallelBackend::Threads => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_workers)
                .build()
                .map_err(|e| {
                    TcgsaError::InvalidParameter(format!("could not build worker pool: {}", e))
                })?;
            pool.install(|| (0..n_tasks).into_par_iter().map(|i| (i, task(i))).collect())
        }
    };

    // Fan-in: write each record once at its own index.
    let mut slots: Vec<Option<T>> = (0..n_tasks).map(|_| None).collect();
    for (index, record) in indexed {
        debug_assert!(slots[index].is_none(), "task {} produced twice", index);
        slots[index] = Some(record);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| {
                TcgsaError::Numerical(format!("task {} returned no record", i))
            })
        })
        .collect()
}
