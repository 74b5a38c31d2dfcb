//! Bounded worker pool for per-clip jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::cancel::CancelToken;

/// Default concurrency: half the logical CPUs, between 1 and 4.
///
/// Each job drives an encoder or a speech model that is already multi-threaded, so more
/// workers than this mostly adds contention.
pub fn default_workers() -> usize {
    (num_cpus::get() / 2).clamp(1, 4)
}

/// Run `job` over every item with at most `workers` running at once.
///
/// Results come back in item order. An item whose job never started because `cancel`
/// tripped first is `None`. Workers pull the next index from a shared counter, so a slow
/// job never holds back the others.
pub fn run_bounded<T, R, F>(
    items: &[T],
    workers: usize,
    cancel: &CancelToken,
    job: F,
) -> Vec<Option<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let mut results: Vec<Option<R>> = Vec::with_capacity(items.len());
    results.resize_with(items.len(), || None);
    if items.is_empty() {
        return results;
    }

    let workers = workers.clamp(1, items.len());
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, R)>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let job = &job;
            scope.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(i) else {
                        break;
                    };
                    if tx.send((i, job(item))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (i, r) in rx {
            results[i] = Some(r);
        }
    });

    results
}
