//! Bounded fan-out/fan-in over scoped OS threads.

use std::panic;
use std::sync::Mutex;

use crossbeam_queue::SegQueue;

use crate::defaults;

#[derive(Debug, Clone, Copy)]
pub struct Pool {
    workers: usize,
}

impl Default for Pool {
    fn default() -> Pool {
        Pool::new(defaults::pool_size())
    }
}

impl Pool {
    pub fn new(workers: usize) -> Pool {
        Pool {
            workers: workers.max(1),
        }
    }

    /// Runs every task and returns their results in submission order.
    ///
    /// The batch always drains: a failing task does not stop the others.
    pub fn join<T, F>(&self, tasks: Vec<F>) -> Vec<T>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        let count = tasks.len();
        if count == 0 {
            return vec![];
        }

        let queue = SegQueue::new();
        for task in tasks.into_iter().enumerate() {
            queue.push(task);
        }

        let slots: Mutex<Vec<Option<T>>> = Mutex::new((0..count).map(|_| None).collect());
        let threads = std::cmp::min(self.workers, count);
        log::trace!("Running {} tasks on {} threads", count, threads);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        while let Some((index, task)) = queue.pop() {
                            let result = task();
                            if let Ok(mut slots) = slots.lock() {
                                slots[index] = Some(result);
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                if let Err(payload) = handle.join() {
                    panic::resume_unwind(payload);
                }
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Folds a drained batch: all values, or the first error by submission order.
pub fn first_failure<T, E>(results: Vec<Result<T, E>>) -> Result<Vec<T>, E> {
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn results_keep_submission_order() {
        let pool = Pool::new(4);
        let tasks: Vec<_> = (0..20u64)
            .map(|i| {
                move || {
                    std::thread::sleep(Duration::from_millis(20 - i));
                    i * 2
                }
            })
            .collect();
        let out = pool.join(tasks);
        assert_eq!(out, (0..20u64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn batch_drains_before_reporting_first_failure() {
        let ran = AtomicUsize::new(0);
        let pool = Pool::new(3);
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let ran = &ran;
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if i == 2 || i == 4 {
                        Err(format!("task {}", i))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();

        let results = pool.join(tasks);
        assert_eq!(ran.load(Ordering::SeqCst), 6);
        assert_eq!(first_failure(results), Err("task 2".to_string()));
    }

    #[test]
    fn empty_batch() {
        let out: Vec<()> = Pool::new(2).join(Vec::<fn()>::new());
        assert!(out.is_empty());
    }
}
