// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Running realizations on a fixed set of workers.

Every worker gets a contiguous, disjoint slice of the realization indices
(see [`partition`]), its own random generator seeded with `seed + rank`, and a
shared barrier. Workers are threads of the current process; nothing is
shared between them except the barrier and read-only inputs.

If a worker fails, the barrier is torn down so that the others stop waiting
for it and return [`Error::Aborted`](crate::Error::Aborted).

*/

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use slog::Logger;
use std::ops::Range;
use std::sync::{Condvar, Mutex};
use std::thread;

use crate::error::{Error, Result};


/// Which worker this is, out of how many.
#[derive(Copy,Clone,Debug,Eq,Hash,PartialEq)]
pub struct WorkerContext {
    /// Zero-based index of this worker.
    pub rank: usize,
    /// Total number of workers.
    pub size: usize,
}

impl WorkerContext {
    /// Worker 0 does the global bookkeeping and most of the talking.
    pub fn is_master(&self) -> bool {
        self.rank == 0
    }

    /// This worker's random generator for a base seed.
    pub fn rng(&self, seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed.wrapping_add(self.rank as u64))
    }
}


/// The realizations worker `rank` of `workers` is responsible for.
pub fn partition(total: usize, workers: usize, rank: usize) -> Result<Range<usize>> {
    if workers == 0 || rank >= workers {
        return Err(Error::config(format!("bad worker rank {} of {}", rank, workers)));
    }

    if total % workers != 0 {
        return Err(Error::config(format!(
            "{} realizations cannot be split evenly over {} workers", total, workers
        )));
    }

    let per_worker = total / workers;
    Ok(per_worker * rank..per_worker * (rank + 1))
}


#[derive(Debug,Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// A reusable barrier that can be abandoned.
#[derive(Debug)]
pub struct WorkerBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl WorkerBarrier {
    /// A barrier for `size` participants.
    pub fn new(size: usize) -> Self {
        WorkerBarrier {
            size: size,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    /// Block until all participants have called `wait`, or until the barrier
    /// is aborted.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.aborted {
            return Err(Error::Aborted);
        }

        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(());
        }

        while state.generation == generation && !state.aborted {
            state = self.cvar.wait(state).unwrap_or_else(|e| e.into_inner());
        }

        if state.generation == generation {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Release everyone currently or subsequently waiting, with an error.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.aborted = true;
        self.cvar.notify_all();
    }
}


/// What a worker function is handed.
#[derive(Debug)]
pub struct Worker<'b> {
    /// Rank and pool size.
    pub ctx: WorkerContext,
    barrier: &'b WorkerBarrier,
}

impl<'b> Worker<'b> {
    /// Wait for every other worker to get here.
    pub fn barrier(&self) -> Result<()> {
        self.barrier.wait()
    }
}


/// Run `f` on `size` workers and wait for all of them. The results come back
/// in rank order. If any worker fails, the first real failure (by rank) is
/// returned rather than the `Aborted` errors it caused elsewhere.
pub fn run_workers<T, F>(size: usize, logger: &Logger, f: F) -> Result<Vec<T>>
    where T: Send, F: Fn(&Worker) -> Result<T> + Sync
{
    if size == 0 {
        return Err(Error::config("need at least one worker"));
    }

    let barrier = WorkerBarrier::new(size);

    let results: Vec<Result<T>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..size).map(|rank| {
            let barrier = &barrier;
            let f = &f;

            scope.spawn(move || {
                let worker = Worker { ctx: WorkerContext { rank: rank, size: size }, barrier: barrier };
                let result = f(&worker);

                if result.is_err() {
                    barrier.abort();
                }

                result
            })
        }).collect();

        handles.into_iter().map(|h| {
            h.join().unwrap_or_else(|_| {
                barrier.abort();
                Err(Error::invariant("worker thread panicked"))
            })
        }).collect()
    });

    let mut values = Vec::with_capacity(size);
    let mut aborted = false;
    let mut failure = None;

    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(v) => values.push(v),
            Err(Error::Aborted) => aborted = true,
            Err(e) => {
                error!(logger, "worker failed"; "rank" => rank, "err" => %e);

                if failure.is_none() {
                    failure = Some(e);
                }
            },
        }
    }

    match failure {
        Some(e) => Err(e),
        None if aborted => Err(Error::Aborted),
        None => Ok(values),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use lenstrace_test_support::discard_log;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn partition_is_complete() {
        for &(total, workers) in &[(12, 1), (12, 3), (12, 4), (12, 12), (0, 5)] {
            let mut seen = Vec::new();

            for rank in 0..workers {
                let range = partition(total, workers, rank).unwrap();
                assert_eq!(range.len(), total / workers);
                seen.extend(range);
            }

            assert_eq!(seen, (0..total).collect::<Vec<_>>());
        }
    }

    #[test]
    fn uneven_partition_fails() {
        match partition(10, 3, 0) {
            Err(Error::Config(_)) => {},
            other => panic!("expected a configuration error, got {:?}", other),
        }

        assert!(partition(10, 0, 0).is_err());
        assert!(partition(10, 2, 2).is_err());
    }

    #[test]
    fn per_worker_generators_differ() {
        let a = WorkerContext { rank: 0, size: 2 }.rng(7).gen::<u64>();
        let b = WorkerContext { rank: 1, size: 2 }.rng(7).gen::<u64>();
        let c = WorkerContext { rank: 0, size: 1 }.rng(8).gen::<u64>();
        assert_ne!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn workers_meet_at_barrier() {
        let log = discard_log();
        let counter = AtomicUsize::new(0);

        let out = run_workers(4, &log, |w| {
            counter.fetch_add(1, Ordering::SeqCst);
            w.barrier()?;
            // Everyone has incremented by now.
            let seen = counter.load(Ordering::SeqCst);
            w.barrier()?;
            Ok((w.ctx.rank, seen))
        }).unwrap();

        assert_eq!(out, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }

    #[test]
    fn failure_releases_the_others() {
        let log = discard_log();

        let res: Result<Vec<()>> = run_workers(3, &log, |w| {
            if w.ctx.rank == 1 {
                return Err(Error::config("no planes"));
            }

            w.barrier()
        });

        match res {
            Err(Error::Config(msg)) => assert_eq!(msg, "no planes"),
            other => panic!("expected the first failure, got {:?}", other),
        }
    }
}
