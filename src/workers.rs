//! Run scan jobs in parallel on a fixed pool of named worker threads.
//!
//! Unlike a streaming pipeline, scan completion order is irrelevant; jobs are
//! distributed over a bounded channel and the first failure aborts the sweep.

use std::num::NonZero;
use std::thread;

use crossbeam_channel as mpmc;

use crate::error::{Error, Result};

/// Drain `jobs` through `work` on `thread_cnt` worker threads.
///
/// Workers are named `{thread_name}-{idx}`. The first `Err` returned by
/// `work` stops the dispatch and is returned after all workers drained; a
/// panicking worker propagates as a panic on join.
pub(crate) fn run<T, I, F>(
    thread_name: &str,
    thread_cnt: NonZero<usize>,
    jobs: I,
    work: F,
) -> Result<()>
where
    T: Send,
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Result<()> + Sync,
{
    thread::scope(|s| {
        // Bounded so a slow worker backpressures the dispatch instead of
        // queueing the whole job list.
        let (job_tx, job_rx) = mpmc::bounded::<T>(thread_cnt.get() * 2);
        let (err_tx, err_rx) = mpmc::unbounded::<Error>();

        let work = &work;
        let threads = (0..thread_cnt.get())
            .map(|idx| {
                let job_rx = job_rx.clone();
                let err_tx = err_tx.clone();
                thread::Builder::new()
                    .name(format!("{thread_name}-{idx}"))
                    .spawn_scoped(s, move || {
                        while let Ok(job) = job_rx.recv() {
                            if let Err(err) = work(job) {
                                let _ = err_tx.send(err);
                                break;
                            }
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        drop(job_rx);
        drop(err_tx);

        for job in jobs {
            if !err_rx.is_empty() || job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        let worker_panicked = threads
            .into_iter()
            .fold(false, |panicked, t| panicked | t.join().is_err());
        if worker_panicked {
            panic!("scan worker panicked");
        }

        match err_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    })
}
