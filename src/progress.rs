//! Shared progress counters and the background reporter thread.
//!
//! [`Progress`] is a bag of tearing-free scalars written by the scanning and
//! ordering stages and read by external observers. The only cross-thread
//! communication of the ordering engine is [`Progress::nilsimsa_depth`],
//! written once per adaptation step; readers accept a plain relaxed load.
//!
//! [`ProgressThread`] periodically hands the record to a caller-supplied
//! reporter. Rendering is up to the caller; this module only provides the
//! cadence and the final "flush" invocation on shutdown.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use std::{io, thread};

/// Live counters of the scanning and ordering stages.
#[derive(Debug, Default)]
pub struct Progress {
    /// Number of inode content scans completed.
    pub similarity_scans: AtomicU64,
    /// Total bytes hashed by completed scans.
    pub similarity_bytes: AtomicU64,
    /// Number of inodes emitted (numbered and passed to the sink) so far.
    pub inodes_ordered: AtomicU64,
    /// The live search depth of the nilsimsa ordering walk.
    ///
    /// Owned by the ordering engine; it publishes the online-tuned value here
    /// and never reads it back.
    pub nilsimsa_depth: AtomicUsize,
}

impl Progress {
    /// Create a zeroed progress record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish_nilsimsa_depth(&self, depth: usize) {
        self.nilsimsa_depth.store(depth, Relaxed);
    }
}

/// Wake period of the reporter thread.
const REPORT_PERIOD: Duration = Duration::from_millis(200);

/// A background thread periodically invoking a reporter with the progress
/// record.
///
/// The reporter is called roughly every 200 ms with `final_call = false`,
/// and exactly once more with `final_call = true` when the thread is being
/// shut down (on drop). Dropping joins the thread.
#[derive(Debug)]
pub struct ProgressThread {
    shared: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ProgressThread {
    /// Spawn the reporter thread.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the OS fails to spawn a thread.
    pub fn spawn<F>(progress: Arc<Progress>, mut report: F) -> io::Result<Self>
    where
        F: FnMut(&Progress, bool) + Send + 'static,
    {
        let shared = Arc::new((Mutex::new(true), Condvar::new()));
        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new().name("progress".into()).spawn(move || {
                let (running, cond) = &*shared;
                let mut guard = running.lock().expect("progress flag poisoned");
                while *guard {
                    report(&progress, false);
                    (guard, _) = cond
                        .wait_timeout(guard, REPORT_PERIOD)
                        .expect("progress flag poisoned");
                }
                drop(guard);
                report(&progress, true);
            })?
        };
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }
}

impl Drop for ProgressThread {
    fn drop(&mut self) {
        let (running, cond) = &*self.shared;
        if let Ok(mut guard) = running.lock() {
            *guard = false;
        }
        cond.notify_all();
        let panicked = self
            .thread
            .take()
            .is_some_and(|t| t.join().is_err());
        if panicked && !thread::panicking() {
            panic!("progress reporter panicked");
        }
    }
}
