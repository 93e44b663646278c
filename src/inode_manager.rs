//! The inode registry: creation, scanning, and the ordering entry point.

use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;

use log::info;
use measure_time::info_time;

use crate::error::{ErrorInner, Result, bail};
use crate::inode::{Inode, InodeHandle, InodeOptions};
use crate::order::{self, FileOrderMode, FileOrderOptions};
use crate::os_access::OsAccess;
use crate::progress::Progress;
use crate::script::Script;
use crate::workers;

/// Owner of all inodes, from creation through ordering.
///
/// Inodes are created in discovery order and kept in that order until
/// [`order_inodes`][Self::order_inodes] permutes them into their final
/// emission order and numbers them.
#[derive(Debug)]
pub struct InodeManager {
    inodes: Vec<InodeHandle>,
    progress: Arc<Progress>,
}

impl InodeManager {
    /// Create an empty registry reporting to `progress`.
    #[must_use]
    pub fn new(progress: Arc<Progress>) -> Self {
        Self {
            inodes: Vec::new(),
            progress,
        }
    }

    /// Append a fresh inode and return a shared handle to it.
    pub fn create_inode(&mut self) -> InodeHandle {
        let ino = Arc::new(Inode::new());
        self.inodes.push(Arc::clone(&ino));
        ino
    }

    /// The number of inodes created so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inodes.len()
    }

    /// The progress record this registry reports to.
    #[must_use]
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Visit every inode in the current order: creation order before
    /// [`order_inodes`][Self::order_inodes], emission order after.
    pub fn for_each_inode(&self, mut f: impl FnMut(&InodeHandle)) {
        for ino in &self.inodes {
            f(ino);
        }
    }

    /// Scan all inodes for the digests requested in `opts`, on a pool of
    /// `threads` workers.
    ///
    /// Scans are independent; each holds a private mapping of its content
    /// and releases pages as it advances. A no-op when `opts` requests no
    /// digest.
    ///
    /// # Errors
    ///
    /// The first scan failure aborts the sweep and is returned.
    pub fn scan_inodes(
        &self,
        os: &(dyn OsAccess + Sync),
        opts: &InodeOptions,
        threads: NonZero<usize>,
    ) -> Result<()> {
        if !opts.needs_scan() {
            return Ok(());
        }
        info!("scanning {} inodes...", self.count());
        info_time!("{} inodes scanned", self.count());
        workers::run(
            "scan",
            threads,
            self.inodes.iter().cloned(),
            |ino: InodeHandle| {
                ino.scan(os, opts)?;
                self.progress.similarity_scans.fetch_add(1, Relaxed);
                self.progress.similarity_bytes.fetch_add(ino.size()?, Relaxed);
                Ok(())
            },
        )
    }

    /// Order, number, and emit all inodes.
    ///
    /// Permutes the registry according to `options.mode`, assigns each inode
    /// a number starting at `first_inode`, and passes every inode to `sink`
    /// exactly once, in final emission order. The sink's return value is the
    /// block fill signal driving the nilsimsa mode's depth adaptation; other
    /// modes ignore it.
    ///
    /// # Errors
    ///
    /// Returns `Err` if an inode has no files, if `options.mode` is
    /// [`FileOrderMode::Script`] without a script that orders, or on an
    /// internal ordering postcondition failure. Errors are fatal: there is
    /// no partial-success mode.
    pub fn order_inodes(
        &mut self,
        script: Option<&dyn Script>,
        options: &FileOrderOptions,
        first_inode: u32,
        mut sink: impl FnMut(&InodeHandle) -> i32,
    ) -> Result<()> {
        match options.mode {
            FileOrderMode::None => {
                info!("keeping inode order");
            }
            FileOrderMode::Path => {
                info!("ordering {} inodes by path name...", self.count());
                info_time!("{} inodes ordered", self.count());
                order::by_path(&mut self.inodes)?;
            }
            FileOrderMode::Script => {
                let Some(script) = script.filter(|s| s.has_order()) else {
                    bail!(ErrorInner::InvalidRequest("script cannot order inodes"));
                };
                info!("ordering {} inodes using script...", self.count());
                info_time!("{} inodes ordered", self.count());
                script.order(&mut self.inodes);
            }
            FileOrderMode::Similarity => {
                info!("ordering {} inodes by similarity...", self.count());
                info_time!("{} inodes ordered", self.count());
                order::by_similarity(&mut self.inodes)?;
            }
            FileOrderMode::Nilsimsa => {
                info!("ordering {} inodes using nilsimsa similarity...", self.count());
                info_time!("{} inodes ordered", self.count());
                return order::by_nilsimsa(
                    &mut self.inodes,
                    options,
                    first_inode,
                    &self.progress,
                    &mut sink,
                );
            }
        }

        info!("assigning file inodes...");
        let mut num = first_inode;
        for ino in &self.inodes {
            ino.set_num(num);
            num = num.wrapping_add(1);
        }
        for ino in &self.inodes {
            let _ = sink(ino);
            self.progress.inodes_ordered.fetch_add(1, Relaxed);
        }
        Ok(())
    }
}
