//! Inode ordering for [DwarFS][dwarfs] archive writing.
//!
//! [dwarfs]: https://github.com/mhx/dwarfs
//!
//! Before a DwarFS writer packs file contents into compressed blocks, it
//! decides in which order to lay the files out. Byte-similar files placed
//! adjacently compress dramatically better, because long-range
//! back-references cross file boundaries. This crate implements that
//! ordering stage: it takes deduplicated groups of files ([`Inode`]s),
//! optionally scans their content for similarity digests, and emits a total
//! order over them, assigning each inode its final number as it is
//! finalized.
//!
//! Four strategies are provided (see [`FileOrderMode`]); the interesting one
//! is nilsimsa ordering, a greedy nearest-neighbor traversal over a
//! locality-sensitive hash space whose search depth adapts online to block
//! fill feedback from the downstream compressor.
//!
//! This crate does not compress, serialize metadata, or read archives; those
//! stages are external collaborators. The output is the in-memory emission
//! sequence delivered through the sink callback.
//!
//! ## Examples
//!
//! ```
//! use dwarfs_order::{FileOrderMode, FileOrderOptions, InodeManager, Progress, SourceFile};
//! use std::sync::Arc;
//!
//! # fn work() -> dwarfs_order::Result<()> {
//! let progress = Arc::new(Progress::new());
//! let mut im = InodeManager::new(Arc::clone(&progress));
//!
//! // One inode per group of content-identical files.
//! for (path, size) in [("dir/b.txt", 10), ("dir/a.txt", 20)] {
//!     let ino = im.create_inode();
//!     ino.set_files(vec![SourceFile::new(path, size)])?;
//! }
//!
//! // Order by path; the sink sees every inode once, in emission order.
//! let options = FileOrderOptions {
//!     mode: FileOrderMode::Path,
//!     ..FileOrderOptions::default()
//! };
//! let mut emitted = Vec::new();
//! im.order_inodes(None, &options, 0, |ino| {
//!     emitted.push(ino.any().unwrap().path().to_owned());
//!     0 // block fill feedback; only the nilsimsa mode consumes it
//! })?;
//! assert_eq!(emitted[0], std::path::Path::new("dir/a.txt"));
//! # Ok(()) }
//! # work().unwrap();
//! ```
//!
//! For nilsimsa or similarity ordering, scan inodes first (possibly on a
//! worker pool) so they carry digests:
//!
//! ```no_run
//! use dwarfs_order::{InodeManager, InodeOptions, MmapOs, Progress};
//! use std::{num::NonZero, sync::Arc};
//!
//! # fn work() -> dwarfs_order::Result<()> {
//! let im = InodeManager::new(Arc::new(Progress::new()));
//! let opts = InodeOptions { with_nilsimsa: true, ..InodeOptions::default() };
//! im.scan_inodes(&MmapOs, &opts, NonZero::new(4).unwrap())?;
//! # Ok(()) }
//! ```
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod error;
mod inode;
mod inode_manager;
mod order;
mod progress;
mod script;
mod workers;

pub mod os_access;
pub mod similarity;

pub use error::{Error, Result};
pub use inode::{Chunk, Inode, InodeHandle, InodeOptions, SourceFile};
pub use inode_manager::InodeManager;
pub use order::{FileOrderMode, FileOrderOptions};
pub use os_access::{MappedFile, MmapOs, OsAccess};
pub use progress::{Progress, ProgressThread};
pub use script::Script;
