//! Inodes: groups of content-identical files, plus their content digests.
//!
//! Upstream deduplication groups files with identical content; each group
//! becomes one [`Inode`]. The inode owns the file list, the similarity
//! digests computed by [`scan`][Inode::scan], the final inode number assigned
//! by ordering, and the chunk list appended by the downstream compressor.
//!
//! Inodes are shared: the registry keeps a handle, and so may the ordering
//! sink and a script collaborator. All mutation is either write-once
//! (files, digests) or atomic (number, chunk list), so a plain
//! [`InodeHandle`] is safe to pass across threads during the scan stage.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{ErrorInner, Result, bail};
use crate::os_access::OsAccess;
use crate::similarity::{Nilsimsa, NilsimsaDigest, SimilarityHash};

/// A shared handle to a registry-owned inode.
pub type InodeHandle = Arc<Inode>;

/// Scan window size. Content is hashed and released in chunks of this size,
/// capping the resident set of a scan.
const SCAN_WINDOW: usize = 16 << 20;

const NUM_UNASSIGNED: u32 = u32::MAX;

const ZERO_DIGEST: NilsimsaDigest = [0; 4];

/// One source file assigned to an inode.
///
/// All files of an inode are identical in content, so any of them can stand
/// in for the inode's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    size: u64,
}

impl SourceFile {
    /// Create a file record from its full path and size.
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }

    /// The full path of the file.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The basename of the file.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_else(|| self.path.as_os_str())
    }

    /// The file size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A chunk of file content inside a compressor block, appended post-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// The block this chunk lives in.
    pub block: u32,
    /// Byte offset inside the block.
    pub offset: u32,
    /// Length in bytes.
    pub size: u32,
}

/// Which digests [`Inode::scan`] should compute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InodeOptions {
    /// Compute the 32-bit similarity fingerprint (similarity ordering mode).
    pub with_similarity: bool,
    /// Compute the 256-bit nilsimsa digest (nilsimsa ordering mode).
    pub with_nilsimsa: bool,
}

impl InodeOptions {
    pub(crate) fn needs_scan(&self) -> bool {
        self.with_similarity || self.with_nilsimsa
    }
}

#[derive(Debug)]
struct Digests {
    similarity: Option<u32>,
    nilsimsa: Option<NilsimsaDigest>,
}

/// A group of content-identical files, ordered and numbered as one unit.
///
/// Created through [`InodeManager::create_inode`][crate::InodeManager::create_inode].
#[derive(Debug)]
pub struct Inode {
    files: OnceLock<Vec<SourceFile>>,
    digests: OnceLock<Digests>,
    num: AtomicU32,
    chunks: Mutex<Vec<Chunk>>,
}

impl Inode {
    pub(crate) fn new() -> Self {
        Self {
            files: OnceLock::new(),
            digests: OnceLock::new(),
            num: AtomicU32::new(NUM_UNASSIGNED),
            chunks: Mutex::new(Vec::new()),
        }
    }

    /// Assign the source files sharing this inode's content.
    ///
    /// # Errors
    ///
    /// Returns `Err` if files were already set; the file set is immutable
    /// once assigned.
    pub fn set_files(&self, files: Vec<SourceFile>) -> Result<()> {
        if self.files.set(files).is_err() {
            bail!(ErrorInner::AlreadySet);
        }
        Ok(())
    }

    /// All source files of this inode, in insertion order.
    ///
    /// Empty if no files have been assigned yet.
    #[must_use]
    pub fn files(&self) -> &[SourceFile] {
        self.files.get().map_or(&[], Vec::as_slice)
    }

    /// Any file of this inode (the first assigned one).
    ///
    /// # Errors
    ///
    /// Returns `Err` if the inode has no files.
    pub fn any(&self) -> Result<&SourceFile> {
        let Some(file) = self.files().first() else {
            bail!(ErrorInner::NoFile);
        };
        Ok(file)
    }

    /// The content size in bytes, identical for every file of the inode.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the inode has no files.
    pub fn size(&self) -> Result<u64> {
        Ok(self.any()?.size())
    }

    /// Compute the digests requested in `opts` over this inode's content.
    ///
    /// A no-op when no digest is requested, when the content is empty, or
    /// when a previous scan already stored the digests. The representative
    /// file is mapped once and hashed in bounded windows; after each full
    /// window the mapping is hinted to release the bytes behind the cursor.
    ///
    /// Digests are write-once: the first scan that stores them wins, even if
    /// a later call requests a digest kind the first one did not compute.
    /// Request every digest kind the ordering will need in one scan; a digest
    /// that was never computed reads back as its default value, not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the inode has no files, or on mapping failure.
    pub fn scan(&self, os: &dyn OsAccess, opts: &InodeOptions) -> Result<()> {
        if !opts.needs_scan() || self.digests.get().is_some() {
            return Ok(());
        }

        let file = self.any()?;
        let size = file.size();
        if size == 0 {
            return Ok(());
        }

        let view = os.map_file(file.path(), size)?;
        let data = view.bytes();

        let mut similarity = opts.with_similarity.then(SimilarityHash::new);
        let mut nilsimsa = opts.with_nilsimsa.then(Nilsimsa::new);

        let mut offset = 0;
        while offset < data.len() {
            let end = usize::min(offset + SCAN_WINDOW, data.len());
            let window = &data[offset..end];
            if let Some(h) = &mut similarity {
                h.update(window);
            }
            if let Some(h) = &mut nilsimsa {
                h.update(window);
            }
            if window.len() == SCAN_WINDOW {
                view.release_until(end as u64);
            }
            offset = end;
        }

        // Lost race with a concurrent scan of the same inode: both computed
        // identical digests, so either result may be kept.
        let _ = self.digests.set(Digests {
            similarity: similarity.map(|h| h.finish()),
            nilsimsa: nilsimsa.map(|h| h.finish()),
        });
        Ok(())
    }

    /// The 32-bit similarity fingerprint, or 0 if no similarity scan ran.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the inode has no files.
    pub fn similarity_hash(&self) -> Result<u32> {
        self.any()?;
        Ok(self
            .digests
            .get()
            .and_then(|d| d.similarity)
            .unwrap_or_default())
    }

    /// The nilsimsa digest, or the zero digest if no nilsimsa scan ran.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the inode has no files.
    pub fn nilsimsa_similarity_hash(&self) -> Result<&NilsimsaDigest> {
        self.any()?;
        Ok(self
            .digests
            .get()
            .and_then(|d| d.nilsimsa.as_ref())
            .unwrap_or(&ZERO_DIGEST))
    }

    /// Assign the final inode number. Called by the ordering engine as the
    /// inode is emitted.
    pub fn set_num(&self, num: u32) {
        self.num.store(num, Relaxed);
    }

    /// The assigned inode number, or `None` before ordering finalizes it.
    #[must_use]
    pub fn num(&self) -> Option<u32> {
        match self.num.load(Relaxed) {
            NUM_UNASSIGNED => None,
            n => Some(n),
        }
    }

    /// Record a content chunk placed by the compressor.
    pub fn add_chunk(&self, block: u32, offset: u32, size: u32) {
        self.chunks
            .lock()
            .expect("chunk list poisoned")
            .push(Chunk {
                block,
                offset,
                size,
            });
    }

    /// Append this inode's chunks to `out`, in placement order.
    pub fn append_chunks_to(&self, out: &mut Vec<Chunk>) {
        out.extend_from_slice(&self.chunks.lock().expect("chunk list poisoned"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_files_twice_fails() {
        let ino = Inode::new();
        ino.set_files(vec![SourceFile::new("/a", 1)]).unwrap();
        let err = ino.set_files(vec![SourceFile::new("/b", 1)]).unwrap_err();
        assert_eq!(err.to_string(), "files already set for inode");
    }

    #[test]
    fn empty_inode_faults() {
        let ino = Inode::new();
        assert_eq!(ino.any().unwrap_err().to_string(), "inode has no file");
        assert!(ino.size().is_err());
        assert!(ino.similarity_hash().is_err());
        assert!(ino.nilsimsa_similarity_hash().is_err());
        assert!(ino.files().is_empty());
    }

    #[test]
    fn unscanned_digests_default() {
        let ino = Inode::new();
        ino.set_files(vec![SourceFile::new("/a", 3)]).unwrap();
        assert_eq!(ino.similarity_hash().unwrap(), 0);
        assert_eq!(ino.nilsimsa_similarity_hash().unwrap(), &[0; 4]);
    }

    #[test]
    fn number_assignment() {
        let ino = Inode::new();
        assert_eq!(ino.num(), None);
        ino.set_num(7);
        assert_eq!(ino.num(), Some(7));
    }

    #[test]
    fn chunk_bookkeeping() {
        let ino = Inode::new();
        ino.add_chunk(0, 0, 100);
        ino.add_chunk(0, 100, 50);
        let mut out = vec![Chunk {
            block: 9,
            offset: 9,
            size: 9,
        }];
        ino.append_chunks_to(&mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], Chunk { block: 0, offset: 0, size: 100 });
        assert_eq!(out[2], Chunk { block: 0, offset: 100, size: 50 });
    }

    #[test]
    fn file_name_is_basename() {
        let f = SourceFile::new("/some/dir/file.txt", 1);
        assert_eq!(f.name(), "file.txt");
    }
}
