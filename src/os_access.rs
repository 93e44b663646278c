//! Host filesystem access for content scanning.
//!
//! The scanner does not read files through `std::io`; it asks an [`OsAccess`]
//! for a mapped view of the whole file and walks it in bounded windows,
//! hinting via [`MappedFile::release_until`] that pages behind the cursor may
//! be reclaimed. This keeps the resident set capped at one window per
//! concurrent scan regardless of file size.
//!
//! [`MmapOs`] is the production implementation on top of `memmap2`. Tests and
//! embedders may provide their own `OsAccess` (eg. an in-memory one).

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

/// Access to host file contents, as consumed by the scanning stage.
pub trait OsAccess {
    /// Map `size` bytes of the file at `path` into memory.
    ///
    /// `size` is the file size recorded at discovery time; mapping fails if
    /// the file has shrunk below it since.
    fn map_file(&self, path: &Path, size: u64) -> io::Result<Box<dyn MappedFile + '_>>;
}

/// A read-only view into a mapped file.
pub trait MappedFile {
    /// The full mapped content.
    fn bytes(&self) -> &[u8];

    /// Hint that bytes before `offset` are no longer needed and their backing
    /// pages may be reclaimed. Purely advisory; implementations may ignore it.
    fn release_until(&self, offset: u64);
}

/// [`OsAccess`] implementation backed by `memmap2` memory mappings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapOs;

impl OsAccess for MmapOs {
    fn map_file(&self, path: &Path, size: u64) -> io::Result<Box<dyn MappedFile + '_>> {
        let file = File::open(path)?;
        // Safety: the map is read-only and private to this scan. Concurrent
        // truncation of the underlying file can still fault reads, which is
        // the usual contract for file-backed mappings.
        let map = unsafe { Mmap::map(&file) }?;
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file size exceeds usize"))?;
        if map.len() < size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file {} shrunk below {size} bytes", path.display()),
            ));
        }
        // The scanner walks forward only.
        #[cfg(unix)]
        let _ = map.advise(memmap2::Advice::Sequential);
        Ok(Box::new(MmapFile { map, size }))
    }
}

struct MmapFile {
    map: Mmap,
    size: usize,
}

/// Page-multiple alignment for release hints. Window ends are 16 MiB aligned,
/// so this only matters for a trailing partial window, which is never released.
const RELEASE_ALIGN: u64 = 64 << 10;

impl MappedFile for MmapFile {
    fn bytes(&self) -> &[u8] {
        &self.map[..self.size]
    }

    fn release_until(&self, offset: u64) {
        let len = offset.min(self.size as u64) & !(RELEASE_ALIGN - 1);
        if len == 0 {
            return;
        }
        // Safety: dropping clean pages of a read-only file-backed map cannot
        // lose data; subsequent reads fault them back in.
        #[cfg(unix)]
        let _ = unsafe {
            self.map
                .unchecked_advise_range(memmap2::UncheckedAdvice::DontNeed, 0, len as usize)
        };
        #[cfg(not(unix))]
        let _ = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn map_and_release() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let os = MmapOs;
        let view = os.map_file(f.path(), data.len() as u64).unwrap();
        assert_eq!(view.bytes(), &data[..]);
        // Hints must not invalidate the view.
        view.release_until(128 << 10);
        assert_eq!(view.bytes(), &data[..]);
    }

    #[test]
    fn map_shorter_view() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[7u8; 1000]).unwrap();
        f.flush().unwrap();

        let view = MmapOs.map_file(f.path(), 100).unwrap();
        assert_eq!(view.bytes().len(), 100);
    }

    #[test]
    fn map_shrunk_file_fails() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 10]).unwrap();
        f.flush().unwrap();

        assert!(MmapOs.map_file(f.path(), 1000).is_err());
    }
}
