//! Inode ordering strategies.
//!
//! The layout of file contents inside compressor blocks is decided here:
//! inodes are permuted into their final emission order, numbered, and handed
//! to the sink one by one. Placing byte-similar contents adjacently lets
//! long-range back-references cross file boundaries, which is where most of
//! the compression ratio comes from.
//!
//! The nilsimsa mode is a greedy nearest-neighbor traversal over the digest
//! space with a bounded, online-tuned search window; see
//! [`by_nilsimsa`](self) internals for the exact shape.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::trace;

use crate::error::{ErrorInner, Result, bail};
use crate::inode::InodeHandle;
use crate::progress::Progress;
use crate::similarity::{NilsimsaDigest, nilsimsa_similarity};

/// Strategy used to lay out file inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileOrderMode {
    /// Keep inode creation order.
    None,
    /// Sort by full path, bytewise ascending.
    Path,
    /// Delegate the permutation to a [`Script`][crate::Script] collaborator.
    Script,
    /// Sort by the 32-bit similarity fingerprint.
    Similarity,
    /// Greedy nearest-neighbor walk over nilsimsa digests.
    #[default]
    Nilsimsa,
}

/// File ordering configuration.
#[derive(Debug, Clone)]
pub struct FileOrderOptions {
    /// The ordering strategy.
    pub mode: FileOrderMode,
    /// Nilsimsa only: upper bound of the greedy search window, `>= 1`.
    pub nilsimsa_max_depth: u32,
    /// Nilsimsa only: lower bound of the greedy search window,
    /// `<= nilsimsa_max_depth`.
    pub nilsimsa_min_depth: u32,
    /// Nilsimsa only: a candidate at least this similar to the reference is
    /// taken immediately without scanning the rest of the window, `0..=255`.
    pub nilsimsa_limit: u32,
}

impl Default for FileOrderOptions {
    fn default() -> Self {
        Self {
            mode: FileOrderMode::default(),
            nilsimsa_max_depth: 20000,
            nilsimsa_min_depth: 1000,
            nilsimsa_limit: 255,
        }
    }
}

fn name_of(path: &Path) -> &OsStr {
    path.file_name().unwrap_or_else(|| path.as_os_str())
}

/// Sort inodes by path, bytewise ascending.
pub(crate) fn by_path(inodes: &mut Vec<InodeHandle>) -> Result<()> {
    let paths = inodes
        .iter()
        .map(|ino| Ok(ino.any()?.path().to_owned()))
        .collect::<Result<Vec<_>>>()?;

    let mut index: Vec<usize> = (0..inodes.len()).collect();
    index.sort_by(|&a, &b| paths[a].as_os_str().cmp(paths[b].as_os_str()));

    *inodes = index.iter().map(|&ix| Arc::clone(&inodes[ix])).collect();
    Ok(())
}

/// Sort inodes by `(fingerprint asc, size desc, path asc)`.
pub(crate) fn by_similarity(inodes: &mut Vec<InodeHandle>) -> Result<()> {
    let mut keyed = inodes
        .iter()
        .map(|ino| {
            Ok((
                ino.similarity_hash()?,
                ino.size()?,
                ino.any()?.path().to_owned(),
                Arc::clone(ino),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by(|(ha, sa, pa, _), (hb, sb, pb, _)| {
        ha.cmp(hb)
            .then_with(|| sb.cmp(sa))
            .then_with(|| pa.as_os_str().cmp(pb.as_os_str()))
    });

    *inodes = keyed.into_iter().map(|(.., ino)| ino).collect();
    Ok(())
}

/// Emissions before depth adaptation starts.
const ADAPT_WARMUP: u64 = 4096;
/// Adaptation runs on every this-many-th emission after warmup.
const ADAPT_CADENCE: u64 = 32;
/// Smoothing factor of the depth moving average.
const ADAPT_SMOOTH: i64 = 512;
/// A fill signal of this many corresponds to a half-full block.
const FILL_HALF: i64 = 2048;

/// One remaining inode of the greedy walk.
///
/// The digest is copied out of the inode so the comparison loop touches one
/// contiguous record per candidate and never re-locks the handle.
struct Candidate {
    size: u64,
    digest: NilsimsaDigest,
    path: PathBuf,
    ino: InodeHandle,
}

/// Greedy nearest-neighbor ordering over nilsimsa digests.
///
/// Empty inodes (at most one after upstream dedup) are emitted first. The
/// remaining inodes are presorted by `(size, basename, path)` with the
/// maximum at the tail of an index vector; the walk seeds with that maximum
/// and then repeatedly takes, from the last `depth` index entries, the
/// candidate most similar to the previously emitted inode. The sink's fill
/// signal steers `depth` between the configured bounds: a filling block
/// narrows the search, a draining one widens it.
pub(crate) fn by_nilsimsa(
    inodes: &mut Vec<InodeHandle>,
    options: &FileOrderOptions,
    first_inode: u32,
    progress: &Progress,
    sink: &mut dyn FnMut(&InodeHandle) -> i32,
) -> Result<()> {
    let count = inodes.len();
    let max_depth = usize::try_from(options.nilsimsa_max_depth.max(1)).expect("u32 fits usize");
    let min_depth = usize::try_from(options.nilsimsa_min_depth).expect("u32 fits usize");
    let min_depth = min_depth.min(max_depth);
    let limit = options.nilsimsa_limit.min(255) as i32;

    // Split out empty inodes and snapshot the walk keys before any mutation.
    let mut empties = Vec::new();
    let mut cands = Vec::with_capacity(count);
    for ino in inodes.iter() {
        if ino.size()? == 0 {
            empties.push(Arc::clone(ino));
        } else {
            cands.push(Candidate {
                size: ino.size()?,
                digest: *ino.nilsimsa_similarity_hash()?,
                path: ino.any()?.path().to_owned(),
                ino: Arc::clone(ino),
            });
        }
    }

    inodes.clear();
    let mut next_num = first_inode;
    let mut depth = max_depth;
    progress.publish_nilsimsa_depth(depth);

    macro_rules! finalize {
        ($ino:expr) => {{
            let ino: InodeHandle = $ino;
            ino.set_num(next_num);
            next_num = next_num.wrapping_add(1);
            let fill = sink(&ino);
            progress
                .inodes_ordered
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            inodes.push(ino);
            fill
        }};
    }

    for ino in empties {
        let _ = finalize!(ino);
    }

    // Presort: ascending composite key, so the maximum sits at the tail and
    // the walk removes entries with a pop.
    let mut index: Vec<u32> = (0..cands.len())
        .map(|i| u32::try_from(i).expect("inode count fits u32"))
        .collect();
    index.sort_by(|&a, &b| {
        let (ca, cb) = (&cands[a as usize], &cands[b as usize]);
        (ca.size, name_of(&ca.path), ca.path.as_os_str())
            .cmp(&(cb.size, name_of(&cb.path), cb.path.as_os_str()))
    });

    // Seed with the largest inode.
    let mut ref_digest = [0u64; 4];
    if let Some(seed) = index.pop() {
        let cand = &cands[seed as usize];
        ref_digest = cand.digest;
        let _ = finalize!(Arc::clone(&cand.ino));
    }

    while !index.is_empty() {
        let window = depth.min(index.len());
        let tail = index.len();

        // Scan the window from the tail backwards; the first best wins.
        let mut best_pos = tail - 1;
        let mut best_sim = i32::MIN;
        for pos in (tail - window..tail).rev() {
            let sim = nilsimsa_similarity(&ref_digest, &cands[index[pos] as usize].digest);
            if sim > best_sim {
                best_sim = sim;
                best_pos = pos;
                if sim >= limit {
                    break;
                }
            }
        }

        // Remove the chosen entry keeping the rest in order.
        index[best_pos..].rotate_left(1);
        let chosen = index.pop().expect("index is non-empty") as usize;

        ref_digest = cands[chosen].digest;
        let fill = finalize!(Arc::clone(&cands[chosen].ino));

        let emitted = inodes.len() as u64;
        if emitted >= ADAPT_WARMUP && emitted % ADAPT_CADENCE == 0 {
            let target = i64::from(fill) * max_depth as i64 / FILL_HALF;
            let smoothed = ((ADAPT_SMOOTH - 1) * depth as i64 + target) / ADAPT_SMOOTH;
            depth = smoothed.clamp(min_depth as i64, max_depth as i64) as usize;
            progress.publish_nilsimsa_depth(depth);
            trace!("nilsimsa search depth adapted to {depth} (fill {fill})");
        }
    }

    if inodes.len() != count {
        bail!(ErrorInner::Internal("nilsimsa ordering failed"));
    }
    Ok(())
}
