use std::fs;
use std::num::NonZero;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;

use dwarfs_order::similarity::{Nilsimsa, SimilarityHash};
use dwarfs_order::{InodeManager, InodeOptions, MmapOs, Progress, SourceFile};

fn fill_noise(buf: &mut Vec<u8>, seed: u64, len: usize) {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    buf.clear();
    buf.reserve(len);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        buf.push((state >> 32) as u8);
    }
}

fn scan_opts() -> InodeOptions {
    InodeOptions {
        with_similarity: true,
        with_nilsimsa: true,
    }
}

fn manager() -> (InodeManager, Arc<Progress>) {
    let progress = Arc::new(Progress::new());
    (InodeManager::new(Arc::clone(&progress)), progress)
}

#[test]
fn windowed_scan_matches_single_shot() {
    // Larger than one 16 MiB scan window, not window aligned.
    const LEN: usize = (17 << 20) + 123;

    let mut data = Vec::new();
    fill_noise(&mut data, 7, LEN);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big");
    fs::write(&path, &data).unwrap();

    let (mut im, _) = manager();
    let ino = im.create_inode();
    ino.set_files(vec![SourceFile::new(&path, LEN as u64)]).unwrap();
    ino.scan(&MmapOs, &scan_opts()).unwrap();

    let mut sim = SimilarityHash::new();
    sim.update(&data);
    assert_eq!(ino.similarity_hash().unwrap(), sim.finish());

    let mut nil = Nilsimsa::new();
    nil.update(&data);
    assert_eq!(ino.nilsimsa_similarity_hash().unwrap(), &nil.finish());
}

#[test]
fn scan_without_flags_is_noop() {
    let (mut im, _) = manager();
    let ino = im.create_inode();
    // The path does not exist; a no-op scan must not try to map it.
    ino.set_files(vec![SourceFile::new("/nonexistent", 10)]).unwrap();
    ino.scan(&MmapOs, &InodeOptions::default()).unwrap();
    assert_eq!(ino.similarity_hash().unwrap(), 0);
}

#[test]
fn scan_empty_content_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty");
    fs::write(&path, b"").unwrap();

    let (mut im, _) = manager();
    let ino = im.create_inode();
    ino.set_files(vec![SourceFile::new(&path, 0)]).unwrap();
    ino.scan(&MmapOs, &scan_opts()).unwrap();
    assert_eq!(ino.nilsimsa_similarity_hash().unwrap(), &[0; 4]);
}

#[test]
fn scan_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, b"some stable content").unwrap();

    let (mut im, _) = manager();
    let ino = im.create_inode();
    ino.set_files(vec![SourceFile::new(&path, 19)]).unwrap();

    ino.scan(&MmapOs, &scan_opts()).unwrap();
    let first = (
        ino.similarity_hash().unwrap(),
        *ino.nilsimsa_similarity_hash().unwrap(),
    );
    ino.scan(&MmapOs, &scan_opts()).unwrap();
    assert_eq!(
        first,
        (
            ino.similarity_hash().unwrap(),
            *ino.nilsimsa_similarity_hash().unwrap(),
        )
    );
}

#[test]
fn rescan_with_different_options_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, b"write-once digest content").unwrap();

    let (mut im, _) = manager();
    let ino = im.create_inode();
    ino.set_files(vec![SourceFile::new(&path, 25)]).unwrap();

    let similarity_only = InodeOptions {
        with_similarity: true,
        with_nilsimsa: false,
    };
    ino.scan(&MmapOs, &similarity_only).unwrap();

    let mut sim = SimilarityHash::new();
    sim.update(b"write-once digest content");
    assert_eq!(ino.similarity_hash().unwrap(), sim.finish());

    // Digests are write-once: a second scan requesting a different digest
    // kind is a no-op, and the nilsimsa digest stays at its default.
    let nilsimsa_only = InodeOptions {
        with_similarity: false,
        with_nilsimsa: true,
    };
    ino.scan(&MmapOs, &nilsimsa_only).unwrap();
    assert_eq!(ino.nilsimsa_similarity_hash().unwrap(), &[0; 4]);
    assert_eq!(ino.similarity_hash().unwrap(), sim.finish());
}

#[test]
fn parallel_sweep_scans_everything() {
    const COUNT: u64 = 64;

    let dir = tempfile::tempdir().unwrap();
    let (mut im, progress) = manager();
    let mut buf = Vec::new();
    let mut total_bytes = 0;
    for i in 0..COUNT {
        let len = 100 + (i as usize) * 13;
        fill_noise(&mut buf, i, len);
        let path = dir.path().join(format!("f{i:02}"));
        fs::write(&path, &buf).unwrap();
        total_bytes += len as u64;

        let ino = im.create_inode();
        ino.set_files(vec![SourceFile::new(&path, len as u64)]).unwrap();
    }

    im.scan_inodes(&MmapOs, &scan_opts(), NonZero::new(4).unwrap())
        .unwrap();

    assert_eq!(progress.similarity_scans.load(Relaxed), COUNT);
    assert_eq!(progress.similarity_bytes.load(Relaxed), total_bytes);
    im.for_each_inode(|ino| {
        assert_ne!(ino.nilsimsa_similarity_hash().unwrap(), &[0; 4]);
    });
}

#[test]
fn scan_missing_file_fails() {
    let (mut im, _) = manager();
    let ino = im.create_inode();
    ino.set_files(vec![SourceFile::new(PathBuf::from("/definitely/not/here"), 5)])
        .unwrap();

    assert!(
        im.scan_inodes(&MmapOs, &scan_opts(), NonZero::new(2).unwrap())
            .is_err()
    );
}
