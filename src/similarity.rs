//! Content similarity digests used to decide file layout.
//!
//! Two independent, streamable hashes are provided:
//!
//! - [`SimilarityHash`]: a 32-bit fingerprint used purely as a sort key by
//!   the similarity ordering mode. Files with close byte distributions get
//!   close fingerprints and end up adjacent after sorting.
//! - [`Nilsimsa`]: the 256-bit nilsimsa locality-sensitive hash. Similarity
//!   between two digests is a Hamming-distance metric in `[-255, 255]`,
//!   computed by [`nilsimsa_similarity`].
//!
//! Both hashers accept content in arbitrarily sized chunks and produce the
//! final value on [`finish`][Nilsimsa::finish], so files larger than the scan
//! window are processed without ever being resident in full.

use std::sync::OnceLock;

/// A 256-bit nilsimsa digest, packed as four 64-bit words.
///
/// Bit `i` of the digest is bit `i % 64` of word `i / 64`.
pub type NilsimsaDigest = [u64; 4];

/// Streaming 32-bit similarity fingerprint.
///
/// The fingerprint packs the four most frequent byte values of the content
/// (most frequent in the most significant position; ties break towards the
/// smaller byte value). It is deterministic and depends on the full file
/// contents, but not on how the content is chunked into `update` calls.
#[derive(Clone)]
pub struct SimilarityHash {
    counts: [u64; 256],
}

impl std::fmt::Debug for SimilarityHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityHash")
            .field("hash", &self.finish())
            .finish()
    }
}

impl Default for SimilarityHash {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityHash {
    /// Create an empty hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self { counts: [0; 256] }
    }

    /// Feed a chunk of content.
    pub fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.counts[usize::from(b)] += 1;
        }
    }

    /// Produce the fingerprint over everything fed so far.
    #[must_use]
    pub fn finish(&self) -> u32 {
        let mut order: [u8; 256] = std::array::from_fn(|i| i as u8);
        order.sort_unstable_by_key(|&b| (std::cmp::Reverse(self.counts[usize::from(b)]), b));
        u32::from_be_bytes([order[0], order[1], order[2], order[3]])
    }
}

/// Streaming nilsimsa hasher.
///
/// This is the published nilsimsa locality-sensitive hash: every input byte
/// contributes up to 8 trigrams (selected over a 5-byte window) to 256
/// accumulators; the digest sets bit `i` iff accumulator `i` exceeds the mean
/// trigram count.
#[derive(Clone)]
pub struct Nilsimsa {
    acc: [u64; 256],
    /// Last 4 input bytes, most recent first.
    window: [u8; 4],
    count: u64,
}

impl std::fmt::Debug for Nilsimsa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nilsimsa")
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl Default for Nilsimsa {
    fn default() -> Self {
        Self::new()
    }
}

/// The nilsimsa 53-cycle transition table.
#[rustfmt::skip]
const TRAN: [u8; 256] = [
    0x02, 0xD6, 0x9E, 0x6F, 0xF9, 0x1D, 0x04, 0xAB, 0xD0, 0x22, 0x16, 0x1F, 0xD8, 0x73, 0xA1, 0xAC,
    0x3B, 0x70, 0x62, 0x96, 0x1E, 0x6E, 0x8F, 0x39, 0x9D, 0x05, 0x14, 0x4A, 0xA6, 0xBE, 0xAE, 0x0E,
    0xCF, 0xB9, 0x9C, 0x9A, 0xC7, 0x68, 0x13, 0xE1, 0x2D, 0xA4, 0xEB, 0x51, 0x8D, 0x64, 0x6B, 0x50,
    0x23, 0x80, 0x03, 0x41, 0xEC, 0xBB, 0x71, 0xCC, 0x7A, 0x86, 0x7F, 0x98, 0xF2, 0x36, 0x5E, 0xEE,
    0x8E, 0xCE, 0x4F, 0xB8, 0x32, 0xB6, 0x5F, 0x59, 0xDC, 0x1B, 0x31, 0x4C, 0x7B, 0xF0, 0x63, 0x01,
    0x6C, 0xBA, 0x07, 0xE8, 0x12, 0x77, 0x49, 0x3C, 0xDA, 0x46, 0xFE, 0x2F, 0x79, 0x1C, 0x9B, 0x30,
    0xE3, 0x00, 0x06, 0x7E, 0x2E, 0x0F, 0x38, 0x33, 0x21, 0xAD, 0xA5, 0x54, 0xCA, 0xA7, 0x29, 0xFC,
    0x5A, 0x47, 0x69, 0x7D, 0xC5, 0x95, 0xB5, 0xF4, 0x0B, 0x90, 0xA3, 0x81, 0x6D, 0x25, 0x55, 0x35,
    0xF5, 0x75, 0x74, 0x0A, 0x26, 0xBF, 0x19, 0x5C, 0x1A, 0xC6, 0xFF, 0x99, 0x5D, 0x84, 0xAA, 0x66,
    0x3E, 0xAF, 0x78, 0xB3, 0x20, 0x43, 0xC1, 0xED, 0x24, 0xEA, 0xE6, 0x3F, 0x18, 0xF3, 0xA0, 0x42,
    0x57, 0x08, 0x53, 0x60, 0xC3, 0xC0, 0x83, 0x40, 0x82, 0xD7, 0x09, 0xBD, 0x44, 0x2A, 0x67, 0xA8,
    0x93, 0xE0, 0xC2, 0x56, 0x9F, 0xD9, 0xDD, 0x85, 0x15, 0xB4, 0x8A, 0x27, 0x28, 0x92, 0x76, 0xDE,
    0xEF, 0xF8, 0xB2, 0xB7, 0xC9, 0x3D, 0x45, 0x94, 0x4B, 0x11, 0x0D, 0x65, 0xD5, 0x34, 0x8B, 0x91,
    0x0C, 0xFA, 0x87, 0xE9, 0x7C, 0x5B, 0xB1, 0x4D, 0xE5, 0xD4, 0xCB, 0x10, 0xA2, 0x17, 0x89, 0xBC,
    0xDB, 0xB0, 0xE2, 0x97, 0x88, 0x52, 0xF7, 0x48, 0xD3, 0x61, 0x2C, 0x3A, 0x2B, 0xD1, 0x8C, 0xFB,
    0xF1, 0xCD, 0xE4, 0x6A, 0xE7, 0xA9, 0xFD, 0xC4, 0x37, 0xC8, 0xD2, 0xF6, 0xDF, 0x58, 0x72, 0x4E,
];

#[inline]
fn tran3(a: u8, b: u8, c: u8, n: u8) -> usize {
    let m = u32::from(TRAN[usize::from(a.wrapping_add(n))])
        ^ u32::from(TRAN[usize::from(b)]) * (u32::from(n) * 2 + 1);
    usize::from((m.wrapping_add(u32::from(TRAN[usize::from(c ^ TRAN[usize::from(n)])])) & 0xff) as u8)
}

impl Nilsimsa {
    /// Create an empty hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            acc: [0; 256],
            window: [0; 4],
            count: 0,
        }
    }

    /// Feed a chunk of content.
    ///
    /// Chunk boundaries do not affect the final digest: the 5-byte trigram
    /// window is carried across calls.
    pub fn update(&mut self, data: &[u8]) {
        let mut w = self.window;
        let mut n = self.count;
        for &c in data {
            if n >= 2 {
                self.acc[tran3(c, w[0], w[1], 0)] += 1;
            }
            if n >= 3 {
                self.acc[tran3(c, w[0], w[2], 1)] += 1;
                self.acc[tran3(c, w[1], w[2], 2)] += 1;
            }
            if n >= 4 {
                self.acc[tran3(c, w[0], w[3], 3)] += 1;
                self.acc[tran3(c, w[1], w[3], 4)] += 1;
                self.acc[tran3(c, w[2], w[3], 5)] += 1;
                self.acc[tran3(w[3], w[0], c, 6)] += 1;
                self.acc[tran3(w[3], w[2], c, 7)] += 1;
            }
            w = [c, w[0], w[1], w[2]];
            n += 1;
        }
        self.window = w;
        self.count = n;
    }

    /// Produce the digest over everything fed so far.
    #[must_use]
    pub fn finish(&self) -> NilsimsaDigest {
        let total = match self.count {
            0..=2 => 0,
            3 => 1,
            4 => 4,
            n => 8 * n - 28,
        };
        let threshold = total / 256;

        let mut digest = [0u64; 4];
        for (i, &a) in self.acc.iter().enumerate() {
            if a > threshold {
                digest[i / 64] |= 1u64 << (i % 64);
            }
        }
        digest
    }
}

type DistanceFn = fn(&NilsimsaDigest, &NilsimsaDigest) -> u32;

fn distance_generic(a: &NilsimsaDigest, b: &NilsimsaDigest) -> u32 {
    (a[0] ^ b[0]).count_ones()
        + (a[1] ^ b[1]).count_ones()
        + (a[2] ^ b[2]).count_ones()
        + (a[3] ^ b[3]).count_ones()
}

/// Same bit-counting as [`distance_generic`], compiled with `popcnt` enabled
/// so the counts lower to single instructions.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "popcnt")]
unsafe fn distance_popcnt(a: &NilsimsaDigest, b: &NilsimsaDigest) -> u32 {
    (a[0] ^ b[0]).count_ones()
        + (a[1] ^ b[1]).count_ones()
        + (a[2] ^ b[2]).count_ones()
        + (a[3] ^ b[3]).count_ones()
}

fn select_distance_fn() -> DistanceFn {
    #[cfg(target_arch = "x86_64")]
    if std::arch::is_x86_feature_detected!("popcnt") {
        // Safety: feature presence was just checked at runtime.
        return |a, b| unsafe { distance_popcnt(a, b) };
    }
    distance_generic
}

/// Similarity between two nilsimsa digests: `255 - 2 * popcount(a ^ b)`.
///
/// The result is in `[-255, 255]`; larger means more similar, and
/// `nilsimsa_similarity(a, a) == 255`.
///
/// The bit-counting kernel is selected once per process based on runtime CPU
/// features; all variants produce identical results.
#[must_use]
pub fn nilsimsa_similarity(a: &NilsimsaDigest, b: &NilsimsaDigest) -> i32 {
    static DISTANCE: OnceLock<DistanceFn> = OnceLock::new();
    let distance = *DISTANCE.get_or_init(select_distance_fn);
    255 - 2 * distance(a, b) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tran_is_a_permutation() {
        let mut seen = [false; 256];
        for &b in &TRAN {
            assert!(!seen[usize::from(b)]);
            seen[usize::from(b)] = true;
        }
    }

    #[test]
    fn similarity_metric() {
        let mut h = Nilsimsa::new();
        h.update(b"The quick brown fox jumps over the lazy dog");
        let a = h.finish();

        let mut h = Nilsimsa::new();
        h.update(b"A completely different line of text, nothing shared");
        let b = h.finish();

        assert_eq!(nilsimsa_similarity(&a, &a), 255);
        assert_eq!(nilsimsa_similarity(&b, &b), 255);
        assert_eq!(nilsimsa_similarity(&a, &b), nilsimsa_similarity(&b, &a));
        let sim = nilsimsa_similarity(&a, &b);
        assert!((-255..=255).contains(&sim));
    }

    #[test]
    fn similar_content_scores_higher() {
        let base: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut tweaked = base.clone();
        tweaked[100] ^= 0xff;
        tweaked[2000] ^= 0x0f;
        let noise: Vec<u8> = (0..4096u32)
            .flat_map(|i| (i.wrapping_mul(2654435761)).to_be_bytes())
            .collect();

        let digest = |data: &[u8]| {
            let mut h = Nilsimsa::new();
            h.update(data);
            h.finish()
        };
        let (db, dt, dn) = (digest(&base), digest(&tweaked), digest(&noise));
        assert!(nilsimsa_similarity(&db, &dt) > nilsimsa_similarity(&db, &dn));
    }

    #[test]
    fn nilsimsa_streaming_equivalence() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let mut whole = Nilsimsa::new();
        whole.update(&data);
        let expect = whole.finish();

        // Chunk sizes straddling the 5-byte trigram window.
        for chunk in [1, 2, 3, 7, 64, 4096, 65536] {
            let mut h = Nilsimsa::new();
            for part in data.chunks(chunk) {
                h.update(part);
            }
            assert_eq!(h.finish(), expect, "chunk size {chunk}");
        }
    }

    #[test]
    fn fingerprint_streaming_equivalence() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 13) as u8).collect();

        let mut whole = SimilarityHash::new();
        whole.update(&data);
        let expect = whole.finish();

        for chunk in [1, 3, 1000, 65536] {
            let mut h = SimilarityHash::new();
            for part in data.chunks(chunk) {
                h.update(part);
            }
            assert_eq!(h.finish(), expect, "chunk size {chunk}");
        }
    }

    #[test]
    fn fingerprint_top_bytes() {
        let mut h = SimilarityHash::new();
        h.update(&[0xaa; 40]);
        h.update(&[0xbb; 30]);
        h.update(&[0xcc; 20]);
        h.update(&[0xdd; 10]);
        h.update(&[0xee; 5]);
        assert_eq!(h.finish(), 0xaabbccdd);
    }

    #[test]
    fn fingerprint_tie_breaks_on_byte_value() {
        // All bytes absent: the four smallest byte values win.
        assert_eq!(SimilarityHash::new().finish(), 0x00010203);
    }

    #[test]
    fn empty_digest() {
        assert_eq!(Nilsimsa::new().finish(), [0; 4]);
    }
}
