// Deterministic 64-bit fingerprints for tokens and features.
//
// Model files store raw fingerprints, so every function here must be stable
// across runs, platforms and crate versions. Everything is hand-rolled for
// that reason.

use std::sync::OnceLock;

use crate::features::MAX_FEATURES;

/// Fingerprint of a token factor or of a composed feature.
pub type Fingerprint = u64;

/// FNV-1a over the UTF-8 bytes of a string.
pub fn fingerprint(s: &str) -> Fingerprint {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    for &b in s.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

/// Mix two fingerprints into one. Murmur-style finalizer over the pair;
/// left-fold this for higher arities.
#[inline]
pub fn mix(fp1: Fingerprint, fp2: Fingerprint) -> Fingerprint {
    const K_MUL: u64 = 0x9ddfea08eb382d69;
    let mut a = (fp1 ^ fp2).wrapping_mul(K_MUL);
    a ^= a >> 47;
    let mut b = (fp2 ^ a).wrapping_mul(K_MUL);
    b ^= b >> 47;
    b.wrapping_mul(K_MUL)
}

#[inline]
pub fn mix3(fp1: Fingerprint, fp2: Fingerprint, fp3: Fingerprint) -> Fingerprint {
    mix(mix(fp1, fp2), fp3)
}

#[inline]
pub fn mix4(fp1: Fingerprint, fp2: Fingerprint, fp3: Fingerprint, fp4: Fingerprint) -> Fingerprint {
    mix(mix3(fp1, fp2, fp3), fp4)
}

#[inline]
pub fn mix5(
    fp1: Fingerprint,
    fp2: Fingerprint,
    fp3: Fingerprint,
    fp4: Fingerprint,
    fp5: Fingerprint,
) -> Fingerprint {
    mix(mix4(fp1, fp2, fp3, fp4), fp5)
}

#[inline]
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Positional salts, one per feature template slot, computed once per process.
pub fn salts() -> &'static [Fingerprint; MAX_FEATURES] {
    static SALTS: OnceLock<[Fingerprint; MAX_FEATURES]> = OnceLock::new();
    SALTS.get_or_init(|| {
        let mut a = [0u64; MAX_FEATURES];
        for (i, slot) in a.iter_mut().enumerate() {
            *slot = splitmix64(i as u64);
        }
        a
    })
}

/// Fingerprint standing in for a missing neighbor at a sentence boundary.
pub fn empty_token() -> Fingerprint {
    fingerprint("<s>")
}
