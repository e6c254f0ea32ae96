//! Similarity search over the registered fingerprint corpus.
//!
//! Distance is a single normalized [0, 1] score combining perceptual-hash
//! Hamming distance and embedding cosine distance; a corpus entry matches
//! when `score <= candidate.max_distance`. The scan is a read-only parallel
//! pass; results come back closest-first, equal distances broken by earlier
//! registration.

use log::warn;
use rayon::prelude::*;

use crate::fingerprint::codec::{decode_embedding, AssetFingerprint, FingerprintError, PHASH_BITS};
use crate::types::{AssetTier, RegisteredFingerprint};

/// A previously registered asset within threshold distance of a candidate.
/// Surfaced to the caller in full - never silently dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct ClaimConflict {
    pub global_identifier: String,
    pub owner: String,
    pub tier: AssetTier,
    pub distance: f32,
}

/// Search `corpus` for entries within `candidate.max_distance`, ordered by
/// ascending distance.
pub fn find_matches(
    candidate: &AssetFingerprint,
    corpus: &[RegisteredFingerprint],
) -> Result<Vec<ClaimConflict>, FingerprintError> {
    find_matches_limited(candidate, corpus, usize::MAX)
}

/// Like [`find_matches`] but returns only the `limit` closest matches, for
/// callers that only need enough confident hits to decide. The whole corpus
/// is still scored; only the result is truncated.
pub fn find_matches_limited(
    candidate: &AssetFingerprint,
    corpus: &[RegisteredFingerprint],
    limit: usize,
) -> Result<Vec<ClaimConflict>, FingerprintError> {
    let candidate_embedding = decode_embedding(&candidate.embedding)?;

    // Read-only scan, parallel over the corpus
    let mut scored: Vec<(f32, &RegisteredFingerprint)> = corpus
        .par_iter()
        .filter_map(|entry| {
            let distance = entry_distance(&candidate_embedding, candidate.perceptual_hash, entry)?;
            (distance <= candidate.max_distance).then_some((distance, entry))
        })
        .collect();

    // Closest first; equal distances go to the earlier-registered asset,
    // then the identifier for a total order
    scored.sort_by(|(da, ea), (db, eb)| {
        da.total_cmp(db)
            .then_with(|| ea.registered_at.cmp(&eb.registered_at))
            .then_with(|| ea.global_identifier.cmp(&eb.global_identifier))
    });
    scored.truncate(limit);

    Ok(scored
        .into_iter()
        .map(|(distance, entry)| ClaimConflict {
            global_identifier: entry.global_identifier.clone(),
            owner: entry.owner.clone(),
            tier: entry.tier,
            distance,
        })
        .collect())
}

/// Distance of one corpus entry, or `None` if the entry is unusable
/// (a corrupt stored embedding must not abort the whole search).
fn entry_distance(
    candidate_embedding: &[f32],
    candidate_hash: Option<u64>,
    entry: &RegisteredFingerprint,
) -> Option<f32> {
    let entry_embedding = match decode_embedding(&entry.fingerprint.embedding) {
        Ok(v) => v,
        Err(_) => {
            warn!(
                "skipping corpus entry {} with undecodable embedding",
                entry.global_identifier
            );
            return None;
        }
    };

    let embedding = embedding_distance(candidate_embedding, &entry_embedding);
    match (candidate_hash, entry.fingerprint.perceptual_hash) {
        (Some(a), Some(b)) => Some((hamming_distance(a, b) + embedding) / 2.0),
        // Hash missing on either side: the embedding carries the score alone
        _ => Some(embedding),
    }
}

/// Normalized Hamming distance between two 64-bit perceptual hashes.
fn hamming_distance(a: u64, b: u64) -> f32 {
    (a ^ b).count_ones() as f32 / PHASH_BITS as f32
}

/// Cosine distance mapped onto [0, 1]. Zero-norm vectors (flat images) are
/// identical to each other and maximally far from everything else.
fn embedding_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON && norm_b <= f32::EPSILON {
        return 0.0;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    ((1.0 - cosine) / 2.0).clamp(0.0, 1.0)
}
