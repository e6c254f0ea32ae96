//! Asset fingerprint computation.
//!
//! Two similarity signals per (asset bytes, tier), both best-effort and
//! threshold-matched, never compared for exact equality:
//!
//! - a 64-bit dHash perceptual hash: 9x8 grayscale, adjacent-column
//!   comparison - coarse structure, robust to resizing and recompression
//! - a 64-dimensional embedding: 8x8 grid of mean luma, mean-centered and
//!   L2-normalized, encoded as base64 of little-endian f32s
//!
//! Deterministic for identical input bytes and tier. Different tiers of the
//! same logical image may hash differently; the version manager links them.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageError};
use thiserror::Error;

use crate::types::AssetTier;

/// Embedding dimensionality: an 8x8 luma grid.
pub const EMBEDDING_LEN: usize = 64;

/// Perceptual hash bit width.
pub const PHASH_BITS: u32 = 64;

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Feature extraction failed. `can_retry` distinguishes transient
    /// resource exhaustion (retry the computation) from undecodable input
    /// (reject the upload).
    #[error("feature extraction failed: {reason} (retryable: {can_retry})")]
    Embedding { reason: String, can_retry: bool },

    /// An embedding string did not decode to a vector of [`EMBEDDING_LEN`].
    #[error("embedding is not a valid encoded vector")]
    BadEmbedding,
}

/// Compact similarity descriptor of one asset rendition.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetFingerprint {
    /// 64-bit dHash. Absent for entries ingested before hashing existed.
    pub perceptual_hash: Option<u64>,
    /// Fixed-length numeric vector encoded as a string (base64, LE f32s).
    pub embedding: String,
    /// Caller-supplied similarity threshold in [0, 1]; smaller is stricter.
    pub max_distance: f32,
}

/// Compute the fingerprint of `asset_bytes` at `tier`.
pub fn fingerprint(
    asset_bytes: &[u8],
    tier: AssetTier,
    max_distance: f32,
) -> Result<AssetFingerprint, FingerprintError> {
    let img = image::load_from_memory(asset_bytes).map_err(|err| {
        // Decoder limits are resource exhaustion; anything else means the
        // bytes are not a decodable image
        let can_retry = matches!(err, ImageError::Limits(_));
        FingerprintError::Embedding {
            reason: err.to_string(),
            can_retry,
        }
    })?;

    // Fit within the tier's bounding box; never upscale below-tier sources
    let spec = tier.spec();
    let scaled = if img.width() > spec.max_width || img.height() > spec.max_height {
        img.resize(spec.max_width, spec.max_height, FilterType::Triangle)
    } else {
        img
    };
    let gray = scaled.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(FingerprintError::Embedding {
            reason: "image has no pixels".into(),
            can_retry: false,
        });
    }

    Ok(AssetFingerprint {
        perceptual_hash: Some(dhash(&gray)),
        embedding: encode_embedding(&luma_grid_embedding(&gray)),
        max_distance,
    })
}

/// dHash: shrink to 9x8, emit one bit per adjacent-column comparison.
fn dhash(gray: &GrayImage) -> u64 {
    let small = imageops::resize(gray, 9, 8, FilterType::Triangle);
    let mut hash = 0u64;
    for y in 0..8u32 {
        for x in 0..8u32 {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            hash = (hash << 1) | u64::from(left > right);
        }
    }
    hash
}

/// 8x8 grid of mean luma, mean-centered (brightness invariance) and
/// L2-normalized. A flat image yields the zero vector.
fn luma_grid_embedding(gray: &GrayImage) -> [f32; EMBEDDING_LEN] {
    let cells = imageops::resize(gray, 8, 8, FilterType::Triangle);
    let mut v = [0f32; EMBEDDING_LEN];
    for y in 0..8u32 {
        for x in 0..8u32 {
            v[(y * 8 + x) as usize] = f32::from(cells.get_pixel(x, y).0[0]) / 255.0;
        }
    }

    let mean = v.iter().sum::<f32>() / EMBEDDING_LEN as f32;
    for x in &mut v {
        *x -= mean;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode an embedding vector into its wire string form.
pub fn encode_embedding(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a wire embedding string. Fails unless it holds exactly
/// [`EMBEDDING_LEN`] f32s.
pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>, FingerprintError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| FingerprintError::BadEmbedding)?;
    if bytes.len() != EMBEDDING_LEN * 4 {
        return Err(FingerprintError::BadEmbedding);
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
