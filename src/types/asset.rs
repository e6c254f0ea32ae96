//! Asset tiers, registered fingerprints, and display shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::AssetFingerprint;

/// One resolution-specific rendition of a logical asset.
///
/// Ordered ascending: `Low` < `Hi`. A logical asset carries at most one
/// fingerprint per tier it has been rendered at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetTier {
    Low,
    Hi,
}

impl AssetTier {
    pub fn spec(self) -> &'static AssetVersionSpec {
        match self {
            AssetTier::Low => &ASSET_VERSIONS[0],
            AssetTier::Hi => &ASSET_VERSIONS[1],
        }
    }
}

/// Static description of one quality tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetVersionSpec {
    pub tier: AssetTier,
    pub name: &'static str,
    pub max_width: u32,
    pub max_height: u32,
}

/// All quality tiers, ordered low to high.
pub const ASSET_VERSIONS: [AssetVersionSpec; 2] = [
    AssetVersionSpec {
        tier: AssetTier::Low,
        name: "low",
        max_width: 480,
        max_height: 480,
    },
    AssetVersionSpec {
        tier: AssetTier::Hi,
        name: "hi",
        max_width: 4800,
        max_height: 4800,
    },
];

/// One fingerprint committed to the corpus: a (logical asset, tier) pair with
/// its owner and registration time. Registration time breaks distance ties
/// during matching (earlier-registered wins).
#[derive(Clone, Debug)]
pub struct RegisteredFingerprint {
    /// Logical asset identifier, shared by every tier of the same asset.
    pub global_identifier: String,
    /// Owning user's identifier. One owner per global identifier, always.
    pub owner: String,
    pub tier: AssetTier,
    pub fingerprint: AssetFingerprint,
    pub registered_at: DateTime<Utc>,
}

/// An asset the UI can display, either settled or still in flight.
/// Tagged variants instead of field-presence sniffing - match exhaustively.
#[derive(Clone, Debug)]
pub enum DisplayAsset {
    Uploaded(UploadedAsset),
    Uploading(UploadingAsset),
}

#[derive(Clone, Debug)]
pub struct UploadedAsset {
    pub global_identifier: String,
    pub owner: String,
    pub tiers: Vec<AssetTier>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct UploadingAsset {
    pub local_name: String,
    /// Completed fraction in [0, 1].
    pub progress: f32,
}
