//! Fingerprint registry keyed by logical asset.
//!
//! Every tier of one logical photo shares a global identifier, so cross-tier
//! matches against your own asset are same-owner by construction and never
//! read as a foreign claim. The registry enforces both invariants: one owner
//! per identifier, at most one fingerprint per (asset, tier).

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use thiserror::Error;

use crate::fingerprint::codec::AssetFingerprint;
use crate::types::{AssetTier, RegisteredFingerprint, UploadedAsset};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// A global identifier maps to exactly one owning user, always.
    #[error("asset {0} is already owned by a different user")]
    OwnerMismatch(String),

    #[error("tier {tier:?} already ingested for asset {asset}")]
    TierAlreadyIngested { asset: String, tier: AssetTier },
}

#[derive(Default)]
struct AssetIndex {
    owner: String,
    /// Tier -> position in `entries`, ordered low to high.
    tiers: BTreeMap<AssetTier, usize>,
}

/// In-memory corpus of registered fingerprints.
#[derive(Default)]
pub struct FingerprintStore {
    entries: Vec<RegisteredFingerprint>,
    index: HashMap<String, AssetIndex>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tier's fingerprint under a logical asset.
    pub fn register(
        &mut self,
        global_identifier: &str,
        owner: &str,
        tier: AssetTier,
        fingerprint: AssetFingerprint,
    ) -> Result<(), VersionError> {
        if let Some(asset) = self.index.get(global_identifier) {
            if asset.owner != owner {
                return Err(VersionError::OwnerMismatch(global_identifier.to_string()));
            }
            if asset.tiers.contains_key(&tier) {
                return Err(VersionError::TierAlreadyIngested {
                    asset: global_identifier.to_string(),
                    tier,
                });
            }
        }

        let position = self.entries.len();
        self.entries.push(RegisteredFingerprint {
            global_identifier: global_identifier.to_string(),
            owner: owner.to_string(),
            tier,
            fingerprint,
            registered_at: Utc::now(),
        });

        let asset = self
            .index
            .entry(global_identifier.to_string())
            .or_insert_with(|| AssetIndex {
                owner: owner.to_string(),
                tiers: BTreeMap::new(),
            });
        asset.tiers.insert(tier, position);
        Ok(())
    }

    /// The full corpus, scan order. Matcher input.
    pub fn entries(&self) -> &[RegisteredFingerprint] {
        &self.entries
    }

    pub fn owner_of(&self, global_identifier: &str) -> Option<&str> {
        self.index
            .get(global_identifier)
            .map(|asset| asset.owner.as_str())
    }

    /// Tiers ingested for one logical asset, ascending.
    pub fn tiers_ingested(&self, global_identifier: &str) -> Vec<AssetTier> {
        self.index
            .get(global_identifier)
            .map(|asset| asset.tiers.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn tier_fingerprint(
        &self,
        global_identifier: &str,
        tier: AssetTier,
    ) -> Option<&AssetFingerprint> {
        let position = *self.index.get(global_identifier)?.tiers.get(&tier)?;
        Some(&self.entries[position].fingerprint)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Settled assets in display shape, one per logical identifier.
    pub fn uploaded_assets(&self) -> Vec<UploadedAsset> {
        let mut assets: Vec<UploadedAsset> = self
            .index
            .iter()
            .map(|(id, asset)| {
                let created_at = asset
                    .tiers
                    .values()
                    .map(|&pos| self.entries[pos].registered_at)
                    .min()
                    .unwrap_or_else(Utc::now);
                UploadedAsset {
                    global_identifier: id.clone(),
                    owner: asset.owner.clone(),
                    tiers: asset.tiers.keys().copied().collect(),
                    created_at,
                }
            })
            .collect();
        assets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        assets
    }
}
