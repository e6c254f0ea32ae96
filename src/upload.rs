//! Upload-intent entry point for the UI layer.
//!
//! Takes raw asset bytes and a declared similarity threshold, fingerprints
//! every resolution tier, resolves the claim, and commits accepted
//! fingerprints to the corpus - all while holding the per-content-hash
//! guard, so two concurrent uploads of identical bytes cannot both be
//! allowed. The logical identifier of newly allowed content is the blake3
//! hash of its bytes: content-addressed by construction.

use std::sync::{Arc, RwLock};

use log::debug;
use thiserror::Error;

use crate::fingerprint::{
    find_matches, fingerprint, ClaimConflict, ClaimResolver, Decision, FingerprintError,
    FingerprintStore, VersionError,
};
use crate::types::{AssetTier, DisplayAsset, UploadingAsset, ASSET_VERSIONS};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// What the UI gets back: the final decision plus, when the upload was
/// accepted, the logical identifier it was registered under.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadEvaluation {
    pub decision: Decision,
    pub global_identifier: Option<String>,
}

/// Shared upload gateway: corpus plus resolver.
pub struct UploadIntake {
    store: Arc<RwLock<FingerprintStore>>,
    resolver: ClaimResolver,
}

impl Default for UploadIntake {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadIntake {
    pub fn new() -> Self {
        Self::with_store(Arc::new(RwLock::new(FingerprintStore::new())))
    }

    pub fn with_store(store: Arc<RwLock<FingerprintStore>>) -> Self {
        Self {
            store,
            resolver: ClaimResolver::new(),
        }
    }

    pub fn store(&self) -> &Arc<RwLock<FingerprintStore>> {
        &self.store
    }

    /// Evaluate one upload intent. Blocks while another intent for the same
    /// bytes is in flight, then decides against committed state.
    pub fn evaluate(
        &self,
        asset_bytes: &[u8],
        owner: &str,
        max_distance: f32,
    ) -> Result<UploadEvaluation, UploadError> {
        let content_hash = blake3::hash(asset_bytes);
        let _guard = self.resolver.begin_claim(*content_hash.as_bytes());

        let mut tier_prints: Vec<(AssetTier, _)> = Vec::with_capacity(ASSET_VERSIONS.len());
        for spec in &ASSET_VERSIONS {
            tier_prints.push((spec.tier, fingerprint(asset_bytes, spec.tier, max_distance)?));
        }

        // Match every tier against the committed corpus and merge. The same
        // corpus entry can match more than one candidate tier: group by
        // (asset, tier) keeping the closest hit, then order closest-first.
        let mut conflicts: Vec<ClaimConflict> = Vec::new();
        {
            let store = self.store.read().unwrap();
            for (_, print) in &tier_prints {
                conflicts.extend(find_matches(print, store.entries())?);
            }
        }
        conflicts.sort_by(|a, b| {
            a.global_identifier
                .cmp(&b.global_identifier)
                .then_with(|| a.tier.cmp(&b.tier))
                .then_with(|| a.distance.total_cmp(&b.distance))
        });
        conflicts.dedup_by(|a, b| a.global_identifier == b.global_identifier && a.tier == b.tier);
        conflicts.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.global_identifier.cmp(&b.global_identifier))
        });

        // One classification over the merged list, so the surfaced conflicts
        // match what a single-tier resolution would have reported
        let (identifier, decision) = match ClaimResolver::classify(conflicts, owner) {
            Decision::Blocked(conflicts) => {
                debug!(
                    "upload blocked for {}: {} conflicts",
                    content_hash.to_hex(),
                    conflicts.len()
                );
                return Ok(UploadEvaluation {
                    decision: Decision::Blocked(conflicts),
                    global_identifier: None,
                });
            }
            Decision::AllowAsNewVersion { existing } => (
                existing.clone(),
                Decision::AllowAsNewVersion { existing },
            ),
            Decision::Allow => (content_hash.to_hex().to_string(), Decision::Allow),
        };

        // Commit while the content-hash guard is still held
        let mut store = self.store.write().unwrap();
        for (tier, print) in tier_prints {
            match store.register(&identifier, owner, tier, print) {
                Ok(()) => {}
                // Re-upload of a rendition we already hold: nothing to add
                Err(VersionError::TierAlreadyIngested { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(UploadEvaluation {
            decision,
            global_identifier: Some(identifier),
        })
    }

    /// Settled and in-flight assets in display shape.
    pub fn display_assets(&self, in_progress: &[UploadingAsset]) -> Vec<DisplayAsset> {
        let store = self.store.read().unwrap();
        let mut assets: Vec<DisplayAsset> = store
            .uploaded_assets()
            .into_iter()
            .map(DisplayAsset::Uploaded)
            .collect();
        assets.extend(
            in_progress
                .iter()
                .cloned()
                .map(DisplayAsset::Uploading),
        );
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::codec::tests::test_png;

    #[test]
    fn test_new_content_allowed_and_registered_per_tier() {
        let intake = UploadIntake::new();
        let png = test_png(1200, 900, 0);

        let eval = intake.evaluate(&png, "userA", 0.05).unwrap();
        assert_eq!(eval.decision, Decision::Allow);

        let id = eval.global_identifier.unwrap();
        let store = intake.store().read().unwrap();
        assert_eq!(store.owner_of(&id), Some("userA"));
        assert_eq!(
            store.tiers_ingested(&id),
            vec![AssetTier::Low, AssetTier::Hi]
        );
    }

    #[test]
    fn test_same_owner_reupload_is_new_version_never_blocked() {
        let intake = UploadIntake::new();
        let png = test_png(1200, 900, 3);

        let first = intake.evaluate(&png, "userA", 0.05).unwrap();
        assert_eq!(first.decision, Decision::Allow);

        // Identical source photo again: matches only our own tiers
        let second = intake.evaluate(&png, "userA", 0.05).unwrap();
        match second.decision {
            Decision::AllowAsNewVersion { existing } => {
                assert_eq!(Some(existing), first.global_identifier);
            }
            other => panic!("expected AllowAsNewVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_resized_rendition_of_own_photo_is_new_version() {
        use image::{imageops::FilterType, ImageFormat};
        use std::io::Cursor;

        let intake = UploadIntake::new();
        let hi_bytes = test_png(1600, 1200, 4);

        // A low-resolution rendition of the same source photo
        let source = image::load_from_memory(&hi_bytes).unwrap();
        let mut low_bytes = Vec::new();
        source
            .resize(480, 480, FilterType::Triangle)
            .write_to(&mut Cursor::new(&mut low_bytes), ImageFormat::Png)
            .unwrap();

        let first = intake.evaluate(&low_bytes, "userA", 0.1).unwrap();
        assert_eq!(first.decision, Decision::Allow);

        // The high-resolution original must read as another rendition of the
        // owner's asset, never as a foreign claim against themselves
        let second = intake.evaluate(&hi_bytes, "userA", 0.1).unwrap();
        match second.decision {
            Decision::AllowAsNewVersion { existing } => {
                assert_eq!(Some(existing), first.global_identifier);
            }
            other => panic!("expected AllowAsNewVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_foreign_claim_blocks_with_conflicts() {
        let intake = UploadIntake::new();
        let png = test_png(1200, 900, 5);

        let first = intake.evaluate(&png, "userA", 0.05).unwrap();
        let owned = first.global_identifier.unwrap();

        let second = intake.evaluate(&png, "userB", 0.05).unwrap();
        assert_eq!(second.global_identifier, None);
        match second.decision {
            Decision::Blocked(conflicts) => {
                assert!(!conflicts.is_empty());
                assert!(conflicts
                    .iter()
                    .all(|c| c.owner == "userA" && c.global_identifier == owned));
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_blocked_list_keeps_own_conflicts_beside_foreign() {
        let intake = UploadIntake::new();
        let png = test_png(1200, 900, 6);

        let first = intake.evaluate(&png, "userA", 0.05).unwrap();
        let owned = first.global_identifier.unwrap();

        // A foreign claim lands near the same content
        {
            let print = fingerprint(&png, AssetTier::Low, 0.05).unwrap();
            let mut store = intake.store().write().unwrap();
            store
                .register("theirs", "userB", AssetTier::Low, print)
                .unwrap();
        }

        // Mixed ownership blocks, and the list shows the requester's own
        // matches next to the foreign one, same as a single-tier resolution
        let eval = intake.evaluate(&png, "userA", 0.05).unwrap();
        match eval.decision {
            Decision::Blocked(conflicts) => {
                assert!(conflicts
                    .iter()
                    .any(|c| c.owner == "userB" && c.global_identifier == "theirs"));
                assert!(conflicts
                    .iter()
                    .any(|c| c.owner == "userA" && c.global_identifier == owned));
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_unrelated_images_do_not_conflict() {
        let intake = UploadIntake::new();
        let a = test_png(1200, 900, 0);
        let b = test_png(900, 1200, 0xFF);

        intake.evaluate(&a, "userA", 0.02).unwrap();
        let eval = intake.evaluate(&b, "userB", 0.02).unwrap();
        assert_eq!(eval.decision, Decision::Allow);
    }

    #[test]
    fn test_concurrent_identical_uploads_exactly_one_allowed() {
        let intake = Arc::new(UploadIntake::new());
        let png = Arc::new(test_png(1200, 900, 9));

        let mut handles = Vec::new();
        for user in ["userA", "userB"] {
            let intake = Arc::clone(&intake);
            let png = Arc::clone(&png);
            handles.push(std::thread::spawn(move || {
                intake.evaluate(&png, user, 0.05).unwrap().decision
            }));
        }
        let decisions: Vec<Decision> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let allowed = decisions
            .iter()
            .filter(|d| matches!(d, Decision::Allow | Decision::AllowAsNewVersion { .. }))
            .count();
        let blocked = decisions
            .iter()
            .filter(|d| matches!(d, Decision::Blocked(_)))
            .count();
        assert_eq!(allowed, 1);
        assert_eq!(blocked, 1);
    }

    #[test]
    fn test_display_assets_tagged_shapes() {
        let intake = UploadIntake::new();
        let png = test_png(640, 480, 2);
        intake.evaluate(&png, "userA", 0.05).unwrap();

        let uploading = vec![UploadingAsset {
            local_name: "IMG_0042.jpg".into(),
            progress: 0.4,
        }];
        let assets = intake.display_assets(&uploading);
        assert_eq!(assets.len(), 2);

        let mut uploaded = 0;
        let mut in_flight = 0;
        for asset in &assets {
            match asset {
                DisplayAsset::Uploaded(a) => {
                    uploaded += 1;
                    assert_eq!(a.owner, "userA");
                }
                DisplayAsset::Uploading(u) => {
                    in_flight += 1;
                    assert_eq!(u.local_name, "IMG_0042.jpg");
                }
            }
        }
        assert_eq!((uploaded, in_flight), (1, 1));
    }
}
