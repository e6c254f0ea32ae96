//! Upload-intent claim resolution.
//!
//! Classifies similarity matches into a final decision for the attempt:
//! no conflicts means the content is new; conflicts all owned by the
//! requester mean another rendition of their own asset; any foreign owner
//! blocks the upload permanently for that content, conflicts attached.
//!
//! Decisions for identical candidate bytes are serialized through an
//! in-flight guard keyed by content hash: the second concurrent caller
//! blocks until the first commits, then re-evaluates against committed
//! state. Dropping the guard (including on cancellation) releases the slot.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use crate::fingerprint::codec::{AssetFingerprint, FingerprintError};
use crate::fingerprint::matcher::{find_matches, ClaimConflict};
use crate::types::RegisteredFingerprint;

/// Outcome of one upload intent. Final for that attempt: a blocked upload is
/// a permanent condition for that content, never retried automatically.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Content is new; proceed.
    Allow,
    /// Every conflict is the requester's own asset - this upload is another
    /// rendition of `existing`.
    AllowAsNewVersion { existing: String },
    /// At least one conflict belongs to someone else. Full ordered conflict
    /// list attached for display and support escalation.
    Blocked(Vec<ClaimConflict>),
}

/// Serializes decision application per candidate content hash.
#[derive(Default)]
pub struct ClaimResolver {
    in_flight: Mutex<HashSet<[u8; 32]>>,
    released: Condvar,
}

impl ClaimResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-flight slot for `content_hash`, blocking while another
    /// resolver call holds it. The returned guard releases on drop.
    pub fn begin_claim(&self, content_hash: [u8; 32]) -> ClaimGuard<'_> {
        let mut held = self.in_flight.lock().unwrap();
        while held.contains(&content_hash) {
            held = self.released.wait(held).unwrap();
        }
        held.insert(content_hash);
        ClaimGuard {
            resolver: self,
            content_hash,
        }
    }

    /// Classify one candidate fingerprint against the corpus.
    pub fn resolve_upload_intent(
        &self,
        candidate: &AssetFingerprint,
        requesting_user: &str,
        corpus: &[RegisteredFingerprint],
    ) -> Result<Decision, FingerprintError> {
        let conflicts = find_matches(candidate, corpus)?;
        Ok(Self::classify(conflicts, requesting_user))
    }

    /// Classify an ordered conflict list. A blocked decision carries the
    /// whole list, same-owner matches included, so the surfaced conflicts
    /// are the same no matter how many candidate fingerprints fed them.
    pub fn classify(conflicts: Vec<ClaimConflict>, requesting_user: &str) -> Decision {
        if conflicts.is_empty() {
            return Decision::Allow;
        }
        if conflicts.iter().all(|c| c.owner == requesting_user) {
            // Closest same-owner match names the asset being versioned
            return Decision::AllowAsNewVersion {
                existing: conflicts[0].global_identifier.clone(),
            };
        }
        Decision::Blocked(conflicts)
    }
}

/// Held while one upload intent for a given content hash is being decided
/// and committed.
pub struct ClaimGuard<'a> {
    resolver: &'a ClaimResolver,
    content_hash: [u8; 32],
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.resolver.in_flight.lock().unwrap();
        held.remove(&self.content_hash);
        self.resolver.released.notify_all();
    }
}
