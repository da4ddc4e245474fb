//! Two-factor verification: primary face match plus ID card text and photo.

use crate::store::IdentityStore;
use crate::types::{CredentialEvidence, Identity, MatchResult, Verdict};

/// Thresholds and mode for the verification pipeline.
#[derive(Debug, Clone, Copy)]
pub struct VerificationPolicy {
    /// Maximum distance between the card photo and an enrolled card embedding.
    pub card_threshold: f32,
    /// When false, a face match alone grants access (card factors forced true).
    pub require_secondary_credential: bool,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            card_threshold: 0.50,
            require_secondary_credential: true,
        }
    }
}

/// Combine a match result and optional card evidence into a verdict.
///
/// Every field of the verdict is filled in even when access is refused
/// early, so callers can report which factor failed.
pub fn verify(
    result: &MatchResult,
    evidence: Option<&CredentialEvidence>,
    store: &IdentityStore,
    policy: &VerificationPolicy,
) -> Verdict {
    let Some(id) = result.identity_id.as_deref() else {
        return Verdict::denied();
    };
    // A match against an identity no longer in this snapshot counts as no match.
    let Some(identity) = store.get(id) else {
        return Verdict::denied();
    };

    let (card_ok, photo_ok) = if policy.require_secondary_credential {
        (
            evidence.is_some_and(|e| card_text_matches(&e.recognized_text, identity)),
            evidence.is_some_and(|e| card_photo_matches(e, identity, policy.card_threshold)),
        )
    } else {
        (true, true)
    };

    Verdict {
        identity_id: Some(identity.id.clone()),
        face_ok: true,
        card_ok,
        photo_ok,
        granted: card_ok && photo_ok,
    }
}

/// OCR output is noisy: accept if the id or display name appears anywhere, ignoring case.
fn card_text_matches(text: &str, identity: &Identity) -> bool {
    let haystack = text.to_lowercase();
    [identity.id.as_str(), identity.display_name.trim()]
        .iter()
        .filter(|needle| !needle.is_empty())
        .any(|needle| haystack.contains(&needle.to_lowercase()))
}

fn card_photo_matches(evidence: &CredentialEvidence, identity: &Identity, threshold: f32) -> bool {
    let Some(card) = evidence.card_embedding.as_ref() else {
        return false;
    };
    identity
        .card_embeddings
        .iter()
        .any(|enrolled| card.distance(enrolled) <= threshold)
}
