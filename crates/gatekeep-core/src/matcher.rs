//! Nearest-neighbour matching of a probe embedding against enrolled identities.

use crate::store::IdentityStore;
use crate::types::{Embedding, MatchResult};

/// Strategy for comparing a probe embedding against the enrolled identities.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, store: &IdentityStore, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// An identity's distance is that of its closest embedding. The global
/// minimum wins; on equal distance the lexically lowest id wins because the
/// store iterates in id order and only a strictly smaller distance replaces
/// the current best.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, store: &IdentityStore, threshold: f32) -> MatchResult {
        if store.is_empty() {
            return MatchResult::no_match(f32::INFINITY);
        }

        let mut best_dist = f32::INFINITY;
        let mut best_id: Option<&str> = None;

        for identity in store.iter() {
            let closest = identity
                .embeddings
                .iter()
                .map(|e| probe.distance(e))
                .filter(|d| !d.is_nan())
                .fold(f32::INFINITY, f32::min);

            if closest < best_dist {
                best_dist = closest;
                best_id = Some(identity.id.as_str());
            }
        }

        match best_id {
            Some(id) if best_dist <= threshold => MatchResult {
                identity_id: Some(id.to_string()),
                distance: best_dist,
            },
            _ => MatchResult::no_match(best_dist),
        }
    }
}

/// Match with the default Euclidean strategy.
pub fn match_embedding(probe: &Embedding, store: &IdentityStore, threshold: f32) -> MatchResult {
    EuclideanMatcher.compare(probe, store, threshold)
}
