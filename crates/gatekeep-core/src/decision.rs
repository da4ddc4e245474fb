//! Per-tick reconciliation of verdicts into session state and actions.
//!
//! Reconciliation is pure: it takes the previous [`SessionState`] by value
//! and returns the next one together with the actions to carry out. Nothing
//! here touches hardware or clocks.

use crate::types::{PositionKey, SightingVerdict};
use std::collections::{BTreeMap, BTreeSet};

/// State kept for an identity that has been granted in this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionState {
    /// Ticks left before the "granted" label expires.
    pub label_ttl: u32,
    pub granted_once: bool,
    /// Last tick on which this identity was refused and buzzed.
    pub last_alert_tick: Option<u64>,
}

/// Everything the decision loop remembers between ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Live label timers, one per recently granted identity.
    pub identities: BTreeMap<String, DecisionState>,
    /// Identities granted at any point this session. Outlives label expiry.
    pub granted: BTreeSet<String>,
    /// Unknown-face positions seen on the previous tick.
    pub unknown_positions: BTreeSet<PositionKey>,
}

impl SessionState {
    pub fn get(&self, identity_id: &str) -> Option<&DecisionState> {
        self.identities.get(identity_id)
    }

    /// Identities whose "granted" label is still showing.
    pub fn active_labels(&self) -> impl Iterator<Item = (&str, u32)> {
        self.identities
            .iter()
            .filter(|(_, s)| s.label_ttl > 0)
            .map(|(id, s)| (id.as_str(), s.label_ttl))
    }
}

/// Who an alert is about: an enrolled identity or an unknown face at a position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlertKey {
    Identity(String),
    Unknown(PositionKey),
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKey::Identity(id) => write!(f, "identity:{id}"),
            AlertKey::Unknown(pos) => write!(f, "unknown@{pos}"),
        }
    }
}

/// Commands produced by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenGate { identity_id: String },
    Buzz { key: AlertKey },
    TriggerSiren { key: AlertKey },
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub state: SessionState,
    pub actions: Vec<Action>,
}

/// Fold one tick's verdicts into the session state.
pub fn reconcile(
    verdicts: &[SightingVerdict],
    previous: SessionState,
    max_label_ttl: u32,
    tick: u64,
) -> Reconciliation {
    let SessionState {
        mut identities,
        mut granted,
        unknown_positions: previous_unknowns,
    } = previous;

    let mut actions = Vec::new();
    let mut refreshed: BTreeSet<&str> = BTreeSet::new();
    let mut referenced: BTreeSet<&str> = BTreeSet::new();
    let mut unknown_positions = BTreeSet::new();

    for sv in verdicts {
        let verdict = &sv.verdict;
        match verdict.identity_id.as_deref() {
            Some(id) if verdict.granted => {
                referenced.insert(id);
                if !refreshed.insert(id) {
                    // Same person twice in one frame: already handled.
                    continue;
                }
                // An expired label does not re-arm the gate for a lingering person.
                if granted.insert(id.to_string()) {
                    actions.push(Action::OpenGate {
                        identity_id: id.to_string(),
                    });
                }
                let entry = identities.entry(id.to_string()).or_insert(DecisionState {
                    label_ttl: max_label_ttl,
                    granted_once: true,
                    last_alert_tick: None,
                });
                entry.label_ttl = max_label_ttl;
                entry.granted_once = true;
            }
            Some(id) => {
                referenced.insert(id);
                if let Some(entry) = identities.get_mut(id) {
                    entry.last_alert_tick = Some(tick);
                }
                actions.push(Action::Buzz {
                    key: AlertKey::Identity(id.to_string()),
                });
            }
            None => {
                let pos = sv.bounding_box.position_key();
                actions.push(Action::Buzz {
                    key: AlertKey::Unknown(pos),
                });
                if !previous_unknowns.contains(&pos) && !unknown_positions.contains(&pos) {
                    actions.push(Action::TriggerSiren {
                        key: AlertKey::Unknown(pos),
                    });
                }
                unknown_positions.insert(pos);
            }
        }
    }

    identities.retain(|id, state| {
        if refreshed.contains(id.as_str()) {
            return true;
        }
        state.label_ttl = state.label_ttl.saturating_sub(1);
        state.label_ttl > 0 || referenced.contains(id.as_str())
    });

    Reconciliation {
        state: SessionState {
            identities,
            granted,
            unknown_positions,
        },
        actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Verdict};

    const TTL: u32 = 3;

    fn bbox(x: f32) -> BoundingBox {
        BoundingBox { x, y: 10.0, width: 40.0, height: 40.0 }
    }

    fn granted(id: &str) -> SightingVerdict {
        SightingVerdict {
            bounding_box: bbox(0.0),
            verdict: Verdict {
                identity_id: Some(id.into()),
                face_ok: true,
                card_ok: true,
                photo_ok: true,
                granted: true,
            },
        }
    }

    fn refused(id: &str) -> SightingVerdict {
        SightingVerdict {
            bounding_box: bbox(0.0),
            verdict: Verdict {
                identity_id: Some(id.into()),
                face_ok: true,
                card_ok: false,
                photo_ok: true,
                granted: false,
            },
        }
    }

    fn unknown(x: f32) -> SightingVerdict {
        SightingVerdict {
            bounding_box: bbox(x),
            verdict: Verdict::denied(),
        }
    }

    fn open_count(actions: &[Action]) -> usize {
        actions.iter().filter(|a| matches!(a, Action::OpenGate { .. })).count()
    }

    fn siren_count(actions: &[Action]) -> usize {
        actions.iter().filter(|a| matches!(a, Action::TriggerSiren { .. })).count()
    }

    #[test]
    fn test_first_grant_opens_gate() {
        let r = reconcile(&[granted("S1")], SessionState::default(), TTL, 0);
        assert_eq!(r.actions, vec![Action::OpenGate { identity_id: "S1".into() }]);
        let state = r.state.get("S1").unwrap();
        assert!(state.granted_once);
        assert_eq!(state.label_ttl, TTL);
    }

    #[test]
    fn test_repeat_grant_refreshes_without_opening() {
        let r1 = reconcile(&[granted("S1")], SessionState::default(), TTL, 0);
        let r2 = reconcile(&[], r1.state, TTL, 1);
        assert_eq!(r2.state.get("S1").unwrap().label_ttl, TTL - 1);

        let r3 = reconcile(&[granted("S1")], r2.state, TTL, 2);
        assert_eq!(open_count(&r3.actions), 0);
        assert_eq!(r3.state.get("S1").unwrap().label_ttl, TTL);
    }

    #[test]
    fn test_duplicate_sightings_in_one_tick_open_once() {
        let r = reconcile(&[granted("S1"), granted("S1")], SessionState::default(), TTL, 0);
        assert_eq!(open_count(&r.actions), 1);
    }

    #[test]
    fn test_label_expires_but_grant_is_remembered() {
        let mut state = reconcile(&[granted("S1")], SessionState::default(), TTL, 0).state;
        for tick in 1..=TTL as u64 {
            state = reconcile(&[], state, TTL, tick).state;
        }
        assert!(state.get("S1").is_none());
        assert!(state.granted.contains("S1"));

        let again = reconcile(&[granted("S1")], state, TTL, 10);
        assert_eq!(open_count(&again.actions), 0);
        assert_eq!(again.state.get("S1").unwrap().label_ttl, TTL);
    }

    #[test]
    fn test_ttl_never_exceeds_max() {
        let mut state = SessionState::default();
        for tick in 0..5 {
            state = reconcile(&[granted("S1")], state, TTL, tick).state;
            assert_eq!(state.get("S1").unwrap().label_ttl, TTL);
        }
    }

    #[test]
    fn test_referenced_state_kept_at_zero() {
        let mut state = reconcile(&[granted("S1")], SessionState::default(), 1, 0).state;
        // Refused this tick: ttl drops to zero but the sighting keeps the entry alive.
        let r = reconcile(&[refused("S1")], state, 1, 1);
        state = r.state;
        let entry = state.get("S1").unwrap();
        assert_eq!(entry.label_ttl, 0);
        assert_eq!(entry.last_alert_tick, Some(1));

        state = reconcile(&[], state, 1, 2).state;
        assert!(state.get("S1").is_none());
    }

    #[test]
    fn test_refused_identity_buzzes_without_siren() {
        let r = reconcile(&[refused("S2")], SessionState::default(), TTL, 0);
        assert_eq!(
            r.actions,
            vec![Action::Buzz { key: AlertKey::Identity("S2".into()) }]
        );
        assert!(r.state.identities.is_empty());
    }

    #[test]
    fn test_unknown_siren_suppressed_while_face_stays_put() {
        let r1 = reconcile(&[unknown(100.0)], SessionState::default(), TTL, 0);
        assert_eq!(siren_count(&r1.actions), 1);
        assert_eq!(r1.actions.len(), 2);

        let r2 = reconcile(&[unknown(100.0)], r1.state, TTL, 1);
        assert_eq!(siren_count(&r2.actions), 0);
        assert!(matches!(r2.actions[0], Action::Buzz { key: AlertKey::Unknown(_) }));
    }

    #[test]
    fn test_unknown_siren_rearms_after_disappearing() {
        let r1 = reconcile(&[unknown(100.0)], SessionState::default(), TTL, 0);
        let r2 = reconcile(&[], r1.state, TTL, 1);
        assert!(r2.state.unknown_positions.is_empty());
        let r3 = reconcile(&[unknown(100.0)], r2.state, TTL, 2);
        assert_eq!(siren_count(&r3.actions), 1);
    }

    #[test]
    fn test_moved_unknown_retriggers() {
        let r1 = reconcile(&[unknown(100.0)], SessionState::default(), TTL, 0);
        let r2 = reconcile(&[unknown(130.0)], r1.state, TTL, 1);
        assert_eq!(siren_count(&r2.actions), 1);
    }
}
