//! Alert cooldown tracking for the buzzer and siren.

use crate::decision::AlertKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Buzzer,
    Siren,
}

/// Remembers when each `kind`+`key` last fired.
///
/// Owned by the decision loop; buzzer and siren keep independent tracks
/// because they are keyed by kind.
#[derive(Debug, Default)]
pub struct AlertManager {
    last_fired: HashMap<(AlertKind, AlertKey), Instant>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire if nothing of the same kind and key fired within `cooldown` of `now`.
    ///
    /// Returns true and records `now` when the alert may go ahead.
    pub fn maybe_trigger(
        &mut self,
        kind: AlertKind,
        key: &AlertKey,
        now: Instant,
        cooldown: Duration,
    ) -> bool {
        let slot = (kind, key.clone());
        if let Some(&last) = self.last_fired.get(&slot) {
            if now.saturating_duration_since(last) < cooldown {
                tracing::trace!(?kind, %key, "alert suppressed by cooldown");
                return false;
            }
        }
        self.last_fired.insert(slot, now);
        true
    }

    /// Drop entries whose cooldown has long passed so the table does not grow
    /// with every unknown face position ever seen.
    pub fn prune(&mut self, now: Instant, older_than: Duration) {
        self.last_fired
            .retain(|_, last| now.saturating_duration_since(*last) < older_than);
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
