//! One decision tick: match → verify → reconcile → alert cooldown.

use crate::alert::{AlertKind, AlertManager};
use crate::decision::{self, Action, AlertKey, SessionState};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::store::IdentityStore;
use crate::types::{Observation, SightingVerdict};
use crate::verification::{self, VerificationPolicy};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct DecisionConfig {
    pub face_threshold: f32,
    pub verification: VerificationPolicy,
    /// Ticks a "granted" label stays up after the last sighting.
    pub label_display_ticks: u32,
    /// Minimum gap between denial buzzes for the same identity.
    pub buzzer_cooldown: Duration,
    /// Extra per-position siren cooldown on top of positional dedup; zero disables it.
    pub siren_cooldown: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            face_threshold: 0.50,
            verification: VerificationPolicy::default(),
            label_display_ticks: 30,
            buzzer_cooldown: Duration::from_secs(1),
            siren_cooldown: Duration::ZERO,
        }
    }
}

/// What happened on one tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick: u64,
    pub verdicts: Vec<SightingVerdict>,
    /// Actions reconciliation asked for, before cooldowns.
    pub proposed: Vec<Action>,
    /// Actions that survived cooldown and should be carried out.
    pub actions: Vec<Action>,
}

/// Decision state machine owned by the sensing loop.
pub struct DecisionEngine {
    config: DecisionConfig,
    matcher: Box<dyn Matcher + Send>,
    state: SessionState,
    alerts: AlertManager,
    tick: u64,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self::with_matcher(config, Box::new(EuclideanMatcher))
    }

    pub fn with_matcher(config: DecisionConfig, matcher: Box<dyn Matcher + Send>) -> Self {
        Self {
            config,
            matcher,
            state: SessionState::default(),
            alerts: AlertManager::new(),
            tick: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Number of ticks processed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Process one frame's observations against the given identity snapshot.
    pub fn step(
        &mut self,
        store: &IdentityStore,
        observations: &[Observation],
        now: Instant,
    ) -> TickOutcome {
        let tick = self.tick;
        self.tick += 1;

        let verdicts: Vec<SightingVerdict> = observations
            .iter()
            .map(|obs| {
                let result =
                    self.matcher
                        .compare(&obs.sighting.embedding, store, self.config.face_threshold);
                let verdict = verification::verify(
                    &result,
                    obs.evidence.as_ref(),
                    store,
                    &self.config.verification,
                );
                tracing::debug!(
                    tick,
                    identity = ?verdict.identity_id,
                    distance = result.distance,
                    card_ok = verdict.card_ok,
                    photo_ok = verdict.photo_ok,
                    granted = verdict.granted,
                    "verdict"
                );
                SightingVerdict {
                    bounding_box: obs.sighting.bounding_box,
                    verdict,
                }
            })
            .collect();

        let previous = std::mem::take(&mut self.state);
        let reconciled =
            decision::reconcile(&verdicts, previous, self.config.label_display_ticks, tick);
        self.state = reconciled.state;

        let actions: Vec<Action> = reconciled
            .actions
            .iter()
            .filter(|action| self.admit(action, now))
            .cloned()
            .collect();

        self.alerts.prune(
            now,
            self.config.buzzer_cooldown.max(self.config.siren_cooldown),
        );

        TickOutcome {
            tick,
            verdicts,
            proposed: reconciled.actions,
            actions,
        }
    }

    fn admit(&mut self, action: &Action, now: Instant) -> bool {
        match action {
            Action::OpenGate { .. } => true,
            Action::Buzz { key: key @ AlertKey::Identity(_) } => {
                self.alerts
                    .maybe_trigger(AlertKind::Buzzer, key, now, self.config.buzzer_cooldown)
            }
            // Positional buzzes repeat every tick; the buzzer pulse coalesces them.
            Action::Buzz { key: AlertKey::Unknown(_) } => true,
            Action::TriggerSiren { key } => {
                self.alerts
                    .maybe_trigger(AlertKind::Siren, key, now, self.config.siren_cooldown)
            }
        }
    }
}
