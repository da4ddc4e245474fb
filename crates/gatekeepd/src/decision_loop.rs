//! The frame-rate decision loop.
//!
//! Perception runs on its own OS thread and hands each frame's observations
//! over a bounded channel. The loop matches, verifies and reconciles them
//! through [`DecisionEngine`], then enqueues the resulting actions: gate and
//! buzzer commands go to the actuator task, sirens to [`SirenRunner`], and
//! audit rows to the identity backend on the blocking pool. Nothing here
//! waits on actuation.

use crate::actuator::ActuatorHandle;
use crate::siren::SirenRunner;
use gatekeep_core::{
    AccessAttempt, Action, AlertKey, AttemptResult, DecisionEngine, IdentityBackend,
    IdentityStore, Observation, Perception, SensorError, TickOutcome,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Frames buffered between the sensing thread and the loop.
const FRAME_QUEUE: usize = 2;

type FrameResult = Result<Vec<Observation>, SensorError>;

/// Why the loop stopped without a sensor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    Shutdown,
}

pub struct DecisionLoop {
    engine: DecisionEngine,
    identities: watch::Receiver<Arc<IdentityStore>>,
    snapshot: Arc<IdentityStore>,
    actuator: ActuatorHandle,
    sirens: SirenRunner,
    audit: Option<Arc<dyn IdentityBackend>>,
    frame_interval: Duration,
}

impl DecisionLoop {
    pub fn new(
        engine: DecisionEngine,
        mut identities: watch::Receiver<Arc<IdentityStore>>,
        actuator: ActuatorHandle,
        sirens: SirenRunner,
        frame_interval: Duration,
    ) -> Self {
        let snapshot = Arc::clone(&identities.borrow_and_update());
        Self {
            engine,
            identities,
            snapshot,
            actuator,
            sirens,
            audit: None,
            frame_interval,
        }
    }

    /// Record every grant, denial and unknown sighting through `backend`.
    pub fn with_audit(mut self, backend: Arc<dyn IdentityBackend>) -> Self {
        self.audit = Some(backend);
        self
    }

    /// Run until the stream ends, a sensor fails, or `shutdown` resolves.
    pub async fn run<P, S>(&mut self, perception: P, shutdown: S) -> Result<LoopExit, SensorError>
    where
        P: Perception + Send + 'static,
        S: Future<Output = ()>,
    {
        let mut frames = spawn_sensing(perception)?;
        let mut interval = tokio::time::interval(self.frame_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            identities = self.snapshot.len(),
            interval_ms = self.frame_interval.as_millis() as u64,
            "decision loop started"
        );

        loop {
            let next = async {
                interval.tick().await;
                frames.recv().await
            };
            let frame = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(ticks = self.engine.tick(), "decision loop shutting down");
                    return Ok(LoopExit::Shutdown);
                }
                frame = next => frame,
            };

            match frame {
                Some(Ok(observations)) => {
                    self.handle_frame(&observations, Instant::now());
                }
                Some(Err(SensorError::EndOfStream)) => {
                    tracing::info!(ticks = self.engine.tick(), "frame stream ended");
                    return Ok(LoopExit::EndOfStream);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "sensing failed");
                    return Err(e);
                }
                None => return Err(SensorError::ReadFailed("sensing thread exited".into())),
            }
        }
    }

    /// One tick: pick up a newer identity snapshot, decide, dispatch.
    pub fn handle_frame(&mut self, observations: &[Observation], now: Instant) -> TickOutcome {
        if self.identities.has_changed().unwrap_or(false) {
            self.snapshot = Arc::clone(&self.identities.borrow_and_update());
            tracing::info!(identities = self.snapshot.len(), "identity snapshot swapped in");
        }

        let outcome = self.engine.step(&self.snapshot, observations, now);
        for action in &outcome.actions {
            self.dispatch(action);
        }
        outcome
    }

    fn dispatch(&mut self, action: &Action) {
        match action {
            Action::OpenGate { identity_id } => {
                tracing::info!(
                    identity = %identity_id,
                    name = self.display_name(identity_id).unwrap_or_default(),
                    "access granted"
                );
                if let Err(e) = self.actuator.open_gate(identity_id) {
                    tracing::warn!(error = %e, identity = %identity_id, "gate command not queued");
                }
                self.record(Some(identity_id.as_str()), AttemptResult::Granted);
            }
            Action::Buzz { key } => {
                if let Err(e) = self.actuator.buzz() {
                    tracing::warn!(error = %e, %key, "buzz not queued");
                }
                if let AlertKey::Identity(identity_id) = key {
                    tracing::warn!(identity = %identity_id, "access denied");
                    self.record(Some(identity_id.as_str()), AttemptResult::Denied);
                }
            }
            Action::TriggerSiren { key } => {
                tracing::warn!(%key, "unknown face");
                self.sirens.trigger(key);
                self.record(None, AttemptResult::Unknown);
            }
        }
    }

    fn display_name(&self, identity_id: &str) -> Option<&str> {
        self.snapshot
            .get(identity_id)
            .map(|identity| identity.display_name.as_str())
    }

    fn record(&self, identity_id: Option<&str>, result: AttemptResult) {
        let Some(backend) = self.audit.clone() else {
            return;
        };
        let attempt = AccessAttempt {
            identity_id: identity_id.map(str::to_string),
            display_name: identity_id
                .and_then(|id| self.display_name(id))
                .map(str::to_string),
            result,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        tokio::task::spawn_blocking(move || {
            if let Err(e) = backend.log_attempt(&attempt) {
                tracing::warn!(error = %e, result = attempt.result.as_str(), "access log write failed");
            }
        });
    }

    /// Let playing sirens finish within `grace` and release the actuator handle.
    pub async fn shutdown(self, grace: Duration) {
        self.sirens.shutdown(grace).await;
        drop(self.actuator);
    }
}

/// Move `perception` onto a dedicated thread that feeds frames to the loop.
///
/// The thread stops after forwarding the first error, or once the loop
/// drops its receiver.
fn spawn_sensing<P>(mut perception: P) -> Result<mpsc::Receiver<FrameResult>, SensorError>
where
    P: Perception + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAME_QUEUE);
    std::thread::Builder::new()
        .name("gatekeep-sensing".into())
        .spawn(move || {
            tracing::debug!("sensing thread started");
            loop {
                let frame = perception.observe();
                let failed = frame.is_err();
                if tx.blocking_send(frame).is_err() || failed {
                    break;
                }
            }
            tracing::debug!("sensing thread exiting");
        })
        .map_err(|e| SensorError::Unavailable(format!("sensing thread: {e}")))?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::spawn_actuator;
    use crate::actuator::tests::{fast_config, Call, RecordingHardware};
    use crate::replay::ReplaySource;
    use gatekeep_core::{
        BoundingBox, CredentialEvidence, DecisionConfig, Embedding, Identity, Sighting,
        StoreError, VerificationPolicy,
    };
    use gatekeep_hw::{SirenError, SirenPlayer};
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSiren {
        plays: AtomicUsize,
    }

    impl SirenPlayer for CountingSiren {
        fn play(&self, _asset: &Path) -> Result<(), SirenError> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct AuditLog {
        rows: Mutex<Vec<AccessAttempt>>,
    }

    impl IdentityBackend for AuditLog {
        fn list_all(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(vec![])
        }
        fn upsert(&self, _: &Identity) -> Result<(), StoreError> {
            Ok(())
        }
        fn log_attempt(&self, attempt: &AccessAttempt) -> Result<(), StoreError> {
            self.rows.lock().unwrap().push(attempt.clone());
            Ok(())
        }
    }

    /// Yields empty frames forever.
    struct EmptyFrames;

    impl Perception for EmptyFrames {
        fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(vec![])
        }
    }

    struct Rig {
        decision: DecisionLoop,
        hardware: RecordingHardware,
        actuator: tokio::task::JoinHandle<crate::actuator::ActuatorReport>,
        siren: Arc<CountingSiren>,
        audit: Arc<AuditLog>,
        identities: watch::Sender<Arc<IdentityStore>>,
    }

    impl Rig {
        fn new(store: IdentityStore, require_card: bool) -> Self {
            let hardware = RecordingHardware::default();
            let (handle, actuator) = spawn_actuator(Box::new(hardware.clone()), fast_config());
            let siren = Arc::new(CountingSiren::default());
            let audit = Arc::new(AuditLog::default());
            let (identities, rx) = watch::channel(Arc::new(store));
            let engine = DecisionEngine::new(DecisionConfig {
                verification: VerificationPolicy {
                    require_secondary_credential: require_card,
                    ..VerificationPolicy::default()
                },
                ..DecisionConfig::default()
            });
            let decision = DecisionLoop::new(
                engine,
                rx,
                handle,
                SirenRunner::new(siren.clone(), PathBuf::from("siren.wav")),
                Duration::from_millis(1),
            )
            .with_audit(audit.clone());
            Self { decision, hardware, actuator, siren, audit, identities }
        }

        /// Stop the loop, wait for the actuator to settle, return its calls.
        async fn finish(self) -> (Vec<Call>, Vec<AccessAttempt>, usize) {
            self.decision.shutdown(Duration::from_secs(1)).await;
            self.actuator.await.unwrap();
            // Audit writes run on the blocking pool.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let rows = self.audit.rows.lock().unwrap().clone();
            (self.hardware.calls(), rows, self.siren.plays.load(Ordering::SeqCst))
        }
    }

    fn enrolled() -> IdentityStore {
        vec![Identity {
            id: "1RV21CS042".into(),
            display_name: "Meera".into(),
            embeddings: vec![Embedding::new(vec![0.0, 0.0, 0.0])],
            card_reference_text: String::new(),
            card_embeddings: vec![Embedding::new(vec![1.0, 1.0, 1.0])],
        }]
        .into_iter()
        .collect()
    }

    fn sighting(values: [f32; 3], evidence: Option<CredentialEvidence>) -> Observation {
        Observation {
            sighting: Sighting {
                bounding_box: BoundingBox { x: 120.0, y: 60.0, width: 90.0, height: 90.0 },
                embedding: Embedding::new(values.to_vec()),
            },
            evidence,
        }
    }

    #[tokio::test]
    async fn test_granted_person_opens_gate_once() {
        let mut rig = Rig::new(enrolled(), false);
        let start = Instant::now();
        let frame = [sighting([0.05, 0.0, 0.0], None)];
        for i in 0..10 {
            rig.decision.handle_frame(&frame, start + Duration::from_millis(33 * i));
        }

        let (calls, rows, sirens) = rig.finish().await;
        assert_eq!(calls.iter().filter(|c| **c == Call::Relay(true)).count(), 1);
        assert_eq!(calls.last(), Some(&Call::Release));
        assert_eq!(sirens, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, AttemptResult::Granted);
        assert_eq!(rows[0].display_name.as_deref(), Some("Meera"));
    }

    #[tokio::test]
    async fn test_missing_card_denies_and_buzzes() {
        let mut rig = Rig::new(enrolled(), true);
        let outcome = rig.decision.handle_frame(&[sighting([0.05, 0.0, 0.0], None)], Instant::now());
        assert!(!outcome.verdicts[0].verdict.granted);
        assert_eq!(outcome.verdicts[0].verdict.identity_id.as_deref(), Some("1RV21CS042"));

        let (calls, rows, sirens) = rig.finish().await;
        assert!(calls.contains(&Call::Buzzer(true)));
        assert!(!calls.contains(&Call::Relay(true)));
        assert_eq!(sirens, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, AttemptResult::Denied);
    }

    #[tokio::test]
    async fn test_card_text_and_photo_grant() {
        let mut rig = Rig::new(enrolled(), true);
        let evidence = CredentialEvidence {
            recognized_text: "RV COLLEGE 1rv21cs042 MEERA".into(),
            card_embedding: Some(Embedding::new(vec![1.0, 1.1, 1.0])),
        };
        let outcome =
            rig.decision.handle_frame(&[sighting([0.0, 0.05, 0.0], Some(evidence))], Instant::now());
        assert!(outcome.verdicts[0].verdict.granted);

        let (calls, _, _) = rig.finish().await;
        assert!(calls.contains(&Call::Relay(true)));
        assert!(!calls.contains(&Call::Buzzer(true)));
    }

    #[tokio::test]
    async fn test_unknown_face_sirens_once_while_it_stays() {
        let mut rig = Rig::new(enrolled(), false);
        let stranger = [sighting([4.0, 4.0, 4.0], None)];
        let start = Instant::now();

        let first = rig.decision.handle_frame(&stranger, start);
        assert!(first.actions.iter().any(|a| matches!(a, Action::TriggerSiren { .. })));
        let second = rig.decision.handle_frame(&stranger, start + Duration::from_millis(33));
        assert!(second.actions.iter().any(|a| matches!(a, Action::Buzz { .. })));
        assert!(!second.actions.iter().any(|a| matches!(a, Action::TriggerSiren { .. })));

        let (calls, rows, sirens) = rig.finish().await;
        assert_eq!(sirens, 1);
        assert!(!calls.contains(&Call::Relay(true)));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, AttemptResult::Unknown);
        assert!(rows[0].identity_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_face_returning_sirens_again() {
        let mut rig = Rig::new(enrolled(), false);
        let stranger = [sighting([4.0, 4.0, 4.0], None)];
        let start = Instant::now();

        rig.decision.handle_frame(&stranger, start);
        // Let the first siren finish so the runner accepts the same key again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let gone = rig.decision.handle_frame(&[], start + Duration::from_millis(33));
        assert!(gone.actions.is_empty());
        let back = rig.decision.handle_frame(&stranger, start + Duration::from_millis(66));
        assert!(back.actions.iter().any(|a| matches!(a, Action::Buzz { .. })));
        assert!(back.actions.iter().any(|a| matches!(a, Action::TriggerSiren { .. })));

        let (calls, rows, sirens) = rig.finish().await;
        assert_eq!(sirens, 2);
        assert!(calls.contains(&Call::Buzzer(true)));
        assert_eq!(rows.iter().filter(|r| r.result == AttemptResult::Unknown).count(), 2);
    }

    #[tokio::test]
    async fn test_refreshed_snapshot_is_used_next_tick() {
        let mut rig = Rig::new(IdentityStore::new(), false);
        let face = [sighting([0.0, 0.0, 0.0], None)];

        let before = rig.decision.handle_frame(&face, Instant::now());
        assert!(before.verdicts[0].verdict.identity_id.is_none());

        rig.identities.send_replace(Arc::new(enrolled()));
        let after = rig.decision.handle_frame(&[], Instant::now());
        assert!(after.verdicts.is_empty());
        let later = rig.decision.handle_frame(&face, Instant::now() + Duration::from_millis(500));
        assert!(later.verdicts[0].verdict.granted);

        // A dropped refresher leaves the last snapshot in place.
        drop(rig.identities);
        let still = rig.decision.handle_frame(&face, Instant::now());
        assert_eq!(still.verdicts[0].verdict.identity_id.as_deref(), Some("1RV21CS042"));
        rig.decision.shutdown(Duration::ZERO).await;
        rig.actuator.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_at_end_of_stream() {
        let mut rig = Rig::new(enrolled(), false);
        let frames = concat!(
            r#"{"observations": []}"#, "\n",
            r#"{"observations": [{"sighting": {"bounding_box": {"x": 0, "y": 0, "width": 10, "height": 10}, "embedding": {"values": [0.0, 0.0, 0.1]}}}]}"#, "\n",
        );
        let exit = rig
            .decision
            .run(ReplaySource::from_reader(Cursor::new(frames)), std::future::pending())
            .await
            .unwrap();
        assert_eq!(exit, LoopExit::EndOfStream);
        assert_eq!(rig.decision.engine.tick(), 2);

        let (calls, _, _) = rig.finish().await;
        assert!(calls.contains(&Call::Relay(true)));
    }

    #[tokio::test]
    async fn test_run_surfaces_read_failure() {
        let mut rig = Rig::new(enrolled(), false);
        let result = rig
            .decision
            .run(ReplaySource::from_reader(Cursor::new("not json\n")), std::future::pending())
            .await;
        assert!(matches!(result, Err(SensorError::ReadFailed(_))));
        rig.finish().await;
    }

    #[tokio::test]
    async fn test_run_honours_shutdown() {
        let mut rig = Rig::new(enrolled(), false);
        let exit = rig
            .decision
            .run(EmptyFrames, tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(exit, LoopExit::Shutdown);
        rig.finish().await;
    }
}
