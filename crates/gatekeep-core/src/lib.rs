//! gatekeep-core — Access decisions for an unattended face-recognition gate.
//!
//! Matches face embeddings against enrolled identities, corroborates them
//! with an ID card (printed text and photo), reconciles verdicts into
//! debounced gate and alarm actions, and models the gate's timed state
//! machine. Everything here is synchronous and free of I/O.

pub mod actuator;
pub mod alert;
pub mod decision;
pub mod engine;
pub mod matcher;
pub mod sensing;
pub mod store;
pub mod types;
pub mod verification;

pub use actuator::{ActuatorConfig, BuzzerPulse, GateActuator, GatePhase, HardwareOp};
pub use alert::{AlertKind, AlertManager};
pub use decision::{reconcile, Action, AlertKey, DecisionState, Reconciliation, SessionState};
pub use engine::{DecisionConfig, DecisionEngine, TickOutcome};
pub use matcher::{match_embedding, EuclideanMatcher, Matcher};
pub use sensing::{Perception, SensorError};
pub use store::{IdentityBackend, IdentityStore, StoreError};
pub use types::{
    AccessAttempt, AttemptResult, BoundingBox, CredentialEvidence, Embedding, Identity,
    MatchResult, Observation, PositionKey, Sighting, SightingVerdict, Verdict,
};
pub use verification::{verify, VerificationPolicy};
