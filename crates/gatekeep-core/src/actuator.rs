//! Timed state machines for the gate arm and the buzzer.
//!
//! Neither machine sleeps or touches hardware. Callers feed them the current
//! time and apply the returned [`HardwareOp`]s; [`GateActuator::next_deadline`]
//! tells the caller when to poll again.

use std::time::{Duration, Instant};

/// Logical hardware instruction emitted by a state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardwareOp {
    Relay(bool),
    /// Servo PWM duty cycle in percent.
    ServoDuty(f32),
    Buzzer(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Closed,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy)]
pub struct ActuatorConfig {
    /// Time for the arm to travel; governs Opening→Open and Closing→Closed.
    pub open_duration: Duration,
    /// Time the gate stays fully open before it starts closing.
    pub hold_duration: Duration,
    pub buzzer_duration: Duration,
    pub servo_open_duty: f32,
    pub servo_closed_duty: f32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            open_duration: Duration::from_secs(2),
            hold_duration: Duration::ZERO,
            buzzer_duration: Duration::from_secs(1),
            servo_open_duty: 12.5,
            servo_closed_duty: 7.5,
        }
    }
}

/// Gate controller: `Closed → Opening → Open → Closing → Closed`.
///
/// Only one cycle runs at a time. Open requests outside `Closed` are
/// dropped; a started cycle always runs through to `Closed`.
#[derive(Debug)]
pub struct GateActuator {
    config: ActuatorConfig,
    phase: GatePhase,
    entered: Instant,
    cycles: u64,
}

impl GateActuator {
    pub fn new(config: ActuatorConfig, now: Instant) -> Self {
        Self {
            config,
            phase: GatePhase::Closed,
            entered: now,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    /// Number of cycles started since construction.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_idle(&self) -> bool {
        self.phase == GatePhase::Closed
    }

    /// Begin an open cycle. Returns no ops if a cycle is already in progress.
    pub fn request_open(&mut self, now: Instant) -> Vec<HardwareOp> {
        if self.phase != GatePhase::Closed {
            tracing::debug!(phase = ?self.phase, "open request coalesced into running cycle");
            return Vec::new();
        }
        self.cycles += 1;
        tracing::info!(cycle = self.cycles, "gate opening");
        self.enter(GatePhase::Opening, now)
    }

    /// Advance through every phase whose deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Vec<HardwareOp> {
        let mut ops = Vec::new();
        while let Some(deadline) = self.next_deadline() {
            if deadline > now {
                break;
            }
            let next = match self.phase {
                GatePhase::Opening => GatePhase::Open,
                GatePhase::Open => GatePhase::Closing,
                GatePhase::Closing => GatePhase::Closed,
                GatePhase::Closed => break,
            };
            // Chain from the deadline, not from `now`, so late polls keep the schedule.
            ops.extend(self.enter(next, deadline));
        }
        ops
    }

    /// When the current phase ends, or `None` while closed.
    pub fn next_deadline(&self) -> Option<Instant> {
        let length = match self.phase {
            GatePhase::Closed => return None,
            GatePhase::Opening | GatePhase::Closing => self.config.open_duration,
            GatePhase::Open => self.config.hold_duration,
        };
        Some(self.entered + length)
    }

    fn enter(&mut self, phase: GatePhase, at: Instant) -> Vec<HardwareOp> {
        self.phase = phase;
        self.entered = at;
        match phase {
            GatePhase::Opening => vec![
                HardwareOp::Relay(true),
                HardwareOp::ServoDuty(self.config.servo_open_duty),
            ],
            GatePhase::Open => {
                tracing::info!(cycle = self.cycles, "gate open");
                Vec::new()
            }
            GatePhase::Closing => {
                tracing::info!(cycle = self.cycles, "gate closing");
                vec![
                    HardwareOp::ServoDuty(self.config.servo_closed_duty),
                    HardwareOp::Relay(false),
                ]
            }
            GatePhase::Closed => {
                tracing::info!(cycle = self.cycles, "gate closed");
                Vec::new()
            }
        }
    }
}

/// Buzzer pulse: on for a fixed duration, then off. Overlapping requests coalesce.
#[derive(Debug)]
pub struct BuzzerPulse {
    duration: Duration,
    sounding_until: Option<Instant>,
}

impl BuzzerPulse {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            sounding_until: None,
        }
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding_until.is_some()
    }

    pub fn request(&mut self, now: Instant) -> Vec<HardwareOp> {
        if self.sounding_until.is_some() {
            return Vec::new();
        }
        self.sounding_until = Some(now + self.duration);
        vec![HardwareOp::Buzzer(true)]
    }

    pub fn poll(&mut self, now: Instant) -> Vec<HardwareOp> {
        match self.sounding_until {
            Some(until) if until <= now => {
                self.sounding_until = None;
                vec![HardwareOp::Buzzer(false)]
            }
            _ => Vec::new(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.sounding_until
    }
}
