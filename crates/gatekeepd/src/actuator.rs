//! Actuator task: sole owner of the gate hardware.
//!
//! The decision loop talks to it through a cloneable [`ActuatorHandle`]
//! whose sends never wait. The task runs the gate and buzzer state machines,
//! sleeping only until the next phase deadline or the next command.

use gatekeep_core::{ActuatorConfig, BuzzerPulse, GateActuator, GatePhase, HardwareOp};
use gatekeep_hw::{GateHardware, HardwareFault};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const COMMAND_QUEUE: usize = 16;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("actuator queue full; command dropped")]
    QueueFull,
    #[error("actuator task exited")]
    ChannelClosed,
}

/// Commands accepted by the actuator task, processed in the order sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCommand {
    OpenGate { identity_id: String },
    Buzz,
}

/// Summary returned when the actuator task finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorReport {
    pub cycles: u64,
    pub faults: u64,
}

/// Clone-safe handle to the actuator task.
#[derive(Clone)]
pub struct ActuatorHandle {
    tx: mpsc::Sender<ActuatorCommand>,
    phase: watch::Receiver<GatePhase>,
}

impl ActuatorHandle {
    pub fn open_gate(&self, identity_id: &str) -> Result<(), ActuatorError> {
        self.send(ActuatorCommand::OpenGate {
            identity_id: identity_id.to_string(),
        })
    }

    pub fn buzz(&self) -> Result<(), ActuatorError> {
        self.send(ActuatorCommand::Buzz)
    }

    /// Current gate phase as last published by the task.
    pub fn phase(&self) -> GatePhase {
        *self.phase.borrow()
    }

    fn send(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActuatorError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ActuatorError::ChannelClosed,
        })
    }
}

/// Initialise the hardware and start the actuator task.
///
/// An initialisation fault is logged, not fatal: the task still runs its
/// state machines so the rest of the system behaves the same.
pub fn spawn_actuator(
    mut hardware: Box<dyn GateHardware>,
    config: ActuatorConfig,
) -> (ActuatorHandle, JoinHandle<ActuatorReport>) {
    if let Err(e) = hardware.initialize() {
        tracing::error!(error = %e, hardware = %hardware.describe(), "gate hardware init failed");
    }

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let (phase_tx, phase_rx) = watch::channel(GatePhase::Closed);
    let join = tokio::spawn(run(hardware, config, rx, phase_tx));

    (ActuatorHandle { tx, phase: phase_rx }, join)
}

async fn run(
    mut hardware: Box<dyn GateHardware>,
    config: ActuatorConfig,
    mut rx: mpsc::Receiver<ActuatorCommand>,
    phase_tx: watch::Sender<GatePhase>,
) -> ActuatorReport {
    tracing::info!(hardware = %hardware.describe(), "actuator task started");
    let mut gate = GateActuator::new(config, Instant::now());
    let mut buzzer = BuzzerPulse::new(config.buzzer_duration);
    let mut faults = 0u64;
    let mut accepting = true;

    loop {
        let deadline = match (gate.next_deadline(), buzzer.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        // After the last handle is gone, finish any running cycle and stop.
        if !accepting && deadline.is_none() {
            break;
        }
        let wake = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            command = rx.recv(), if accepting => {
                let now = Instant::now();
                let ops = match command {
                    Some(ActuatorCommand::OpenGate { identity_id }) => {
                        tracing::debug!(identity = %identity_id, "open requested");
                        gate.request_open(now)
                    }
                    Some(ActuatorCommand::Buzz) => buzzer.request(now),
                    None => {
                        accepting = false;
                        Vec::new()
                    }
                };
                faults += apply_all(hardware.as_mut(), &ops);
            }
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {}
        }

        let now = Instant::now();
        let mut ops = gate.poll(now);
        ops.extend(buzzer.poll(now));
        faults += apply_all(hardware.as_mut(), &ops);
        phase_tx.send_replace(gate.phase());
    }

    if let Err(e) = hardware.release_all() {
        tracing::warn!(error = %e, "hardware release failed");
        faults += 1;
    }
    let report = ActuatorReport {
        cycles: gate.cycles(),
        faults,
    };
    tracing::info!(cycles = report.cycles, faults = report.faults, "actuator task exiting");
    report
}

/// Apply ops in order. Faults are logged and counted; the sequence always continues.
fn apply_all(hardware: &mut dyn GateHardware, ops: &[HardwareOp]) -> u64 {
    let mut faults = 0;
    for op in ops {
        if let Err(e) = apply(hardware, *op) {
            tracing::warn!(error = %e, ?op, "hardware fault; continuing cycle");
            faults += 1;
        }
    }
    faults
}

fn apply(hardware: &mut dyn GateHardware, op: HardwareOp) -> Result<(), HardwareFault> {
    match op {
        HardwareOp::Relay(on) => hardware.set_relay(on),
        HardwareOp::ServoDuty(duty) => hardware.set_servo_duty(duty),
        HardwareOp::Buzzer(on) => hardware.set_buzzer(on),
    }
}
