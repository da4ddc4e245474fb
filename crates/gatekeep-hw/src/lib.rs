//! gatekeep-hw — Hardware abstraction for the gate controller.
//!
//! Drives the gate relay, servo and buzzer over Linux sysfs GPIO/PWM, with
//! a logging simulator for machines without the hardware, and plays the
//! siren through a system audio player.

pub mod board;
pub mod hardware;
pub mod siren;

pub use hardware::{detect, GateHardware, GpioHardware, HardwareFault, SimulatedHardware};
pub use siren::{find_siren_asset, CommandSiren, SilentSiren, SirenError, SirenPlayer};
