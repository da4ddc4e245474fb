//! Gate hardware: relay, servo and buzzer behind one capability trait.
//!
//! [`GpioHardware`] drives real pins through the Linux sysfs GPIO and PWM
//! interfaces. [`SimulatedHardware`] logs the same calls instead. Which one
//! runs is decided once, by [`detect`].

use crate::board::{self, BoardProfile, PinMap, ServoInfo};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareFault {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("duty cycle out of range: {0}%")]
    InvalidDuty(f32),
    #[error("hardware not initialized")]
    NotInitialized,
}

/// Logical contract of the gate controller.
pub trait GateHardware: Send {
    fn initialize(&mut self) -> Result<(), HardwareFault>;
    fn set_relay(&mut self, on: bool) -> Result<(), HardwareFault>;
    /// Servo PWM duty cycle in percent (0–100).
    fn set_servo_duty(&mut self, percent: f32) -> Result<(), HardwareFault>;
    fn set_buzzer(&mut self, on: bool) -> Result<(), HardwareFault>;
    /// Drive everything to a safe state and give the pins back.
    fn release_all(&mut self) -> Result<(), HardwareFault>;
    /// Short description for logs and status output.
    fn describe(&self) -> String;
}

fn check_duty(percent: f32) -> Result<(), HardwareFault> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(HardwareFault::InvalidDuty(percent))
    }
}

/// Logs every call instead of touching pins.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    pub relay: bool,
    pub servo_duty: Option<f32>,
    pub buzzer: bool,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GateHardware for SimulatedHardware {
    fn initialize(&mut self) -> Result<(), HardwareFault> {
        tracing::info!("gate hardware running in simulation mode");
        Ok(())
    }

    fn set_relay(&mut self, on: bool) -> Result<(), HardwareFault> {
        tracing::info!(on, "relay (simulated)");
        self.relay = on;
        Ok(())
    }

    fn set_servo_duty(&mut self, percent: f32) -> Result<(), HardwareFault> {
        check_duty(percent)?;
        tracing::info!(duty = percent, "servo (simulated)");
        self.servo_duty = Some(percent);
        Ok(())
    }

    fn set_buzzer(&mut self, on: bool) -> Result<(), HardwareFault> {
        tracing::info!(on, "buzzer (simulated)");
        self.buzzer = on;
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), HardwareFault> {
        tracing::info!("release (simulated)");
        self.relay = false;
        self.buzzer = false;
        self.servo_duty = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

/// Relay, buzzer and servo on sysfs GPIO/PWM.
pub struct GpioHardware {
    root: PathBuf,
    board_name: String,
    pins: PinMap,
    servo: ServoInfo,
    initialized: bool,
}

impl GpioHardware {
    pub fn new(profile: &BoardProfile) -> Self {
        Self::with_sysfs_root("/sys/class", profile)
    }

    /// Use an alternative sysfs root (for testing against a scratch tree).
    pub fn with_sysfs_root(root: impl Into<PathBuf>, profile: &BoardProfile) -> Self {
        Self {
            root: root.into(),
            board_name: profile.board.name.clone(),
            pins: profile.pins,
            servo: profile.servo,
            initialized: false,
        }
    }

    fn gpio_dir(&self, pin: u32) -> PathBuf {
        self.root.join("gpio").join(format!("gpio{pin}"))
    }

    fn pwm_chip_dir(&self) -> PathBuf {
        self.root.join("pwm").join(format!("pwmchip{}", self.servo.pwm_chip))
    }

    fn pwm_dir(&self) -> PathBuf {
        self.pwm_chip_dir().join(format!("pwm{}", self.servo.pwm_channel))
    }

    fn export_output(&self, pin: u32) -> Result<(), HardwareFault> {
        if !self.gpio_dir(pin).exists() {
            write_sysfs(&self.root.join("gpio/export"), &pin.to_string())?;
        }
        write_sysfs(&self.gpio_dir(pin).join("direction"), "out")
    }

    fn write_pin(&self, pin: u32, on: bool) -> Result<(), HardwareFault> {
        if !self.initialized {
            return Err(HardwareFault::NotInitialized);
        }
        write_sysfs(&self.gpio_dir(pin).join("value"), if on { "1" } else { "0" })
    }
}

fn write_sysfs(path: &Path, value: &str) -> Result<(), HardwareFault> {
    fs::write(path, value).map_err(|source| HardwareFault::Write {
        path: path.display().to_string(),
        source,
    })
}

impl GateHardware for GpioHardware {
    fn initialize(&mut self) -> Result<(), HardwareFault> {
        self.export_output(self.pins.relay)?;
        self.export_output(self.pins.buzzer)?;

        if !self.pwm_dir().exists() {
            write_sysfs(
                &self.pwm_chip_dir().join("export"),
                &self.servo.pwm_channel.to_string(),
            )?;
        }
        write_sysfs(&self.pwm_dir().join("period"), &self.servo.period_ns.to_string())?;
        self.initialized = true;

        self.set_servo_duty(self.servo.neutral_duty)?;
        write_sysfs(&self.pwm_dir().join("enable"), "1")?;
        self.write_pin(self.pins.relay, false)?;
        self.write_pin(self.pins.buzzer, false)?;

        tracing::info!(
            board = %self.board_name,
            relay = self.pins.relay,
            servo = self.pins.servo,
            buzzer = self.pins.buzzer,
            "gate hardware initialized"
        );
        Ok(())
    }

    fn set_relay(&mut self, on: bool) -> Result<(), HardwareFault> {
        self.write_pin(self.pins.relay, on)
    }

    fn set_servo_duty(&mut self, percent: f32) -> Result<(), HardwareFault> {
        check_duty(percent)?;
        if !self.initialized {
            return Err(HardwareFault::NotInitialized);
        }
        let duty_ns = (self.servo.period_ns as f64 * f64::from(percent) / 100.0).round() as u64;
        write_sysfs(&self.pwm_dir().join("duty_cycle"), &duty_ns.to_string())
    }

    fn set_buzzer(&mut self, on: bool) -> Result<(), HardwareFault> {
        self.write_pin(self.pins.buzzer, on)
    }

    fn release_all(&mut self) -> Result<(), HardwareFault> {
        if !self.initialized {
            return Ok(());
        }
        // Best effort: try every step, report the first failure.
        let steps = [
            self.write_pin(self.pins.relay, false),
            self.write_pin(self.pins.buzzer, false),
            self.set_servo_duty(self.servo.neutral_duty),
            write_sysfs(&self.pwm_dir().join("enable"), "0"),
            write_sysfs(&self.root.join("gpio/unexport"), &self.pins.relay.to_string()),
            write_sysfs(&self.root.join("gpio/unexport"), &self.pins.buzzer.to_string()),
        ];
        self.initialized = false;
        tracing::info!(board = %self.board_name, "gate hardware released");
        steps.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }

    fn describe(&self) -> String {
        format!("gpio ({})", self.board_name)
    }
}

/// Pick real GPIO on a known board, simulation everywhere else.
pub fn detect(force_simulation: bool) -> Box<dyn GateHardware> {
    if force_simulation {
        tracing::info!("simulation forced by configuration");
        return Box::new(SimulatedHardware::new());
    }
    let Some(model) = board::read_device_model() else {
        tracing::info!("no device-tree model; using simulated gate hardware");
        return Box::new(SimulatedHardware::new());
    };
    match board::lookup_board(&model) {
        Some(profile) => {
            tracing::info!(model = %model, board = %profile.board.name, "board detected");
            Box::new(GpioHardware::new(profile))
        }
        None => {
            tracing::warn!(model = %model, "no board profile for this model; using simulation");
            Box::new(SimulatedHardware::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::lookup_board;

    /// Fake sysfs with the exported relay/buzzer pins and servo PWM channel.
    fn scratch_sysfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for pin in [17, 27] {
            fs::create_dir_all(dir.path().join(format!("gpio/gpio{pin}"))).unwrap();
        }
        fs::create_dir_all(dir.path().join("pwm/pwmchip0/pwm0")).unwrap();
        dir
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn test_gpio_initialize_and_drive() {
        let dir = scratch_sysfs();
        let root = dir.path();
        let profile = lookup_board("Raspberry Pi 3").unwrap();
        let mut hw = GpioHardware::with_sysfs_root(root, profile);

        hw.initialize().unwrap();
        assert_eq!(read(root, "gpio/gpio17/direction"), "out");
        assert_eq!(read(root, "pwm/pwmchip0/pwm0/period"), "20000000");
        assert_eq!(read(root, "pwm/pwmchip0/pwm0/duty_cycle"), "1500000");
        assert_eq!(read(root, "pwm/pwmchip0/pwm0/enable"), "1");

        hw.set_relay(true).unwrap();
        hw.set_servo_duty(12.5).unwrap();
        hw.set_buzzer(true).unwrap();
        assert_eq!(read(root, "gpio/gpio17/value"), "1");
        assert_eq!(read(root, "gpio/gpio27/value"), "1");
        assert_eq!(read(root, "pwm/pwmchip0/pwm0/duty_cycle"), "2500000");

        hw.release_all().unwrap();
        assert_eq!(read(root, "gpio/gpio17/value"), "0");
        assert_eq!(read(root, "gpio/gpio27/value"), "0");
        assert_eq!(read(root, "pwm/pwmchip0/pwm0/enable"), "0");
    }

    #[test]
    fn test_gpio_requires_initialize() {
        let dir = scratch_sysfs();
        let root = dir.path();
        let profile = lookup_board("Raspberry Pi 3").unwrap();
        let mut hw = GpioHardware::with_sysfs_root(root, profile);
        assert!(matches!(hw.set_relay(true), Err(HardwareFault::NotInitialized)));
    }

    #[test]
    fn test_gpio_missing_sysfs_is_fault() {
        let profile = lookup_board("Raspberry Pi 3").unwrap();
        let mut hw = GpioHardware::with_sysfs_root("/nonexistent/gatekeep", profile);
        assert!(matches!(hw.initialize(), Err(HardwareFault::Write { .. })));
    }

    #[test]
    fn test_simulated_tracks_state() {
        let mut hw = SimulatedHardware::new();
        hw.initialize().unwrap();
        hw.set_relay(true).unwrap();
        hw.set_servo_duty(12.5).unwrap();
        assert!(hw.relay);
        assert_eq!(hw.servo_duty, Some(12.5));
        assert!(matches!(hw.set_servo_duty(120.0), Err(HardwareFault::InvalidDuty(_))));
        hw.release_all().unwrap();
        assert!(!hw.relay && !hw.buzzer);
    }

    #[test]
    fn test_forced_simulation() {
        assert_eq!(detect(true).describe(), "simulated");
    }
}
