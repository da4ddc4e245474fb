//! Board profile database.
//!
//! Maps a device-tree model string to the GPIO pins and servo PWM settings
//! of a gate controller board. Profiles are embedded at compile time from
//! `contrib/boards/*.toml`.

use serde::Deserialize;
use std::sync::OnceLock;

/// Raspberry Pi with relay on BCM17, servo on BCM18 (PWM0), buzzer on BCM27.
const BOARD_RASPBERRY_PI: &str = include_str!("../../../contrib/boards/raspberry-pi.toml");

/// Where the kernel exposes the board model on device-tree systems.
pub const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";

static BOARD_DB: OnceLock<Vec<BoardProfile>> = OnceLock::new();

/// Top-level profile structure (one per `contrib/boards/*.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct BoardProfile {
    pub board: BoardInfo,
    pub pins: PinMap,
    pub servo: ServoInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardInfo {
    pub name: String,
    /// Substring matched against the device-tree model string.
    pub model_match: String,
}

/// GPIO line numbers from the `[pins]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PinMap {
    pub relay: u32,
    pub servo: u32,
    pub buzzer: u32,
}

/// Hardware PWM settings from the `[servo]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ServoInfo {
    pub pwm_chip: u32,
    pub pwm_channel: u32,
    pub period_ns: u64,
    /// Duty cycle (percent) for the raised arm.
    pub open_duty: f32,
    /// Duty cycle (percent) for the lowered arm.
    pub neutral_duty: f32,
}

fn board_db() -> &'static Vec<BoardProfile> {
    BOARD_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [BOARD_RASPBERRY_PI] {
            match toml::from_str::<BoardProfile>(src) {
                Ok(b) => db.push(b),
                Err(e) => tracing::error!(error = %e, "bad board profile TOML"),
            }
        }
        db
    })
}

/// Find the profile whose `model_match` occurs in `model`.
pub fn lookup_board(model: &str) -> Option<&'static BoardProfile> {
    board_db()
        .iter()
        .find(|b| model.contains(b.board.model_match.as_str()))
}

/// List all known board profiles.
pub fn list_boards() -> &'static [BoardProfile] {
    board_db()
}

/// Read the device-tree model string, if this is a device-tree system.
///
/// The kernel NUL-terminates the string; the terminator is stripped.
pub fn read_device_model() -> Option<String> {
    let raw = std::fs::read(DEVICE_TREE_MODEL).ok()?;
    let text = String::from_utf8_lossy(&raw);
    let model = text.trim_end_matches('\0').trim().to_string();
    (!model.is_empty()).then_some(model)
}

/// Default profile used for simulation, so simulated runs report the same duties.
pub fn default_board() -> Option<&'static BoardProfile> {
    board_db().first()
}
