use gatekeep_core::{ActuatorConfig, DecisionConfig, VerificationPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite identity database.
    pub db_path: PathBuf,
    /// Line-delimited JSON file of pre-computed per-frame observations.
    pub replay_path: Option<PathBuf>,
    /// Maximum Euclidean distance for a face match.
    pub face_threshold: f32,
    /// Maximum distance between a card photo and an enrolled card embedding.
    pub card_photo_threshold: f32,
    /// Arm travel time for opening and for closing.
    pub open_duration: Duration,
    /// How long the gate stays fully open.
    pub hold_duration: Duration,
    pub buzzer_duration: Duration,
    /// Extra gap between sirens at the same position; zero leaves only positional dedup.
    pub siren_cooldown: Duration,
    /// How long shutdown waits for a playing siren.
    pub siren_grace: Duration,
    /// Frames a "granted" label stays up.
    pub label_display_ticks: u32,
    /// Require ID card text and photo in addition to the face.
    pub require_secondary_credential: bool,
    /// Sensing loop period.
    pub frame_interval: Duration,
    /// How often to reload identities from the database.
    pub store_refresh: Duration,
    /// Directory holding `siren.wav` / `siren.mp3`.
    pub assets_dir: PathBuf,
    /// Use simulated hardware even on a known board.
    pub force_simulation: bool,
}

impl Config {
    /// Load configuration from `GATEKEEP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            db_path: gatekeep_store::default_db_path(),
            replay_path: std::env::var("GATEKEEP_REPLAY_PATH").ok().map(PathBuf::from),
            face_threshold: env_parse("GATEKEEP_FACE_THRESHOLD", 0.50),
            card_photo_threshold: env_parse("GATEKEEP_CARD_PHOTO_THRESHOLD", 0.50),
            open_duration: env_millis("GATEKEEP_OPEN_DURATION_MS", 2000),
            hold_duration: env_millis("GATEKEEP_HOLD_DURATION_MS", 0),
            buzzer_duration: env_millis("GATEKEEP_BUZZER_DURATION_MS", 1000),
            siren_cooldown: env_millis("GATEKEEP_SIREN_COOLDOWN_MS", 0),
            siren_grace: env_millis("GATEKEEP_SIREN_GRACE_MS", 5000),
            label_display_ticks: env_parse("GATEKEEP_LABEL_DISPLAY_TICKS", 30),
            require_secondary_credential: env_flag("GATEKEEP_REQUIRE_SECONDARY_CREDENTIAL", true),
            frame_interval: env_millis("GATEKEEP_FRAME_INTERVAL_MS", 33),
            store_refresh: Duration::from_secs(env_parse("GATEKEEP_STORE_REFRESH_SECS", 30)),
            assets_dir: std::env::var("GATEKEEP_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets")),
            force_simulation: env_flag("GATEKEEP_FORCE_SIMULATION", false),
        }
    }

    pub fn decision(&self) -> DecisionConfig {
        DecisionConfig {
            face_threshold: self.face_threshold,
            verification: VerificationPolicy {
                card_threshold: self.card_photo_threshold,
                require_secondary_credential: self.require_secondary_credential,
            },
            label_display_ticks: self.label_display_ticks,
            // A buzz is not re-queued while the previous one can still be sounding.
            buzzer_cooldown: self.buzzer_duration,
            siren_cooldown: self.siren_cooldown,
        }
    }

    /// Actuator timings; servo duties come from the board profile when one is known.
    pub fn actuator(&self) -> ActuatorConfig {
        let mut config = ActuatorConfig {
            open_duration: self.open_duration,
            hold_duration: self.hold_duration,
            buzzer_duration: self.buzzer_duration,
            ..ActuatorConfig::default()
        };
        if let Some(board) = gatekeep_hw::board::default_board() {
            config.servo_open_duty = board.servo.open_duty;
            config.servo_closed_duty = board.servo.neutral_duty;
        }
        config
    }
}

/// Parse `key` as `T`, falling back to `default` when unset or out of range.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key, default))
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Variables are unlikely to be set in the test environment; only read
        // keys nothing else in the suite touches.
        assert_eq!(env_parse("GATEKEEP_TEST_UNSET_F32", 0.5f32), 0.5);
        assert_eq!(env_millis("GATEKEEP_TEST_UNSET_MS", 2000), Duration::from_secs(2));
        assert!(env_flag("GATEKEEP_TEST_UNSET_FLAG", true));
    }

    #[test]
    fn test_out_of_range_ticks_fall_back() {
        std::env::set_var("GATEKEEP_TEST_TICKS_TOO_BIG", "5000000000");
        assert_eq!(env_parse::<u32>("GATEKEEP_TEST_TICKS_TOO_BIG", 30), 30);
        std::env::set_var("GATEKEEP_TEST_TICKS_OK", " 45 ");
        assert_eq!(env_parse::<u32>("GATEKEEP_TEST_TICKS_OK", 30), 45);
    }

    #[test]
    fn test_decision_config_mapping() {
        let mut config = Config::from_env();
        config.require_secondary_credential = false;
        config.card_photo_threshold = 0.42;
        config.buzzer_duration = Duration::from_millis(700);
        let decision = config.decision();
        assert!(!decision.verification.require_secondary_credential);
        assert_eq!(decision.verification.card_threshold, 0.42);
        assert_eq!(decision.buzzer_cooldown, Duration::from_millis(700));
    }
}
