//! Siren playback through a system audio player.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// File names searched for in the assets directory, in order.
const SIREN_FILES: [&str; 2] = ["siren.wav", "siren.mp3"];

#[derive(Debug, Error)]
pub enum SirenError {
    #[error("siren asset not found: {0}")]
    AssetNotFound(String),
    #[error("no audio player available for {0}")]
    NoPlayer(String),
    #[error("player {player} exited with {status}")]
    PlayerFailed { player: String, status: String },
}

/// Plays a siren sound to completion. Blocking; run it off the sensing loop.
pub trait SirenPlayer: Send + Sync {
    fn play(&self, asset: &Path) -> Result<(), SirenError>;
}

/// Runs the first available command-line audio player.
pub struct CommandSiren {
    players: Vec<(String, Vec<String>)>,
}

impl CommandSiren {
    /// Players tried in order: PulseAudio, ALSA, then SoX.
    pub fn new() -> Self {
        Self::with_players(vec![
            ("paplay".to_string(), vec![]),
            ("aplay".to_string(), vec!["-q".to_string()]),
            ("play".to_string(), vec!["-q".to_string()]),
        ])
    }

    pub fn with_players(players: Vec<(String, Vec<String>)>) -> Self {
        Self { players }
    }
}

impl Default for CommandSiren {
    fn default() -> Self {
        Self::new()
    }
}

impl SirenPlayer for CommandSiren {
    fn play(&self, asset: &Path) -> Result<(), SirenError> {
        if !asset.exists() {
            return Err(SirenError::AssetNotFound(asset.display().to_string()));
        }

        for (player, args) in &self.players {
            let status = Command::new(player)
                .args(args)
                .arg(asset)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();

            match status {
                Ok(s) if s.success() => {
                    tracing::debug!(player = %player, "siren finished");
                    return Ok(());
                }
                Ok(s) => {
                    return Err(SirenError::PlayerFailed {
                        player: player.clone(),
                        status: s.to_string(),
                    });
                }
                // Not installed: try the next one.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SirenError::PlayerFailed {
                        player: player.clone(),
                        status: e.to_string(),
                    });
                }
            }
        }

        Err(SirenError::NoPlayer(asset.display().to_string()))
    }
}

/// Logs instead of playing; used when no asset or audio device is present.
pub struct SilentSiren;

impl SirenPlayer for SilentSiren {
    fn play(&self, asset: &Path) -> Result<(), SirenError> {
        tracing::warn!(asset = %asset.display(), "SIREN (silent)");
        Ok(())
    }
}

/// First siren file present in `assets_dir`.
pub fn find_siren_asset(assets_dir: &Path) -> Option<PathBuf> {
    SIREN_FILES
        .iter()
        .map(|name| assets_dir.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_prefers_wav() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("siren.mp3"), b"x").unwrap();
        assert_eq!(find_siren_asset(dir), Some(dir.join("siren.mp3")));
        fs::write(dir.join("siren.wav"), b"x").unwrap();
        assert_eq!(find_siren_asset(dir), Some(dir.join("siren.wav")));
    }

    #[test]
    fn test_find_missing() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(find_siren_asset(tmp.path()), None);
    }

    #[test]
    fn test_missing_asset_is_error() {
        let err = CommandSiren::new().play(Path::new("/nonexistent/siren.wav")).unwrap_err();
        assert!(matches!(err, SirenError::AssetNotFound(_)));
    }

    #[test]
    fn test_no_installed_player() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let asset = dir.join("siren.wav");
        fs::write(&asset, b"RIFF").unwrap();
        let siren = CommandSiren::with_players(vec![(
            "gatekeep-no-such-player".to_string(),
            vec![],
        )]);
        assert!(matches!(siren.play(&asset), Err(SirenError::NoPlayer(_))));
    }
}
