use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gatekeep_core::{ActuatorConfig, BuzzerPulse, Embedding, GateActuator, HardwareOp, Identity};
use gatekeep_hw::{GateHardware, SirenPlayer};
use gatekeep_store::SqliteStore;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "gatekeep", about = "Gatekeep access gate CLI")]
struct Cli {
    /// Identity database (defaults to GATEKEEP_DB_PATH, then the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll or replace an identity
    Enroll {
        /// Identity id, e.g. the roll number printed on the ID card
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// JSON file holding a list of face embeddings (`[[f32, ...], ...]`)
        #[arg(long)]
        embeddings: PathBuf,
        /// Reference text expected on the ID card
        #[arg(long, default_value = "")]
        card_text: String,
        /// JSON file holding embeddings of the card photo
        #[arg(long)]
        card_embeddings: Option<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        id: String,
    },
    /// Show recent access attempts
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run one gate cycle and one buzz on the detected hardware
    HwTest {
        /// Travel time for each of the open and close phases
        #[arg(long, default_value_t = 2000)]
        open_ms: u64,
        /// Use simulated hardware
        #[arg(long)]
        simulate: bool,
    },
    /// Play the siren once
    SirenTest {
        /// Defaults to GATEKEEP_ASSETS_DIR, then ./assets
        #[arg(long)]
        assets_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(gatekeep_store::default_db_path);
    tracing::debug!(db = %db_path.display(), "identity database");

    match cli.command {
        Commands::Enroll {
            id,
            name,
            embeddings,
            card_text,
            card_embeddings,
        } => {
            let embeddings = read_embeddings(&embeddings)?;
            if embeddings.is_empty() {
                bail!("no face embeddings in file; refusing to enroll an identity that can never match");
            }
            let card_embeddings = match card_embeddings {
                Some(path) => read_embeddings(&path)?,
                None => Vec::new(),
            };
            let identity = Identity {
                id,
                display_name: name,
                embeddings,
                card_reference_text: card_text,
                card_embeddings,
            };
            let store = open_store(&db_path)?;
            store.put(&identity)?;
            println!(
                "Enrolled {} ({}) with {} face / {} card embedding(s)",
                identity.id,
                identity.display_name,
                identity.embeddings.len(),
                identity.card_embeddings.len()
            );
        }
        Commands::List => {
            let identities = open_store(&db_path)?.identities()?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!(
                    "{:<16} {:<24} faces={} card_text={:?} card_photos={}",
                    identity.id,
                    identity.display_name,
                    identity.embeddings.len(),
                    identity.card_reference_text,
                    identity.card_embeddings.len()
                );
            }
        }
        Commands::Remove { id } => {
            if open_store(&db_path)?.remove(&id)? {
                println!("Removed {id}");
            } else {
                bail!("no identity with id {id}");
            }
        }
        Commands::Log { limit } => {
            let attempts = open_store(&db_path)?.recent_attempts(limit)?;
            if attempts.is_empty() {
                println!("No access attempts recorded");
            }
            for attempt in attempts {
                println!(
                    "{}  {:<8} {:<16} {}",
                    attempt.timestamp,
                    attempt.result.as_str(),
                    attempt.identity_id.as_deref().unwrap_or("-"),
                    attempt.display_name.as_deref().unwrap_or("")
                );
            }
        }
        Commands::HwTest { open_ms, simulate } => {
            let mut hardware = gatekeep_hw::detect(simulate);
            println!("Hardware: {}", hardware.describe());
            hardware
                .initialize()
                .context("hardware initialization failed")?;

            let mut config = ActuatorConfig {
                open_duration: Duration::from_millis(open_ms),
                ..ActuatorConfig::default()
            };
            if let Some(board) = gatekeep_hw::board::default_board() {
                config.servo_open_duty = board.servo.open_duty;
                config.servo_closed_duty = board.servo.neutral_duty;
            }

            let faults = run_gate_cycle(hardware.as_mut(), config).await
                + run_buzz(hardware.as_mut(), config.buzzer_duration).await;
            hardware.release_all()?;
            if faults > 0 {
                bail!("{faults} hardware operation(s) failed");
            }
            println!("Hardware test passed");
        }
        Commands::SirenTest { assets_dir } => {
            let assets_dir = assets_dir
                .or_else(|| std::env::var("GATEKEEP_ASSETS_DIR").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("assets"));
            let Some(asset) = gatekeep_hw::find_siren_asset(&assets_dir) else {
                bail!("no siren.wav or siren.mp3 in {}", assets_dir.display());
            };
            println!("Playing {}", asset.display());
            tokio::task::spawn_blocking(move || {
                gatekeep_hw::CommandSiren::new().play(&asset)
            })
            .await??;
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("cannot open {}", path.display()))
}

fn read_embeddings(path: &Path) -> Result<Vec<Embedding>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_embeddings(&text).with_context(|| format!("invalid embeddings in {}", path.display()))
}

/// Accepts `[[f32, ...], ...]`, rejecting vectors of mixed length.
fn parse_embeddings(text: &str) -> Result<Vec<Embedding>> {
    let vectors: Vec<Vec<f32>> = serde_json::from_str(text)?;
    if let Some(first) = vectors.first() {
        if vectors.iter().any(|v| v.len() != first.len() || v.is_empty()) {
            bail!("embeddings must be non-empty and all the same length");
        }
    }
    Ok(vectors.into_iter().map(Embedding::new).collect())
}

/// Drive one full open/close cycle, printing each phase. Returns the fault count.
async fn run_gate_cycle(hardware: &mut dyn GateHardware, config: ActuatorConfig) -> usize {
    let mut gate = GateActuator::new(config, Instant::now());
    let mut faults = apply(hardware, &gate.request_open(Instant::now()));
    println!("Gate: {:?}", gate.phase());

    while let Some(deadline) = gate.next_deadline() {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        faults += apply(hardware, &gate.poll(Instant::now()));
        println!("Gate: {:?}", gate.phase());
    }
    faults
}

async fn run_buzz(hardware: &mut dyn GateHardware, duration: Duration) -> usize {
    let mut buzzer = BuzzerPulse::new(duration);
    let mut faults = apply(hardware, &buzzer.request(Instant::now()));
    println!("Buzzer: on");
    while let Some(deadline) = buzzer.next_deadline() {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        faults += apply(hardware, &buzzer.poll(Instant::now()));
    }
    println!("Buzzer: off");
    faults
}

fn apply(hardware: &mut dyn GateHardware, ops: &[HardwareOp]) -> usize {
    let mut faults = 0;
    for op in ops {
        let result = match *op {
            HardwareOp::Relay(on) => hardware.set_relay(on),
            HardwareOp::ServoDuty(duty) => hardware.set_servo_duty(duty),
            HardwareOp::Buzzer(on) => hardware.set_buzzer(on),
        };
        if let Err(e) = result {
            eprintln!("  {op:?} failed: {e}");
            faults += 1;
        }
    }
    faults
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_hw::SimulatedHardware;

    #[test]
    fn test_parse_embeddings() {
        let parsed = parse_embeddings("[[0.1, 0.2], [0.3, 0.4]]").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].values, vec![0.3, 0.4]);
        assert!(parse_embeddings("[[0.1], [0.2, 0.3]]").is_err());
        assert!(parse_embeddings("[[]]").is_err());
        assert!(parse_embeddings("{}").is_err());
    }

    #[tokio::test]
    async fn test_gate_cycle_ends_closed() {
        let mut hw = SimulatedHardware::new();
        let config = ActuatorConfig {
            open_duration: Duration::from_millis(10),
            ..ActuatorConfig::default()
        };
        assert_eq!(run_gate_cycle(&mut hw, config).await, 0);
        assert!(!hw.relay);
        assert_eq!(hw.servo_duty, Some(config.servo_closed_duty));

        assert_eq!(run_buzz(&mut hw, Duration::from_millis(5)).await, 0);
        assert!(!hw.buzzer);
    }
}
