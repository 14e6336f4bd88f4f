//! CLI entry point for compliance audit tooling.
//!
//! Reads the same configuration as the middleware, writes JSON results to
//! stdout and JSON logs to stderr. Verification commands exit non-zero
//! when verification fails.

use std::io::Read;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use comply_audit::{store, worm, DrPublicKey, DrSigningKey};
use comply_core::MiddlewareConfig;
use comply_policy::{PiiDetector, PiiMasker};
use comply_stats::MiddlewareStatsManager;

#[derive(Parser)]
#[command(name = "comply")]
#[command(about = "Audit tooling for the compliance middleware")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: comply).
    #[arg(short, long, default_value = "comply", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the signature of a stored Decision Record.
    VerifyDr {
        /// Decision Record id.
        #[arg(long)]
        id: String,
        /// Hex public key. Defaults to the key derived from the configured
        /// signing key.
        #[arg(long)]
        public_key: Option<String>,
    },
    /// Verify the WORM event log hash chain.
    VerifyEvents,
    /// Print operation counters.
    Stats {
        /// Only this component (policy, pii, worm, dr, provenance, ...).
        #[arg(long)]
        component: Option<String>,
    },
    /// Scan text for PII (reads stdin when --text is absent).
    Scan {
        #[arg(long)]
        text: Option<String>,
        /// Include the redacted text in the output.
        #[arg(long)]
        mask: bool,
    },
    /// Print the Decision Record public key.
    PublicKey,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MiddlewareConfig::load(&cli.config)?;

    match cli.command {
        Command::VerifyDr { ref id, ref public_key } => {
            let public_key = match public_key {
                Some(hex) => DrPublicKey::from_hex(hex)?,
                None => DrSigningKey::load(&config.signing_key_path)?.public_key(),
            };
            let record = store::load_record(&config.decisions_dir, id)?;
            let valid = record.verify(&public_key);

            println!(
                "{}",
                serde_json::json!({
                    "dr_id": record.dr_id,
                    "valid": valid,
                    "public_key": public_key,
                    "supersedes": record.supersedes,
                })
            );
            if !valid {
                anyhow::bail!("Decision Record {id} failed signature verification");
            }
        }
        Command::VerifyEvents => {
            let report = worm::verify_log(&config.events_dir)?;
            println!("{}", serde_json::to_string(&report)?);
            if !report.valid {
                anyhow::bail!(
                    "event log chain broken at sequence {}",
                    report.broken_at.unwrap_or_default()
                );
            }
        }
        Command::Stats { ref component } => {
            let manager = MiddlewareStatsManager::open_read_only(&config.metrics_path)?;
            let output = match component {
                Some(name) => serde_json::to_string(&manager.get_component_stats(name.as_str()))?,
                None => serde_json::to_string(&manager.get_summary())?,
            };
            println!("{output}");
        }
        Command::Scan { text, mask } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };

            let detector = PiiDetector::new();
            let mut output = serde_json::to_value(detector.scan_and_log(&text))?;
            if mask {
                let masked = PiiMasker::with_detector(detector).mask_text(&text);
                output["masked"] = serde_json::Value::String(masked);
            }
            println!("{output}");
        }
        Command::PublicKey => {
            let key = DrSigningKey::load(&config.signing_key_path)?;
            println!("{}", key.public_key());
        }
    }

    Ok(())
}
