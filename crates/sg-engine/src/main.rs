use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use sg_config::{HumanDuration, IngestConfig};
use sg_core::decode;
use sg_core::model::{Protocol, SubmissionId};
use sg_core::store::{MemoryStore, SampleStore};
use sg_runtime::tracing_init::init_tracing;
use sg_runtime::{BatchCoordinator, BatchOptions};

#[derive(Parser)]
#[command(name = "sensgrid", about = "Sensor logger ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Delimited,
    KeyedText,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Delimited => Protocol::Delimited,
            ProtocolArg::KeyedText => Protocol::KeyedText,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest raw payload files and run one processing batch
    Process {
        /// Path to sensgrid.toml config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Wire protocol of the payload files
        #[arg(long, value_enum, default_value = "delimited")]
        protocol: ProtocolArg,
        /// Max number of submissions to process
        #[arg(long)]
        limit: Option<usize>,
        /// Only process submissions delivered under this idcode
        #[arg(long)]
        idcode: Option<String>,
        /// Only process this submission id
        #[arg(long)]
        submission: Option<u64>,
        /// Wall-clock budget for the batch (e.g. "30s", "5m")
        #[arg(long)]
        max_time: Option<String>,
        /// Raw payload files, one submission each
        #[arg(required = true)]
        payloads: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            config,
            protocol,
            limit,
            idcode,
            submission,
            max_time,
            payloads,
        } => {
            let (config, base_dir) = match config {
                Some(path) => {
                    let path = path
                        .canonicalize()
                        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", path.display()))?;
                    let base = path
                        .parent()
                        .expect("config path must have a parent directory")
                        .to_path_buf();
                    (IngestConfig::load(&path)?, base)
                }
                None => (IngestConfig::default(), std::env::current_dir()?),
            };
            let _guard = init_tracing(&config.logging, &base_dir)?;

            let max_processing_time = max_time
                .map(|raw| {
                    HumanDuration::from_str(&raw)
                        .map(|d| d.as_duration())
                        .map_err(|e| anyhow::anyhow!("invalid --max-time '{raw}': {e}"))
                })
                .transpose()?;

            let store = MemoryStore::new();
            let protocol: Protocol = protocol.into();
            for path in &payloads {
                let payload = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("payload '{}': {e}", path.display()))?;
                let intake = intake_idcode(protocol, &payload)
                    .map_err(|e| anyhow::anyhow!("payload '{}': {e}", path.display()))?;
                // the demo store starts empty, so the intake logger is
                // seeded active to make its submissions eligible
                let mut logger = store
                    .create_logger(&intake)
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                logger.active = true;
                store.update_logger(logger);
                let id = store.add_submission(&intake, protocol, &payload, Utc::now());
                tracing::info!(submission = %id, idcode = %intake, file = %path.display(), "payload queued");
            }

            let options = BatchOptions {
                limit,
                idcode,
                submission: submission.map(SubmissionId),
                max_processing_time,
            };
            let notifier = sg_core::alert::LogNotifier;
            let report = BatchCoordinator::new(&store, &notifier, &config)
                .run(&options)
                .map_err(|e| anyhow::anyhow!("{e}"))?;

            println!(
                "processed: {} succeeded, {} failed{}",
                report.succeeded,
                report.failed,
                if report.budget_exhausted {
                    " (budget exhausted)"
                } else {
                    ""
                }
            );
            for (idcode, count) in &report.unknown_loggers {
                println!("pending, unknown logger {idcode}: {count}");
            }
            for (idcode, count) in &report.inactive_loggers {
                println!("pending, inactive logger {idcode}: {count}");
            }
        }
    }
    Ok(())
}

/// The idcode a payload is delivered under, read from the payload itself.
fn intake_idcode(protocol: Protocol, payload: &str) -> Result<String> {
    match protocol {
        Protocol::Delimited => decode::peek_idcode(payload).map_err(|e| anyhow::anyhow!("{e}")),
        Protocol::KeyedText => {
            let value: serde_json::Value = serde_json::from_str(payload)?;
            value
                .get("idcode")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("keyed payload has no idcode field"))
        }
    }
}
