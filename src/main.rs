//! FreshTrack - 冰箱库存对账命令行
//!
//! 入口：加载配置、初始化日志，按子命令查看库存或对一批识别结果 / 一张照片跑对账。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use freshtrack::agent::{create_components, open_store, process_observations, process_photo};
use freshtrack::config::{load_config, AppConfig};
use freshtrack::inventory::{InventoryStatus, InventoryStore, ObservedItem};
use freshtrack::reconcile::ReconciliationSummary;
use freshtrack::recognize::{parse_recognition, Recognizer, StaticRecognizer, VisionRecognizer};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "freshtrack", version, about = "Reconcile fridge inventory with recognized photos")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Restrict the command to one device
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema
    InitDb,

    /// Print the recorded items as JSON
    List,

    /// Print totals by category and freshness
    Status,

    /// Reconcile a JSON array of observed items against the inventory
    Reconcile {
        #[arg(long)]
        observed: PathBuf,

        /// Use the rule-based matcher instead of the model
        #[arg(long)]
        offline: bool,

        /// Include the full transcript in the output
        #[arg(long)]
        transcript: bool,
    },

    /// Recognize a fridge photo, then reconcile the result
    Scan {
        #[arg(long)]
        image: String,

        /// Use a saved recognition result ({"items": [...]}) instead of calling the vision model
        #[arg(long)]
        recognition: Option<PathBuf>,

        #[arg(long)]
        offline: bool,

        #[arg(long)]
        transcript: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    freshtrack::observability::init("info");

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let device = cli.device.as_deref();

    match cli.command {
        Commands::InitDb => {
            open_store(&cfg).context("Failed to open database")?;
            println!("{}", cfg.store.database_path.display());
        }
        Commands::List => {
            let store = open_store(&cfg).context("Failed to open database")?;
            let items = store.list(device).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Commands::Status => {
            let store = open_store(&cfg).context("Failed to open database")?;
            let items = store.list(device).await?;
            let status = InventoryStatus::from_items(&items);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Reconcile {
            observed,
            offline,
            transcript,
        } => {
            let raw = std::fs::read_to_string(&observed)
                .with_context(|| format!("Failed to read {}", observed.display()))?;
            let items: Vec<ObservedItem> =
                serde_json::from_str(&raw).context("Observed file must be a JSON array of items")?;
            let components = create_components(&cfg, offline)?;
            let summary =
                process_observations(&components, device, items, cancel_on_ctrl_c(), None).await?;
            report(&summary, transcript)?;
        }
        Commands::Scan {
            image,
            recognition,
            offline,
            transcript,
        } => {
            let recognizer = build_recognizer(&cfg, recognition)?;
            let components = create_components(&cfg, offline)?;
            let summary = process_photo(
                &components,
                recognizer.as_ref(),
                &image,
                device,
                cancel_on_ctrl_c(),
            )
            .await?;
            report(&summary, transcript)?;
        }
    }

    Ok(())
}

fn build_recognizer(
    cfg: &AppConfig,
    recognition: Option<PathBuf>,
) -> anyhow::Result<Box<dyn Recognizer>> {
    match recognition {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Box::new(StaticRecognizer::new(parse_recognition(&raw)?)))
        }
        None => Ok(Box::new(VisionRecognizer::from_config(&cfg.vision, &cfg.oracle)?)),
    }
}

/// Ctrl-C 在轮次之间取消对账
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current round");
            child.cancel();
        }
    });
    token
}

fn report(summary: &ReconciliationSummary, with_transcript: bool) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(summary)?;
    if !with_transcript {
        if let Some(map) = value.as_object_mut() {
            map.remove("transcript");
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    if !summary.is_complete() {
        eprintln!("reconciliation incomplete: {}", summary.headline());
        std::process::exit(2);
    }
    tracing::info!("{}", summary.headline());
    Ok(())
}
