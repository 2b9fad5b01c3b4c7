//! scanport-ingest - Dataset Ingest Controller
//!
//! Runs one ingest job per invocation. The trigger payload (a reprocess
//! request or an object-store delivery event) is read from a file or stdin;
//! the job result is printed as JSON on success.

use anyhow::{Context, Result};
use clap::Parser;
use scanport_common::blob::ContainerRouter;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scanport_ingest::{ingest, ConfigOverrides, IngestConfig, IngestContext};

#[derive(Debug, Parser)]
#[command(name = "scanport-ingest", version, about = "Import instrument scan bundles")]
struct Args {
    /// Trigger payload file, or `-` for stdin
    #[arg(long, default_value = "-")]
    trigger: String,

    /// Environment name
    #[arg(long)]
    env: Option<String>,

    #[arg(long, env = "SCANPORT_CONFIG_CONTAINER")]
    config_container: Option<String>,

    #[arg(long, env = "SCANPORT_DATASETS_CONTAINER")]
    datasets_container: Option<String>,

    #[arg(long, env = "SCANPORT_OVERLAY_CONTAINER")]
    overlay_container: Option<String>,

    #[arg(long, env = "SCANPORT_UPLOADS_CONTAINER")]
    uploads_container: Option<String>,

    #[arg(long, env = "SCANPORT_ARCHIVE_CONTAINER")]
    archive_container: Option<String>,

    /// Parent directory for working trees
    #[arg(long, env = "SCANPORT_WORKING_DIR")]
    working_dir: Option<String>,

    /// Leave the working tree on disk after the job
    #[arg(long)]
    keep_working_dir: bool,

    /// SQLite database backing the document collections
    #[arg(long, env = "SCANPORT_DB")]
    db: Option<PathBuf>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bearer token for remote containers
    #[arg(long, env = "SCANPORT_STORE_TOKEN", hide_env_values = true)]
    store_token: Option<String>,
}

fn read_trigger(source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read trigger from stdin")?;
        Ok(buf)
    } else {
        std::fs::read(source).with_context(|| format!("Failed to read trigger file {}", source))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!("Starting scanport-ingest {}", env!("CARGO_PKG_VERSION"));

    let toml = scanport_common::config::load_config(args.config.as_deref())?;
    let overrides = ConfigOverrides {
        env_name: args.env.clone(),
        config_container: args.config_container.clone(),
        datasets_container: args.datasets_container.clone(),
        overlay_container: args.overlay_container.clone(),
        uploads_container: args.uploads_container.clone(),
        archive_container: args.archive_container.clone(),
        working_dir_base: args.working_dir.clone(),
        keep_working_dir: args.keep_working_dir,
    };
    let config = IngestConfig::resolve(&overrides, toml.as_ref());
    info!(env = %config.env_name, "Configuration resolved");

    let default_db = scanport_common::config::default_data_folder().join("scanport.db");
    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => PathBuf::from(scanport_common::config::resolve_setting(
            None,
            "SCANPORT_DB",
            toml.as_ref(),
            "database",
            &default_db.to_string_lossy(),
        )),
    };
    info!("Database: {}", db_path.display());
    let pool = scanport_common::db::init_database(&db_path).await?;

    let store = ContainerRouter::new().with_bearer_token(args.store_token.clone());
    let ctx = IngestContext::new(config, pool).with_store(Arc::new(store));

    let payload = read_trigger(&args.trigger)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling job");
            on_signal.cancel();
        }
    });

    match ingest(&ctx, &payload, cancel).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Ingest failed ({}): {}", e.kind(), e);
            std::process::exit(1);
        }
    }
}
