mod config;
mod server;

use clap::{Parser, Subcommand};
use crate::config::Config;
use karst_core::{
    ChunkStore, DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest,
    DynMetadataStore, DynSealer, ErrorKind, KarstError, NodeDataOperation, PutFileOperation,
    PutFileOperationOutcome, PutFileOperationRequest, PutMode, Result, SqliteMetadataStore,
    TeeSealer, UnsealFileOperation, UnsealFileOperationOutcome, UnsealFileOperationRequest,
};
use serde::Serialize;
use server::{run_server, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "karst")]
#[command(about = "Content-addressed storage node with sealed file serving")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "karst.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve sealed file parts to peers
    Daemon,
    /// Store and seal a local file
    Put {
        /// File to store
        path: PathBuf,
    },
    /// Delete a sealed file by its sealed root hash
    Delete { sealed_hash: String },
    /// Ask the sealer to unseal a stored file
    Unseal { sealed_hash: String },
    /// Write a default configuration file
    Init {
        /// Identity secret to put in the new file
        #[arg(long)]
        backup: String,
    },
}

/// Shared storage components built from a loaded config.
struct Node {
    files: Arc<ChunkStore>,
    temp_files: Arc<ChunkStore>,
    metadata: Arc<DynMetadataStore>,
    sealer: Option<Arc<DynSealer>>,
}

impl Node {
    fn open(config: &Config) -> Result<Self> {
        let paths = config.node_paths();
        tracing::debug!(
            "Node paths: files={} temp_files={} db={}",
            paths.files.display(),
            paths.temp_files.display(),
            paths.db.display()
        );

        let sealer = match config.sealer_config() {
            Some(sealer_config) => {
                let sealer: Arc<DynSealer> = Arc::new(TeeSealer::new(sealer_config)?);
                Some(sealer)
            }
            None => None,
        };

        Ok(Self {
            files: Arc::new(ChunkStore::new(paths.files)?),
            temp_files: Arc::new(ChunkStore::new(paths.temp_files)?),
            metadata: Arc::new(SqliteMetadataStore::open(paths.db)?),
            sealer,
        })
    }

    fn require_sealer(&self) -> Result<Arc<DynSealer>> {
        self.sealer
            .clone()
            .ok_or_else(|| KarstError::Input("no [sealer] section in config".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct PutSummary {
    content_digest: String,
    tree_hash: String,
    sealed_hash: String,
    size: u64,
    parts: u64,
    stored_path: PathBuf,
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Process exit status for a failed command.
fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Input | ErrorKind::Protocol => 2,
        ErrorKind::DuplicateContent => 3,
        ErrorKind::NotFound => 4,
        ErrorKind::Seal | ErrorKind::SealRejected | ErrorKind::MalformedSealResponse => 5,
        ErrorKind::Storage => 1,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_daemon(config: &Config) -> Result<()> {
    let node = Node::open(config)?;
    let node_data_operation = Arc::new(NodeDataOperation::new(
        node.metadata.clone(),
        node.files.clone(),
    ));

    let bind_addr = config.bind_addr();
    let state = Arc::new(ServerState::new(
        bind_addr.clone(),
        config.backup.clone(),
        node_data_operation,
    ));

    if node.sealer.is_none() {
        tracing::warn!("No sealer configured, this node can serve but not store files");
    }

    run_server(&bind_addr, state).await
}

async fn run_put(config: &Config, path: PathBuf) -> Result<()> {
    let node = Node::open(config)?;
    let operation = PutFileOperation::new(
        node.files.clone(),
        node.temp_files.clone(),
        node.metadata.clone(),
        Some(node.require_sealer()?),
        None,
    );

    let outcome = operation
        .run(PutFileOperationRequest {
            path,
            mode: PutMode::Local,
        })
        .await?;

    match outcome {
        PutFileOperationOutcome::Stored(result) => print_json(&PutSummary {
            content_digest: result.content_digest,
            tree_hash: result.tree.hash,
            sealed_hash: result.sealed_tree.hash,
            size: result.tree.size,
            parts: result.tree.child_count,
            stored_path: result.stored_path,
        }),
        PutFileOperationOutcome::Declared(declared) => Err(KarstError::Input(format!(
            "unexpected remote declaration of {}",
            declared.tree.hash
        ))),
    }
}

async fn run_delete(config: &Config, sealed_hash: String) -> Result<()> {
    let node = Node::open(config)?;
    let operation =
        DeleteFileOperation::new(node.files.clone(), node.metadata.clone(), node.require_sealer()?);

    match operation
        .run(DeleteFileOperationRequest {
            sealed_hash: sealed_hash.clone(),
        })
        .await?
    {
        DeleteFileOperationOutcome::Deleted(result) => {
            tracing::info!(
                "Deleted {} ({} path(s) removed)",
                sealed_hash,
                result.removed_paths.len()
            );
            Ok(())
        }
        DeleteFileOperationOutcome::NotFound => Err(KarstError::NotFound(format!(
            "no sealed file '{}'",
            sealed_hash
        ))),
    }
}

async fn run_unseal(config: &Config, sealed_hash: String) -> Result<()> {
    let node = Node::open(config)?;
    let operation = UnsealFileOperation::new(node.metadata.clone(), node.require_sealer()?);

    match operation
        .run(UnsealFileOperationRequest {
            sealed_hash: sealed_hash.clone(),
        })
        .await?
    {
        UnsealFileOperationOutcome::Unsealed(path) => {
            println!("{}", path.display());
            Ok(())
        }
        UnsealFileOperationOutcome::NotFound => Err(KarstError::NotFound(format!(
            "no sealed file '{}'",
            sealed_hash
        ))),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Init { backup } = &cli.command {
        init_tracing("karst=info");
        let path = PathBuf::from(&cli.config);
        match Config::write_default(&path, backup) {
            Ok(()) => tracing::info!("Wrote default config to {}", path.display()),
            Err(error) => {
                tracing::error!("Failed to write config: {}", error);
                std::process::exit(exit_code(error.kind()));
            }
        }
        return;
    }

    let cfg = match Config::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(error) => {
            init_tracing("karst=info");
            tracing::error!("Failed to load config {}: {}", cli.config, error);
            std::process::exit(exit_code(error.kind()));
        }
    };
    init_tracing(cfg.log_filter());

    let result = match cli.command {
        Commands::Daemon => {
            tracing::info!("Starting Karst node with config: {}", cli.config);
            run_daemon(&cfg).await
        }
        Commands::Put { path } => run_put(&cfg, path).await,
        Commands::Delete { sealed_hash } => run_delete(&cfg, sealed_hash).await,
        Commands::Unseal { sealed_hash } => run_unseal(&cfg, sealed_hash).await,
        Commands::Init { .. } => Ok(()),
    };

    if let Err(error) = result {
        tracing::error!("{}", error);
        std::process::exit(exit_code(error.kind()));
    }
}
