use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use shelf::catalog::Catalog;
use shelf::manager::SystemProfile;
use shelf::server::{ServerOptions, ShelfServer};
use shelf::ShelfDb;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// Directory holding one JSON file per collection.
    #[clap(long, default_value = ".")]
    data_dir: PathBuf,

    /// JSON catalog describing the collections. Defaults to the built-in storefront catalog.
    #[clap(long)]
    catalog: Option<PathBuf>,

    /// Mount every API route under this path segment, e.g. `api`.
    #[clap(long)]
    api_prefix: Option<String>,

    /// Serve this directory for paths the API does not claim.
    #[clap(long)]
    static_dir: Option<PathBuf>,

    /// fsync every rewrite. Defaults to the detected host profile.
    #[clap(long)]
    strict_durability: Option<bool>,

    #[clap(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,shelf=info");
    }
    tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_target(false)
    .with_level(true)
    .init();

    let profile = SystemProfile::detect().with_overrides(args.workers, args.strict_durability);

    println!("--- [Shelf Resource Manager] ---");
    println!("Detected Cores: {}", profile.logical_cores);
    println!("Worker Threads: {}", profile.worker_threads);
    println!("Durability Mode: {}", if profile.strict_durability { "Strict (Fsync)" } else { "High Throughput (Async)" });
    println!("--------------------------------");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .enable_all()
    .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(args, profile)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn async_main(args: Args, profile: SystemProfile) -> Result<(), String> {
    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path).map_err(|e| e.to_string())?,
        None => Catalog::builtin(),
    };

    if let Some(prefix) = &args.api_prefix {
        if prefix.trim_matches('/').contains('/') {
            return Err(format!("--api-prefix must be a single path segment, got '{}'", prefix));
        }
    }
    if !args.data_dir.is_dir() {
        return Err(format!("data directory {} does not exist", args.data_dir.display()));
    }

    info!(data_dir = %args.data_dir.display(), collections = catalog.collections.len(), "initializing storage");
    for spec in &catalog.collections {
        if !args.data_dir.join(&spec.file).exists() {
            // Files are seeded out of band; requests will answer 500 until it exists
            tracing::warn!(collection = %spec.name, file = %spec.file, "collection file missing");
        }
    }

    let db = Arc::new(ShelfDb::open(&args.data_dir, catalog, profile.strict_durability));
    let options = ServerOptions {
        api_prefix: args.api_prefix.clone(),
        static_dir: args.static_dir.clone(),
    };

    let server = ShelfServer::new(db, options);
    server.run(args.addr).await.map_err(|e| format!("server failed: {}", e))?;

    println!("Shutting down.");
    Ok(())
}
