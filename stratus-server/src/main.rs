//! The `stratus` binary: configuration, service wiring, background
//! workers, and the HTTP listener.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use stratus_blob::BlobStore;
use stratus_compute::{ComputeService, NetworkSettings, Reconciler};
use stratus_core::Config;
use stratus_db::Database;
use stratus_iam::{IamService, seed_predefined_roles};
use stratus_object::{LifecycleWorker, StorageService};
use stratus_runtime::{ContainerRuntime, DockerRuntime, FakeRuntime};
use stratus_server::{AppState, app};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Local emulator for Cloud Storage, IAM and Compute Engine control planes.
#[derive(Debug, Parser)]
#[command(name = "stratus", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Use the in-memory container runtime instead of Docker. Instances
    /// still walk their state machine; no real containers are created.
    #[arg(long, default_value_t = false)]
    fake_runtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env file if present, then the flat config from the environment.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let settings = NetworkSettings::from_config(&config)?;

    let db = Database::connect(&config.database_url).await?;
    let blobs = BlobStore::open(config.storage_root.clone()).await?;

    let runtime: Arc<dyn ContainerRuntime> = if cli.fake_runtime {
        tracing::warn!("using the in-memory container runtime; no real containers will run");
        Arc::new(FakeRuntime::new())
    } else {
        Arc::new(DockerRuntime::connect(&config.runtime_endpoint)?)
    };

    let storage = StorageService::new(db.clone(), blobs);
    let iam = IamService::new(db.clone());
    let compute = ComputeService::new(db.clone(), runtime, settings);

    seed_predefined_roles(&db).await?;
    {
        let mut conn = db.pool().acquire().await?;
        stratus_db::repo::projects::ensure(&mut conn, &config.default_project).await?;
    }

    // Background loops: reconciler and lifecycle worker, each
    // single-threaded within itself.
    tokio::spawn(Reconciler::new(compute.clone(), config.sync_interval).run());
    tokio::spawn(LifecycleWorker::new(storage.clone(), config.lifecycle_interval).run());

    let addr = SocketAddr::from((cli.host, cli.port));
    let base_url = match cli.host {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED) => format!("http://localhost:{}", cli.port),
        host => format!("http://{host}:{}", cli.port),
    };
    let state = AppState::new(config.clone(), base_url, storage, iam, compute);

    tracing::info!("stratus listening on http://{addr}");
    tracing::info!(storage_root = %config.storage_root.display(), database = %config.database_url, "state roots");
    tracing::info!(
        sync = config.sync_interval.as_secs(),
        lifecycle = config.lifecycle_interval.as_secs(),
        "background intervals (seconds)"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
