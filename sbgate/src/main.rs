use clap::Parser;
use sbgate::{shutdown_signal, Config, Gateway};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sbgate")]
#[command(about = "REST gateway for message broker management and transfer", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SBGATE_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SBGATE_HOST")]
    host: Option<String>,

    /// Broker connection string (`Endpoint=sb://...` or `Endpoint=memory://local`)
    #[arg(long, env = "SBGATE_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Configuration file (defaults to ./sbgate.toml when present)
    #[arg(short, long, env = "SBGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SBGATE_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("sbgate={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(connection_string) = args.connection_string {
        config.broker.connection_string = Some(connection_string);
    }

    info!("Starting sbgate...");
    let gateway = Gateway::new(&config)?;
    info!(
        backend = gateway.backend().as_str(),
        receive_wait_ms = config.broker.receive_wait_ms,
        max_retries = config.retry.max_retries,
        "Broker clients ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    gateway.serve(listener, shutdown_signal()).await?;

    Ok(())
}
