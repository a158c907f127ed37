use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tonic::transport::Server;

use namio::{
    cmd::{fs_command::FsCommands, handler::handle_fs_command},
    common::{Error, NamingConfig, NodeConfig, Result, SERVICE_PORT},
    naming::NamingServer,
    server::{registration::RegistrationServiceImpl, service::NamingServiceImpl},
};

#[derive(Parser)]
#[command(name = "namio")]
#[command(version, about = "Namio distributed file system naming server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the naming server
    Server {
        /// Client service listen address (default from config)
        #[arg(long)]
        service_addr: Option<String>,

        /// Storage-server registration listen address (default from config)
        #[arg(long)]
        registration_addr: Option<String>,

        /// Path to configuration file
        #[arg(long)]
        config_path: Option<String>,
    },
    /// File system operations against a running naming server
    Fs {
        #[command(subcommand)]
        fs_command: FsCommands,

        /// Naming server service address to connect to
        #[arg(short, long, default_value_t = format!("http://localhost:{SERVICE_PORT}"))]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server { service_addr, registration_addr, config_path } => {
            run_server(service_addr, registration_addr, config_path).await
        }
        Commands::Fs { fs_command, server } => {
            if let Err(e) = handle_fs_command(fs_command, &server).await {
                tracing::error!("fs command failed: {e}");
            }
            Ok(())
        }
    }
}

async fn run_server(
    service_addr: Option<String>,
    registration_addr: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let node_cfg = match config_path {
        Some(path) => NodeConfig::from_file(&path)
            .map_err(|e| Error::InvalidState(format!("loading config {path}: {e}")))?,
        None => NodeConfig::default(),
    };
    let service_addr: SocketAddr = service_addr
        .unwrap_or_else(|| node_cfg.service_listen.clone())
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("invalid service address: {e}")))?;
    let registration_addr: SocketAddr = registration_addr
        .unwrap_or_else(|| node_cfg.registration_listen.clone())
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("invalid registration address: {e}")))?;

    let naming = Arc::new(NamingServer::new(NamingConfig::from(&node_cfg)));
    let service = NamingServiceImpl::new(naming.clone()).into_server();
    let registration = RegistrationServiceImpl::new(naming.clone()).into_server();

    tracing::info!(
        %service_addr,
        %registration_addr,
        "starting naming server"
    );

    let service_server = Server::builder()
        .add_service(service)
        .serve_with_shutdown(service_addr, shutdown_signal());
    let registration_server = Server::builder()
        .add_service(registration)
        .serve_with_shutdown(registration_addr, shutdown_signal());
    tokio::try_join!(service_server, registration_server)
        .map_err(|e| Error::Rpc(format!("server error: {e}")))?;

    tracing::info!("shutting down naming server");
    naming.stop();
    naming.quiesce_replication().await;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
