//! meshrelay - HTTP relay from generative pipelines to a shared remote folder

mod routes;
mod tunnel;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use meshrelay_gen::backends::{create_image_backend, create_scene_backend};
use meshrelay_gen::{create_store, Orchestrator, RelayConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tunnel::Tunnel;

#[derive(Parser)]
#[command(name = "meshrelay")]
#[command(about = "Serve image-to-3D and text-to-image generation, relaying outputs to Google Drive", long_about = None)]
#[command(version)]
struct Cli {
    /// ngrok auth token for the public tunnel
    ngrok_auth_token: String,

    /// Google service-account JSON key used for Drive uploads
    service_account_file: PathBuf,

    /// Which generation routes to serve
    #[arg(long, value_enum, default_value = "all")]
    pipeline: PipelineArg,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Extra config file layered over the global and project configs
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve locally without starting ngrok
    #[arg(long)]
    no_tunnel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PipelineArg {
    #[value(name = "3d")]
    Scene,
    Image,
    All,
}

impl PipelineArg {
    fn scene(self) -> bool {
        matches!(self, PipelineArg::Scene | PipelineArg::All)
    }

    fn image(self) -> bool {
        matches!(self, PipelineArg::Image | PipelineArg::All)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RelayConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let store = create_store(&config, &cli.service_account_file)?;
    let mut orchestrator = Orchestrator::new(store, &config);
    if cli.pipeline.scene() {
        orchestrator = orchestrator.with_scene_backend(create_scene_backend(&config)?);
        info!(
            backend = %config.scene.backend,
            attn_backend = %config.scene.attn_backend,
            spconv_algo = %config.scene.spconv_algo,
            "3d pipeline enabled"
        );
    }
    if cli.pipeline.image() {
        orchestrator = orchestrator.with_image_backend(create_image_backend(&config)?);
        info!(backend = %config.image.backend, "image pipeline enabled");
    }

    let (worker, worker_thread) = worker::spawn(orchestrator, config.server.queue_capacity)
        .context("failed to start generation worker")?;
    let app = routes::router(worker, config.server.max_upload_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let port = listener.local_addr()?.port();
    info!(address = %addr, "listening");

    let tunnel = if cli.no_tunnel {
        None
    } else {
        let tunnel_config = config.tunnel.clone();
        let token = cli.ngrok_auth_token.clone();
        let tunnel =
            tokio::task::spawn_blocking(move || Tunnel::start(&tunnel_config, &token, port)).await??;
        println!("To access the global link, please click {}", tunnel.public_url());
        Some(tunnel)
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(tunnel);
    // The router owned the last queue sender; the worker exits once its current job is done
    let joined = tokio::task::spawn_blocking(move || worker_thread.join()).await?;
    if joined.is_err() {
        warn!("generation worker panicked");
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_both_positionals() {
        assert!(Cli::try_parse_from(["meshrelay"]).is_err());
        assert!(Cli::try_parse_from(["meshrelay", "token"]).is_err());

        let cli = Cli::try_parse_from(["meshrelay", "token", "key.json"]).unwrap();
        assert_eq!(cli.ngrok_auth_token, "token");
        assert_eq!(cli.service_account_file, PathBuf::from("key.json"));
        assert_eq!(cli.pipeline, PipelineArg::All);
        assert!(!cli.no_tunnel);
    }

    #[test]
    fn test_pipeline_selection() {
        let cli = Cli::try_parse_from(["meshrelay", "t", "k.json", "--pipeline", "3d", "--port", "8000"]).unwrap();
        assert!(cli.pipeline.scene());
        assert!(!cli.pipeline.image());
        assert_eq!(cli.port, Some(8000));

        let cli = Cli::try_parse_from(["meshrelay", "t", "k.json", "--pipeline", "image", "--no-tunnel"]).unwrap();
        assert!(!cli.pipeline.scene());
        assert!(cli.no_tunnel);
    }
}
