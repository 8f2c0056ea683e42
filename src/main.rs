use std::sync::Arc;

use clap::Parser;
use smartmark::backend::Backends;
use smartmark::config::{Cli, Command, Config, default_config_path};
use smartmark::handler::AppState;
use smartmark::routes;
use smartmark::session::SessionGuard;
use smartmark::subscriber::ReconnectPolicy;
use smartmark::terminal;
use smartmark::workspace::{WorkspaceSettings, Workspaces};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("smartmark.svc starting");

    let config_path = args
        .config_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(default_config_path);

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let backends = Backends::from_config(&cfg).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup backend clients");
        std::process::exit(1);
    });

    let guard = SessionGuard::new(backends.auth.clone(), &cfg.app.oauth_provider, cfg.app.get_site_url());
    let settings = WorkspaceSettings {
        optimistic_insert: cfg.app.optimistic_insert,
        reconnect: ReconnectPolicy::from_config(&cfg.realtime),
        idle_grace: cfg.app.get_workspace_idle(),
    };
    match args.command.unwrap_or(Command::Serve) {
        Command::Watch { token } => {
            let cancellation_token = CancellationToken::new();
            let shutdown = cancellation_token.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
            });
            if let Err(e) = terminal::run(guard, backends, settings, token, cancellation_token).await {
                tracing::error!(error = %e, "watch failed");
                std::process::exit(1);
            }
        }
        Command::Serve => serve(cfg, guard, backends, settings).await,
    }
}

async fn serve(
    cfg: Config,
    guard: SessionGuard,
    backends: Backends,
    settings: WorkspaceSettings,
) {
    let workspaces = Arc::new(Workspaces::new(backends, settings));
    let app = routes::app(AppState {
        guard,
        workspaces: workspaces.clone(),
    });

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!(site_url = cfg.app.get_site_url(), "smartmark.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server exited with error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
    }

    workspaces.close_all().await;
    tracing::info!("smartmark.svc going off, graceful shutdown complete");
}
