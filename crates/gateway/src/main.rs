//! clawgate daemon entry point.
//!
//! Boot order: config → stores → state → listeners; teardown is the reverse.
//! A SIGUSR1 (or equivalent) triggers a cooperative restart: the staged
//! sentinel is already on disk, so the process drains and exits with the
//! restart code for the launcher.

use std::sync::Arc;

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use clawgate_gateway::{
    MethodRegistry, admin, broadcast, builtins,
    reload,
    restart::{RESTART_EXIT_CODE, RestartPlane},
    server,
    state::GatewayState,
};

#[derive(Parser, Debug)]
#[command(name = "clawgate", version, about = "Multi-channel agent gateway")]
struct Cli {
    /// Config file path (defaults to discovery under the state dir).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Listen port override.
    #[arg(long)]
    port: Option<u16>,

    /// Bind address override.
    #[arg(long)]
    bind: Option<String>,

    /// Log filter (overrides the config's logging.level).
    #[arg(long, env = "CLAWGATE_LOG")]
    log: Option<String>,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return std::process::ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(cli)) {
        Ok(restart_requested) if restart_requested => {
            std::process::ExitCode::from(RESTART_EXIT_CODE as u8)
        },
        Ok(_) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("clawgate failed: {e}");
            std::process::ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    // ── Config ───────────────────────────────────────────────────────────
    let config_store = match &cli.config {
        Some(path) => clawgate_config::ConfigStore::new(path),
        None => clawgate_config::ConfigStore::discover(),
    };
    let snapshot = config_store.read_snapshot()?;
    let config = snapshot.config.clone().unwrap_or_default();
    if !snapshot.valid {
        for issue in &snapshot.issues {
            eprintln!("config issue at {}: {}", issue.path, issue.message);
        }
        anyhow::bail!("config at {} is invalid", config_store.path().display());
    }

    let filter = cli
        .log
        .clone()
        .unwrap_or_else(|| format!("clawgate={}", config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Stores and process-wide state ───────────────────────────────────
    let state_dir = clawgate_config::state_dir();
    let secrets = clawgate_secrets::SecretStore::new(state_dir.join("secrets"));
    let sessions = clawgate_sessions::SessionStore::new(
        clawgate_sessions::SessionStore::resolve_path(
            &state_dir,
            config.session.store.as_deref(),
        ),
    );
    let profiles = clawgate_oauth::ProfileStore::new(state_dir.join("auth-profiles.json"));
    let restart_plane = Arc::new(RestartPlane::new(&state_dir));
    let bus = clawgate_bus::AgentEventBus::new(clawgate_bus::BusSettings {
        show_heartbeat_ok: config.heartbeat_visibility.show_ok,
        default_verbosity: config.tools.verbosity.clone(),
    });
    let builtin_registry = builtins::build(Arc::clone(&restart_plane));

    let port = cli.port.unwrap_or(config.gateway.port);
    let bind = cli.bind.clone().unwrap_or_else(|| config.gateway.bind.clone());
    let state = GatewayState::new(
        port,
        config.gateway.auth_token.clone(),
        config_store,
        secrets,
        sessions,
        profiles,
        bus,
        builtin_registry,
        Arc::clone(&restart_plane),
    );
    reload::record_boot_config(&state, &snapshot).await;

    // ── Post-restart resumption ─────────────────────────────────────────
    let resumed = restart_plane.consume_sentinel();
    if let Some(sentinel) = &resumed {
        info!(
            session_key = sentinel.session_key.as_deref().unwrap_or(""),
            reason = sentinel.stats.reason.as_deref().unwrap_or(""),
            "resuming after cooperative restart"
        );
    }

    let methods = Arc::new(MethodRegistry::new());

    // ── Listeners ───────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind((bind.as_str(), port)).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let admin_path = clawgate_config::admin_pipe_path(config.admin.pipe.as_deref());
    let admin_handle = {
        let state = Arc::clone(&state);
        let methods = Arc::clone(&methods);
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = admin::serve(state, methods, admin_path, shutdown).await {
                warn!(error = %e, "admin pipe failed");
            }
        })
    };

    let tick_handle = server::spawn_tick_loop(Arc::clone(&state));

    // Route the sentinel to its last session once the listeners are up.
    if let Some(sentinel) = resumed {
        if let Some(session_key) = sentinel.session_key.clone() {
            let payload = serde_json::to_value(&sentinel).unwrap_or_default();
            broadcast::send_to_session(&state, &session_key, "restart.resume", payload).await;
        }
    }

    // ── Run until a shutdown signal ─────────────────────────────────────
    let restart_requested = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let restart_requested = Arc::clone(&restart_requested);
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal(&restart_requested).await;
            let _ = shutdown_tx.send(true);
        });
    }

    let serve_shutdown = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.changed().await;
        }
    };
    server::serve(Arc::clone(&state), methods, listener, serve_shutdown).await?;

    // ── Teardown, reverse of boot ───────────────────────────────────────
    tick_handle.abort();
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), admin_handle).await;
    info!("gateway stopped");

    Ok(restart_requested.load(std::sync::atomic::Ordering::SeqCst))
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(restart_requested: &std::sync::atomic::AtomicBool) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGUSR1 handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        },
        _ = usr1.recv() => {
            info!("SIGUSR1 received, restarting");
            restart_requested.store(true, std::sync::atomic::Ordering::SeqCst);
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(_restart_requested: &std::sync::atomic::AtomicBool) {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received, shutting down");
}
