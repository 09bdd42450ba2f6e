// RinkLink daemon: LAN discovery, session transport, serialized session actor.

mod config;
mod mesh;
mod runner;

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use rink_core::identity::{IdentityToken, PeerIdentity};
use rink_core::session::{SessionConfig, SessionCore};
use rink_core::trust::MemoryTrustStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("rink-linkd {VERSION}");
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let token = load_or_generate_identity().context("identity token")?;
    let identity = PeerIdentity::from_token(&token, cfg.display_name.clone());
    info!(peer_id = %identity.id, role = %cfg.role, "starting rink-linkd");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = mesh::spawn_mesh(
            identity.clone(),
            mesh::MeshConfig {
                discovery_port: cfg.discovery_port,
                transport_port: cfg.transport_port,
            },
            events_tx,
        )
        .await
        .context("bind mesh sockets")?;

        let core = SessionCore::new(
            identity,
            SessionConfig::default(),
            Box::new(MemoryTrustStore::new()),
        );
        let handle = runner::spawn_session(core, Box::new(transport), events_rx);
        handle.start_session(cfg.session_role());

        shutdown_signal().await?;
        info!("shutting down");
        handle.stop_session();
        Ok(())
    })
}

fn identity_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config/rinklink/identity"))
}

/// Read the persisted identity token, or generate and persist a fresh one so
/// the derived peer id stays stable across restarts.
fn load_or_generate_identity() -> anyhow::Result<IdentityToken> {
    let Some(path) = identity_path() else {
        return Ok(IdentityToken::generate());
    };
    if let Ok(bytes) = std::fs::read(&path) {
        if let Ok(raw) = <[u8; 32]>::try_from(bytes.as_slice()) {
            return Ok(IdentityToken::from_bytes(raw));
        }
    }
    let token = IdentityToken::generate();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    std::fs::write(&path, token.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(token)
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
