//! Command wiring.

use anyhow::{bail, Context};
use session_auth::{AuthError, HttpAuthBackend, SessionEvent, SessionSnapshot, SessionSupervisor};
use session_storage::{FileStorage, TokenStore};
use std::sync::Arc;
use storefront_config::{Config, Paths};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Wire the file-backed store and HTTP backend into a supervisor.
pub fn build_supervisor(config: &Config, paths: &Paths) -> anyhow::Result<SessionSupervisor> {
    config.session.validate()?;

    let durable = Arc::new(FileStorage::new(paths.durable_session_file()));
    let ephemeral = Arc::new(FileStorage::new(paths.ephemeral_session_file()));
    let store = Arc::new(TokenStore::new(durable, ephemeral));

    let backend = HttpAuthBackend::new(config.api_url()?, config.request_timeout())
        .context("failed to build HTTP client")?;
    info!(api_url = %backend.api_url(), "Using auth backend");

    Ok(SessionSupervisor::new(
        store,
        Arc::new(backend),
        config.session.clone(),
    ))
}

fn describe(err: AuthError) -> anyhow::Error {
    anyhow::anyhow!("{} ({})", err.user_message(), err)
}

pub async fn login(
    supervisor: &SessionSupervisor,
    id_token: &str,
    remember_me: bool,
    redirect: Option<String>,
) -> anyhow::Result<()> {
    supervisor.start().await.map_err(describe)?;
    if let Some(path) = redirect {
        supervisor.set_redirect_after_login(path);
    }

    let mut events = supervisor.events();
    let result = supervisor.login(id_token, remember_me).await;
    supervisor.dispose();
    let profile = result.map_err(describe)?;

    let admin = if profile.is_admin() { " (admin)" } else { "" };
    println!("Signed in as {} <{}>{}", profile.display_name, profile.email, admin);

    while let Ok(event) = events.try_recv() {
        if let SessionEvent::NavigateTo { path } = event {
            println!("Continue at {}", path);
        }
    }
    Ok(())
}

pub async fn status(supervisor: &SessionSupervisor) -> anyhow::Result<()> {
    supervisor.start().await.map_err(describe)?;
    supervisor.dispose();

    let snapshot = supervisor.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub async fn refresh(supervisor: &SessionSupervisor) -> anyhow::Result<()> {
    supervisor.start().await.map_err(describe)?;
    if !supervisor.is_authenticated() {
        supervisor.dispose();
        bail!("Not signed in");
    }

    let renewed = supervisor.refresh_token().await;
    supervisor.dispose();
    if !renewed {
        bail!("Could not renew the session");
    }

    let remaining = supervisor.snapshot().session_time_remaining_ms;
    println!("Session renewed, {} remaining", format_remaining(remaining));
    Ok(())
}

pub fn logout(supervisor: &SessionSupervisor) -> anyhow::Result<()> {
    supervisor.logout().map_err(describe)?;
    println!("Signed out");
    Ok(())
}

/// Reference presenter: prints the countdown and warns near expiry.
pub async fn watch(supervisor: &SessionSupervisor, config: &Config) -> anyhow::Result<()> {
    supervisor.start().await.map_err(describe)?;
    if !supervisor.is_authenticated() {
        bail!("Not signed in");
    }

    let warn_below_ms =
        i64::try_from(config.session.refresh_window_max_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX);
    let mut snapshots = supervisor.subscribe();
    let mut events = supervisor.events();
    report(&snapshots.borrow_and_update().clone(), warn_below_ms);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, leaving session in place");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report(&snapshot, warn_below_ms);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::ForcedLogout { reason }) => {
                    println!("Signed out: {}", reason);
                    break;
                }
                Ok(SessionEvent::RefreshFinished { success: false }) => {
                    warn!("Session renewal failed");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    supervisor.dispose();
    Ok(())
}

fn report(snapshot: &SessionSnapshot, warn_below_ms: i64) {
    match snapshot.session_time_remaining_ms {
        Some(remaining) if remaining <= warn_below_ms => {
            println!(
                "Session expires in {}. It will be renewed automatically if possible.",
                format_remaining(Some(remaining))
            );
        }
        remaining => println!("Session time remaining: {}", format_remaining(remaining)),
    }
}

fn format_remaining(remaining_ms: Option<i64>) -> String {
    let Some(ms) = remaining_ms else {
        return "no session".to_string();
    };
    let total_secs = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else {
        format!("{:02}m {:02}s", minutes, seconds)
    }
}
