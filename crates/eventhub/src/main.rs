//! # eventhub
//!
//! Event hub server binary: loads settings, starts the event driver and
//! serves the WebSocket, SSE and long-polling endpoints.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use clap::Parser;
use eventhub_core::{ChannelHandler, ChannelInfo, EventKind, EventPost, InboundEvent};
use eventhub_driver::{ChannelRegistration, EventDriver};
use eventhub_settings::HubSettings;
use eventhub_settings::loader::{load_settings_from_path, settings_path};

/// Event hub server.
#[derive(Parser, Debug)]
#[command(name = "eventhub", about = "Server push event hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.eventhub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Register an echo channel under this session name. Repeatable.
    #[arg(long = "echo", value_name = "SESSION")]
    echo_sessions: Vec<String>,
}

impl Cli {
    /// Overlay command line flags onto loaded settings.
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

/// Posts every client message straight back to its channel.
struct EchoHandler {
    driver: Weak<EventDriver>,
}

impl ChannelHandler for EchoHandler {
    fn on_event(&self, channel: &ChannelInfo, event: InboundEvent) {
        if !matches!(event.kind, EventKind::Message | EventKind::Binary) {
            tracing::debug!(session = %channel.session_name, kind = %event.kind, "echo channel event");
            return;
        }
        if let Some(driver) = self.driver.upgrade() {
            let _ = driver.post_event(channel.id, EventPost::new(event.payload).kind(event.kind));
        }
    }
}

fn register_echo_channels(driver: &Arc<EventDriver>, sessions: &[String]) -> Result<()> {
    for session in sessions {
        let handler = Arc::new(EchoHandler {
            driver: Arc::downgrade(driver),
        });
        let id = driver
            .register_channel(
                ChannelRegistration::new(session.as_str(), "eventhub-echo", session.as_str())
                    .handler(handler),
            )
            .with_context(|| format!("echo session name already taken: {session}"))?;
        tracing::info!(channel_id = %id, session = %session, "echo channel registered");
    }
    Ok(())
}

fn build_driver(settings: &HubSettings) -> Arc<EventDriver> {
    let driver = Arc::new(EventDriver::new());
    if !driver.set_brute_force_interval(settings.driver.brute_force_interval_secs) {
        tracing::warn!(
            secs = settings.driver.brute_force_interval_secs,
            "brute force interval out of range, keeping default"
        );
    }
    driver.set_force_authentication(settings.driver.force_authentication);
    driver.set_cookie_timeout(settings.driver.cookie_timeout_minutes);
    driver
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: the log level comes from them.
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    eventhub_logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = match eventhub_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let driver = build_driver(&settings);
    register_echo_channels(&driver, &cli.echo_sessions)?;
    if !driver.start() {
        anyhow::bail!("event driver refused to start");
    }

    let mut server = eventhub_server::EventHubServer::new(settings.server.clone(), Arc::clone(&driver));
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let server = Arc::new(server);
    let listener = server.bind().await.context("Failed to bind listener")?;
    let addr = listener.local_addr().context("Failed to read bound address")?;
    tracing::info!(%addr, base_path = %settings.server.base_path, "eventhub ready");

    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down...");
    if !driver.stop().await {
        tracing::warn!("scheduler still busy, closing channels anyway");
    }
    let closed = driver.reset();
    tracing::debug!(closed, "channels closed");
    server.shutdown().shutdown();
    serving
        .await
        .context("server task panicked")?
        .context("server error")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use eventhub_core::{IncomingRequest, PollBatch, PollRequest, PollWaiter, SenderFingerprint};

    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::try_parse_from([
            "eventhub",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--log-level",
            "debug",
            "--log-json",
            "--echo",
            "a",
            "--echo",
            "b",
        ])
        .unwrap();
        let mut settings = HubSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
        assert_eq!(cli.echo_sessions, ["a", "b"]);
    }

    #[test]
    fn no_flags_keep_settings() {
        let cli = Cli::try_parse_from(["eventhub"]).unwrap();
        let mut settings = HubSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, HubSettings::default().server.port);
        assert!(!settings.logging.json);
        assert!(cli.config.is_none());
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"driver": {"cookieTimeoutMinutes": 20}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        let driver = build_driver(&settings);
        assert_eq!(driver.cookie_timeout(), 20);
    }

    #[test]
    fn duplicate_echo_session_fails() {
        let driver = Arc::new(EventDriver::new());
        let err = register_echo_channels(&driver, &["a".into(), "a".into()]).unwrap_err();
        assert!(err.to_string().contains("already taken"));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_channel_returns_client_message() {
        let driver = Arc::new(EventDriver::new());
        register_echo_channels(&driver, &["echo".into()]).unwrap();
        assert!(driver.start());

        let request = IncomingRequest::new("/eventhub/Polling/echo", "10.0.0.1");
        let (tx, _ignored) = oneshot::channel::<PollBatch>();
        let poll = PollRequest {
            message: Some(InboundEvent::new(EventKind::Message, "ping")),
            close_channel: false,
        };
        let _ = driver
            .incoming_long_poll(&request, poll, PollWaiter::new(SenderFingerprint::of("10.0.0.1"), tx))
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let waiter = PollWaiter::new(SenderFingerprint::of("10.0.0.1"), tx);
        let _ = driver
            .incoming_long_poll(&request, PollRequest::default(), waiter)
            .unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.events[0].payload, "ping");
        assert!(driver.stop().await);
    }
}
