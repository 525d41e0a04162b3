//! Sandbridge - client-channel lifecycle manager for sandboxed previews
//!
//! Main entry point for the Sandbridge CLI.

mod cli;
mod sandbox;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sandbridge_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, SandboxConfig};
use sandbridge_core::{ClientManager, MpscTransport, spawn_inbound};
use sandbridge_protocols::{SandboxMessage, SandboxSetup};

use cli::{Cli, Commands};

/// Initialize tracing: console output plus an optional daily rolling file.
///
/// `RUST_LOG` overrides the configured level. The returned guard must be
/// kept alive for file output to be flushed.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let log_dir = ConfigLoader::expand_path(dir);
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("sandbridge")
                .filename_suffix("log")
                .max_log_files(14)
                .build(&log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            (
                Some(fmt::layer().with_writer(non_blocking).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_or_default(&ConfigLoader::default_path())?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Check) => check_config(&config),
        Some(Commands::Run { timeout_secs }) => {
            let _guard = init_tracing(&config.logging)?;
            run_sandboxes(config, Duration::from_secs(timeout_secs)).await
        }
        None => {
            let _guard = init_tracing(&config.logging)?;
            run_sandboxes(config, Duration::from_secs(10)).await
        }
    }
}

/// Print validation results; fail if the config has errors.
fn check_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config);

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    let warnings = result.into_result()?;
    println!("Configuration OK ({} warning(s))", warnings.len());
    Ok(())
}

fn setup_from(sandbox: &SandboxConfig) -> SandboxSetup {
    SandboxSetup {
        files: sandbox.files.clone(),
        entry: sandbox.entry.clone(),
        template: sandbox.template.clone(),
    }
}

/// Register every configured sandbox, run once and wait for each to finish.
async fn run_sandboxes(config: Config, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    for warning in ConfigValidator::validate(&config).into_result()? {
        warn!("{}: {}", warning.path, warning.message);
    }

    info!("Starting Sandbridge v{}", env!("CARGO_PKG_VERSION"));

    let manager = ClientManager::new(config.bridge.clone());
    manager.update_setup(setup_from(&config.sandbox));

    // Standing listener: attached to every client registered below.
    let log_listener = manager.listen(|message| match message {
        SandboxMessage::Console { level, data } => info!(%level, ?data, "Sandbox console"),
        SandboxMessage::Action { action, payload } => info!(%action, %payload, "Sandbox action"),
        other => debug!(kind = other.kind(), "Sandbox message"),
    });

    // Per-client completion listeners, queued until each client exists.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, bool)>();
    for client_id in &config.sandbox.clients {
        let done_tx = done_tx.clone();
        let id = client_id.clone();
        manager.add_listener(
            move |message| {
                if let SandboxMessage::Done { compilation_error } = message {
                    let _ = done_tx.send((id.clone(), *compilation_error));
                }
            },
            Some(client_id.as_str()),
        );
    }
    drop(done_tx);

    let mut tasks = Vec::new();
    for client_id in &config.sandbox.clients {
        let (transport, outbound) = MpscTransport::pair();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let client = manager.register_client(client_id.clone(), transport)?;
        tasks.push(spawn_inbound(client, inbound_rx));
        tasks.push(sandbox::spawn(client_id.clone(), outbound, inbound_tx));
    }

    let report = manager.run();
    info!(
        request_id = %report.request_id,
        dispatched = report.dispatched,
        failed = report.failed.len(),
        "Compile request sent"
    );

    let mut waiting: BTreeSet<String> = config.sandbox.clients.iter().cloned().collect();
    for (client_id, _) in &report.failed {
        waiting.remove(client_id);
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while !waiting.is_empty() {
        tokio::select! {
            finished = done_rx.recv() => match finished {
                Some((client_id, compilation_error)) => {
                    if waiting.remove(&client_id) {
                        if compilation_error {
                            warn!(client_id = %client_id, "Sandbox finished with a compilation error");
                        } else {
                            info!(client_id = %client_id, "Sandbox finished");
                        }
                    }
                }
                None => break,
            },
            _ = &mut deadline => {
                warn!(?waiting, "Timed out waiting for sandboxes");
                break;
            }
        }
    }

    log_listener.unsubscribe();
    manager.shutdown();

    for task in tasks {
        if let Err(e) = task.await {
            error!("Sandbox task failed: {}", e);
        }
    }

    info!("Sandbridge stopped");
    Ok(())
}
