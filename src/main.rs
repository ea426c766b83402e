use std::sync::Arc;

use chatlog::appender::LogAppender;
use chatlog::cli::{Cli, Commands};
use chatlog::config::{build_config, AppConfig};
use chatlog::format::TurnFormatter;
use chatlog::pipeline::Pipeline;
use chatlog::root::{ConfiguredRoot, PathResolver};
use chatlog::watcher::ChangeWatcher;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let (app_config, problems) = build_config(&cli);

    init_tracing(app_config.verbose);
    for problem in &problems {
        tracing::warn!("{}", problem);
    }
    tracing::debug!(config = ?app_config, "effective config");

    if !app_config.enabled {
        tracing::info!("chat logging is disabled in the config file; nothing to do");
        return;
    }

    let Some(mut watcher) = build_watcher(&app_config) else {
        std::process::exit(1);
    };

    match cli.command {
        Some(Commands::Scan) => match watcher.scan_only() {
            Ok(summary) => tracing::info!(
                files = summary.files,
                sessions = summary.sessions,
                turns = summary.turns,
                "scan complete"
            ),
            Err(e) => {
                tracing::error!("scan failed: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            if let Err(e) = watcher.start() {
                tracing::error!("could not start watching: {}", e);
                std::process::exit(1);
            }
            shutdown_signal().await;
            watcher.stop().await;
        }
    }
}

/// Resolve the root and log directory and wire up the pipeline.
/// Initialization problems are logged; `None` means do not start.
fn build_watcher(config: &AppConfig) -> Option<ChangeWatcher> {
    let root = match ConfiguredRoot::new(config.root.clone()).resolve_root() {
        Ok(root) => root,
        Err(e) => {
            tracing::error!("{}", e);
            return None;
        }
    };

    let appender = LogAppender::new(&config.log_directory);
    if let Err(e) = appender.ensure_log_dir() {
        tracing::error!("{}", e);
        return None;
    }
    tracing::info!(
        root = %root.display(),
        log_dir = %appender.log_dir().display(),
        "chat logger ready"
    );

    let formatter = TurnFormatter::new(
        config.display.timestamp_format.clone(),
        config.display.time_zone,
    );
    let pipeline = Pipeline::new(
        formatter,
        appender,
        config.session_key,
        config.display.default_name.clone(),
    );
    Some(ChangeWatcher::new(
        root,
        Arc::new(pipeline),
        config.watch.clone(),
    ))
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        // RUST_LOG wins when set and valid.
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutting down");
}
