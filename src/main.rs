//! Stride -- Apple Health export uploader.
//!
//! This is the application entry point. It wires together all modules:
//!   - Configuration loading
//!   - Token storage + browser sign-in
//!   - Export aggregation + chunked upload
//!   - Drop-folder job watcher
//!   - Graceful shutdown on SIGTERM / SIGINT

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use stride::auth::{AuthSession, CancelToken, TokenValidator, store_from_config};
use stride::config::{Config, LoggingConfig};
use stride::error::AppError;
use stride::export::JsonExportReader;
use stride::pipeline::Pipeline;
use stride::upload::Uploader;
use stride::watcher::{JobWatcher, spawn_scanner};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
    no_browser: bool,
    command: Command,
}

enum Command {
    Login,
    Logout,
    Sync(PathBuf),
    Watch,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("stride.toml");
    let mut no_browser = false;
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--no-browser" => {
                no_browser = true;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("stride {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "login" => command = Some(Command::Login),
            "logout" => command = Some(Command::Logout),
            "sync" => {
                if let Some(path) = args.next() {
                    command = Some(Command::Sync(PathBuf::from(path)));
                } else {
                    eprintln!("Error: sync requires an export file argument");
                    std::process::exit(1);
                }
            }
            "watch" => command = Some(Command::Watch),
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };

    CliArgs {
        config_path,
        no_browser,
        command,
    }
}

fn print_usage() {
    println!(
        "\
stride {version} -- Apple Health export uploader

USAGE:
    stride [OPTIONS] <COMMAND>

COMMANDS:
    login                  Sign in through the browser and store the token
    logout                 Clear the stored token
    sync <EXPORT>          Upload a single export file
    watch                  Watch the drop directory for job descriptors

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: stride.toml]
        --no-browser       Print the sign-in URL instead of opening a browser
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    STRIDE_CONFIG          Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
        .block_on(async_main())
}

async fn async_main() -> ExitCode {
    // 1. Parse CLI arguments
    let cli = parse_args();

    // Allow STRIDE_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("STRIDE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // 3. Initialize tracing/logging
    init_tracing(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting stride"
    );

    // 4. Dispatch the subcommand
    let result = match cli.command {
        Command::Login => cmd_login(&config, cli.no_browser).await,
        Command::Logout => cmd_logout(&config),
        Command::Sync(export) => cmd_sync(&config, cli.no_browser, &export).await,
        Command::Watch => cmd_watch(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_login(config: &Config, no_browser: bool) -> Result<(), AppError> {
    let store = store_from_config(&config.auth);
    tracing::debug!(store = store.name(), "Token store selected");

    let mut session = AuthSession::new(&config.auth, store.clone());
    if no_browser {
        session = session.without_browser();
    }
    let validator = TokenValidator::new(&config.upload.backend_url);

    let cancel = CancelToken::new();
    spawn_cancel_on_ctrl_c(cancel.clone());

    session.ensure_valid_token(&validator, &cancel).await?;
    println!("Authenticated. Token saved to the {} store.", store.name());
    Ok(())
}

fn cmd_logout(config: &Config) -> Result<(), AppError> {
    let store = store_from_config(&config.auth);
    store.delete(&config.auth.account)?;
    println!("Stored token cleared.");
    Ok(())
}

async fn cmd_sync(config: &Config, no_browser: bool, export: &Path) -> Result<(), AppError> {
    let store = store_from_config(&config.auth);
    let mut session = AuthSession::new(&config.auth, store);
    if no_browser {
        session = session.without_browser();
    }
    let validator = TokenValidator::new(&config.upload.backend_url);

    let cancel = CancelToken::new();
    spawn_cancel_on_ctrl_c(cancel.clone());

    let token = session.ensure_valid_token(&validator, &cancel).await?;

    let uploader = Uploader::new(&config.upload);
    let pipeline = Pipeline::new(Arc::new(JsonExportReader), uploader);
    let report = pipeline.process_export(export, &token).await?;

    println!(
        "Uploaded {} daily summaries and {} activity summaries.",
        report.days, report.activity_summaries
    );
    Ok(())
}

async fn cmd_watch(config: &Config) -> Result<(), AppError> {
    std::fs::create_dir_all(&config.watcher.watch_dir)?;
    std::fs::create_dir_all(&config.watcher.processed_dir)?;

    let validator = Arc::new(TokenValidator::new(&config.upload.backend_url));
    let uploader = Uploader::new(&config.upload);
    let pipeline = Arc::new(Pipeline::new(Arc::new(JsonExportReader), uploader));
    let watcher = JobWatcher::new(&config.watcher, validator, pipeline);

    println!();
    println!("  stride v{} is watching", env!("CARGO_PKG_VERSION"));
    println!("  Drop dir:  {}", config.watcher.watch_dir.display());
    println!("  Archive:   {}", config.watcher.processed_dir.display());
    println!("  Backend:   {}", config.upload.backend_url);
    println!();

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let _scanner = spawn_scanner(
        config.watcher.watch_dir.clone(),
        config.watcher.processed_dir.clone(),
        config.watcher.scan_interval(),
        tx,
    );

    watcher.run(rx, shutdown_signal()).await;
    tracing::info!("Shutting down gracefully");
    Ok(())
}

/// Trip the cancel token on Ctrl+C so an interactive sign-in wait unwinds
/// cleanly instead of killing the process mid-flow. A second Ctrl+C forces
/// an immediate exit.
fn spawn_cancel_on_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT (Ctrl+C), cancelling sign-in");
            cancel.cancel();
        }
        if signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(config: &LoggingConfig) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.level;
        // Set the stride crate to the configured level, dependencies to warn
        EnvFilter::new(format!("stride={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
