//! Orchid console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Load the mailbox fixture
//!   6. Build the orchestrator and initialize its backend
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run the console channel until shutdown, `/quit` or EOF

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use orchid::config;
use orchid::error::AppError;
use orchid::logger;
use orchid::orchestrator::Orchestrator;
use orchid::subsystems::comms::{self, ConsoleChannel, InputBridge};
use orchid::subsystems::tools::{InMemoryMailbox, Mailbox};
use orchid::subsystems::voice;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        name = %config.name,
        backend = %config.llm.provider,
        model = %config.llm.ollama.model,
        endpoint = %config.llm.ollama.endpoint,
        language = config.language.as_deref().unwrap_or("default"),
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let mailbox: Arc<dyn Mailbox> = match &config.mailbox.fixture {
        Some(path) => Arc::new(InMemoryMailbox::from_json_file(path)?),
        None => Arc::new(InMemoryMailbox::default()),
    };
    info!(total = mailbox.total_count(), unread = mailbox.unread_count(), "mailbox loaded");

    let orchestrator = Orchestrator::from_config(&config, mailbox)?;

    // A failed probe is not fatal: `/status` shows the cause and the next
    // start (or a config change) can recover.
    if let Err(e) = orchestrator.initialize().await {
        warn!(error = %e, "backend not available, replies will fail until it is");
    }

    // Ctrl-C cancels the shared shutdown token.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let (sender, bridge) = InputBridge::new();
    let reader = comms::pty::spawn_stdin_reader(sender, shutdown.clone());

    let console = ConsoleChannel::new(orchestrator.clone(), voice::from_config(&config.voice));
    console.run(bridge, shutdown.clone()).await?;

    shutdown.cancel();
    reader.abort();
    orchestrator.dispose();

    {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: orchid [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug
    //   -vvvv+  → trace  (full wire payloads)
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
