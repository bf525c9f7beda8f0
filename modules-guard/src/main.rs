/*!
modules.php guard
*/

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio::signal;
use tracing::{error, info, warn};

use modules_guard::core::config::MonitorBackend;
use modules_guard::core::journal::TracingJournal;
use modules_guard::{Guard, GuardConfig, GuardError, logging};

fn cli() -> Command {
    Command::new("modules-guard")
        .version(clap::crate_version!())
        .about("Restores modules.php whenever it is deleted from the watched directory")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a TOML config file")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("watch-dir")
                .short('w')
                .long("watch-dir")
                .help("Directory to watch (non-recursive)")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("target-file")
                .short('t')
                .long("target-file")
                .help("Filename suffix to restore when deleted")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .help("Directory for the log file")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("poll")
                .long("poll")
                .help("Scan the directory periodically instead of using native notifications")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration and exit")
                .action(ArgAction::SetTrue),
        )
}

/// Config file (if any), then command line overrides.
fn load_config(matches: &ArgMatches) -> Result<GuardConfig, GuardError> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => GuardConfig::from_file(path)?,
        None => GuardConfig::default(),
    };

    if let Some(dir) = matches.get_one::<String>("watch-dir") {
        config.watch.directory = PathBuf::from(dir);
    }
    if let Some(target) = matches.get_one::<String>("target-file") {
        config.watch.target_file = target.clone();
    }
    if let Some(dir) = matches.get_one::<String>("log-dir") {
        config.logging.directory = PathBuf::from(dir);
    }
    if matches.get_flag("poll") {
        config.watch.backend = MonitorBackend::Poll;
    }

    config.validate()?;
    Ok(config)
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

async fn run(config: GuardConfig) -> Result<(), GuardError> {
    info!("🚀 Starting modules guard");

    let guard = Guard::from_config(&config, Arc::new(TracingJournal))?;
    let active = guard.start()?;
    active.run(shutdown_signal()).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("modules-guard: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    if matches.get_flag("print-config") {
        return match config.to_toml() {
            Ok(rendered) => {
                print!("{}", rendered);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("modules-guard: {}", e);
                ExitCode::from(GuardError::from(e).exit_code())
            }
        };
    }

    // Flushes the file log on drop, so it must outlive everything below.
    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("modules-guard: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
