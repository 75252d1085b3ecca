//! hotmod - a hot-reloading WASM plugin host
//!
//! Usage:
//!   hotmod                  Run with hotmod.toml (or defaults) and watch
//!   hotmod host.toml        Run with an explicit config file
//!   hotmod --no-watch       Load plugins once, no directory watching

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use hotmod::{HostConfig, HostContext, PluginManager};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG: &str = "hotmod.toml";

fn print_help() {
    println!(
        r#"hotmod {VERSION} - hot-reloading WASM plugin host

USAGE:
    hotmod [OPTIONS] [CONFIG]

ARGS:
    CONFIG              Path to a TOML config file (default: {DEFAULT_CONFIG} if present)

OPTIONS:
    --no-watch          Do not watch the plugin directory for changes
    --help              Show this help message
    --version           Show version

CONFIG KEYS:
    plugins_dir         Directory scanned recursively for plugin modules
    libraries_dir       Directory of shared dependency modules
    module_extension    Module file extension (default: wasm)
    hotload             Rewrite identities on load (default: true)
    watch               Reload on directory changes (default: true)"#
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config_path: Option<PathBuf> = None;
    let mut watch = true;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" | "-V" => {
                println!("hotmod {VERSION}");
                return ExitCode::SUCCESS;
            }
            "--no-watch" => watch = false,
            other if other.starts_with('-') => {
                eprintln!("unknown option: {other}");
                return ExitCode::FAILURE;
            }
            other => config_path = Some(PathBuf::from(other)),
        }
    }

    let mut config = match &config_path {
        Some(path) => match HostConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not load config");
                return ExitCode::FAILURE;
            }
        },
        None if Path::new(DEFAULT_CONFIG).exists() => {
            match HostConfig::load(Path::new(DEFAULT_CONFIG)) {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "could not load {DEFAULT_CONFIG}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => HostConfig::default(),
    };
    if !watch {
        config.watch = false;
    }

    let ctx = Arc::new(HostContext::new(config));
    let manager = PluginManager::new(ctx);

    manager.on_plugins_loaded(|names| {
        info!(count = names.len(), plugins = ?names, "plugins loaded");
    });

    if let Err(e) = manager.load_plugins() {
        error!(error = %e, "initial plugin load failed");
        return ExitCode::FAILURE;
    }

    let reload_rx = if manager.context().config().watch {
        match manager.watch() {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    if ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)).is_err() {
        warn!("could not install interrupt handler");
    }

    // The watcher only nudges this thread; the reload itself runs here,
    // where the plugin containers live.
    while running.load(Ordering::SeqCst) {
        let Some(rx) = &reload_rx else {
            std::thread::sleep(Duration::from_millis(200));
            continue;
        };
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(()) => {
                while rx.try_recv().is_ok() {}
                manager.reload();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }

    info!("shutting down");
    manager.shutdown();
    ExitCode::SUCCESS
}
