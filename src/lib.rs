pub mod commands;
pub mod config;
pub mod console;
pub mod entities;
pub mod error;
pub mod persistence;
mod sync;
pub mod telemetry;
pub mod teleport;
pub mod world;

pub use commands::orchestrator::{Backends, CommandOutcome, TeleportOrchestrator};
pub use commands::parse::{parse_teleport_command, TeleportCommand};
pub use config::{AppConfig, TeleportConfig};
pub use error::{AppError, TeleportError};

use persistence::store::YamlDocumentStore;
use std::sync::Arc;

pub fn run(args: &[String]) -> Result<(), AppError> {
    let config = AppConfig::from_args(args)?;
    let log_path =
        telemetry::logging::init(&config.root, &config.log_filter).map_err(AppError::Logging)?;
    let teleport_config = TeleportConfig::load(&config.config_path)?;
    let store = YamlDocumentStore::from_root(&config.root);
    let report = store.validate();
    tracing::info!(
        root = %config.root.display(),
        player_files = report.player_files,
        errors = report.errors.len(),
        "waygate starting"
    );

    println!("waygate: startup");
    println!("- root: {}", config.root.display());
    println!("- config: {}", config.config_path.display());
    println!("- log: {}", log_path.display());
    if report.missing_dir {
        println!("- player documents: missing players directory");
    } else {
        println!(
            "- player documents: files={}, parsed={}, errors={}, skipped={}",
            report.player_files,
            report.parsed,
            report.errors.len(),
            report.skipped
        );
    }
    for err in &report.errors {
        eprintln!("waygate: store validate {}", err);
    }
    for key in teleport::action::CommandKey::ALL {
        let timing = teleport_config.timing(key.as_str());
        println!(
            "- /{}: warmup={}s cooldown={}s",
            key, timing.warmup_seconds, timing.cooldown_seconds
        );
    }
    println!(
        "- back history: max={} on_death={}",
        teleport_config.back.max_history, teleport_config.back.on_death
    );
    println!(
        "- requests: timeout={}s, rtp range: {}..{}",
        teleport_config.tpa.timeout_seconds,
        teleport_config.rtp.min_range,
        teleport_config.rtp.max_range
    );

    let mut console = console::Console::new(teleport_config, Arc::new(store));
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    console.run(stdin.lock(), stdout.lock())?;
    Ok(())
}
