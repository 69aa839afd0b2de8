//! shipit - Entry Point
//!
//! `--serve` runs the dispatch API, realtime gateway and edge router.
//! `--build` runs one build executor seeded from the environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use shipit::app::build::run_build;
use shipit::app::options::AppOptions;
use shipit::app::run::run;
use shipit::deploy::job::BuildJob;
use shipit::filesys::file::File;
use shipit::logs::{init_logging, LogOptions};
use shipit::storage::layout::StorageLayout;
use shipit::storage::settings::Settings;
use shipit::utils::version_info;

use tracing::{error, info};

const USAGE: &str = "usage: shipit --serve|--build|--version [--config=PATH]";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let serve_mode = cli_args.contains_key("serve");
    let build_mode = cli_args.contains_key("build");
    if serve_mode == build_mode {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    }

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {e}");
        }
    }

    // Retrieve the settings file
    let config_path = cli_args.get("config").map(PathBuf::from);
    let mut layout = StorageLayout::default();
    let settings_file = match &config_path {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(data_dir) = &settings.data_dir {
        layout = StorageLayout::new(data_dir);
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: (settings.log_to_file && serve_mode).then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if build_mode {
        return build(&settings).await;
    }

    let options = AppOptions::from_settings(&settings, layout, config_path);
    info!("Running shipit {} with options: {:?}", version.version, options);
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run shipit: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn build(settings: &Settings) -> ExitCode {
    let job = match BuildJob::from_env() {
        Ok(job) => job,
        Err(e) => {
            error!("Invalid build job: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run_build(settings, job).await {
        Ok(outcome) if outcome.succeeded() => ExitCode::SUCCESS,
        Ok(outcome) => {
            error!(
                "Build failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Build could not start: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
