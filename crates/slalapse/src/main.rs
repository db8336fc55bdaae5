use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::mpsc;

use slalapse::config::{load_config_or_default, ConfigWatcher};
use slalapse::controller::{ControllerConfig, JobLifecycleController};
use slalapse::finalize::{FfmpegEncoder, FinalizeOptions, Finalizer};
use slalapse::logging::{self, LogFormat};
use slalapse::sensor::{SensorConfig, ValueFileSensor};
use slalapse::{list_root, Config, HttpSnapshotSource, Job, RootEntry, SlalapseError};

#[derive(Parser)]
#[command(name = "slalapse", version, about = "Light-sensor triggered print timelapses")]
struct Cli {
    /// Config file (defaults to <config dir>/slalapse/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for slalapse
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the sensor and capture timelapses until interrupted
    Run,
    /// Validate the config and print the effective settings
    CheckConfig,
    /// List job folders, archives and videos under the snapshot root
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assemble and archive an existing job folder
    Finalize {
        /// Job folder, e.g. ~/timelapse/timelapse_18-10-2026_Job1
        folder: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_format) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Commands::Run => run(cli.config.as_deref()),
        Commands::CheckConfig => check_config(cli.config.as_deref()),
        Commands::List { json } => list(cli.config.as_deref(), *json),
        Commands::Finalize { folder } => finalize(cli.config.as_deref(), folder),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(config_path: Option<&Path>) -> Result<(), SlalapseError> {
    let config = load_config_or_default(config_path)?;
    info!("Starting slalapse v{}", env!("CARGO_PKG_VERSION"));

    let controller_config = ControllerConfig::from_config(&config)?;
    let snapshots = HttpSnapshotSource::new(
        config.snapshot_url.clone(),
        Duration::from_secs(config.snapshot_timeout_seconds),
    )?;
    let encoder = FfmpegEncoder::new(
        config.encoder_binary.clone(),
        config.video_codec.clone(),
        Duration::from_secs(config.encoder_timeout_seconds),
    );
    let sensor_config = SensorConfig::from_config(&config);
    let sensor = ValueFileSensor::new(config.sensor_value_path(), sensor_config.poll_interval);

    let controller =
        JobLifecycleController::new(controller_config, Arc::new(snapshots), Arc::new(encoder));
    let handle = controller.spawn_with_sensor(Box::new(sensor), &sensor_config)?;

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| SlalapseError::Signal(e.to_string()))?;

    let watcher = config_path
        .map(Path::to_path_buf)
        .or_else(slalapse::config::default_config_path)
        .filter(|path| path.exists())
        .map(ConfigWatcher::new);
    let watcher_stop = watcher.as_ref().map(ConfigWatcher::shutdown_flag);

    if let Some(watcher) = watcher {
        let runtime = tokio::runtime::Handle::current();
        let reload_handle = handle.clone();
        let initial = config.clone();

        std::thread::spawn(move || {
            let result = watcher.watch(move |updated: Config| {
                if sensor_settings_changed(&initial, &updated) {
                    warn!("Sensor settings changed; restart slalapse to apply them");
                }
                let controller_config = match ControllerConfig::from_config(&updated) {
                    Ok(c) => c,
                    Err(e) => {
                        error!("Ignoring config change: {}", e);
                        return;
                    }
                };
                let handle = reload_handle.clone();
                runtime.spawn(async move {
                    if let Err(e) = handle.reload(controller_config).await {
                        error!("Failed to apply config change: {}", e);
                    }
                });
            });
            if let Err(e) = result {
                error!("Config watcher stopped: {}", e);
            }
        });
    }

    info!("Press Ctrl-C to stop");
    stop_rx.recv().await;
    info!("Interrupted, shutting down");

    if let Some(stop) = watcher_stop {
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
    }
    handle.shutdown().await?;
    Ok(())
}

fn sensor_settings_changed(old: &Config, new: &Config) -> bool {
    old.sensor_value_path() != new.sensor_value_path()
        || old.dark_level != new.dark_level
        || old.debounce_millis != new.debounce_millis
        || old.sensor_poll_millis != new.sensor_poll_millis
        || old.snapshot_url != new.snapshot_url
        || old.snapshot_timeout_seconds != new.snapshot_timeout_seconds
        || old.encoder_binary != new.encoder_binary
        || old.video_codec != new.video_codec
        || old.encoder_timeout_seconds != new.encoder_timeout_seconds
}

fn check_config(config_path: Option<&Path>) -> Result<(), SlalapseError> {
    let config = load_config_or_default(config_path)?;
    let controller = ControllerConfig::from_config(&config)?;

    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| SlalapseError::Config(e.into()))?;
    println!("{}", json);
    println!();
    println!("Snapshot root: {}", controller.snapshot_root.display());
    println!("Sensor:        {}", config.sensor_value_path());
    info!("Configuration is valid");
    Ok(())
}

fn list(config_path: Option<&Path>, json: bool) -> Result<(), SlalapseError> {
    let config = load_config_or_default(config_path)?;
    let controller = ControllerConfig::from_config(&config)?;
    let entries = list_root(&controller.snapshot_root, &config.video_extension)?;

    if json {
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| SlalapseError::Config(e.into()))?;
        println!("{}", json);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Nothing under {}", controller.snapshot_root.display());
        return Ok(());
    }
    for entry in &entries {
        match entry {
            RootEntry::JobFolder { name, frames, .. } => {
                println!("job      {}  ({} frames)", name, frames)
            }
            RootEntry::Archive { name, bytes, .. } => {
                println!("archive  {}  ({} bytes)", name, bytes)
            }
            RootEntry::Video { name, bytes, .. } => {
                println!("video    {}  ({} bytes)", name, bytes)
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn finalize(config_path: Option<&Path>, folder: &Path) -> Result<(), SlalapseError> {
    let config = load_config_or_default(config_path)?;

    let folder = folder
        .canonicalize()
        .map_err(|_| SlalapseError::NotAJobFolder(folder.to_path_buf()))?;
    let job = Job::from_folder(&folder).ok_or_else(|| SlalapseError::NotAJobFolder(folder.clone()))?;
    let root = folder
        .parent()
        .ok_or_else(|| SlalapseError::NotAJobFolder(folder.clone()))?;

    let encoder = FfmpegEncoder::new(
        config.encoder_binary.clone(),
        config.video_codec.clone(),
        Duration::from_secs(config.encoder_timeout_seconds),
    );
    let finalizer = Finalizer::new(root, FinalizeOptions::from_config(&config), Arc::new(encoder));

    info!("Finalizing {}", job.id);
    let result = finalizer.finalize(&job).await;

    let json = serde_json::to_string_pretty(&result)
        .map_err(|e| SlalapseError::Config(e.into()))?;
    println!("{}", json);

    if result.has_failures() {
        warn!("Finalization of {} completed with failures", job.id);
    }
    Ok(())
}
