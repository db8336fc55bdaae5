use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlalapseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("'{0}' is not a timelapse job folder")]
    NotAJobFolder(PathBuf),

    #[error("Failed to install signal handler: {0}")]
    Signal(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Could not resolve home directory for '{0}'")]
    HomeDirectory(String),

    #[error("Watch error: {0}")]
    WatchError(String),
}

/// Failures acquiring or reading the light sensor. Fatal at startup.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Failed to open sensor '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected sensor value '{value}' in '{path}'")]
    InvalidValue { path: PathBuf, value: String },

    #[error("Sensor is already subscribed")]
    AlreadySubscribed,

    #[error("Sensor channel closed")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free job folder for {date} after {attempts} attempts")]
    JobNumbersExhausted { date: String, attempts: u32 },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

/// Per-frame capture failure. Recovered locally; the job continues.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Snapshot request failed: {0}")]
    Request(String),

    #[error("Snapshot request timed out after {0}s")]
    Timeout(u64),

    #[error("Snapshot endpoint returned status {0}")]
    Status(u16),

    #[error("Snapshot endpoint returned an empty body")]
    EmptyBody,

    #[error("Failed to store frame: {0}")]
    Storage(#[from] StorageError),

    #[error("Capture task failed: {0}")]
    Task(String),
}

/// Finalization failure. The job folder is always left intact.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Failed to run encoder '{binary}': {source}")]
    SpawnEncoder {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with status {code:?}: {stderr}")]
    EncoderFailed { code: Option<i32>, stderr: String },

    #[error("Encoder timed out after {0}s")]
    EncoderTimeout(u64),

    #[error("Encoder reported success but produced no file at '{0}'")]
    MissingOutput(PathBuf),

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive '{path}': {message}")]
    Archive { path: PathBuf, message: String },

    #[error("Failed to remove job folder '{path}': {source}")]
    RemoveFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Finalization task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Controller is not running")]
    NotRunning,

    #[error("Controller did not reply")]
    NoReply,
}

pub type Result<T> = std::result::Result<T, SlalapseError>;
