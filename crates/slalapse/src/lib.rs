pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod finalize;
pub mod job;
pub mod logging;
pub mod sensor;
pub mod timer;

pub use capture::{HttpSnapshotSource, SnapshotCapturer, SnapshotSource};
pub use config::{load_config, Config, ConfigWatcher, DarkLevel};
pub use controller::{
    ControllerConfig, ControllerHandle, ControllerState, ControllerStatus, JobLifecycleController,
    LifecycleEvent,
};
pub use error::{
    AssemblyError, CaptureError, ConfigError, ControllerError, Result, SensorError, SlalapseError,
    StorageError,
};
pub use finalize::{FfmpegEncoder, FinalizationResult, Finalizer, StepOutcome, VideoEncoder};
pub use job::{list_root, Frame, Job, JobFolderManager, JobState, RootEntry};
pub use sensor::{Level, SensorConfig, SensorSource, TriggerEvent, ValueFileSensor};
