pub mod loader;
pub mod schema;
pub mod watcher;

pub use loader::{
    default_config_path, expand_home, load_config, load_config_from_str, load_config_or_default,
};
pub use schema::{Config, DarkLevel};
pub use watcher::ConfigWatcher;
