//! Configuration schema and file-backed store

mod schema;
mod store;

pub use schema::{AppConfig, DevicePathsConfig, GadgetConfig, TuningConfig, WebConfig};
pub use store::ConfigStore;
