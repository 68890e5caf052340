//! Configuration for quiver.
//!
//! Configuration lives in a single TOML file (`config.toml` under the user's
//! config directory). Every section is optional; a missing file yields the
//! defaults.

mod schema;
mod store;

pub use schema::{
    CacheConfig, CloneConfig, DetectConfig, PathsConfig, QuiverConfig, ScanConfig,
};
pub use store::ConfigStore;
