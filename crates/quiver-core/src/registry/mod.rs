//! Installed-skill registry.
//!
//! The registry is a JSON document in the state directory describing every
//! skill under the runtime skills directory. The filesystem wins on
//! disagreement: uninstall tolerates vanished directories and `sync`
//! rebuilds records from what is on disk.

mod installer;
mod record;
pub mod search;
mod store;

pub use installer::{SkillInstaller, SyncReport, UninstallReport};
pub use record::{REGISTRY_VERSION, Registry, ScanSummary, SkillRecord};
pub use search::{NameMatch, SearchHit, search};
pub use store::RegistryStore;

#[cfg(test)]
pub(crate) use installer::tests as tests_support;
