// crates/ncp-server/src/config/mod.rs
// Profile store, global settings and filesystem layout (C1)

pub mod env;
mod paths;
mod profile;
mod settings;

pub use paths::BaseDirs;
pub use profile::{McpDescriptor, Profile, ProfileStore, TransportKind};
pub use settings::{ConfirmBeforeRun, GlobalSettings, SettingsStore};
