//! # eventhub-settings
//!
//! Layered configuration for the eventhub server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `~/.eventhub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `EVENTHUB_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<HubSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// The first call loads `~/.eventhub/settings.json` with env overrides and
/// falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static HubSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Hands the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: HubSettings) -> std::result::Result<(), HubSettings> {
    SETTINGS.set(settings)
}
