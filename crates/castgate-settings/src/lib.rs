//! # castgate-settings
//!
//! Layered configuration for the castgate gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `CASTGATE_*` overrides (highest priority)
//!
//! The binary applies CLI flags on top and calls
//! [`GatewaySettings::validate`] before starting.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings};
pub use types::*;
