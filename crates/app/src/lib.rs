#![deny(unsafe_code)]

//! Client shell around the chat and auth crates: layered settings, logging
//! bootstrap and offline replay of recorded message deliveries.

pub mod logging;
/// Offline replay of recorded deliveries through the reconciler.
pub mod replay;
pub mod settings;

pub use replay::{ReplayError, ReplayEvent, ReplayReport, ReplayScript, ReplayStep};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
