//! browsefs Core
//!
//! This crate contains:
//! - Application state management
//! - Configuration
//! - Error types

pub mod config;
pub mod error;
pub mod state;

pub use config::{
    AppConfig, DirectoryConfig, DisplayConfig, ExcludeConfig, LogConfig, UploadConfig, SETTINGS_ENV,
};
pub use error::AppError;
pub use state::AppState;

use once_cell::sync::OnceCell;

/// Global application state
static APP_STATE: OnceCell<AppState> = OnceCell::new();

/// Initialize global application state
pub fn init(config: AppConfig) -> anyhow::Result<&'static AppState> {
    let state = AppState::new(config)?;
    APP_STATE
        .set(state)
        .map_err(|_| anyhow::anyhow!("AppState already initialized"))?;
    APP_STATE
        .get()
        .ok_or_else(|| anyhow::anyhow!("AppState not initialized"))
}

/// Get global application state
pub fn state() -> Option<&'static AppState> {
    APP_STATE.get()
}
