pub mod state;

pub use state::{AppSettings, IdentitySettings, SettingsError, SettingsStore};
