pub mod config;
pub mod error;
pub mod event;
pub mod security;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{KestrelError, Result};
pub use event::{EventBus, RunEvent};
pub use security::{Capability, Grant, RoleMap};
pub use types::*;
