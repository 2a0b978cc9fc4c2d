pub mod auth;
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod patch;
pub mod traits;

pub use auth::{AuthContext, Permission, TokenVerifier};
pub use config::{
    AuthConfig, ConfigManager, EngineConfig, InvalidationConfig, LoggingConfig, Settings,
    StoreConfig,
};
pub use document::*;
pub use entity::*;
pub use error::*;
pub use patch::*;
pub use traits::*;
