// Core modules
pub mod api;
pub mod config;
pub mod control;
pub mod indicators;
pub mod models;
pub mod notification;
pub mod scheduler;
pub mod strategy;

// Re-export commonly used types
pub use config::BotConfig;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
