pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod upload;
pub mod watcher;
