pub mod build;
pub mod cli;
pub mod config;
pub mod helpers;
pub mod project_context;
pub mod watcher;
