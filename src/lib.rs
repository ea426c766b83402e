pub mod appender;
pub mod cli;
pub mod config;
pub mod delta;
pub mod format;
pub mod pipeline;
pub mod root;
pub mod session;
pub mod state;
pub mod watcher;
