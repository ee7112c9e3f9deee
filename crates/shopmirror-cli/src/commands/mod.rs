pub mod clear;
pub mod common;
pub mod completions;
pub mod config;
pub mod get;
pub mod list;
pub mod status;
pub mod sync;
pub mod watch;
