//! CLI subcommand implementations for the `towerline` binary.

pub mod cache_cmd;
pub mod chip_cmd;
pub mod context;
pub mod detect_cmd;
pub mod output;
pub mod progress;
pub mod run_cmd;
pub mod serve_cmd;
