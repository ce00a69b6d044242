//! Command-line interface components
//!
//! This module contains CLI-specific code for the stage_cache application:
//! argument parsing and the command handlers.

pub mod args;
pub mod commands;

pub use args::{
    CatArgs, Cli, Commands, ConfigAction, ConfigArgs, DeleteArgs, GetArgs, GlobalArgs, PackArgs,
    StageArgs,
};
pub use commands::{
    handle_cat, handle_config, handle_delete, handle_get, handle_pack, handle_stage, StageReport,
};
