//! CLI subcommand entry points

pub mod serve;
