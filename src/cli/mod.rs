//! CLI module for pacer - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running a simulation
//! and inspecting the configuration.

pub mod commands;

pub use commands::Cli;
