//! Command-line interface definitions for the `cinder-attach` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `cinder-attach` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cinder-attach",
    about = "Attach and detach block-storage volumes and wait for them to settle",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Request attachment and wait for a device path.
    #[command(name = "attach", about = "Attach a volume and print its device path")]
    Attach(PairArgs),
    /// Wait for an attachment requested elsewhere.
    #[command(
        name = "wait-attached",
        about = "Wait for a volume to become attached and print its device path"
    )]
    WaitAttached(PairArgs),
    /// Request detachment and wait for it to complete.
    #[command(name = "detach", about = "Detach a volume and wait until it is released")]
    Detach(PairArgs),
    /// Wait for a detachment requested elsewhere.
    #[command(name = "wait-detached", about = "Wait for a volume to become detached")]
    WaitDetached(PairArgs),
    /// Print the device path of an attached volume without waiting.
    #[command(name = "device-path", about = "Print the device path of an attached volume")]
    DevicePath(PairArgs),
}

/// Identifies the (instance, volume) pair an operation applies to.
#[derive(Debug, Args)]
pub(crate) struct PairArgs {
    /// Compute instance (server) identifier.
    #[arg(long, value_name = "ID", value_parser = non_blank)]
    pub(crate) instance: String,
    /// Block-storage volume identifier.
    #[arg(long, value_name = "ID", value_parser = non_blank)]
    pub(crate) volume: String,
}

fn non_blank(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(String::from("identifier must not be blank"));
    }
    Ok(trimmed.to_owned())
}
