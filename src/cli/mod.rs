//! Command-line interface definitions for the `fileset-csi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `fileset-csi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "fileset-csi",
    about = "Inspect identifiers and configuration of the fileset volume controller",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Decode a volume identifier and print its fields as JSON.
    #[command(name = "decode-volume-id")]
    DecodeVolumeId(IdArgs),
    /// Decode a snapshot identifier and print its fields as JSON.
    #[command(name = "decode-snapshot-id")]
    DecodeSnapshotId(IdArgs),
    /// Print the effective controller configuration as JSON.
    #[command(name = "show-config")]
    ShowConfig,
}

/// Arguments for the identifier decoding subcommands.
#[derive(Debug, Args)]
pub(crate) struct IdArgs {
    /// Encoded identifier, for example `1001;UUID;fileset=7;path=/ibm/fs0/pvc-1`.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
}
