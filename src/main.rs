//! Binary entry point for the `fileset-csi` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, fmt};

use fileset_csi::{ConfigError, ControllerConfig, IdentifierError, MountPolicy, SnapshotId, VolumeId};

mod cli;

use cli::{Cli, IdArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid identifier: {0}")]
    Identifier(#[from] IdentifierError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize)]
struct ConfigReport<'a> {
    config: &'a ControllerConfig,
    mount_policy: MountPolicy,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli, io::stdout().lock()) {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "command failed");
            write_error(io::stderr(), &err);
            1
        }
    };
    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn dispatch(cli: Cli, out: impl Write) -> Result<(), CliError> {
    match cli {
        Cli::DecodeVolumeId(IdArgs { id }) => {
            let decoded: VolumeId = id.parse()?;
            debug!(fileset_backed = decoded.is_fileset_backed(), "decoded volume id");
            write_json(out, &decoded)
        }
        Cli::DecodeSnapshotId(IdArgs { id }) => {
            let decoded: SnapshotId = id.parse()?;
            write_json(out, &decoded)
        }
        Cli::ShowConfig => {
            let config = ControllerConfig::load_without_cli_args()?;
            config.validate()?;
            let report = ConfigReport {
                config: &config,
                mount_policy: config.mount_policy()?,
            };
            write_json(out, &report)
        }
    }
}

fn write_json(mut out: impl Write, value: &impl Serialize) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(cli: Cli) -> Result<String, CliError> {
        let mut buf = Vec::new();
        dispatch(cli, &mut buf)?;
        Ok(String::from_utf8(buf).expect("utf8"))
    }

    #[test]
    fn decodes_fileset_volume_ids() {
        let rendered = render(Cli::DecodeVolumeId(IdArgs {
            id: String::from("1001;AA:BB;fileset=7;path=/ibm/fs0/csi-store/.volumes/pvc-1"),
        }))
        .expect("decoded");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(value["shape"], "fileset");
        assert_eq!(value["fileset_id"], "7");
    }

    #[test]
    fn rejects_malformed_snapshot_ids() {
        let err = render(Cli::DecodeSnapshotId(IdArgs {
            id: String::from("1001;AA"),
        }))
        .expect_err("malformed");
        assert!(matches!(err, CliError::Identifier(_)));
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Identifier(IdentifierError::EmptyField {
            field: "cluster id",
            raw: String::from(";AA;path=/x"),
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.starts_with("invalid identifier"), "rendered: {rendered}");
    }
}
