//! Binary entry point for the `cinder-attach` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cinder_attach::{
    AttachmentCoordinator, CancelHandle, CancelSignal, ConfigError, CoordinatorConfig,
    CoordinatorError, DevicePath, InstanceRef, OpenStackCli, VolumeRef,
};

mod cli;

use cli::{Cli, PairArgs};

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("failed to write device path to stdout: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let (handle, signal) = CancelHandle::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let exit_code = match dispatch(cli, signal).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli, signal: CancelSignal) -> Result<(), CliError> {
    let config = CoordinatorConfig::load_without_cli_args()?;
    let policy = config.poll_policy()?;
    let backend = OpenStackCli::with_process_runner(&config);
    let coordinator =
        AttachmentCoordinator::new(backend.clone(), backend, policy).with_cancel_signal(signal);

    match cli {
        Cli::Attach(pair) => {
            let (instance, volume) = refs(&pair);
            let path = coordinator.attach(&instance, &volume).await?;
            emit_path(io::stdout(), &path)?;
        }
        Cli::WaitAttached(pair) => {
            let (instance, volume) = refs(&pair);
            let path = coordinator.wait_attached(&instance, &volume).await?;
            emit_path(io::stdout(), &path)?;
        }
        Cli::Detach(pair) => {
            let (instance, volume) = refs(&pair);
            coordinator.detach(&instance, &volume).await?;
        }
        Cli::WaitDetached(pair) => {
            let (instance, volume) = refs(&pair);
            coordinator.wait_detached(&instance, &volume).await?;
        }
        Cli::DevicePath(pair) => {
            let (instance, volume) = refs(&pair);
            let path = coordinator.device_path(&instance, &volume).await?;
            emit_path(io::stdout(), &path)?;
        }
    }
    Ok(())
}

fn refs(pair: &PairArgs) -> (InstanceRef, VolumeRef) {
    (
        InstanceRef::new(pair.instance.as_str()),
        VolumeRef::new(pair.volume.as_str()),
    )
}

fn emit_path(mut target: impl Write, path: &DevicePath) -> io::Result<()> {
    writeln!(target, "{path}")?;
    target.flush()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn emit_path_writes_one_line() {
        let mut buf = Vec::new();
        emit_path(&mut buf, &DevicePath::from("/dev/vdb"))
            .unwrap_or_else(|err| panic!("write should succeed: {err}"));
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "/dev/vdb\n");
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emit_path_surfaces_write_failures() {
        let err = emit_path(ClosedPipe, &DevicePath::from("/dev/vdb"))
            .expect_err("closed pipe should fail");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let rendered = CliError::from(err).to_string();
        assert!(
            rendered.starts_with("failed to write device path to stdout"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn blank_identifiers_are_rejected_by_the_parser() {
        for args in [
            ["cinder-attach", "attach", "--instance", "", "--volume", "vol-1"],
            ["cinder-attach", "detach", "--instance", "srv-1", "--volume", "   "],
        ] {
            let err = Cli::try_parse_from(args).expect_err("blank identifier should fail");
            assert!(
                err.to_string().contains("must not be blank"),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn refs_trim_identifiers() {
        let (instance, volume) = refs(&PairArgs {
            instance: String::from(" srv-1 "),
            volume: String::from("vol-1\n"),
        });
        assert_eq!(instance.as_str(), "srv-1");
        assert_eq!(volume.as_str(), "vol-1");
    }

    #[test]
    fn write_error_writes_coordinator_error() {
        let mut buf = Vec::new();
        let err = CliError::Coordinator(CoordinatorError::AttachTimeout {
            instance: InstanceRef::from("srv-1"),
            volume: VolumeRef::from("vol-1"),
            waited: Duration::from_secs(300),
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("timeout after 300s waiting for volume vol-1 to attach to instance srv-1"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn cli_parses_pair_arguments() {
        let cli = Cli::try_parse_from([
            "cinder-attach",
            "wait-detached",
            "--instance",
            "srv-1",
            "--volume",
            "vol-1",
        ])
        .unwrap_or_else(|err| panic!("arguments should parse: {err}"));
        assert!(
            matches!(cli, Cli::WaitDetached(ref pair) if pair.instance == "srv-1" && pair.volume == "vol-1")
        );
    }
}
