mod args;
mod error;
mod forward;
mod logging;
mod session;

use std::process::ExitCode;
use std::sync::Arc;

use mount::ReverseMountBackend;
use ssh::TransportConfig;
use tracing::{debug, error};

use args::Args;
use error::Result;
use session::{Session, SessionOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_with_alias();

    // Held until exit so buffered file logs are flushed.
    let _log_guard = logging::init_logging(args.debug);

    match run(args).await {
        Ok(outcome) => {
            debug!(?outcome, "session finished");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Turn the command line into a session and run it with reverse sshfs
/// mounts.
async fn run(args: Args) -> Result<SessionOutcome> {
    let transport = Arc::new(
        TransportConfig::new()
            .with_binary(args.ssh_binary.clone())
            .with_config_file(args.ssh_config.clone())
            .with_persist(args.ssh_persist),
    );

    let sshfs_args = args.sshfs_args();
    let mounts = args
        .mounts
        .into_iter()
        .map(|spec| spec.with_extra_server_args(sshfs_args.clone()))
        .collect();

    let backend = ReverseMountBackend::new(args.host.clone(), transport.clone())
        .with_driver(args.driver.into(), args.sftp_server);

    Session::new(args.host, args.command)
        .with_transport(transport)
        .with_mounts(mounts)
        .with_forwards(args.publish)
        .run(&backend)
        .await
}
