use std::process::{Output, Stdio};

use tracing::debug;

use crate::config::{Target, TransportConfig};
use crate::error::{Result, SshError};

/// Ask the persistent control master for `target` to exit (`ssh -O exit`).
pub async fn exit_control_master(target: &Target, transport: &TransportConfig) -> Result<()> {
    let args = exit_args(target, transport);
    debug!(binary = transport.binary_name(), ?args, "exiting the control master");

    let output = tokio::process::Command::new(transport.binary_name())
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| spawn_error(transport, source))?;
    check_exit(target, output)
}

/// Blocking form of [`exit_control_master`] for teardown paths that cannot
/// await, such as `Drop`.
pub fn exit_control_master_blocking(target: &Target, transport: &TransportConfig) -> Result<()> {
    let args = exit_args(target, transport);
    debug!(binary = transport.binary_name(), ?args, "exiting the control master");

    let output = std::process::Command::new(transport.binary_name())
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| spawn_error(transport, source))?;
    check_exit(target, output)
}

fn exit_args(target: &Target, transport: &TransportConfig) -> Vec<String> {
    let mut args = transport.base_args();
    args.push("-O".to_string());
    args.push("exit".to_string());
    args.extend(target.args());
    args
}

fn spawn_error(transport: &TransportConfig, source: std::io::Error) -> SshError {
    SshError::Spawn {
        program: transport.binary_name().to_string(),
        source,
    }
}

fn check_exit(target: &Target, output: Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(SshError::ControlExit {
        host: target.to_string(),
        status: output.status,
        output: combined,
    })
}
