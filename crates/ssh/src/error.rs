use std::process::ExitStatus;

use thiserror::Error;

/// Errors that can occur while invoking the transport.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("cannot determine interpreter from script {name:?}: {reason}")]
    InterpreterDetection { name: String, reason: String },

    #[error("failed to execute script {name:?} ({status}): stdout={stdout:?}, stderr={stderr:?}")]
    ScriptExecution {
        name: String,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to exit the control master for {host} ({status}): {output:?}")]
    ControlExit {
        host: String,
        status: ExitStatus,
        output: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SshError>;
