use thiserror::Error;

use crate::reverse::MountState;

/// Errors that can occur while setting up or tearing down a mount.
#[derive(Error, Debug)]
pub enum MountError {
    #[error("unexpected relative path: {0:?}")]
    InvalidPath(String),

    #[error("invalid mount spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("unknown mount type {0:?}")]
    UnknownMountType(String),

    #[error("failed to choose the sftp driver: {0}")]
    DriverResolution(String),

    #[error("failed to mkdir {path:?} (remote): {output:?}")]
    RemotePreparation { path: String, output: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mount is {actual}, expected {expected}")]
    InvalidState {
        expected: MountState,
        actual: MountState,
    },

    #[error(transparent)]
    Ssh(#[from] ssh::SshError),

    #[error("failed to close mount: {0}")]
    Close(#[from] common::Error),

    #[error("failed to close the sftp channel: {}", join_io_errors(.0))]
    ChannelClose(Vec<std::io::Error>),
}

fn join_io_errors(errors: &[std::io::Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, MountError>;
