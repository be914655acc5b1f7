use std::path::PathBuf;

use mount::MountError;
use thiserror::Error;

/// Rejected command-line values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("cannot parse host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("cannot parse {spec:?}, should be [[LOCALIP:]LOCALPORT:]REMOTEPORT")]
    InvalidPublishShape { spec: String },

    #[error("invalid port {port:?} in {spec:?}")]
    InvalidPort { spec: String, port: String },
}

/// Fatal errors while setting up or running a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no transport configuration")]
    MissingTransport,

    #[error("failed to {stage} mounting {} (local) onto {destination:?} (remote): {cause}", .local.display())]
    Mount {
        stage: &'static str,
        local: PathBuf,
        destination: String,
        #[source]
        cause: MountError,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
