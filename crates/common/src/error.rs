use thiserror::Error;

use crate::process::TerminateFailure;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot determine the local home directory")]
    NoHomeDir,

    #[error("failed to terminate {} process(es): {}", .0.len(), join_failures(.0))]
    Terminate(Vec<TerminateFailure>),
}

fn join_failures(failures: &[TerminateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
