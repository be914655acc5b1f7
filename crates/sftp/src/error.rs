use thiserror::Error;

/// Errors that end a serving session.
///
/// Per-request failures (missing files, denied access) are reported to the
/// client as `STATUS` replies and never surface here.
#[derive(Error, Debug)]
pub enum SftpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("packet of {len} bytes exceeds the {max} byte limit")]
    PacketTooLarge { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, SftpError>;
