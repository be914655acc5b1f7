//! Compact SFTP version 3 server for serving one local directory tree.
//!
//! Covers the request set `sshfs` issues: attribute queries, file and
//! directory handles, and the usual namespace mutations. Every request path is
//! confined to the served root. Extended requests are answered with
//! `OP_UNSUPPORTED`.
//!
//! ## Framing
//!
//! Each packet is `[4-byte BE length][1-byte type][payload]`. All requests
//! except `INIT` carry a 4-byte request id right after the type.

pub mod attrs;
pub mod codec;
pub mod error;
mod path;
pub mod server;

pub use attrs::FileAttrs;
pub use error::{Result, SftpError};
pub use server::SftpServer;

/// The only protocol version spoken.
pub const SFTP_VERSION: u32 = 3;
