//! Remote-shell transport plumbing for sshmount.
//!
//! This crate provides:
//! - [`TransportConfig`]: the argument vector shared by every `ssh` invocation
//! - [`ScriptRunner`]: run a shebang script on the remote host via stdin
//! - [`exit_control_master`]: tear down a persistent `ControlMaster` connection

pub mod config;
pub mod control;
pub mod error;
pub mod script;

pub use config::{Target, TransportConfig, shell_quote};
pub use control::{exit_control_master, exit_control_master_blocking};
pub use error::{Result, SshError};
pub use script::{ScriptOutput, ScriptRunner, parse_script_interpreter};
