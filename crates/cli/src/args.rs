use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use mount::{DriverChoice, MountSpec};
use ssh::Target;

use crate::error::ArgError;
use crate::forward::parse_publish;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "sshmount",
    version,
    about = "ssh + reverse sshfs + port forwarder",
    override_usage = "sshmount [run] [OPTIONS] -p LOCALIP:LOCALPORT:REMOTEPORT -v LOCALDIR:REMOTEDIR USER@HOST[:PORT] [-- COMMAND...]"
)]
pub struct Args {
    /// Remote host, as `[user@]host[:port]`. IPv6 addresses take brackets.
    #[arg(value_parser = parse_host)]
    pub host: Target,

    /// Command to run on the remote host. Defaults to a login shell.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// ssh config file
    #[arg(short = 'F', long = "ssh-config")]
    pub ssh_config: Option<PathBuf>,

    /// Multiplex every ssh connection over one ControlMaster
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub ssh_persist: bool,

    /// Mount a local directory on the remote host, e.g. `.:/mnt/ssh`.
    /// Append `:ro` for a read-only mount.
    #[arg(short = 'v', value_name = "LOCAL:REMOTE[:ro]", value_parser = parse_mount)]
    pub mounts: Vec<MountSpec>,

    /// Forward a local port to the remote host, e.g. `8080:80`
    #[arg(short = 'p', value_name = "[[LOCALIP:]LOCALPORT:]REMOTEPORT", value_parser = parse_publish)]
    pub publish: Vec<String>,

    /// Pass `-o nonempty` to sshfs
    #[arg(long, default_value_t = false)]
    pub sshfs_nonempty: bool,

    /// Which SFTP server answers the remote sshfs
    #[arg(long, value_enum, default_value_t = DriverArg::Auto)]
    pub driver: DriverArg,

    /// Path to an OpenSSH sftp-server binary
    #[arg(long)]
    pub sftp_server: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Transport executable used instead of `ssh`
    #[arg(long, hide = true, default_value = ssh::config::DEFAULT_BINARY)]
    pub ssh_binary: String,
}

/// Optional leading subcommand; `sshmount run HOST` is `sshmount HOST`.
pub const RUN_ALIAS: &str = "run";

impl Args {
    /// Parse the process arguments, accepting the `run` alias.
    pub fn parse_with_alias() -> Self {
        Self::parse_from(strip_run_alias(std::env::args_os().collect()))
    }

    /// Extra `sshfs` arguments applied to every mount.
    pub fn sshfs_args(&self) -> Vec<String> {
        if self.sshfs_nonempty {
            vec!["-o".to_string(), "nonempty".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// `--driver` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DriverArg {
    /// Use OpenSSH sftp-server when found, else the builtin server
    Auto,
    /// Serve SFTP from within this process
    Builtin,
    /// Require an OpenSSH sftp-server
    #[value(name = "openssh-sftp-server")]
    OpensshSftpServer,
}

impl fmt::Display for DriverArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Builtin => write!(f, "builtin"),
            Self::OpensshSftpServer => write!(f, "openssh-sftp-server"),
        }
    }
}

impl From<DriverArg> for DriverChoice {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::Auto => DriverChoice::Auto,
            DriverArg::Builtin => DriverChoice::Embedded,
            DriverArg::OpensshSftpServer => DriverChoice::ExternalServer,
        }
    }
}

/// Drop a leading `run`. A lone `run` is kept so it can still name a host.
pub fn strip_run_alias(mut argv: Vec<OsString>) -> Vec<OsString> {
    if argv.len() > 2 && argv[1] == RUN_ALIAS {
        argv.remove(1);
    }
    argv
}

fn parse_mount(s: &str) -> Result<MountSpec, String> {
    s.parse::<MountSpec>().map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Host parsing
// ---------------------------------------------------------------------------

/// Split `[user@]host[:port]`. A `user@` prefix stays with the host, and an
/// IPv6 address with a port must be written `[addr]:port`.
pub fn parse_host(s: &str) -> Result<Target, ArgError> {
    let invalid = |reason: &str| ArgError::InvalidHost {
        host: s.to_string(),
        reason: reason.to_string(),
    };

    if s.is_empty() {
        return Err(invalid("empty host"));
    }
    if !s.contains(':') {
        return Ok(Target::new(s, None));
    }

    // `[::1]` or `user@[::1]` without a port.
    if let Some(stripped) = s.strip_suffix(']') {
        let (user, addr) = split_bracket(stripped).ok_or_else(|| invalid("unbalanced brackets"))?;
        return Ok(Target::new(format!("{user}{addr}"), None));
    }

    let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let host = match host.strip_suffix(']') {
        Some(stripped) => {
            let (user, addr) =
                split_bracket(stripped).ok_or_else(|| invalid("unbalanced brackets"))?;
            format!("{user}{addr}")
        }
        None if host.contains(':') || host.contains('[') => {
            return Err(invalid("too many colons, bracket IPv6 addresses"));
        }
        None => host.to_string(),
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| invalid(&format!("invalid port {port:?}")))?;

    Ok(Target::new(host, Some(port)))
}

/// Split `user@[addr` (closing bracket already stripped) into `("user@", "addr")`.
fn split_bracket(s: &str) -> Option<(&str, &str)> {
    let (user, addr) = s.split_once('[')?;
    if addr.contains('[') || addr.contains(']') || addr.is_empty() {
        return None;
    }
    Some((user, addr))
}
