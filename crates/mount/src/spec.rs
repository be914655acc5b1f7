use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::{MountError, Result};

/// Kinds of mount. Only reverse sshfs exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountType {
    #[default]
    ReverseSshfs,
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountType::ReverseSshfs => f.write_str("reverse-sshfs"),
        }
    }
}

impl FromStr for MountType {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reverse-sshfs" => Ok(MountType::ReverseSshfs),
            other => Err(MountError::UnknownMountType(other.to_string())),
        }
    }
}

/// A local directory to expose at a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub mount_type: MountType,
    /// Absolute local directory.
    pub source: PathBuf,
    /// Absolute POSIX path on the remote host.
    pub destination: String,
    pub readonly: bool,
    /// Appended verbatim to the remote `sshfs` command.
    pub extra_server_args: Vec<String>,
}

impl MountSpec {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            mount_type: MountType::ReverseSshfs,
            source: source.into(),
            destination: destination.into(),
            readonly: false,
            extra_server_args: Vec::new(),
        }
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_extra_server_args(mut self, args: Vec<String>) -> Self {
        self.extra_server_args = args;
        self
    }

    /// Both ends must be absolute.
    ///
    /// A `/`-rooted local path is accepted on every platform, so Cygwin and
    /// MSYS2 style paths pass on Windows.
    pub fn validate(&self) -> Result<()> {
        let source_str = self.source.to_string_lossy();
        if !self.source.is_absolute() && !source_str.starts_with('/') {
            return Err(MountError::InvalidPath(source_str.into_owned()));
        }
        if !self.destination.starts_with('/') {
            return Err(MountError::InvalidPath(self.destination.clone()));
        }
        Ok(())
    }
}

/// `LOCAL:REMOTE[:ro]`. A leading `~/` on the local side expands to the home
/// directory, and a relative local path is taken against the working
/// directory.
impl FromStr for MountSpec {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| MountError::InvalidSpec {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = s.split(':').collect();
        let readonly = match fields.as_slice() {
            [_, _] => false,
            [_, _, "ro"] => true,
            [_, _, other] => {
                return Err(invalid(&format!("unknown mode {other:?}, expected \"ro\"")));
            }
            _ => return Err(invalid("expected LOCAL:REMOTE[:ro]")),
        };
        let (local, remote) = (fields[0], fields[1]);
        if local.is_empty() || remote.is_empty() {
            return Err(invalid("local and remote paths must not be empty"));
        }

        let expanded = common::expand_tilde(local).map_err(|e| invalid(&e.to_string()))?;
        let source = absolutize(&expanded).map_err(|e| invalid(&e.to_string()))?;

        Ok(MountSpec::new(source, remote).with_readonly(readonly))
    }
}

/// Join a relative path onto the working directory and collapse `.`/`..`.
fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
