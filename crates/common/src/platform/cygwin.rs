//! Cygwin/MSYS2 OpenSSH on Windows installs `sftp-server` under a Unix-style
//! prefix; `cygpath` maps it to a native path we can check.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, trace};

use super::Locate;

/// Translate `<unix_dir>/<name>` with `cygpath -w` and check the result.
#[derive(Debug)]
pub struct Cygpath {
    unix_dir: String,
}

impl Default for Cygpath {
    fn default() -> Self {
        Self::new("/usr/lib/ssh")
    }
}

impl Cygpath {
    pub fn new(unix_dir: impl Into<String>) -> Self {
        Self {
            unix_dir: unix_dir.into(),
        }
    }

    fn unix_path(&self, name: &str) -> String {
        format!("{}/{}", self.unix_dir.trim_end_matches('/'), name)
    }
}

impl Locate for Cygpath {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let unix_path = self.unix_path(name);
        let output = Command::new("cygpath")
            .arg("-w")
            .arg(&unix_path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| debug!(%e, "cygpath unavailable"))
            .ok()?;
        if !output.status.success() {
            return None;
        }
        // e.g. `C:\msys64\usr\lib\ssh\sftp-server.exe`
        let native = String::from_utf8_lossy(&output.stdout).trim().to_string();
        trace!(unix_path, native, "cygpath translation");
        if native.is_empty() {
            return None;
        }
        which::which(native).ok()
    }

    fn describe(&self) -> String {
        format!("cygpath ({})", self.unix_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_path_joins_once() {
        assert_eq!(Cygpath::default().unix_path("sftp-server"), "/usr/lib/ssh/sftp-server");
        assert_eq!(Cygpath::new("/opt/ssh/").unix_path("sftp-server"), "/opt/ssh/sftp-server");
    }
}
