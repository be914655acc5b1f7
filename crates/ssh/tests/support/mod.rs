//! Stand-in transport for exercising real process spawning without a network.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use ssh::TransportConfig;

/// A temp directory holding a fake `ssh` that runs the remote command locally
/// through `/bin/sh -c`, the way a real login shell would.
pub struct FakeRemote {
    pub dir: tempfile::TempDir,
}

impl FakeRemote {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        let fake = Self { dir };
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$*" >> '{log}'
while [ $# -gt 0 ]; do
  case "$1" in
    -O) echo "Exit request sent." >&2; exit 0 ;;
    --) shift; break ;;
  esac
  shift
done
PATH='{bin}':"$PATH"; export PATH
exec /bin/sh -c "$*"
"#,
            log = fake.log_path().display(),
            bin = fake.bin_dir().display(),
        );
        write_executable(&fake.ssh_path(), &script);
        fake
    }

    pub fn ssh_path(&self) -> PathBuf {
        self.dir.path().join("ssh")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("ssh.log")
    }

    /// Every invocation's arguments, one line each.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig::new().with_binary(self.ssh_path().to_string_lossy())
    }
}

pub fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
