//! Stand-in remote host for driving mounts end to end without a network.
//!
//! The fake `ssh` runs the remote command locally through `/bin/sh -c` with a
//! private `bin/` first on `PATH`, holding fake `sshfs`, `mount` and `sleep`.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mount::{DriverChoice, MountSpec, ReverseMount};
use ssh::{Target, TransportConfig};

/// `INIT` as sent by the fake sshfs: length 5, type 1, version 3.
pub const INIT_PACKET: [u8; 9] = [0, 0, 0, 5, 1, 0, 0, 0, 3];

/// The server's `VERSION` reply: length 5, type 2, version 3.
pub const VERSION_PACKET: [u8; 9] = [0, 0, 0, 5, 2, 0, 0, 0, 3];

pub struct FakeRemote {
    pub dir: tempfile::TempDir,
}

impl FakeRemote {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let fake = Self { dir };
        std::fs::create_dir_all(fake.bin_dir()).unwrap();

        write_executable(
            &fake.path("ssh"),
            &format!(
                r#"#!/bin/sh
printf '%s\n' "$*" >> '{log}'
while [ $# -gt 0 ]; do
  case "$1" in
    -O) exit 0 ;;
    --) shift; break ;;
  esac
  shift
done
PATH='{bin}':"$PATH"; export PATH
exec /bin/sh -c "$*"
"#,
                log = fake.path("ssh.log").display(),
                bin = fake.bin_dir().display(),
            ),
        );

        write_executable(
            &fake.bin_dir().join("mount"),
            &format!(
                "#!/bin/sh\necho check >> '{calls}'\ncat '{mtab}' 2>/dev/null || true\n",
                calls = fake.path("mount.calls").display(),
                mtab = fake.path("mtab").display(),
            ),
        );

        write_executable(
            &fake.bin_dir().join("sleep"),
            "#!/bin/sh\nfor s in /bin/sleep /usr/bin/sleep; do\n  if [ -x \"$s\" ]; then exec \"$s\" 0.05; fi\ndone\n",
        );

        // Speaks just enough SFTP to prove the channel is wired: send INIT,
        // capture the 9-byte reply, then record itself as mounted.
        write_executable(
            &fake.bin_dir().join("sshfs"),
            &format!(
                r#"#!/bin/sh
printf '%s\n' "$@" > '{args}'
printf '\000\000\000\005\001\000\000\000\003'
head -c 9 > '{reply}'
enc=$(printf '%s' "$2" | sed 's/ /\\040/g')
echo "sshfs on $enc type fuse.sshfs (rw,nosuid,nodev)" >> '{mtab}'
exec cat > /dev/null
"#,
                args = fake.path("sshfs.args").display(),
                reply = fake.path("sshfs.reply").display(),
                mtab = fake.path("mtab").display(),
            ),
        );

        // Local stand-in for OpenSSH sftp-server: records its arguments and
        // echoes the channel back.
        write_executable(
            &fake.sftp_server_path(),
            &format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{args}'\nexec cat\n",
                args = fake.path("server.args").display(),
            ),
        );

        fake
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.path("bin")
    }

    pub fn sftp_server_path(&self) -> PathBuf {
        self.path("local-sftp-server")
    }

    pub fn transport(&self) -> Arc<TransportConfig> {
        Arc::new(TransportConfig::new().with_binary(self.path("ssh").to_string_lossy()))
    }

    pub fn target(&self) -> Target {
        Target::new("user@fake-host", Some(2222))
    }

    pub fn mount(&self, spec: MountSpec, driver: DriverChoice, binary: Option<PathBuf>) -> ReverseMount {
        ReverseMount::new(spec, self.target(), self.transport()).with_driver(driver, binary)
    }

    /// Pre-populate the remote mount table.
    pub fn set_mtab(&self, contents: &str) {
        std::fs::write(self.path("mtab"), contents).unwrap();
    }

    pub fn mount_checks(&self) -> usize {
        read_lines(&self.path("mount.calls")).len()
    }

    pub fn ssh_invocations(&self) -> Vec<String> {
        read_lines(&self.path("ssh.log"))
    }

    pub fn sshfs_args(&self) -> Vec<String> {
        read_lines(&self.path("sshfs.args"))
    }

    pub fn server_args(&self) -> Vec<String> {
        read_lines(&self.path("server.args"))
    }

    pub fn sshfs_reply(&self) -> Vec<u8> {
        std::fs::read(self.path("sshfs.reply")).unwrap_or_default()
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
