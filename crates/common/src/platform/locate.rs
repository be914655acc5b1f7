use std::ffi::OsString;
use std::path::PathBuf;

use tracing::trace;

use super::Locate;

/// Look the name up on the executable search path.
///
/// Uses the process `PATH` unless constructed with [`SearchPath::within`].
#[derive(Debug, Default)]
pub struct SearchPath {
    paths: Option<OsString>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search only the given `PATH`-style list instead of the process `PATH`.
    pub fn within(paths: impl Into<OsString>) -> Self {
        Self {
            paths: Some(paths.into()),
        }
    }
}

impl Locate for SearchPath {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let found = match &self.paths {
            None => which::which(name),
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(name, Some(paths), cwd)
            }
        };
        trace!(name, ?found, "search path lookup");
        found.ok()
    }

    fn describe(&self) -> String {
        match &self.paths {
            None => "search path ($PATH)".to_string(),
            Some(paths) => format!("search path ({})", paths.to_string_lossy()),
        }
    }
}

/// Probe a fixed list of directories for an executable called `name`.
#[derive(Debug)]
pub struct KnownDirs {
    dirs: Vec<PathBuf>,
}

impl KnownDirs {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

impl Locate for KnownDirs {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find_map(|candidate| which::which(&candidate).ok())
    }

    fn describe(&self) -> String {
        format!("known directories ({} entries)", self.dirs.len())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn canonical(path: Option<PathBuf>) -> Option<PathBuf> {
        path.map(|p| p.canonicalize().unwrap())
    }

    fn write_executable(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn search_path_within_finds_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_executable(dir.path(), "sftp-server");

        let locator = SearchPath::within(dir.path().as_os_str());
        assert_eq!(canonical(locator.locate("sftp-server")), canonical(Some(exe)));
    }

    #[test]
    fn search_path_within_empty_dir_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let locator = SearchPath::within(dir.path().as_os_str());
        assert_eq!(locator.locate("sftp-server"), None);
    }

    #[test]
    fn known_dirs_skips_missing_and_non_executable() {
        let missing = tempfile::tempdir().unwrap();
        let plain = tempfile::tempdir().unwrap();
        std::fs::write(plain.path().join("sftp-server"), "not executable").unwrap();
        let good = tempfile::tempdir().unwrap();
        let exe = write_executable(good.path(), "sftp-server");

        let locator = KnownDirs::new(vec![
            missing.path().join("nope"),
            plain.path().to_path_buf(),
            good.path().to_path_buf(),
        ]);
        assert_eq!(canonical(locator.locate("sftp-server")), canonical(Some(exe)));
    }

    #[test]
    fn known_dirs_first_hit_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let exe = write_executable(first.path(), "sftp-server");
        write_executable(second.path(), "sftp-server");

        let locator = KnownDirs::new(vec![first.path().into(), second.path().into()]);
        assert_eq!(canonical(locator.locate("sftp-server")), canonical(Some(exe)));
    }
}
