//! Homebrew's OpenSSH keeps `sftp-server` under a versioned Cellar prefix that
//! is not on `PATH`; only `sshd` is symlinked into `sbin`.

use std::path::PathBuf;

use tracing::trace;

use super::Locate;

/// `sbin/sshd` symlinks installed by Homebrew on Intel and Apple Silicon.
const SSHD_LINKS: &[&str] = &["/usr/local/sbin/sshd", "/opt/homebrew/sbin/sshd"];

/// Resolve `sshd` symlinks into the Cellar and look in the sibling `libexec`.
///
/// `/usr/local/sbin/sshd` -> `/usr/local/Cellar/openssh/9.6p1/sbin/sshd`, so
/// the server is expected at `/usr/local/Cellar/openssh/9.6p1/libexec/<name>`.
#[derive(Debug)]
pub struct BrewCellar {
    sshd_links: Vec<PathBuf>,
}

impl Default for BrewCellar {
    fn default() -> Self {
        Self::new(SSHD_LINKS.iter().map(PathBuf::from).collect())
    }
}

impl BrewCellar {
    pub fn new(sshd_links: Vec<PathBuf>) -> Self {
        Self { sshd_links }
    }
}

impl Locate for BrewCellar {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.sshd_links.iter().find_map(|link| {
            let sshd = std::fs::canonicalize(link).ok()?;
            let prefix = sshd.parent()?.parent()?;
            let candidate = prefix.join("libexec").join(name);
            trace!(link = %link.display(), candidate = %candidate.display(), "homebrew lookup");
            which::which(&candidate).ok()
        })
    }

    fn describe(&self) -> String {
        "homebrew cellar".to_string()
    }
}
