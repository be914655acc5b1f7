use ssh::{ScriptRunner, Target, TransportConfig, shell_quote};
use tracing::debug;

/// Remote checks before giving up on a mount.
pub const DEFAULT_MAX_TRIALS: u32 = 30;

const SCRIPT_NAME: &str = "wait-for-remote-ready";

/// Outcome of waiting for a mount to appear on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Confirmed,
    /// The mount was never observed. Carries the reason.
    Unconfirmed(String),
}

/// Polls the remote mount table until the sshfs mount shows up.
pub struct ReadinessProbe<'a> {
    transport: &'a TransportConfig,
    target: &'a Target,
    max_trials: u32,
}

impl<'a> ReadinessProbe<'a> {
    pub fn new(transport: &'a TransportConfig, target: &'a Target) -> Self {
        Self {
            transport,
            target,
            max_trials: DEFAULT_MAX_TRIALS,
        }
    }

    pub fn with_max_trials(mut self, max_trials: u32) -> Self {
        self.max_trials = max_trials.max(1);
        self
    }

    /// Wait for `dir` to be listed as an sshfs mount. Never fails; a mount
    /// that cannot be confirmed is reported as [`Readiness::Unconfirmed`].
    pub async fn probe(&self, dir: &str) -> Readiness {
        let script = readiness_script(dir, self.max_trials);
        debug!(dir, max_trials = self.max_trials, "waiting for remote mount");

        match ScriptRunner::new(self.transport, self.target)
            .execute(&script, SCRIPT_NAME)
            .await
        {
            Ok(output) => {
                debug!(dir, stdout = %output.stdout.trim_end(), "remote mount confirmed");
                Readiness::Confirmed
            }
            Err(e) => Readiness::Unconfirmed(e.to_string()),
        }
    }
}

/// POSIX shell script that checks the mount table exactly `max_trials`
/// times, one second apart. Only an sshfs mount on `dir` itself counts.
pub fn readiness_script(dir: &str, max_trials: u32) -> String {
    let dir = shell_quote(dir);
    format!(
        r#"#!/bin/sh
set -eu
dir={dir}
max_trials={max_trials}
LANG=C
LC_ALL=C
export LANG LC_ALL dir
i=1
while : ; do
  # spaces in the mount table are encoded as \040; the mount point must
  # match exactly and be followed by its filesystem type
  if mount | sed 's/\\040/ /g' | awk '
    index($0, " on " ENVIRON["dir"] " type fuse.sshfs ") ||
    index($0, " on " ENVIRON["dir"] " (osxfuse,") {{ found = 1 }}
    END {{ exit !found }}'; then
    echo '{{"return":{{}}}}'
    exit 0
  fi
  if [ "$i" -ge "$max_trials" ]; then
    echo >&2 "sshfs does not seem to be mounted on ${{dir}}"
    exit 1
  fi
  sleep 1
  i=$((i + 1))
done
"#
    )
}
