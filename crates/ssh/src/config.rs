use std::path::PathBuf;

/// The transport executable invoked for every remote operation.
pub const DEFAULT_BINARY: &str = "ssh";

/// Prefix of the per-process control socket under `~/.ssh/`.
const CONTROL_PATH_PREFIX: &str = "~/.ssh/sshmount-%r@%h:%p";

/// Options shared by every `ssh` invocation of one session.
///
/// Immutable once built; wrap in an `Arc` to share it between the primary
/// command and every mount.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    binary: String,
    config_file: Option<PathBuf>,
    persist: bool,
    extra_args: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            config_file: None,
            persist: false,
            extra_args: Vec::new(),
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an alternate transport executable instead of `ssh`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Pass `-F <path>` to every invocation.
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Multiplex every invocation over one persistent control master.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Arguments appended verbatim after the built-in options.
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn binary_name(&self) -> &str {
        &self.binary
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    /// Options that precede the destination in every invocation.
    ///
    /// The control path embeds this process's PID so that concurrent sessions
    /// never share a master socket.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config_file) = &self.config_file {
            args.push("-F".to_string());
            args.push(config_file.to_string_lossy().into_owned());
        }
        if self.persist {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={CONTROL_PATH_PREFIX}-{}", std::process::id()),
                "-o".to_string(),
                "ControlPersist=yes".to_string(),
            ]);
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Full argument vector for running `remote` on `target`:
    /// `<base args> [-p port] host -- <remote...>`.
    pub fn remote_command_args<S: AsRef<str>>(&self, target: &Target, remote: &[S]) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(target.args());
        args.push("--".to_string());
        args.extend(remote.iter().map(|s| s.as_ref().to_string()));
        args
    }
}

/// The remote endpoint: `[user@]host` plus an optional non-default port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: Option<u16>,
}

impl Target {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `-p <port>` (when set and non-zero) followed by the host.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(3);
        if let Some(port) = self.port.filter(|p| *p != 0) {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.host.clone());
        args
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) if port != 0 => write!(f, "{}:{}", self.host, port),
            _ => write!(f, "{}", self.host),
        }
    }
}

/// Quote one argument for the remote POSIX shell.
///
/// `ssh` joins the remote command words with spaces and hands the result to
/// the login shell, so anything that may contain spaces or metacharacters has
/// to be quoted on our side.
pub fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}
