use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use common::platform::{CurrentPlatform, Locate, Platform};
use tracing::{debug, warn};

use crate::error::{MountError, Result};

/// Executable name of the OpenSSH SFTP server.
pub const SERVER_BINARY: &str = "sftp-server";

/// How the local side of a mount answers SFTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverChoice {
    /// Prefer an OpenSSH `sftp-server`, fall back to the embedded server.
    #[default]
    Auto,
    /// Always use the in-process server.
    Embedded,
    /// Require an OpenSSH `sftp-server`.
    ExternalServer,
}

impl fmt::Display for DriverChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriverChoice::Auto => "auto",
            DriverChoice::Embedded => "builtin",
            DriverChoice::ExternalServer => "openssh-sftp-server",
        })
    }
}

impl FromStr for DriverChoice {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "auto" => Ok(DriverChoice::Auto),
            "builtin" => Ok(DriverChoice::Embedded),
            "openssh-sftp-server" => Ok(DriverChoice::ExternalServer),
            other => Err(MountError::DriverResolution(format!("unknown driver {other:?}"))),
        }
    }
}

/// The driver a mount actually runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDriver {
    Embedded,
    ExternalServer(PathBuf),
}

impl fmt::Display for ResolvedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDriver::Embedded => f.write_str("builtin"),
            ResolvedDriver::ExternalServer(path) => {
                write!(f, "openssh-sftp-server ({})", path.display())
            }
        }
    }
}

/// Picks a driver, searching for `sftp-server` with pluggable strategies.
pub struct DriverResolver {
    locators: Vec<Box<dyn Locate>>,
}

impl DriverResolver {
    pub fn new(locators: Vec<Box<dyn Locate>>) -> Self {
        Self { locators }
    }

    /// The search order of the platform this binary was built for.
    pub fn for_current_platform() -> Self {
        Self::new(CurrentPlatform::server_locators())
    }

    /// First `sftp-server` found by the locators, in order.
    pub fn locate_server(&self) -> Option<PathBuf> {
        self.locators.iter().find_map(|locator| {
            let found = locator.locate(SERVER_BINARY);
            debug!(
                locator = %locator.describe(),
                found = ?found,
                "searched for {SERVER_BINARY}"
            );
            found
        })
    }

    /// Resolve `choice` to a concrete driver.
    ///
    /// An explicit binary is looked up first and must exist whatever the
    /// choice. Only `ExternalServer` fails when no server can be found;
    /// `Auto` falls back to the embedded server.
    pub fn resolve(
        &self,
        choice: DriverChoice,
        explicit_binary: Option<&Path>,
    ) -> Result<ResolvedDriver> {
        if let Some(explicit) = explicit_binary {
            let exe = which::which(explicit).map_err(|e| {
                MountError::DriverResolution(format!("{}: {e}", explicit.display()))
            })?;
            if choice == DriverChoice::Embedded {
                warn!(binary = %exe.display(), "ignoring explicit sftp-server for the builtin driver");
                return Ok(ResolvedDriver::Embedded);
            }
            return Ok(ResolvedDriver::ExternalServer(exe));
        }

        match choice {
            DriverChoice::Embedded => Ok(ResolvedDriver::Embedded),
            DriverChoice::ExternalServer => self
                .locate_server()
                .map(ResolvedDriver::ExternalServer)
                .ok_or_else(|| {
                    MountError::DriverResolution(format!("no OpenSSH {SERVER_BINARY} found"))
                }),
            DriverChoice::Auto => Ok(self
                .locate_server()
                .map_or(ResolvedDriver::Embedded, ResolvedDriver::ExternalServer)),
        }
    }
}
