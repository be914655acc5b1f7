//! Platform abstraction for OS-specific behavior.
//!
//! Defines the [`Platform`] trait which unifies the OS-specific concerns behind a
//! single compile-time boundary, and the [`Locate`] capability used to discover
//! helper binaries. Each platform implements [`Platform`] once; callers consume it
//! through the [`CurrentPlatform`] type alias so their own logic stays free of
//! `cfg` conditionals.

use std::path::PathBuf;

mod locate;
pub mod cygwin;
pub mod homebrew;

pub use cygwin::Cygpath;
pub use homebrew::BrewCellar;
pub use locate::{KnownDirs, SearchPath};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A strategy for finding an executable by name.
pub trait Locate: Send + Sync {
    /// Return the absolute path of an executable called `name`, if this strategy
    /// can find one.
    fn locate(&self, name: &str) -> Option<PathBuf>;

    /// Short description used in debug logs.
    fn describe(&self) -> String;
}

/// The unified platform abstraction.
pub trait Platform: Send + Sync + 'static {
    /// Strategies for finding an OpenSSH `sftp-server` binary, in priority order.
    fn server_locators() -> Vec<Box<dyn Locate>>;

    /// User's home directory.
    fn home_dir() -> Option<PathBuf> {
        dirs::home_dir()
    }
}

/// Distribution-specific directories that have historically held `sftp-server`.
pub const KNOWN_SERVER_DIRS: &[&str] = &[
    "/usr/libexec",         // macOS, OpenWrt
    "/usr/libexec/openssh", // Fedora
    "/usr/lib",             // Debian (symlink to openssh/sftp-server)
    "/usr/lib/openssh",     // Debian
    "/usr/lib/ssh",         // Alpine
];

fn known_dirs() -> Box<dyn Locate> {
    Box::new(KnownDirs::new(
        KNOWN_SERVER_DIRS.iter().map(PathBuf::from).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Platform implementations
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
pub struct Linux;

#[cfg(target_os = "linux")]
impl Platform for Linux {
    fn server_locators() -> Vec<Box<dyn Locate>> {
        vec![Box::new(SearchPath::new()), known_dirs()]
    }
}

#[cfg(target_os = "macos")]
pub struct MacOs;

#[cfg(target_os = "macos")]
impl Platform for MacOs {
    fn server_locators() -> Vec<Box<dyn Locate>> {
        vec![
            Box::new(SearchPath::new()),
            Box::new(BrewCellar::default()),
            known_dirs(),
        ]
    }
}

#[cfg(target_os = "windows")]
pub struct Windows;

#[cfg(target_os = "windows")]
impl Platform for Windows {
    fn server_locators() -> Vec<Box<dyn Locate>> {
        vec![
            Box::new(SearchPath::new()),
            Box::new(Cygpath::default()),
            known_dirs(),
        ]
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub struct Stub;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl Platform for Stub {
    fn server_locators() -> Vec<Box<dyn Locate>> {
        vec![Box::new(SearchPath::new()), known_dirs()]
    }
}

// ---------------------------------------------------------------------------
// Compile-time type alias
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
pub type CurrentPlatform = Linux;

#[cfg(target_os = "macos")]
pub type CurrentPlatform = MacOs;

#[cfg(target_os = "windows")]
pub type CurrentPlatform = Windows;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub type CurrentPlatform = Stub;
