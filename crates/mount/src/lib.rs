//! Reverse sshfs mounts: expose a local directory on the remote host.
//!
//! A mount runs `sshfs -o slave` remotely over the transport and answers its
//! SFTP requests locally, either from the embedded server or from an OpenSSH
//! `sftp-server` child. The session drives mounts through [`Mountable`] and
//! creates them through a [`MountBackend`].

use std::future::Future;

pub mod driver;
pub mod duplex;
pub mod error;
pub mod readiness;
pub mod reverse;
pub mod spec;

pub use driver::{DriverChoice, DriverResolver, ResolvedDriver};
pub use duplex::Duplex;
pub use error::{MountError, Result};
pub use readiness::{Readiness, ReadinessProbe};
pub use reverse::{MountState, ReverseMount, ReverseMountBackend};
pub use spec::{MountSpec, MountType};

/// One mount's lifecycle as seen by the session.
pub trait Mountable: Send {
    fn spec(&self) -> &MountSpec;

    /// Validate and create the remote mount point.
    fn prepare(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Spawn the processes and wait (bounded) for the mount to appear.
    fn start(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Stop everything owned by the mount. Must be idempotent and must not
    /// block on process exit.
    fn close(&mut self) -> Result<()>;
}

/// Creates mounts for the session from parsed specs.
pub trait MountBackend {
    type Mount: Mountable;

    fn create(&self, spec: &MountSpec) -> Self::Mount;
}
