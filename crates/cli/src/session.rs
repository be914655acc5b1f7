//! One sshmount session: mounts, then the primary remote command, then
//! teardown in reverse.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use mount::{MountBackend, MountError, MountSpec, Mountable};
use ssh::{Target, TransportConfig, exit_control_master, exit_control_master_blocking};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};

/// Exit code reported when the remote command was killed by a signal.
pub const SIGNALED_EXIT_CODE: u8 = 255;

/// How the primary remote command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Exited(i32),
    Signaled,
}

impl SessionOutcome {
    /// The code this process should exit with.
    pub fn exit_code(self) -> u8 {
        match self {
            SessionOutcome::Exited(code) => u8::try_from(code).unwrap_or(u8::MAX),
            SessionOutcome::Signaled => SIGNALED_EXIT_CODE,
        }
    }
}

impl From<ExitStatus> for SessionOutcome {
    fn from(status: ExitStatus) -> Self {
        status
            .code()
            .map_or(SessionOutcome::Signaled, SessionOutcome::Exited)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything needed to run one command with its mounts and forwards.
#[derive(Debug, Clone)]
pub struct Session {
    target: Target,
    command: Vec<String>,
    mounts: Vec<MountSpec>,
    forwards: Vec<String>,
    transport: Option<Arc<TransportConfig>>,
}

impl Session {
    pub fn new(target: Target, command: Vec<String>) -> Self {
        Self {
            target,
            command,
            mounts: Vec::new(),
            forwards: Vec::new(),
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<TransportConfig>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<MountSpec>) -> Self {
        self.mounts = mounts;
        self
    }

    /// `ssh -L` forward specs for the primary connection.
    pub fn with_forwards(mut self, forwards: Vec<String>) -> Self {
        self.forwards = forwards;
        self
    }

    /// Command tokens with a single leading `--` removed.
    fn command_tokens(&self) -> &[String] {
        match self.command.split_first() {
            Some((first, rest)) if first == "--" => rest,
            _ => &self.command,
        }
    }

    /// `<base args> [-L fwd]... [-p port] host -- <command...>`
    pub fn primary_args(&self, transport: &TransportConfig) -> Vec<String> {
        let mut args = transport.base_args();
        for forward in &self.forwards {
            args.push("-L".to_string());
            args.push(forward.clone());
        }
        args.extend(self.target.args());
        args.push("--".to_string());
        args.extend(self.command_tokens().iter().cloned());
        args
    }

    /// Start every mount in order, run the primary command, and tear down.
    ///
    /// Teardown happens on every path out of here. A mount that fails to
    /// prepare or start aborts the session after the already started ones
    /// are closed.
    pub async fn run<B: MountBackend>(&self, backend: &B) -> Result<SessionOutcome> {
        let transport = self
            .transport
            .clone()
            .ok_or(SessionError::MissingTransport)?;

        let mut stack = MountStack::new(self.target.clone(), transport.clone());
        let result = self.run_with(backend, &transport, &mut stack).await;
        stack.shutdown().await;
        result
    }

    async fn run_with<B: MountBackend>(
        &self,
        backend: &B,
        transport: &TransportConfig,
        stack: &mut MountStack<B::Mount>,
    ) -> Result<SessionOutcome> {
        for spec in &self.mounts {
            let mut mount = backend.create(spec);
            mount
                .prepare()
                .await
                .map_err(|cause| mount_error("prepare", spec, cause))?;
            stack
                .push(mount)
                .start()
                .await
                .map_err(|cause| mount_error("start", spec, cause))?;
        }

        self.run_primary(transport).await
    }

    async fn run_primary(&self, transport: &TransportConfig) -> Result<SessionOutcome> {
        let program = transport.binary_name();
        let args = self.primary_args(transport);
        debug!(program, ?args, "executing the primary command");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // The terminal delivers ^C to the transport too; keep waiting so the
        // mounts are still torn down after it exits.
        let status = loop {
            let signal = tokio::select! {
                status = child.wait() => break status?,
                signal = tokio::signal::ctrl_c() => signal,
            };
            match signal {
                Ok(()) => debug!("interrupted, waiting for the remote command"),
                Err(e) => {
                    warn!(error = %e, "cannot listen for interrupts");
                    break child.wait().await?;
                }
            }
        };

        debug!(%status, host = %self.target, "primary command finished");
        Ok(status.into())
    }
}

fn mount_error(stage: &'static str, spec: &MountSpec, cause: MountError) -> SessionError {
    SessionError::Mount {
        stage,
        local: spec.source.clone(),
        destination: spec.destination.clone(),
        cause,
    }
}

// ---------------------------------------------------------------------------
// Teardown guard
// ---------------------------------------------------------------------------

/// Started mounts of a session, released in reverse start order.
///
/// Releasing also tells a persistent control master to exit, once, after
/// every mount is closed. `Drop` releases if neither [`MountStack::shutdown`]
/// nor [`MountStack::release`] was reached.
pub struct MountStack<M: Mountable> {
    mounts: Vec<M>,
    target: Target,
    transport: Arc<TransportConfig>,
    released: bool,
}

impl<M: Mountable> MountStack<M> {
    pub fn new(target: Target, transport: Arc<TransportConfig>) -> Self {
        Self {
            mounts: Vec::new(),
            target,
            transport,
            released: false,
        }
    }

    /// Take ownership of `mount` and hand it back for starting.
    pub fn push(&mut self, mount: M) -> &mut M {
        let index = self.mounts.len();
        self.mounts.push(mount);
        &mut self.mounts[index]
    }

    /// Close every mount, newest first, then exit the control master.
    /// Failures are logged. Only the first release of a stack does anything.
    pub async fn shutdown(&mut self) {
        if self.close_mounts() && self.transport.persist() {
            let result = exit_control_master(&self.target, &self.transport).await;
            self.log_control_exit(result);
        }
    }

    /// Blocking form of [`MountStack::shutdown`], for `Drop`.
    pub fn release(&mut self) {
        if self.close_mounts() && self.transport.persist() {
            let result = exit_control_master_blocking(&self.target, &self.transport);
            self.log_control_exit(result);
        }
    }

    /// Returns false if the stack was already released.
    fn close_mounts(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        while let Some(mut mount) = self.mounts.pop() {
            let destination = mount.spec().destination.clone();
            match mount.close() {
                Ok(()) => info!(%destination, "unmounted"),
                Err(e) => warn!(%destination, error = %e, "failed to unmount"),
            }
        }
        true
    }

    fn log_control_exit(&self, result: ssh::Result<()>) {
        if let Err(e) = result {
            error!(host = %self.target, error = %e, "failed to exit the control master");
        }
    }
}

impl<M: Mountable> Drop for MountStack<M> {
    fn drop(&mut self) {
        self.release();
    }
}
