use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use common::process::{Terminate, terminate_all};
use sftp::SftpServer;
use ssh::{Target, TransportConfig, shell_quote};
use tokio::io::AsyncWrite;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::{DriverChoice, DriverResolver, ResolvedDriver};
use crate::duplex::Duplex;
use crate::error::{MountError, Result};
use crate::readiness::{DEFAULT_MAX_TRIALS, Readiness, ReadinessProbe};
use crate::spec::MountSpec;
use crate::{MountBackend, Mountable};

/// How long a cancelled mount task may take to stop on its own.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle of a [`ReverseMount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Uninitialized,
    Prepared,
    Started,
    Closed,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountState::Uninitialized => "uninitialized",
            MountState::Prepared => "prepared",
            MountState::Started => "started",
            MountState::Closed => "closed",
        })
    }
}

// ---------------------------------------------------------------------------
// Owned child processes
// ---------------------------------------------------------------------------

/// A spawned child that is killed, not waited for, on close.
struct ManagedChild {
    label: String,
    child: Child,
}

impl ManagedChild {
    fn new(role: &str, child: Child) -> Self {
        let label = match child.id() {
            Some(pid) => format!("{role} (pid {pid})"),
            None => role.to_string(),
        };
        Self { label, child }
    }
}

impl Terminate for ManagedChild {
    fn label(&self) -> &str {
        &self.label
    }

    fn terminate(&mut self) -> io::Result<()> {
        // A reaped child cannot be signalled; it is already gone.
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.start_kill()
    }
}

// ---------------------------------------------------------------------------
// ReverseMount
// ---------------------------------------------------------------------------

/// Exposes one local directory on the remote host through `sshfs -o slave`.
///
/// Owns the transport child, the optional `sftp-server` child, and the task
/// that serves or pumps the SFTP channel. Everything is stopped by
/// [`Mountable::close`] or, failing that, on drop.
pub struct ReverseMount {
    spec: MountSpec,
    target: Target,
    transport: Arc<TransportConfig>,
    driver: DriverChoice,
    driver_binary: Option<PathBuf>,
    resolver: Arc<DriverResolver>,
    max_trials: u32,
    state: MountState,
    children: Vec<Box<dyn Terminate + Send>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ReverseMount {
    pub fn new(spec: MountSpec, target: Target, transport: Arc<TransportConfig>) -> Self {
        Self {
            spec,
            target,
            transport,
            driver: DriverChoice::Auto,
            driver_binary: None,
            resolver: Arc::new(DriverResolver::for_current_platform()),
            max_trials: DEFAULT_MAX_TRIALS,
            state: MountState::Uninitialized,
            children: Vec::new(),
            task: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_driver(mut self, driver: DriverChoice, binary: Option<PathBuf>) -> Self {
        self.driver = driver;
        self.driver_binary = binary;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<DriverResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_max_trials(mut self, max_trials: u32) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    fn expect_state(&self, expected: MountState) -> Result<()> {
        if self.state != expected {
            return Err(MountError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// `sshfs ':<src>' '<dest>' -o slave [-o ro] [extra...]`, quoted for the
    /// remote shell.
    fn sshfs_command(&self) -> Vec<String> {
        let source = format!(":{}", self.spec.source.to_string_lossy());
        let mut cmd = vec![
            "sshfs".to_string(),
            shell_quote(&source),
            shell_quote(&self.spec.destination),
            "-o".to_string(),
            "slave".to_string(),
        ];
        if self.spec.readonly {
            cmd.push("-o".to_string());
            cmd.push("ro".to_string());
        }
        cmd.extend(self.spec.extra_server_args.iter().cloned());
        cmd
    }

    /// `-e -d <src> [-R]`. `sftp-server` expands `%` in `-d`, so it is doubled.
    fn external_server_args(&self) -> Vec<String> {
        let mut args = vec![
            "-e".to_string(),
            "-d".to_string(),
            self.spec.source.to_string_lossy().replace('%', "%%"),
        ];
        if self.spec.readonly {
            args.push("-R".to_string());
        }
        args
    }

    fn spawn_piped(program: &str, args: &[String]) -> Result<(Child, ChildStdout, ChildStdin)> {
        let spawn_err = |source| MountError::Spawn {
            program: program.to_string(),
            source,
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        match (child.stdout.take(), child.stdin.take()) {
            (Some(stdout), Some(stdin)) => Ok((child, stdout, stdin)),
            _ => {
                let _ = child.start_kill();
                Err(spawn_err(io::Error::other("child stdio was not captured")))
            }
        }
    }

    fn start_embedded(&mut self, transport: Child, stdout: ChildStdout, stdin: ChildStdin) {
        self.children
            .push(Box::new(ManagedChild::new("transport", transport)));

        let server = SftpServer::new(&self.spec.source, self.spec.readonly);
        let cancel = self.cancel.clone();
        let source = self.spec.source.display().to_string();
        self.task = Some(tokio::spawn(async move {
            match server.serve(Duplex::new(stdout, stdin), cancel).await {
                Ok(()) => debug!(source, "embedded sftp server finished"),
                Err(e) => error!(source, error = %e, "embedded sftp server exited"),
            }
        }));
    }

    fn start_external(
        &mut self,
        server_path: PathBuf,
        mut transport: Child,
        stdout: ChildStdout,
        stdin: ChildStdin,
    ) -> Result<()> {
        let program = server_path.to_string_lossy().into_owned();
        let args = self.external_server_args();
        debug!(program, ?args, "spawning sftp-server");

        let (server, server_stdout, server_stdin) = match Self::spawn_piped(&program, &args) {
            Ok(spawned) => spawned,
            Err(e) => {
                if let Err(kill_err) = transport.start_kill() {
                    warn!(error = %kill_err, "failed to kill the transport after sftp-server spawn failure");
                }
                return Err(e);
            }
        };
        self.children
            .push(Box::new(ManagedChild::new("transport", transport)));
        self.children
            .push(Box::new(ManagedChild::new("sftp-server", server)));

        let mut transport_io = Duplex::new(stdout, stdin);
        let mut server_io = Duplex::new(server_stdout, server_stdin);
        let cancel = self.cancel.clone();
        let source = self.spec.source.display().to_string();
        self.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!(source, "sftp pump cancelled"),
                res = tokio::io::copy_bidirectional(&mut transport_io, &mut server_io) => match res {
                    Ok((to_server, to_transport)) => {
                        debug!(source, to_server, to_transport, "sftp pump finished");
                    }
                    Err(e) => debug!(source, error = %e, "sftp pump stopped"),
                },
            }
            close_channels(&source, transport_io, server_io).await;
        }));
        Ok(())
    }
}

impl Mountable for ReverseMount {
    fn spec(&self) -> &MountSpec {
        &self.spec
    }

    async fn prepare(&mut self) -> Result<()> {
        self.expect_state(MountState::Uninitialized)?;
        self.spec.validate()?;

        let dest = shell_quote(&self.spec.destination);
        let args = self
            .transport
            .remote_command_args(&self.target, &["mkdir", "-p", dest.as_str()]);
        let program = self.transport.binary_name();
        debug!(program, ?args, "preparing remote mount point");

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MountError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(MountError::RemotePreparation {
                path: self.spec.destination.clone(),
                output: combined,
            });
        }

        self.state = MountState::Prepared;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.expect_state(MountState::Prepared)?;
        self.spec.validate()?;

        let driver = self
            .resolver
            .resolve(self.driver, self.driver_binary.as_deref())?;
        debug!(%driver, source = %self.spec.source.display(), "chosen sftp driver");

        let remote = self.sshfs_command();
        let args = self.transport.remote_command_args(&self.target, &remote);
        let program = self.transport.binary_name().to_string();
        debug!(program, ?args, "executing remote sshfs");
        let (transport, stdout, stdin) = Self::spawn_piped(&program, &args)?;

        match driver {
            ResolvedDriver::Embedded => self.start_embedded(transport, stdout, stdin),
            ResolvedDriver::ExternalServer(path) => {
                self.start_external(path, transport, stdout, stdin)?
            }
        }
        self.state = MountState::Started;

        let probe = ReadinessProbe::new(&self.transport, &self.target)
            .with_max_trials(self.max_trials);
        match probe.probe(&self.spec.destination).await {
            Readiness::Confirmed => info!(
                source = %self.spec.source.display(),
                destination = %self.spec.destination,
                host = %self.target,
                "mounted"
            ),
            Readiness::Unconfirmed(reason) => warn!(
                destination = %self.spec.destination,
                %reason,
                "failed to confirm whether the remote directory is mounted"
            ),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == MountState::Closed {
            return Ok(());
        }
        debug!(
            destination = %self.spec.destination,
            children = self.children.len(),
            "closing mount"
        );

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            abort_after_grace(task);
        }
        let result = terminate_all(self.children.iter_mut().map(|child| child.as_mut()));
        self.children.clear();
        self.state = MountState::Closed;
        result.map_err(MountError::from)
    }
}

/// Close both ends of an sftp pump, logging every failure.
async fn close_channels<A, B, C, D>(source: &str, transport_io: Duplex<A, B>, server_io: Duplex<C, D>)
where
    B: AsyncWrite + Unpin,
    D: AsyncWrite + Unpin,
{
    let (transport, server) = tokio::join!(transport_io.close(), server_io.close());
    let failures: Vec<String> = [("transport", transport), ("sftp-server", server)]
        .into_iter()
        .filter_map(|(side, res)| res.err().map(|e| format!("{side}: {e}")))
        .collect();
    if !failures.is_empty() {
        debug!(source, failures = %failures.join("; "), "failed to close sftp channels");
    }
}

/// Give a cancelled task [`CLOSE_GRACE`] to wind down before aborting it.
///
/// Outside a runtime there is nothing to wait on, so the task is aborted
/// straight away.
fn abort_after_grace(mut task: JoinHandle<()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                    debug!("mount task ignored cancellation, aborting");
                    task.abort();
                }
            });
        }
        Err(_) => task.abort(),
    }
}

impl Drop for ReverseMount {
    fn drop(&mut self) {
        if self.state == MountState::Started {
            if let Err(e) = self.close() {
                warn!(destination = %self.spec.destination, error = %e, "failed to close mount on drop");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Creates [`ReverseMount`]s that share one transport and driver setting.
pub struct ReverseMountBackend {
    target: Target,
    transport: Arc<TransportConfig>,
    driver: DriverChoice,
    driver_binary: Option<PathBuf>,
    resolver: Arc<DriverResolver>,
}

impl ReverseMountBackend {
    pub fn new(target: Target, transport: Arc<TransportConfig>) -> Self {
        Self {
            target,
            transport,
            driver: DriverChoice::Auto,
            driver_binary: None,
            resolver: Arc::new(DriverResolver::for_current_platform()),
        }
    }

    pub fn with_driver(mut self, driver: DriverChoice, binary: Option<PathBuf>) -> Self {
        self.driver = driver;
        self.driver_binary = binary;
        self
    }
}

impl MountBackend for ReverseMountBackend {
    type Mount = ReverseMount;

    fn create(&self, spec: &MountSpec) -> ReverseMount {
        ReverseMount::new(spec.clone(), self.target.clone(), self.transport.clone())
            .with_driver(self.driver, self.driver_binary.clone())
            .with_resolver(self.resolver.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeChild {
        label: &'static str,
        fail: bool,
        kills: Arc<AtomicUsize>,
    }

    impl Terminate for FakeChild {
        fn label(&self) -> &str {
            self.label
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted"))
            } else {
                Ok(())
            }
        }
    }

    fn mount(spec: MountSpec) -> ReverseMount {
        ReverseMount::new(spec, Target::new("host", None), Arc::new(TransportConfig::new()))
    }

    fn started_with(children: Vec<FakeChild>) -> ReverseMount {
        let mut m = mount(MountSpec::new("/src", "/dst"));
        m.children = children
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Terminate + Send>)
            .collect();
        m.state = MountState::Started;
        m
    }

    #[test]
    fn sshfs_command_layout() {
        let spec = MountSpec::new("/home/u/my src", "/mnt/dst")
            .with_readonly(true)
            .with_extra_server_args(vec!["-o".into(), "nonempty".into()]);
        assert_eq!(
            mount(spec).sshfs_command(),
            [
                "sshfs",
                "':/home/u/my src'",
                "'/mnt/dst'",
                "-o",
                "slave",
                "-o",
                "ro",
                "-o",
                "nonempty"
            ]
        );
    }

    #[test]
    fn sshfs_command_read_write() {
        let cmd = mount(MountSpec::new("/a", "/b")).sshfs_command();
        assert_eq!(cmd, ["sshfs", "':/a'", "'/b'", "-o", "slave"]);
    }

    #[test]
    fn external_server_args_escape_percent() {
        let m = mount(MountSpec::new("/data/100%", "/b"));
        assert_eq!(m.external_server_args(), ["-e", "-d", "/data/100%%"]);

        let m = mount(MountSpec::new("/data", "/b").with_readonly(true));
        assert_eq!(m.external_server_args(), ["-e", "-d", "/data", "-R"]);
    }

    #[test]
    fn close_attempts_every_child_and_reports_failures() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut m = started_with(vec![
            FakeChild { label: "transport", fail: true, kills: first.clone() },
            FakeChild { label: "sftp-server", fail: false, kills: second.clone() },
        ]);

        let err = m.close().unwrap_err();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        let msg = err.to_string();
        assert!(msg.contains("transport: operation not permitted"), "{msg}");
        assert!(!msg.contains("sftp-server"), "{msg}");
        assert_eq!(m.state(), MountState::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let kills = Arc::new(AtomicUsize::new(0));
        let mut m = started_with(vec![FakeChild {
            label: "transport",
            fail: false,
            kills: kills.clone(),
        }]);
        m.close().unwrap();
        m.close().unwrap();
        assert_eq!(kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_a_started_mount() {
        let kills = Arc::new(AtomicUsize::new(0));
        let m = started_with(vec![FakeChild {
            label: "transport",
            fail: false,
            kills: kills.clone(),
        }]);
        drop(m);
        assert_eq!(kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_cancels_the_token() {
        let mut m = started_with(Vec::new());
        let token = m.cancel.clone();
        m.close().unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn close_lets_the_task_observe_cancellation() {
        let mut m = started_with(Vec::new());
        let token = m.cancel.clone();
        let finished = Arc::new(AtomicUsize::new(0));
        let seen = finished.clone();
        m.task = Some(tokio::spawn(async move {
            token.cancelled().await;
            tokio::task::yield_now().await;
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        m.close().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_aborts_a_task_that_ignores_cancellation() {
        let mut m = started_with(Vec::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        m.task = Some(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));

        m.close().unwrap();
        let dropped = tokio::time::timeout(CLOSE_GRACE * 4, rx).await;
        assert!(matches!(dropped, Ok(Err(_))), "task was not aborted");
    }

    /// Whether `pid` is still alive. Zombies count as gone.
    #[cfg(unix)]
    async fn is_running(pid: u32) -> bool {
        let output = Command::new("ps")
            .args(["-o", "stat=", "-p", &pid.to_string()])
            .output()
            .await
            .unwrap();
        let stat = String::from_utf8_lossy(&output.stdout);
        output.status.success() && !stat.trim().is_empty() && !stat.trim().starts_with('Z')
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transport_is_killed_when_the_server_cannot_spawn() {
        let mut transport = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let pid = transport.id().unwrap();
        let stdout = transport.stdout.take().unwrap();
        let stdin = transport.stdin.take().unwrap();

        let mut m = mount(MountSpec::new("/src", "/dst"));
        let err = m
            .start_external(PathBuf::from("/nonexistent/sftp-server"), transport, stdout, stdin)
            .unwrap_err();
        assert!(matches!(err, MountError::Spawn { .. }), "{err}");
        assert!(m.children.is_empty());
        assert!(m.task.is_none());

        let mut alive = true;
        for _ in 0..40 {
            alive = is_running(pid).await;
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "transport {pid} outlived the failed sftp-server spawn");
    }

    #[tokio::test]
    async fn start_requires_prepare() {
        let mut m = mount(MountSpec::new("/src", "/dst"));
        let err = m.start().await.unwrap_err();
        assert!(matches!(
            err,
            MountError::InvalidState {
                expected: MountState::Prepared,
                actual: MountState::Uninitialized
            }
        ));
    }

    #[tokio::test]
    async fn relative_paths_are_rejected_before_spawning() {
        let transport = Arc::new(TransportConfig::new().with_binary("/nonexistent/ssh"));
        let mut m = ReverseMount::new(MountSpec::new("/src", "relative"), Target::new("h", None), transport);
        let err = m.prepare().await.unwrap_err();
        assert!(matches!(err, MountError::InvalidPath(p) if p == "relative"));
        assert_eq!(m.state(), MountState::Uninitialized);
    }
}
