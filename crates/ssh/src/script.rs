use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{Target, TransportConfig};
use crate::error::{Result, SshError};

/// Longest first line accepted when looking for the `#!` interpreter.
const MAX_SHEBANG_LEN: usize = 4096;

/// Captured output of a successful remote script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Extract the interpreter from a script's `#!` line, without the marker.
///
/// `name` only decorates error messages.
pub fn parse_script_interpreter(script: &str, name: &str) -> Result<String> {
    let fail = |reason: &str| SshError::InterpreterDetection {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if script.is_empty() {
        return Err(fail("the script is empty"));
    }
    let first_line = match script.find('\n') {
        Some(pos) => &script[..pos],
        None => script,
    };
    let first_line = first_line.strip_suffix('\r').unwrap_or(first_line);
    if first_line.len() > MAX_SHEBANG_LEN {
        return Err(fail("cannot read the first line"));
    }
    let Some(interpreter) = first_line.strip_prefix("#!") else {
        return Err(fail("the first line lacks `#!`"));
    };
    if interpreter.is_empty() {
        return Err(fail("empty interpreter"));
    }
    Ok(interpreter.to_string())
}

/// Runs short scripts on the remote host by piping them to their interpreter.
pub struct ScriptRunner<'a> {
    transport: &'a TransportConfig,
    target: &'a Target,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(transport: &'a TransportConfig, target: &'a Target) -> Self {
        Self { transport, target }
    }

    /// Execute `script` remotely and return its stdout and stderr.
    ///
    /// The interpreter named on the `#!` line becomes the remote command and
    /// the script body is streamed to its stdin.
    pub async fn execute(&self, script: &str, name: &str) -> Result<ScriptOutput> {
        let interpreter = parse_script_interpreter(script, name)?;
        let args = self
            .transport
            .remote_command_args(self.target, &[interpreter.as_str()]);

        debug!(
            script = name,
            binary = self.transport.binary_name(),
            ?args,
            "executing remote script"
        );

        let mut child = Command::new(self.transport.binary_name())
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SshError::Spawn {
                program: self.transport.binary_name().to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else { return };
            // An interpreter that exits early closes the pipe; its exit
            // status is what gets reported.
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                debug!(%e, "remote script stdin closed early");
            }
            let _ = stdin.shutdown().await;
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        debug!(
            script = name,
            status = %output.status,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "remote script completed"
        );

        if !output.status.success() {
            return Err(SshError::ScriptExecution {
                name: name.to_string(),
                status: output.status,
                stdout,
                stderr,
            });
        }
        Ok(ScriptOutput { stdout, stderr })
    }
}
