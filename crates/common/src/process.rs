use std::fmt;
use std::io;

use tracing::debug;

use crate::{Error, Result};

/// A process (or process-like resource) that can be forcibly stopped.
pub trait Terminate {
    /// Short human-readable name used in logs and aggregated errors.
    fn label(&self) -> &str;

    /// Request termination. Must not block waiting for the process to exit.
    fn terminate(&mut self) -> io::Result<()>;
}

/// One failed termination attempt.
#[derive(Debug)]
pub struct TerminateFailure {
    pub label: String,
    pub source: io::Error,
}

impl fmt::Display for TerminateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.source)
    }
}

/// Terminate every process in order, continuing past failures.
///
/// Returns `Ok(())` only when every attempt succeeded. Otherwise all failures
/// are reported together in [`Error::Terminate`].
pub fn terminate_all<'a, T, I>(procs: I) -> Result<()>
where
    T: Terminate + ?Sized + 'a,
    I: IntoIterator<Item = &'a mut T>,
{
    let mut failures = Vec::new();
    for proc in procs {
        match proc.terminate() {
            Ok(()) => debug!(process = proc.label(), "terminated"),
            Err(source) => failures.push(TerminateFailure {
                label: proc.label().to_string(),
                source,
            }),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Terminate(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        label: &'static str,
        fail: bool,
        calls: usize,
    }

    impl Terminate for Fake {
        fn label(&self) -> &str {
            self.label
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.calls += 1;
            if self.fail {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn all_succeed() {
        let mut a = Fake { label: "a", fail: false, calls: 0 };
        let mut b = Fake { label: "b", fail: false, calls: 0 };
        let procs: [&mut dyn Terminate; 2] = [&mut a, &mut b];
        assert!(terminate_all(procs).is_ok());
        assert_eq!((a.calls, b.calls), (1, 1));
    }

    #[test]
    fn first_failure_does_not_stop_second() {
        let mut a = Fake { label: "transport", fail: true, calls: 0 };
        let mut b = Fake { label: "sftp-server", fail: false, calls: 0 };
        let procs: [&mut dyn Terminate; 2] = [&mut a, &mut b];

        let err = terminate_all(procs).unwrap_err();
        match err {
            Error::Terminate(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].label, "transport");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(b.calls, 1, "second process must still be terminated");
    }

    #[test]
    fn every_failure_is_reported() {
        let mut a = Fake { label: "a", fail: true, calls: 0 };
        let mut b = Fake { label: "b", fail: true, calls: 0 };
        let procs: [&mut dyn Terminate; 2] = [&mut a, &mut b];

        let msg = terminate_all(procs).unwrap_err().to_string();
        assert!(msg.contains("2 process(es)"), "{msg}");
        assert!(msg.contains("a: denied"), "{msg}");
        assert!(msg.contains("b: denied"), "{msg}");
    }

    #[test]
    fn empty_is_ok() {
        let procs: Vec<&mut Fake> = Vec::new();
        assert!(terminate_all(procs).is_ok());
    }
}
