//! Child process supervision for display servers and window managers

use std::io;
use std::process::{Child, ChildStdout, Command, ExitStatus};
use std::time::Duration;

use rustix::process::{kill_process, Pid, Signal};

use crate::poll::PollPolicy;

/// A spawned helper process that is always reaped
///
/// Dropping an unreaped process kills it outright; use
/// [`ChildProcess::terminate`] for a graceful stop.
pub(crate) struct ChildProcess {
    label: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    pub fn spawn(label: &str, command: &mut Command) -> io::Result<Self> {
        let child = command.spawn()?;
        tracing::debug!(label, pid = child.id(), "spawned process");
        Ok(Self {
            label: label.to_string(),
            child,
            status: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The piped stdout, if it was requested and not taken yet
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Exit status if the process has already exited
    pub fn try_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL
    pub fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.try_exit()? {
            return Ok(status);
        }

        if let Some(pid) = Pid::from_raw(self.child.id() as i32) {
            if let Err(e) = kill_process(pid, Signal::Term) {
                // ESRCH: exited between try_wait and kill
                tracing::debug!(label = %self.label, error = %e, "SIGTERM failed");
            }
        }

        let policy = PollPolicy::new(grace).with_intervals(Duration::from_millis(5), Duration::from_millis(100));
        if let Some(status) = policy.poll(|| self.child.try_wait())? {
            tracing::debug!(label = %self.label, ?status, "process exited after SIGTERM");
            self.status = Some(status);
            return Ok(status);
        }

        tracing::warn!(label = %self.label, ?grace, "process ignored SIGTERM, sending SIGKILL");
        self.child.kill()?;
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
