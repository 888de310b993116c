//! Helpers for running child processes with timeouts and bounded output.
//!
//! On unix every child leads its own process group and a timeout kills the
//! whole group, so grandchildren spawned by wrapper scripts do not outlive it.
//! The same deadline bounds output capture: a grandchild that keeps the pipes
//! open after the child exits is killed with the group once the timeout ends.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Time granted to output readers after the process group was killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type StreamOutput = (Vec<u8>, usize);

/// Exit information of a child whose stdio was inherited.
#[derive(Debug, Clone, Copy)]
pub struct InheritedOutcome {
    pub status: ExitStatus,
    pub timed_out: bool,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let started = Instant::now();
    let mut child = spawn_in_group(cmd)?;
    let pgid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    spawn_reader(Stream::Stdout, stdout, output_limit_bytes, tx.clone());
    spawn_reader(Stream::Stderr, stderr, output_limit_bytes, tx);

    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) =
        collect_output(&rx, pgid, started + timeout, timed_out)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run a command with a timeout, letting it write straight to this process's
/// stdout/stderr for live output.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_command_inherited(mut cmd: Command, timeout: Duration) -> Result<InheritedOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let mut child = spawn_in_group(cmd)?;
    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(InheritedOutcome { status, timed_out })
}

fn spawn_in_group(mut cmd: Command) -> Result<Child> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            Err(e).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()))
        }
    }
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                pid = child.id(),
                "command timed out, killing"
            );
            kill_group(child)?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
    }
}

fn kill_group(child: &mut Child) -> Result<()> {
    if let Err(err) = signal_group(child.id()) {
        warn!(error = %format!("{err:#}"), "group kill failed, killing child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(unix)]
fn signal_group(pgid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pgid).context("child pid out of range")?;
    killpg(Pid::from_raw(pgid), Signal::SIGKILL).map_err(|errno| anyhow!("killpg {pgid}: {errno}"))
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32) -> Result<()> {
    bail!("process groups are not supported on this platform")
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    reader: R,
    limit: usize,
    tx: Sender<(Stream, Result<StreamOutput>)>,
) {
    thread::spawn(move || {
        // The receiver is gone once capture was abandoned.
        let _ = tx.send((stream, read_stream_limited(reader, limit)));
    });
}

/// Wait for both readers until `deadline`, then kill the process group and
/// wait [`KILL_GRACE`] more. Streams still open after that come back empty.
fn collect_output(
    rx: &Receiver<(Stream, Result<StreamOutput>)>,
    pgid: u32,
    deadline: Instant,
    group_killed: bool,
) -> Result<(StreamOutput, StreamOutput)> {
    let mut stdout = None;
    let mut stderr = None;
    let mut killed = group_killed;
    let mut deadline = if killed {
        Instant::now() + KILL_GRACE
    } else {
        deadline
    };

    while stdout.is_none() || stderr.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, output)) => stdout = Some(output.context("read stdout")?),
            Ok((Stream::Stderr, output)) => stderr = Some(output.context("read stderr")?),
            Err(RecvTimeoutError::Timeout) if !killed => {
                warn!(pgid, "output still open at the deadline, killing process group");
                if let Err(err) = signal_group(pgid) {
                    warn!(error = %format!("{err:#}"), pgid, "group kill failed");
                }
                killed = true;
                deadline = Instant::now() + KILL_GRACE;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(pgid, "output readers did not finish, abandoning them");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
        }
    }

    Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<StreamOutput> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let output = run_command_with_timeout(
            sh("printf out; printf err >&2; exit 3"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(output.stdout_lossy(), "out");
        assert_eq!(output.stderr_lossy(), "err");
        assert_eq!(output.status.code(), Some(3));
        assert!(!output.timed_out);
    }

    #[test]
    fn output_beyond_limit_is_counted_not_kept() {
        let output = run_command_with_timeout(sh("printf 0123456789"), Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn timeout_kills_process_group() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & sleep 30; echo never"),
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn lingering_grandchild_is_killed_at_the_deadline() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("(sleep 30 &); echo hi"),
            Duration::from_secs(1),
            1024,
        )
        .expect("run");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!output.timed_out);
        assert_eq!(output.status.code(), Some(0));
        assert_eq!(output.stdout_lossy(), "hi\n");
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-program-xyz"),
            Duration::from_secs(1),
            16,
        )
        .expect_err("spawn should fail");
        assert!(format!("{err:#}").contains("spawn"));
    }
}
