//! Child processes for agents and test commands: stdin piped in, a wall-clock
//! timeout, and stdout/stderr capped in memory.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Exit code shells use for "command not found".
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

/// Result of one agent or test command.
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
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout then stderr, with truncation notices, for log files.
    pub fn combined_log(&self, label: &str) -> String {
        let mut log = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            log.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if !self.stderr.is_empty() {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            log.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            log.push_str(&format!("\n[{label} timed out]\n"));
        }
        log
    }

    /// One-line description of a non-successful exit.
    pub fn failure_summary(&self, label: &str) -> String {
        if self.timed_out {
            return format!("{label} timed out");
        }
        match self.status.code() {
            Some(code) => format!("{label} exited with code {code}"),
            None => format!("{label} terminated by signal"),
        }
    }
}

type StreamSink = Arc<Option<Mutex<BufWriter<File>>>>;

/// Run `cmd` to completion or until `timeout`, killing it on expiry.
///
/// Both pipes are drained on reader threads; at most `output_limit_bytes` of
/// each is kept and the rest is counted in `*_truncated`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command(cmd, stdin, timeout, output_limit_bytes, Arc::new(None))
}

/// Like [`run_command_with_timeout`], but also writes each stdout line to `stream_path`
/// as it arrives so long-running agents can be followed from the iteration log.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, stream = %stream_path.display()))]
pub fn run_command_with_stream(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream_path: &Path,
) -> Result<CommandOutput> {
    if let Some(parent) = stream_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file = File::create(stream_path)
        .with_context(|| format!("create stream file {}", stream_path.display()))?;
    let sink = Arc::new(Some(Mutex::new(BufWriter::new(file))));
    run_command(cmd, stdin, timeout, output_limit_bytes, sink)
}

fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    sink: StreamSink,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(program = %program, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(program = %program, err = %err, "failed to spawn command");
            return Err(err).with_context(|| format!("spawn {program}"));
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // Children may exit without draining stdin (EPIPE).
        if let Err(err) = child_stdin.write_all(input) {
            warn!(err = %err, "child closed stdin early");
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, &sink));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

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

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read line by line, tee-ing into `sink` when present, keeping at most `limit` bytes.
fn read_lines_limited<R: Read>(reader: R, limit: usize, sink: &StreamSink) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(mutex) = &**sink
            && let Ok(mut writer) = mutex.lock()
        {
            if let Err(err) = writer.write_all(&line) {
                warn!(err = %err, "failed to write to stream file");
            } else if let Err(err) = writer.flush() {
                warn!(err = %err, "failed to flush stream file");
            }
        }

        let keep = n.min(limit.saturating_sub(collected.len()));
        collected.extend_from_slice(&line[..keep]);
        truncated += n - keep;
    }

    Ok((collected, truncated))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let out = run_command_with_timeout(
            sh("cat; echo done >&2"),
            Some(b"hello\n"),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_text(), "hello\n");
        assert_eq!(out.combined_log("child"), "hello\ndone\n");
    }

    #[test]
    fn bounds_captured_output() {
        let out = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
        assert!(out.combined_log("child").contains("[child stdout truncated 6 bytes]"));
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(200), 100)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert_eq!(out.failure_summary("tests"), "tests timed out");
    }

    #[test]
    fn streams_stdout_to_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("nested").join("coder.log");
        let out = run_command_with_stream(
            sh("echo one; echo two"),
            None,
            Duration::from_secs(10),
            1_000,
            &log,
        )
        .expect("run");
        assert_eq!(out.stdout_text(), "one\ntwo\n");
        assert_eq!(std::fs::read_to_string(&log).expect("read log"), "one\ntwo\n");
    }

    #[test]
    fn missing_shell_command_exits_not_found() {
        let out = run_command_with_timeout(
            sh("definitely-not-a-real-command-xyz"),
            None,
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(NOT_FOUND_EXIT_CODE));
    }
}
