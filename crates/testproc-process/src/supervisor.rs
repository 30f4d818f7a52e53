//! Supervised process lifecycle
//!
//! [`SupervisedProcess`] owns one external process end to end:
//!
//! 1. `run` spawns it in its own process group, pumps stdout and stderr
//!    line by line into a [`CapturedOutput`], and optionally blocks until
//!    the readiness check passes (or the readiness timeout elapses).
//! 2. A detached reaper task waits for the process to exit so it never
//!    lingers as a zombie.
//! 3. `stop` force-kills the whole process group.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::capture::CapturedOutput;
use crate::config::{ProcessConfig, ReadinessCheck};
use crate::error::{ProcessError, Result};
use crate::process_tree;

/// Written to the sink while `run` waits for readiness
const WAITING_NOTE: &str = "[runner] Waiting for the readiness.\n";

#[derive(Default)]
struct Lifecycle {
    running: bool,
    pid: Option<u32>,
    output: Option<Arc<CapturedOutput>>,
    /// Asks the reaper to kill the direct child when the group kill fails
    kill_child: Option<oneshot::Sender<()>>,
    exit_status: Option<Arc<Mutex<Option<ExitStatus>>>>,
}

/// One external process, its captured output, and its lifecycle
pub struct SupervisedProcess {
    config: ProcessConfig,
    state: Mutex<Lifecycle>,
}

impl SupervisedProcess {
    /// Create an idle process; nothing is spawned until [`run`](Self::run)
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(Lifecycle::default()),
        }
    }

    /// Process configuration
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Start the process
    ///
    /// A no-op while already running. With a readiness check configured this
    /// waits until the check accepts the captured output or the readiness
    /// timeout elapses; a timeout is not an error.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run(&self) -> Result<()> {
        let (output, ready_rx) = {
            let mut state = self.state.lock();
            if state.running {
                debug!(program = %self.config.program, "Process already running");
                return Ok(());
            }

            self.config.validate()?;
            let env = self.config.resolve_env()?;

            let mut child = self.spawn(&env)?;
            let pid = child.id();
            let output = Arc::new(CapturedOutput::new(self.config.sink.clone()));

            let (gate, ready_rx) = match &self.config.ready {
                Some(check) => {
                    let (gate, rx) = ReadinessGate::new(check.clone());
                    (Some(gate), Some(rx))
                }
                None => (None, None),
            };

            // Both pipes were requested in `spawn`.
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(pump(stdout, "stdout", output.clone(), gate.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(pump(stderr, "stderr", output.clone(), gate.clone()));
            }

            let (kill_tx, kill_rx) = oneshot::channel();
            let exit_status = Arc::new(Mutex::new(None));
            tokio::spawn(reap(child, pid, kill_rx, exit_status.clone()));

            *state = Lifecycle {
                running: true,
                pid,
                output: Some(output.clone()),
                kill_child: Some(kill_tx),
                exit_status: Some(exit_status),
            };

            info!(pid = ?pid, program = %self.config.program, "Process started");
            (output, ready_rx.map(|rx| (rx, gate)))
        };

        if let Some((mut ready_rx, _gate)) = ready_rx {
            // `_gate` keeps a sender alive so the wait only ends on a match or
            // the timeout, even if both pumps finish first.
            output.annotate(WAITING_NOTE);
            debug!(timeout = ?self.config.ready_timeout, "Waiting for readiness");

            match tokio::time::timeout(self.config.ready_timeout, ready_rx.recv()).await {
                Ok(_) => info!(program = %self.config.program, "Process ready"),
                Err(_) => warn!(
                    program = %self.config.program,
                    timeout = ?self.config.ready_timeout,
                    "Readiness check not satisfied before timeout, continuing"
                ),
            }
        }

        Ok(())
    }

    fn spawn(&self, env: &std::collections::HashMap<String, String>) -> Result<Child> {
        let mut cmd = std::process::Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match &self.config.working_dir {
            Some(dir) => {
                cmd.current_dir(dir);
            }
            None => {
                if let Ok(dir) = std::env::current_dir() {
                    cmd.current_dir(dir);
                }
            }
        }

        process_tree::isolate_group(&mut cmd);

        debug!(
            program = %self.config.program,
            args = ?self.config.args,
            "Spawning process"
        );

        Command::from(cmd).spawn().map_err(ProcessError::SpawnFailed)
    }

    /// Kill the process and everything in its process group
    ///
    /// A no-op when not running. Kill failures are logged, never returned.
    pub fn stop(&self) {
        let (pid, kill_child) = {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            (state.pid, state.kill_child.take())
        };

        let Some(pid) = pid else {
            return;
        };

        match process_tree::kill_tree(pid) {
            Ok(()) => info!(pid, "Process tree killed"),
            Err(e) => {
                warn!(pid, error = %e, "Failed to kill process group, killing process only");
                if let Some(kill_child) = kill_child {
                    // Err means the reaper already collected the child.
                    let _ = kill_child.send(());
                }
            }
        }
    }

    /// Whether `run` succeeded and `stop` has not been called since
    ///
    /// The process exiting on its own does not clear this; see
    /// [`exit_status`](Self::exit_status).
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// OS process id of the most recently started process
    pub fn pid(&self) -> Option<u32> {
        self.state.lock().pid
    }

    /// Exit status, once the reaper has collected the process
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let slot = self.state.lock().exit_status.clone()?;
        let status = *slot.lock();
        status
    }

    fn output(&self) -> Option<Arc<CapturedOutput>> {
        self.state.lock().output.clone()
    }

    /// Everything captured so far (stdout and stderr interleaved)
    pub fn get_output(&self) -> String {
        self.output().map(|o| o.snapshot()).unwrap_or_default()
    }

    /// Captured lines in arrival order
    pub fn get_lines(&self) -> Vec<String> {
        self.output().map(|o| o.lines()).unwrap_or_default()
    }

    /// Whether the captured output contains `text`
    pub fn contains_output(&self, text: &str) -> bool {
        self.output().is_some_and(|o| o.contains(text))
    }

    /// Wait up to `timeout` for `text` to appear in the captured output
    pub async fn wait_for_output(&self, text: &str, timeout: Duration) -> bool {
        // The process lock is released before waiting.
        match self.output() {
            Some(output) => output.wait_for(text, timeout).await,
            None => false,
        }
    }

    /// Discard everything captured so far
    pub fn reset_output(&self) {
        if let Some(output) = self.output() {
            output.reset();
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SupervisedProcess")
            .field("config", &self.config)
            .field("running", &state.running)
            .field("pid", &state.pid)
            .finish()
    }
}

/// One-shot readiness signal shared by both pumps
#[derive(Clone)]
struct ReadinessGate {
    check: ReadinessCheck,
    fired: Arc<AtomicBool>,
    tx: mpsc::Sender<()>,
}

impl ReadinessGate {
    fn new(check: ReadinessCheck) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let gate = Self {
            check,
            fired: Arc::new(AtomicBool::new(false)),
            tx,
        };
        (gate, rx)
    }

    fn observe(&self, output: &CapturedOutput) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        if (self.check)(&output.snapshot()) && !self.fired.swap(true, Ordering::AcqRel) {
            // Capacity 1: a full or closed channel means nobody needs another signal.
            let _ = self.tx.try_send(());
        }
    }
}

async fn pump<R>(
    reader: R,
    stream: &'static str,
    output: Arc<CapturedOutput>,
    gate: Option<ReadinessGate>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // One line ending: `\n`, `\r\n`, or a bare `\r` before EOF.
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                trace!(stream, line = %line, "Process output");
                line.push('\n');

                output.append(&line);
                if let Some(gate) = &gate {
                    gate.observe(&output);
                }
            }
            Err(e) => {
                debug!(stream, error = %e, "Output pump stopped");
                break;
            }
        }
    }

    trace!(stream, "Output stream closed");
}

async fn reap(
    mut child: Child,
    pid: Option<u32>,
    kill_rx: oneshot::Receiver<()>,
    exit_status: Arc<Mutex<Option<ExitStatus>>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!(pid = ?pid, error = %e, "Failed to kill process");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => {
            debug!(pid = ?pid, %status, "Process exited");
            *exit_status.lock() = Some(status);
        }
        Err(e) => warn!(pid = ?pid, error = %e, "Failed to wait for process"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_without_program() {
        let process = SupervisedProcess::new(ProcessConfig::default());

        let err = process.run().await.unwrap_err();
        assert!(matches!(err, ProcessError::InvalidConfig(_)));
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let process =
            SupervisedProcess::new(ProcessConfig::new("/nonexistent/testproc-missing-binary"));

        let err = process.run().await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed(_)));
        assert!(!process.is_running());
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn test_missing_env_file_aborts_before_spawn() {
        let config = ProcessConfig::shell("echo should-not-run").env_file("/nonexistent/.env");
        let process = SupervisedProcess::new(config);

        let err = process.run().await.unwrap_err();
        assert!(matches!(err, ProcessError::EnvFile { .. }));
        assert!(!process.is_running());
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn test_accessors_before_run() {
        let process = SupervisedProcess::new(ProcessConfig::new("sh"));

        assert_eq!(process.get_output(), "");
        assert!(process.get_lines().is_empty());
        assert!(!process.contains_output("anything"));
        assert!(!process.wait_for_output("anything", Duration::from_millis(10)).await);
        process.reset_output();
        process.stop();
        assert!(process.exit_status().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readiness_gate_fires_once() {
        let output = CapturedOutput::default();
        let (gate, mut rx) = ReadinessGate::new(Arc::new(|s: &str| s.contains("ready")));

        output.append("ready\n");
        gate.observe(&output);
        output.append("ready again\n");
        gate.observe(&output);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pump_restores_newlines() {
        let output = Arc::new(CapturedOutput::default());
        let input: &[u8] = b"one\r\ntwo\nthree";

        pump(input, "stdout", output.clone(), None).await;

        assert_eq!(output.lines(), vec!["one\n", "two\n", "three\n"]);
        assert_eq!(output.snapshot(), "one\ntwo\nthree\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pump_strips_one_line_ending() {
        let output = Arc::new(CapturedOutput::default());
        let input: &[u8] = b"a\r\r\nb\n\nc\r";

        pump(input, "stdout", output.clone(), None).await;

        assert_eq!(output.lines(), vec!["a\r\n", "b\n", "\n", "c\n"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reaper_kills_child_on_request() {
        let child = Command::new("sleep").arg("300").spawn().unwrap();
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let exit_status = Arc::new(Mutex::new(None));

        let reaper = tokio::spawn(reap(child, pid, kill_rx, exit_status.clone()));
        kill_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), reaper)
            .await
            .expect("reaper did not finish")
            .unwrap();

        use std::os::unix::process::ExitStatusExt;
        let status = exit_status.lock().expect("exit status recorded");
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reaper_records_natural_exit() {
        let child = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
        let pid = child.id();
        let (_kill_tx, kill_rx) = oneshot::channel();
        let exit_status = Arc::new(Mutex::new(None));

        tokio::time::timeout(
            Duration::from_secs(5),
            reap(child, pid, kill_rx, exit_status.clone()),
        )
        .await
        .expect("reaper did not finish");

        assert_eq!(exit_status.lock().and_then(|s| s.code()), Some(7));
    }
}
