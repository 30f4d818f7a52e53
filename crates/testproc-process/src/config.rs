//! Supervised process configuration

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::capture::OutputSink;
use crate::env_file;
use crate::error::{ProcessError, Result};

/// How long `run` waits for the readiness check before carrying on anyway
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Readiness check evaluated against the full captured output
pub type ReadinessCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for a supervised process
#[derive(Clone)]
pub struct ProcessConfig {
    /// Executable or script to run
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Explicit environment variables (overlaid on the inherited environment)
    pub env: HashMap<String, String>,
    /// Optional `.env` file; its entries never override `env`
    pub env_file: Option<PathBuf>,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Passthrough writer for captured output (None = capture only)
    pub sink: Option<OutputSink>,
    /// Readiness check (None = don't wait)
    pub ready: Option<ReadinessCheck>,
    /// Ceiling for the readiness wait
    pub ready_timeout: Duration,
}

impl ProcessConfig {
    /// Create new process configuration
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            env: HashMap::new(),
            env_file: None,
            working_dir: None,
            sink: None,
            ready: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Run `command` through the platform shell (`sh -c` or `cmd /C`)
    pub fn shell(command: impl Into<String>) -> Self {
        #[cfg(windows)]
        let (shell, flag) = ("cmd", "/C");
        #[cfg(not(windows))]
        let (shell, flag) = ("sh", "-c");

        Self::new(shell).args([flag.to_string(), command.into()])
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Load additional variables from a `.env` file at run time
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Mirror captured output to `writer`
    ///
    /// Use a [`SharedBuffer`](crate::capture::SharedBuffer) to inspect the
    /// mirrored bytes afterwards.
    pub fn sink<W>(mut self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.sink = Some(Arc::new(Mutex::new(writer)));
        self
    }

    /// Mirror captured output to this process's stdout
    pub fn passthrough_stdout(self) -> Self {
        self.sink(std::io::stdout())
    }

    /// Block `run` until `check` accepts the captured output
    pub fn ready_when<F>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.ready = Some(Arc::new(check));
        self
    }

    /// Block `run` until the captured output contains `text`
    pub fn ready_on(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.ready_when(move |output| output.contains(&text))
    }

    /// Set the readiness wait ceiling
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Check that the configuration names something to run
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(ProcessError::InvalidConfig(
                "no program specified".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective explicit environment: `env` plus env file entries it doesn't define
    pub fn resolve_env(&self) -> Result<HashMap<String, String>> {
        let mut env = self.env.clone();

        if let Some(path) = &self.env_file {
            let from_file = env_file::load(path)?;
            let mut added = 0usize;
            for (key, value) in from_file {
                if !env.contains_key(&key) {
                    env.insert(key, value);
                    added += 1;
                }
            }
            debug!(path = %path.display(), added, "Merged env file");
        }

        Ok(env)
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("env_file", &self.env_file)
            .field("working_dir", &self.working_dir)
            .field("sink", &self.sink.is_some())
            .field("ready", &self.ready.is_some())
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}
