//! # testproc-process
//!
//! **Purpose**: Run a subordinate program for the duration of a test
//!
//! Starts a process, captures its combined stdout/stderr under concurrent
//! access, waits until the output says the process is ready, and kills the
//! process together with all of its children at teardown.
//!
//! ## Features
//!
//! - **Output Capture**: Both streams appended line by line to one shared buffer
//! - **Readiness Gating**: `run` blocks until a predicate accepts the output (30s ceiling)
//! - **Output Assertions**: Snapshot, line list, substring checks and timed waits
//! - **Env Files**: `.env` entries merged under explicit variables
//! - **Process Tree Kill**: Process groups on Unix, task trees on Windows
//! - **Project Root Discovery**: Locate fixtures independent of the test's working directory
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use testproc_process::{ProcessConfig, SupervisedProcess};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = SupervisedProcess::new(
//!     ProcessConfig::new("./target/debug/server")
//!         .env("PORT", "1010")
//!         .env_file(".env.test")
//!         .passthrough_stdout()
//!         .ready_on("Server is running on port 1010"),
//! );
//!
//! server.run().await?;
//! assert!(server.contains_output("Server is running on port 1010"));
//!
//! // Output produced after readiness can be awaited too.
//! assert!(server.wait_for_output("GET / 200", Duration::from_secs(5)).await);
//!
//! server.stop();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod env_file;
pub mod error;
pub mod process_tree;
pub mod supervisor;
pub mod workdir;

pub use capture::{CapturedOutput, OutputSink, SharedBuffer};
pub use config::{ProcessConfig, ReadinessCheck, DEFAULT_READY_TIMEOUT};
pub use error::{ProcessError, Result};
pub use supervisor::SupervisedProcess;
pub use workdir::{find_project_root, project_root};
