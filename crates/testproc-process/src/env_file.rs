//! `.env` file loading
//!
//! Recognized syntax, one entry per line:
//!
//! ```text
//! # comment
//! KEY=value
//! QUOTED="value with spaces"
//! SINGLE='also fine'
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Each entry is split
//! on the first `=`; key and value are trimmed, and a value wrapped in
//! matching single or double quotes has the quotes removed. No escapes or
//! variable expansion are performed.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{ProcessError, Result};

/// Read and parse the env file at `path`
pub fn load(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ProcessError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    let vars = parse(&contents);
    debug!(path = %path.display(), count = vars.len(), "Loaded env file");
    Ok(vars)
}

/// Parse env file contents
///
/// Lines without `=` or with an empty key are skipped. Later entries for
/// the same key win.
pub fn parse(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warn!(line = index + 1, "Skipping env file line without '='");
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            warn!(line = index + 1, "Skipping env file line with empty key");
            continue;
        }

        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
