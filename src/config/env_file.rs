//! `KEY=VALUE` environment file parsing.
//!
//! # Format
//! - Lines are trimmed; blank lines and `#` comments are skipped
//! - A trailing `\` joins the line with the next one (multi-line values)
//! - Split on the first `=`; key and value are trimmed
//! - Keys must match `[A-Za-z_][A-Za-z0-9_]*`, other keys are skipped
//!
//! A missing file is not an error: the env file is optional.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Ordered mapping of configuration keys to raw string values.
pub type EnvMap = BTreeMap<String, String>;

const CONTINUATION: char = '\\';

/// Read and parse an env file. Returns an empty map when the file does not exist.
pub fn parse_env_file(path: &Path) -> io::Result<EnvMap> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let span = tracing::info_span!("env", path = ?path);
            let _enter = span.enter();
            Ok(parse_env_str(&content))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = ?path, "Env file not present, skipping");
            Ok(EnvMap::new())
        }
        Err(e) => Err(e),
    }
}

/// Parse env file content.
pub fn parse_env_str(content: &str) -> EnvMap {
    let mut vars = EnvMap::new();
    let mut pending: Option<String> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();

        let logical = match pending.take() {
            Some(mut head) => {
                head.push('\n');
                head.push_str(line);
                head
            }
            None => {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                line.to_string()
            }
        };

        if let Some(stripped) = logical.strip_suffix(CONTINUATION) {
            pending = Some(stripped.to_string());
            continue;
        }

        insert_pair(&mut vars, &logical, idx + 1);
    }

    // Continuation on the last line: nothing left to join with.
    if let Some(rest) = pending {
        insert_pair(&mut vars, &rest, content.lines().count());
    }

    vars
}

fn insert_pair(vars: &mut EnvMap, logical: &str, line_no: usize) {
    let Some((key, value)) = logical.split_once('=') else {
        tracing::warn!(line = line_no, "Ignoring env line without '='");
        return;
    };

    let key = key.trim();
    if !is_valid_key(key) {
        tracing::warn!(line = line_no, key = %key, "Ignoring invalid environment key");
        return;
    }

    vars.insert(key.to_string(), value.trim().to_string());
}

/// Whether `key` is a valid identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
