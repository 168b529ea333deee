//! Proxy configuration templates.
//!
//! Every `*.template` file in the template directory is rendered into the
//! output directory with `${VAR}` replaced by values from the environment
//! map. Unknown variables are left as-is so proxy runtime variables such
//! as `$host` survive.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::env_file::{is_valid_key, EnvMap};

const TEMPLATE_SUFFIX: &str = ".template";

/// Substitute `${VAR}` occurrences present in `env`.
pub fn substitute(input: &str, env: &EnvMap) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if is_valid_key(&after[..end]) => {
                let name = &after[..end];
                match env.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Files written by a render pass, with what they replaced.
#[derive(Debug, Default)]
pub struct RenderedSet {
    entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl RenderedSet {
    /// Output paths written.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(p, _)| p.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Put back the previous content; files that did not exist are removed.
    pub fn restore(self) -> io::Result<()> {
        for (path, previous) in self.entries.into_iter().rev() {
            match previous {
                Some(bytes) => std::fs::write(&path, bytes)?,
                None => match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }
}

/// Template files in `template_dir` paired with their output path in `output_dir`.
///
/// A missing template directory yields no pairs.
pub fn template_targets(template_dir: &Path, output_dir: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
    let entries = match std::fs::read_dir(template_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut pairs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(TEMPLATE_SUFFIX))
            .filter(|n| !n.is_empty())
        else {
            continue;
        };
        let target = output_dir.join(name);
        pairs.push((path, target));
    }
    pairs.sort();
    Ok(pairs)
}

/// Render all templates in `template_dir` into `output_dir`.
///
/// If any file fails, the files already written are restored before the
/// error is returned.
pub fn render_templates(template_dir: &Path, output_dir: &Path, env: &EnvMap) -> io::Result<RenderedSet> {
    let pairs = template_targets(template_dir, output_dir)?;
    let mut rendered = RenderedSet::default();
    if pairs.is_empty() {
        return Ok(rendered);
    }
    std::fs::create_dir_all(output_dir)?;

    for (template, target) in pairs {
        if let Err(e) = render_one(&template, &target, env, &mut rendered) {
            rendered.restore()?;
            return Err(e);
        }
    }

    Ok(rendered)
}

fn render_one(template: &Path, target: &Path, env: &EnvMap, rendered: &mut RenderedSet) -> io::Result<()> {
    let source = std::fs::read_to_string(template)?;
    let previous = match std::fs::read(target) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    std::fs::write(target, substitute(&source, env))?;
    rendered.entries.push((target.to_path_buf(), previous));
    Ok(())
}
