//! Include directives: `CM_ "IMPORT file";` and `#include "file"`.
//!
//! Included text is spliced in place of the directive before parsing, so
//! a generated DBC can share message definitions with a common base file.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DbcError, DbcResult};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:CM_\s+"IMPORT\s+([^"]+)"\s*;?|#include\s+"([^"]+)")\s*$"#).unwrap()
});

/// Source of included DBC text.
pub trait IncludeResolver {
    /// Return `(canonical key, text)` for an include name. The key is used
    /// for cycle detection.
    fn resolve(&self, name: &str) -> DbcResult<(String, String)>;
}

/// Resolves includes relative to a base directory.
#[derive(Debug, Clone)]
pub struct FsIncludeResolver {
    base: PathBuf,
}

impl FsIncludeResolver {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }
}

impl IncludeResolver for FsIncludeResolver {
    fn resolve(&self, name: &str) -> DbcResult<(String, String)> {
        let path = self.base.join(name);
        let text = std::fs::read_to_string(&path).map_err(|source| DbcError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let key = path
            .canonicalize()
            .unwrap_or(path)
            .display()
            .to_string();
        Ok((key, text))
    }
}

/// Rejects every include directive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIncludes;

impl IncludeResolver for NoIncludes {
    fn resolve(&self, name: &str) -> DbcResult<(String, String)> {
        Err(DbcError::Include(format!("includes not available: {name}")))
    }
}

/// Name referenced by an include directive on this (trimmed) line.
pub fn include_target(line: &str) -> Option<&str> {
    let caps = IMPORT_RE.captures(line)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().trim())
}

/// Splice every include into `text`, recursively.
pub fn expand_includes(text: &str, resolver: &dyn IncludeResolver) -> DbcResult<String> {
    let mut stack = Vec::new();
    expand(text, resolver, &mut stack)
}

fn expand(
    text: &str,
    resolver: &dyn IncludeResolver,
    stack: &mut Vec<String>,
) -> DbcResult<String> {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let Some(target) = include_target(line.trim()) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };

        let (key, included) = resolver.resolve(target)?;
        if stack.contains(&key) {
            return Err(DbcError::Include(format!("include cycle through {target}")));
        }
        tracing::debug!(include = %target, "splicing DBC include");
        stack.push(key);
        out.push_str(&expand(&included, resolver, stack)?);
        stack.pop();
    }
    Ok(out)
}
