//! Path normalization and resolution
//!
//! Remote locations are absolute, slash-delimited paths rooted at the
//! account's home directory. Every [`RemotePath`] is stored in canonical form:
//! a leading `/`, no empty or `.` segments, `..` resolved, and no trailing
//! slash except for the root itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A canonical absolute remote path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// The root directory (`/`)
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root directory
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Iterate over the path segments (empty for the root)
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment of the path, `None` for the root
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Get the parent path (one level up), `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(pos) => Some(Self(self.0[..pos].to_string())),
        }
    }

    /// Resolve `child` relative to this path
    ///
    /// Absolute inputs replace this path entirely; `..` may walk up but never
    /// above the root.
    pub fn join(&self, child: &str) -> Result<Self> {
        resolve(self, child)
    }

    /// Whether `self` is `other` or lies beneath it (segment-wise)
    pub fn starts_with(&self, other: &RemotePath) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    /// Directory form with a trailing slash (`/` stays `/`)
    pub fn to_dir_string(&self) -> String {
        if self.is_root() {
            self.0.clone()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl Default for RemotePath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RemotePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s)
    }
}

impl TryFrom<String> for RemotePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        normalize(&value)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

/// Normalize a path into its canonical absolute form
///
/// Relative input is interpreted from the root. Empty input, NUL bytes and
/// `..` segments that would climb above the root are rejected.
pub fn normalize(path: &str) -> Result<RemotePath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }
    collapse(Vec::new(), path)
}

/// Resolve `input` against the directory `current`
///
/// Absolute input is normalized on its own. Relative input (including `.`,
/// `..` and the empty string, which means `current`) is appended to `current`
/// and normalized.
pub fn resolve(current: &RemotePath, input: &str) -> Result<RemotePath> {
    if input.starts_with('/') {
        return normalize(input);
    }
    let base: Vec<&str> = current.segments().collect();
    collapse(base, input)
}

fn collapse<'a>(mut stack: Vec<&'a str>, input: &'a str) -> Result<RemotePath> {
    if input.contains('\0') {
        return Err(Error::InvalidPath(format!(
            "Path '{}' contains a NUL character",
            input.escape_default()
        )));
    }

    for segment in input.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(Error::InvalidPath(format!(
                        "Path '{input}' escapes above the root directory"
                    )));
                }
            }
            name => stack.push(name),
        }
    }

    if stack.is_empty() {
        Ok(RemotePath::root())
    } else {
        Ok(RemotePath(format!("/{}", stack.join("/"))))
    }
}
