// Windows path model
//
// A path is an optional root (drive letter or UNC host/share pair) followed
// by name components. Components never contain a separator. "." and ".."
// are carried as ordinary components; collapsing them is the job of the
// filesystem's full-path normalization, not of this model.

use crate::error::ResolveError;
use crate::prefix;
use serde::Serialize;
use std::fmt;

const SEPARATOR: char = '\\';

/// Root designator of an absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WinRoot {
    Drive(char),
    Unc { host: String, share: String },
}

/// A parsed path: optional root plus ordered name components.
///
/// Equality follows the normalized string form. A path with a root is
/// absolute. A path may also be "rooted" without a root designator (a lone
/// leading separator, drive unknown); such a path is not absolute and picks
/// up the root of whatever base it is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinPath {
    root: Option<WinRoot>,
    rooted: bool,
    names: Vec<String>,
}

impl WinPath {
    /// Parse a textual path. Accepts drive-absolute (`C:\x`), UNC
    /// (`\\host\share\x`), rooted (`\x`) and relative (`x\y`, `..\y`)
    /// forms; forward slashes are accepted as separators. Drive-relative
    /// forms (`C:x`) are rejected.
    pub fn parse(path: &str) -> Result<WinPath, ResolveError> {
        let text = path.replace('/', "\\");
        let bytes = text.as_bytes();

        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            if bytes.len() > 2 && bytes[2] != b'\\' {
                return Err(ResolveError::PathFormat(path.to_string()));
            }
            let rest = if bytes.len() > 2 { &text[3..] } else { "" };
            return Ok(WinPath {
                root: Some(WinRoot::Drive(bytes[0] as char)),
                rooted: true,
                names: split_names(rest),
            });
        }

        if let Some(rest) = text.strip_prefix(r"\\") {
            let mut segments = rest.splitn(3, SEPARATOR);
            let host = segments.next().unwrap_or("");
            if host.is_empty() {
                return Err(ResolveError::PathFormat(path.to_string()));
            }
            let share = match segments.next() {
                Some(share) if !share.is_empty() => share.to_string(),
                _ => return Err(ResolveError::InvalidShareName(path.to_string())),
            };
            let names = segments.next().map(split_names).unwrap_or_default();
            return Ok(WinPath {
                root: Some(WinRoot::Unc { host: host.to_string(), share }),
                rooted: true,
                names,
            });
        }

        if let Some(rest) = text.strip_prefix(SEPARATOR) {
            return Ok(WinPath {
                root: None,
                rooted: true,
                names: split_names(rest),
            });
        }

        Ok(WinPath {
            root: None,
            rooted: false,
            names: split_names(&text),
        })
    }

    pub fn root(&self) -> Option<&WinRoot> {
        self.root.as_ref()
    }

    pub fn is_absolute(&self) -> bool {
        self.root.is_some()
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Root plus the first `count` name components.
    pub fn prefix(&self, count: usize) -> WinPath {
        WinPath {
            root: self.root.clone(),
            rooted: self.rooted,
            names: self.names[..count.min(self.names.len())].to_vec(),
        }
    }

    /// Name components strictly after index `elem`.
    pub fn names_after(&self, elem: usize) -> Vec<String> {
        if elem + 1 < self.names.len() {
            self.names[elem + 1..].to_vec()
        } else {
            Vec::new()
        }
    }

    /// The path with the last component removed. A root-only path has no
    /// parent; neither does a single-component relative path (its parent
    /// is only known once the path is made absolute).
    pub fn parent(&self) -> Option<WinPath> {
        if self.names.is_empty() {
            return None;
        }
        if self.names.len() == 1 && self.root.is_none() && !self.rooted {
            return None;
        }
        Some(self.prefix(self.names.len() - 1))
    }

    /// Resolve `other` against this path. An absolute `other` wins; a
    /// rooted `other` keeps this path's root; anything else is appended.
    pub fn resolve(&self, other: WinPath) -> WinPath {
        if other.is_absolute() {
            return other;
        }
        if other.rooted {
            return WinPath {
                root: self.root.clone(),
                rooted: self.rooted,
                names: other.names,
            };
        }
        let mut names = self.names.clone();
        names.extend(other.names);
        WinPath {
            root: self.root.clone(),
            rooted: self.rooted,
            names,
        }
    }

    pub fn push(&mut self, name: String) {
        self.names.push(name);
    }

    /// Lexically collapse "." and ".." components. ".." never escapes the
    /// root. This is the model-level half of full path normalization; the
    /// filesystem collaborator decides when to apply it.
    pub fn collapse(&self) -> WinPath {
        let mut names: Vec<String> = Vec::with_capacity(self.names.len());
        for name in &self.names {
            match name.as_str() {
                "." => {}
                ".." => {
                    names.pop();
                }
                _ => names.push(name.clone()),
            }
        }
        WinPath {
            root: self.root.clone(),
            rooted: self.rooted,
            names,
        }
    }

    /// The string form to hand to native calls: the display form with the
    /// long-path marker applied when the string is over-length.
    pub fn for_win32_calls(&self) -> String {
        prefix::add_long_path_prefix_if_needed(&self.to_string())
    }
}

fn split_names(text: &str) -> Vec<String> {
    text.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

impl fmt::Display for WinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Some(WinRoot::Drive(letter)) => {
                write!(f, "{letter}:\\")?;
                write!(f, "{}", self.names.join("\\"))
            }
            Some(WinRoot::Unc { host, share }) => {
                write!(f, "\\\\{host}\\{share}")?;
                for name in &self.names {
                    write!(f, "\\{name}")?;
                }
                Ok(())
            }
            None => {
                if self.rooted {
                    write!(f, "\\")?;
                }
                write!(f, "{}", self.names.join("\\"))
            }
        }
    }
}
