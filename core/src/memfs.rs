// In-memory filesystem backend
//
// A link-capable, case-preserving but case-insensitive tree implementing
// FileSystemOps. Backs the integration tests and any host without a native
// backend. Symbolic links are stored as target text and handed to the
// engine as real reparse buffers, so the decoder is exercised end to end.

use crate::error::ResolveError;
use crate::fs::{
    FileAttributes, FileSystemOps, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_NORMAL,
    FILE_ATTRIBUTE_REPARSE_POINT,
};
use crate::path::WinPath;
use crate::prefix;
use crate::reparse;
use log::trace;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Reparse traversals one open may perform, matching the kernel's bound.
/// Deliberately larger than the engine's own hop budget so that the
/// engine's cap is the one that binds during a manual walk.
const MAX_FOLLOW: u32 = 63;

#[derive(Clone)]
enum MemNodeKind {
    File,
    Dir,
    Symlink { target: String },
}

#[derive(Clone)]
struct MemNode {
    exact_name: String,
    exact_path: String,
    kind: MemNodeKind,
}

struct MemState {
    /// Keyed by upper-cased absolute path; values keep on-disk casing.
    nodes: BTreeMap<String, MemNode>,
    open: BTreeMap<u64, String>,
    next_handle: u64,
    cwd: String,
    supports_links: bool,
    final_path_supported: bool,
    total_opens: u64,
    total_closes: u64,
}

pub struct MemFileSystem {
    state: Mutex<MemState>,
}

/// Handle into the open table of a MemFileSystem.
#[derive(Debug)]
pub struct MemHandle(u64);

impl Default for MemFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFileSystem {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "C:".to_string(),
            MemNode {
                exact_name: "C:".to_string(),
                exact_path: "C:\\".to_string(),
                kind: MemNodeKind::Dir,
            },
        );
        MemFileSystem {
            state: Mutex::new(MemState {
                nodes,
                open: BTreeMap::new(),
                next_handle: 1,
                cwd: "C:\\".to_string(),
                supports_links: true,
                final_path_supported: false,
                total_opens: 0,
                total_closes: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().expect("memfs state lock poisoned")
    }

    pub fn set_current_directory(&self, path: &str) {
        self.state().cwd = path.to_string();
    }

    pub fn set_supports_links(&self, value: bool) {
        self.state().supports_links = value;
    }

    /// Whether final_path_by_handle answers or reports the query as
    /// unsupported at this filesystem level (the default).
    pub fn set_final_path_supported(&self, value: bool) {
        self.state().final_path_supported = value;
    }

    pub fn add_dir(&self, path: &str) -> Result<(), ResolveError> {
        self.add_node(path, MemNodeKind::Dir)
    }

    pub fn add_file(&self, path: &str) -> Result<(), ResolveError> {
        self.add_node(path, MemNodeKind::File)
    }

    /// Create a symbolic link. `target` is either absolute (`C:\x`,
    /// `\\host\share\x`) or relative to the link's own directory.
    pub fn add_symlink(&self, path: &str, target: &str) -> Result<(), ResolveError> {
        self.add_node(
            path,
            MemNodeKind::Symlink {
                target: target.to_string(),
            },
        )
    }

    /// Handles currently open; zero once every scoped handle is released.
    pub fn open_handle_count(&self) -> usize {
        self.state().open.len()
    }

    pub fn total_opens(&self) -> u64 {
        self.state().total_opens
    }

    pub fn total_closes(&self) -> u64 {
        self.state().total_closes
    }

    fn add_node(&self, path: &str, kind: MemNodeKind) -> Result<(), ResolveError> {
        let mut state = self.state();
        let parsed = normalize(&state.cwd, path)?;
        if !parsed.is_absolute() {
            return Err(ResolveError::PathFormat(path.to_string()));
        }

        // make sure the root and every ancestor directory exist
        let root = parsed.prefix(0);
        let root_key = node_key(&root);
        state.nodes.entry(root_key).or_insert_with(|| MemNode {
            exact_name: root.to_string(),
            exact_path: root.to_string(),
            kind: MemNodeKind::Dir,
        });
        for depth in 1..parsed.name_count() {
            let ancestor = parsed.prefix(depth);
            let node = new_node(&state, &ancestor, MemNodeKind::Dir);
            state.nodes.entry(node_key(&ancestor)).or_insert(node);
        }

        let node = new_node(&state, &parsed, kind);
        state.nodes.insert(node_key(&parsed), node);
        Ok(())
    }
}

fn new_node(state: &MemState, path: &WinPath, kind: MemNodeKind) -> MemNode {
    let name = path
        .names()
        .last()
        .cloned()
        .unwrap_or_else(|| path.to_string());
    let exact_path = match path.parent() {
        Some(parent) => {
            let parent_exact = state
                .nodes
                .get(&node_key(&parent))
                .map(|node| node.exact_path.clone())
                .unwrap_or_else(|| parent.to_string());
            join(&parent_exact, &name)
        }
        None => path.to_string(),
    };
    MemNode {
        exact_name: name,
        exact_path,
        kind,
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('\\') {
        format!("{parent}{name}")
    } else {
        format!("{parent}\\{name}")
    }
}

/// Upper-cased lookup key of an absolute path.
fn node_key(path: &WinPath) -> String {
    let text = path.to_string().to_ascii_uppercase();
    text.trim_end_matches('\\').to_string()
}

/// Strip markers, absolutize against `cwd`, collapse dots.
fn normalize(cwd: &str, path: &str) -> Result<WinPath, ResolveError> {
    let stripped = prefix::strip_prefix(path);
    let parsed = WinPath::parse(&stripped)?;
    let absolute = if parsed.is_absolute() {
        parsed
    } else {
        WinPath::parse(cwd)?.resolve(parsed)
    };
    Ok(absolute.collapse())
}

/// Walk `path` down from its root, resolving symbolic links in
/// non-final components always and in the final component only when
/// `follow_final` is set. Returns the node key.
fn resolve_node(
    state: &MemState,
    path: &WinPath,
    follow_final: bool,
    origin: &str,
) -> Result<String, ResolveError> {
    let mut current = path.prefix(0);
    let mut pending: Vec<String> = path.names().to_vec();
    let mut depth = 0u32;

    loop {
        let key = node_key(&current);
        let node = state
            .nodes
            .get(&key)
            .ok_or_else(|| ResolveError::NotFound(origin.to_string()))?;

        if let MemNodeKind::Symlink { target } = &node.kind {
            let is_last = pending.is_empty();
            if !is_last || follow_final {
                depth += 1;
                if depth > MAX_FOLLOW {
                    return Err(ResolveError::TooManyLinks(origin.to_string()));
                }
                let target = WinPath::parse(&prefix::strip_prefix(target))?;
                let base = current.parent().unwrap_or_else(|| current.prefix(0));
                let resolved = base.resolve(target).collapse();
                trace!("memfs follow {current} -> {resolved}");
                let mut names = resolved.names().to_vec();
                names.append(&mut pending);
                pending = names;
                current = resolved.prefix(0);
                continue;
            }
        }

        if pending.is_empty() {
            return Ok(key);
        }
        if matches!(node.kind, MemNodeKind::File) {
            // cannot descend into a file
            return Err(ResolveError::NotFound(origin.to_string()));
        }
        current.push(pending.remove(0));
    }
}

impl FileSystemOps for MemFileSystem {
    type Handle = MemHandle;

    fn supports_links(&self) -> bool {
        self.state().supports_links
    }

    fn open_for_attribute_access(
        &self,
        path: &str,
        follow_links: bool,
    ) -> Result<MemHandle, ResolveError> {
        let mut state = self.state();
        let parsed = normalize(&state.cwd, path)?;
        let key = resolve_node(&state, &parsed, follow_links, path)?;
        let id = state.next_handle;
        state.next_handle += 1;
        state.open.insert(id, key);
        state.total_opens += 1;
        Ok(MemHandle(id))
    }

    fn query_attributes(&self, handle: &MemHandle) -> Result<FileAttributes, ResolveError> {
        let state = self.state();
        let node = open_node(&state, handle)?;
        let (is_symbolic_link, is_directory, attributes) = match node.kind {
            MemNodeKind::File => (false, false, FILE_ATTRIBUTE_NORMAL),
            MemNodeKind::Dir => (false, true, FILE_ATTRIBUTE_DIRECTORY),
            MemNodeKind::Symlink { .. } => (true, false, FILE_ATTRIBUTE_REPARSE_POINT),
        };
        Ok(FileAttributes {
            is_symbolic_link,
            is_directory,
            attributes,
        })
    }

    fn read_reparse_buffer(&self, handle: &MemHandle) -> Result<Vec<u8>, ResolveError> {
        let state = self.state();
        let node = open_node(&state, handle)?;
        match &node.kind {
            MemNodeKind::Symlink { target } => {
                let absolute = WinPath::parse(target)
                    .map(|p| p.is_absolute())
                    .unwrap_or(false);
                let substitute = if absolute {
                    format!(r"\??\{target}")
                } else {
                    target.clone()
                };
                Ok(reparse::build_symlink_buffer(&substitute, target, !absolute))
            }
            _ => Err(ResolveError::NotAReparsePoint),
        }
    }

    fn final_path_by_handle(&self, handle: &MemHandle) -> Result<String, ResolveError> {
        let state = self.state();
        if !state.final_path_supported {
            return Err(ResolveError::UnsupportedLevel);
        }
        let node = open_node(&state, handle)?;
        // answer the way the native query does, marker included
        if let Some(rest) = node.exact_path.strip_prefix(r"\\") {
            Ok(format!(r"\\?\UNC\{rest}"))
        } else {
            Ok(format!(r"\\?\{}", node.exact_path))
        }
    }

    fn full_path_name(&self, path: &str) -> Result<String, ResolveError> {
        let state = self.state();
        Ok(normalize(&state.cwd, path)?.to_string())
    }

    fn find_first(&self, pattern: &str) -> Result<String, ResolveError> {
        let state = self.state();
        let stripped = prefix::strip_prefix(pattern);

        if let Some(dir_part) = stripped.strip_suffix('*') {
            // wildcard probe: the directory must exist
            let parsed = normalize(&state.cwd, dir_part)?;
            let key = node_key(&parsed);
            match state.nodes.get(&key) {
                Some(node) if matches!(node.kind, MemNodeKind::Dir) => {}
                _ => return Err(ResolveError::NotFound(pattern.to_string())),
            }
            let child_prefix = format!("{key}\\");
            let first = state
                .nodes
                .range(child_prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&child_prefix))
                .find(|(k, _)| !k[child_prefix.len()..].contains('\\'))
                .map(|(_, node)| node.exact_name.clone());
            return Ok(first.unwrap_or_else(|| ".".to_string()));
        }

        // exact lookup, case-insensitive, returning the on-disk name of
        // the entry itself (a link is not followed)
        let parsed = normalize(&state.cwd, &stripped)?;
        let node = state
            .nodes
            .get(&node_key(&parsed))
            .ok_or_else(|| ResolveError::NotFound(pattern.to_string()))?;
        Ok(node.exact_name.clone())
    }

    fn close(&self, handle: MemHandle) {
        let mut state = self.state();
        if state.open.remove(&handle.0).is_some() {
            state.total_closes += 1;
        }
    }
}

fn open_node<'a>(state: &'a MemState, handle: &MemHandle) -> Result<&'a MemNode, ResolveError> {
    let key = state
        .open
        .get(&handle.0)
        .ok_or_else(|| ResolveError::Other("stale memfs handle".to_string()))?;
    state
        .nodes
        .get(key)
        .ok_or_else(|| ResolveError::Other("memfs node removed while open".to_string()))
}
