// Symbolic link resolution engine
//
// Three entry points over a FileSystemOps collaborator: read_link returns
// one link's target, final_path asks the filesystem for its own normalized
// path (with a manual per-component fallback), and real_path builds the
// canonical absolute, collapsed, link-free, case-exact form. The engine is
// stateless between calls and holds no locks; every handle it opens is
// scoped and released on all exit paths.

use crate::error::ResolveError;
use crate::fs::{FileSystemOps, ScopedHandle};
use crate::path::WinPath;
use crate::prefix;
use crate::reparse;
use log::{debug, trace};

/// Upper bound on link substitutions in one resolution pass. The
/// final-path fallback walk and resolve_all_links each carry their own
/// budget.
pub const MAX_LINK_HOPS: u32 = 32;

/// Returns the target of a symbolic link.
pub fn read_link<F: FileSystemOps>(fs: &F, path: &str) -> Result<String, ResolveError> {
    // don't follow links
    let handle = ScopedHandle::open(fs, path, false)?;
    read_link_by_handle(fs, handle.get()).map_err(|e| match e {
        ResolveError::NotAReparsePoint => ResolveError::NotALink(path.to_string()),
        other => other,
    })
}

/// Target of a link given an open handle that should be a link.
fn read_link_by_handle<F: FileSystemOps>(
    fs: &F,
    handle: &F::Handle,
) -> Result<String, ResolveError> {
    let buffer = fs.read_reparse_buffer(handle)?;
    let record = reparse::decode(&buffer)?;
    Ok(record.target)
}

/// Returns the final path of `input` as a string suitable for native calls
/// that do not follow links themselves.
pub fn final_path<F: FileSystemOps>(
    fs: &F,
    input: &WinPath,
    follow_links: bool,
) -> Result<String, ResolveError> {
    // if not following links then the final path is not needed
    if !follow_links || !fs.supports_links() {
        return Ok(input.for_win32_calls());
    }

    // if the file is not a link there is nothing to resolve
    {
        let handle = ScopedHandle::open(fs, &input.for_win32_calls(), false)?;
        if !fs.query_attributes(handle.get())?.is_symbolic_link {
            return Ok(input.for_win32_calls());
        }
    }

    // The file is a link, so ask the filesystem for its normalized final
    // path. Succeeds on a native volume but may fail when the link leads
    // onto a filesystem level without the query.
    {
        let handle = ScopedHandle::open(fs, &input.for_win32_calls(), true)?;
        match fs.final_path_by_handle(handle.get()) {
            Ok(path) => return Ok(prefix::strip_prefix(&path)),
            Err(ResolveError::UnsupportedLevel) => {}
            Err(e) => return Err(e),
        }
    }

    // Fallback: read the link target, resolve it against the parent, and
    // repeat until the file is no longer a link.
    let mut target = input.clone();
    let mut hops = 0u32;
    loop {
        let link_text = {
            let handle = ScopedHandle::open(fs, &target.for_win32_calls(), false)?;
            let attrs = fs.query_attributes(handle.get())?;
            if !attrs.is_symbolic_link {
                return Ok(target.for_win32_calls());
            }
            read_link_by_handle(fs, handle.get())?
        };
        hops += 1;
        if hops > MAX_LINK_HOPS {
            return Err(ResolveError::TooManyLinks(input.to_string()));
        }
        let link = WinPath::parse(&link_text)?;
        let parent = match target.parent() {
            Some(parent) => parent,
            None => {
                // no parent, so take the parent of the absolute form
                target = WinPath::parse(&fs.full_path_name(&target.to_string())?)?;
                target
                    .parent()
                    .ok_or_else(|| ResolveError::PathFormat(target.to_string()))?
            }
        };
        trace!("final path hop {hops}: {target} -> {link_text}");
        target = parent.resolve(link);
    }
}

/// Resolve every symbolic link in an absolute path, walking the name
/// elements left to right.
///
/// A substituted target may itself contain "." or ".." components, or a
/// different number of elements than the segment it replaced, so the walk
/// restarts from the first element after every substitution. Termination:
/// each restart consumes one of at most MAX_LINK_HOPS substitutions, and
/// between substitutions the element index only advances.
pub fn resolve_all_links<F: FileSystemOps>(
    fs: &F,
    path: &WinPath,
) -> Result<String, ResolveError> {
    if !path.is_absolute() {
        return Err(ResolveError::PathFormat(path.to_string()));
    }
    let original = path.to_string();
    let mut path = path.clone();

    let mut hops = 0u32;
    let mut elem = 0usize;
    while elem < path.name_count() {
        let current = path.prefix(elem + 1);

        let handle = ScopedHandle::open(fs, &current.for_win32_calls(), false)?;
        let attrs = fs.query_attributes(handle.get())?;
        if !attrs.is_symbolic_link {
            // not a link, move to the next element
            elem += 1;
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            return Err(ResolveError::TooManyLinks(original));
        }
        let target_text = read_link_by_handle(fs, handle.get())?;
        drop(handle);

        let target = WinPath::parse(&target_text)?;
        let remainder = path.names_after(elem);
        let parent = current
            .parent()
            .ok_or_else(|| ResolveError::PathFormat(current.to_string()))?;
        path = parent.resolve(target);

        // the target may bring "." or ".." with it, re-collapse
        let full = fs.full_path_name(&path.to_string())?;
        if full != path.to_string() {
            path = WinPath::parse(&full)?;
        }
        for name in remainder {
            path.push(name);
        }

        debug!("substituted link at element {elem}, restarting: {path}");
        elem = 0;
    }

    Ok(path.to_string())
}

/// Returns the actual path of a file: absolute, collapsed, optionally
/// link-free, and with the exact on-disk case of every component.
pub fn real_path<F: FileSystemOps>(
    fs: &F,
    input: &WinPath,
    resolve_links: bool,
) -> Result<String, ResolveError> {
    let resolve_links = resolve_links && fs.supports_links();

    // Ask the filesystem for the final path first. Succeeds on a native
    // volume; falls through to the manual walk when the query is not
    // supported at this filesystem level.
    if resolve_links {
        let handle = ScopedHandle::open(fs, &input.for_win32_calls(), true)?;
        match fs.final_path_by_handle(handle.get()) {
            Ok(path) => return Ok(prefix::strip_prefix(&path)),
            Err(ResolveError::UnsupportedLevel) => {}
            Err(e) => return Err(e),
        }
    }

    // absolute form with "." and ".." collapsed
    let mut path = fs.full_path_name(&input.to_string())?;

    // eliminate all symbolic links
    if resolve_links {
        path = resolve_all_links(fs, &WinPath::parse(&path)?)?;
    }

    // Rebuild the path component by component, taking the exact case of
    // every element from the directory that holds it.
    let mut result = String::with_capacity(path.len());
    let start = copy_root(&path, input, &mut result)?;

    // check that the root directory exists
    fs.probe_exists(&format!("{result}*"))?;

    let mut curr = start;
    while curr < path.len() {
        let end = match path[curr..].find('\\') {
            Some(i) => curr + i,
            None => path.len(),
        };
        let search = format!("{result}{}", &path[curr..end]);
        let exact = fs.find_first(&prefix::add_long_path_prefix_if_needed(&search))?;
        result.push_str(&exact);
        if end != path.len() {
            result.push('\\');
        }
        curr = end + 1;
    }

    Ok(result)
}

/// Copy the root of `path` into `out` and return the offset where the
/// name components begin. The drive letter is upper-cased; a UNC root
/// keeps host and share as given.
fn copy_root(path: &str, input: &WinPath, out: &mut String) -> Result<usize, ResolveError> {
    let bytes = path.as_bytes();

    if bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\' {
        // drive specifier
        out.push(bytes[0].to_ascii_uppercase() as char);
        out.push_str(":\\");
        return Ok(3);
    }

    if path.starts_with("\\\\") {
        // UNC pathname, begins with \\host\share
        let last = path.len() - 1;
        let pos = match path[2..].find('\\') {
            // no share name, or it was collapsed away
            None => return Err(ResolveError::InvalidShareName(input.to_string())),
            Some(i) if 2 + i == last => {
                return Err(ResolveError::InvalidShareName(input.to_string()))
            }
            Some(i) => 2 + i,
        };
        return match path[pos + 1..].find('\\') {
            Some(i) => {
                let next = pos + 1 + i;
                if next == pos + 1 {
                    // empty share segment
                    return Err(ResolveError::InvalidShareName(input.to_string()));
                }
                out.push_str(&path[..=next]);
                Ok(next + 1)
            }
            None => {
                out.push_str(path);
                out.push('\\');
                Ok(path.len())
            }
        };
    }

    // a full path always begins with a drive or UNC root; anything else is
    // an internal consistency failure
    Err(ResolveError::PathFormat(path.to_string()))
}
