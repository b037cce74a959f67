// External filesystem collaborator interface
//
// The resolution engine performs no native calls itself; it drives an
// implementation of `FileSystemOps` supplied by the host. Implementations
// exist for real Windows volumes (wincanon-platform) and for an in-memory
// tree (memfs).

use crate::error::ResolveError;
use serde::Serialize;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x80;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;

/// Attributes of one open filesystem object.
///
/// `is_symbolic_link` is true only for reparse points carrying the
/// symbolic-link tag; mount points and vendor reparse data do not count.
#[derive(Debug, Clone, Serialize)]
pub struct FileAttributes {
    pub is_symbolic_link: bool,
    pub is_directory: bool,
    pub attributes: u32,
}

/// Operations the engine needs from a filesystem.
///
/// All calls are synchronous and blocking. There is an inherent
/// time-of-check-to-time-of-use hazard between observing a name and
/// opening it again; the engine therefore only trusts attributes obtained
/// from a handle it opened itself, never attributes re-derived from a
/// previously observed name.
pub trait FileSystemOps {
    type Handle;

    /// Whether this filesystem instance can carry reparse-point symbolic
    /// links. A per-instance property, not a process-wide one.
    fn supports_links(&self) -> bool;

    /// Open a handle good for attribute and reparse inspection only.
    /// With `follow_links` false the handle binds to a link itself rather
    /// than to its target.
    fn open_for_attribute_access(
        &self,
        path: &str,
        follow_links: bool,
    ) -> Result<Self::Handle, ResolveError>;

    fn query_attributes(&self, handle: &Self::Handle) -> Result<FileAttributes, ResolveError>;

    /// Raw reparse buffer attached to the object, or
    /// `ResolveError::NotAReparsePoint` when there is none.
    fn read_reparse_buffer(&self, handle: &Self::Handle) -> Result<Vec<u8>, ResolveError>;

    /// The filesystem's own normalized final path for the object, or
    /// `ResolveError::UnsupportedLevel` when the query is not available at
    /// this filesystem level.
    fn final_path_by_handle(&self, handle: &Self::Handle) -> Result<String, ResolveError>;

    /// Lexical "." and ".." collapse. Relative input is absolutized
    /// against the current directory first.
    fn full_path_name(&self, path: &str) -> Result<String, ResolveError>;

    /// Exact on-disk name of the single directory entry matching
    /// `pattern`. The lookup is case-insensitive; the returned name
    /// carries the on-disk casing. The entry for a link is the link
    /// itself, not its target.
    fn find_first(&self, pattern: &str) -> Result<String, ResolveError>;

    /// Existence probe variant of `find_first`.
    fn probe_exists(&self, pattern: &str) -> Result<(), ResolveError> {
        self.find_first(pattern).map(|_| ())
    }

    fn close(&self, handle: Self::Handle);
}

/// Scoped handle: opened on construction, released exactly once when the
/// scope exits, on success and failure paths alike.
pub struct ScopedHandle<'a, F: FileSystemOps> {
    fs: &'a F,
    handle: Option<F::Handle>,
}

impl<'a, F: FileSystemOps> ScopedHandle<'a, F> {
    pub fn open(fs: &'a F, path: &str, follow_links: bool) -> Result<Self, ResolveError> {
        let handle = fs.open_for_attribute_access(path, follow_links)?;
        Ok(ScopedHandle {
            fs,
            handle: Some(handle),
        })
    }

    pub fn get(&self) -> &F::Handle {
        // only ever None inside drop
        self.handle.as_ref().expect("scoped handle already released")
    }
}

impl<F: FileSystemOps> Drop for ScopedHandle<'_, F> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.fs.close(handle);
        }
    }
}
