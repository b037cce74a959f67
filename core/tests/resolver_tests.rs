// Integration tests for the link resolution engine
//
// Every scenario runs against the in-memory backend, which hands the
// engine real reparse buffers and keeps open-handle accounting so the
// scoped-release rule can be asserted on success and failure paths alike.

use wincanon_core::error::ResolveError;
use wincanon_core::fs::{FileAttributes, FileSystemOps};
use wincanon_core::memfs::{MemFileSystem, MemHandle};
use wincanon_core::path::WinPath;
use wincanon_core::resolver::{final_path, read_link, real_path, resolve_all_links};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn parse(path: &str) -> WinPath {
    WinPath::parse(path).expect("test path parses")
}

/// Delegating backend with fault injection, for exercising the engine's
/// internal-consistency and corruption branches.
struct FaultyFs<'a> {
    inner: &'a MemFileSystem,
    full_path_override: Option<String>,
    corrupt_reparse: bool,
}

impl<'a> FaultyFs<'a> {
    fn new(inner: &'a MemFileSystem) -> Self {
        FaultyFs {
            inner,
            full_path_override: None,
            corrupt_reparse: false,
        }
    }
}

impl FileSystemOps for FaultyFs<'_> {
    type Handle = MemHandle;

    fn supports_links(&self) -> bool {
        self.inner.supports_links()
    }

    fn open_for_attribute_access(
        &self,
        path: &str,
        follow_links: bool,
    ) -> Result<MemHandle, ResolveError> {
        self.inner.open_for_attribute_access(path, follow_links)
    }

    fn query_attributes(&self, handle: &MemHandle) -> Result<FileAttributes, ResolveError> {
        self.inner.query_attributes(handle)
    }

    fn read_reparse_buffer(&self, handle: &MemHandle) -> Result<Vec<u8>, ResolveError> {
        if self.corrupt_reparse {
            // a buffer cut off inside the header
            return Ok(vec![0x0C, 0x00, 0x00, 0xA0, 0x04]);
        }
        self.inner.read_reparse_buffer(handle)
    }

    fn final_path_by_handle(&self, handle: &MemHandle) -> Result<String, ResolveError> {
        self.inner.final_path_by_handle(handle)
    }

    fn full_path_name(&self, path: &str) -> Result<String, ResolveError> {
        match &self.full_path_override {
            Some(output) => Ok(output.clone()),
            None => self.inner.full_path_name(path),
        }
    }

    fn find_first(&self, pattern: &str) -> Result<String, ResolveError> {
        self.inner.find_first(pattern)
    }

    fn close(&self, handle: MemHandle) {
        self.inner.close(handle)
    }
}

#[test]
fn test_real_path_idempotent_on_canonical_path() {
    init_logging();
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data\Reports").unwrap();

    let resolved = real_path(&fs, &parse(r"C:\Data\Reports"), true).unwrap();
    assert_eq!(resolved, r"C:\Data\Reports");

    // resolving the result again changes nothing
    let again = real_path(&fs, &parse(&resolved), true).unwrap();
    assert_eq!(again, resolved);
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_real_path_recovers_exact_case() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data\Reports").unwrap();

    let resolved = real_path(&fs, &parse(r"c:\data\reports"), true).unwrap();
    assert_eq!(resolved, r"C:\Data\Reports");

    // links disabled takes the same lookup path
    let resolved = real_path(&fs, &parse(r"C:\DATA\REPORTS"), false).unwrap();
    assert_eq!(resolved, r"C:\Data\Reports");
}

#[test]
fn test_real_path_collapses_dot_components() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data").unwrap();
    fs.add_dir(r"C:\Archive").unwrap();

    let resolved = real_path(&fs, &parse(r"C:\Data\..\archive\."), true).unwrap();
    assert_eq!(resolved, r"C:\Archive");
}

#[test]
fn test_real_path_absolutizes_relative_input() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data\Notes").unwrap();
    fs.set_current_directory(r"C:\Data");

    let resolved = real_path(&fs, &parse("notes"), true).unwrap();
    assert_eq!(resolved, r"C:\Data\Notes");
}

#[test]
fn test_real_path_resolves_relative_link() {
    init_logging();
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\data\link", r"..\archive").unwrap();

    let resolved = real_path(&fs, &parse(r"C:\data\link"), true).unwrap();
    assert_eq!(resolved, r"C:\Archive");
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_real_path_keeps_remainder_after_link() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_file(r"C:\Archive\Notes.txt").unwrap();
    fs.add_symlink(r"C:\data\link", r"C:\Archive").unwrap();

    let resolved = real_path(&fs, &parse(r"C:\data\link\notes.txt"), true).unwrap();
    assert_eq!(resolved, r"C:\Archive\Notes.txt");
}

#[test]
fn test_real_path_without_link_resolution_keeps_link_name() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\data\Link", r"..\archive").unwrap();

    let resolved = real_path(&fs, &parse(r"C:\data\link"), false).unwrap();
    assert_eq!(resolved, r"C:\data\Link");
}

#[test]
fn test_real_path_uses_authoritative_final_path() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\data\link", r"..\archive").unwrap();
    fs.set_final_path_supported(true);

    let resolved = real_path(&fs, &parse(r"C:\data\link"), true).unwrap();
    assert_eq!(resolved, r"C:\Archive");
    assert_eq!(fs.open_handle_count(), 0);
}

fn build_chain(fs: &MemFileSystem, length: u32) {
    fs.add_dir(r"C:\Real").unwrap();
    for i in 1..=length {
        let target = if i == length {
            r"C:\Real".to_string()
        } else {
            format!(r"C:\link{:02}", i + 1)
        };
        fs.add_symlink(&format!(r"C:\link{i:02}"), &target).unwrap();
    }
}

#[test]
fn test_real_path_chain_at_hop_limit_resolves() {
    init_logging();
    let fs = MemFileSystem::new();
    build_chain(&fs, 32);

    let resolved = real_path(&fs, &parse(r"C:\link01"), true).unwrap();
    assert_eq!(resolved, r"C:\Real");
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_real_path_chain_over_hop_limit_fails() {
    let fs = MemFileSystem::new();
    build_chain(&fs, 33);

    let err = real_path(&fs, &parse(r"C:\link01"), true).unwrap_err();
    assert!(matches!(&err, ResolveError::TooManyLinks(p) if p == r"C:\link01"));
    // handles are released on the failure path too
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_resolve_all_links_self_cycle_counts_exact_hops() {
    let fs = MemFileSystem::new();
    fs.add_symlink(r"C:\loop", r"C:\loop").unwrap();

    let err = resolve_all_links(&fs, &parse(r"C:\loop")).unwrap_err();
    assert!(matches!(&err, ResolveError::TooManyLinks(p) if p == r"C:\loop"));

    // 32 substitutions were allowed; the 33rd detection fails. One open
    // per detection, every one of them released.
    assert_eq!(fs.total_opens(), 33);
    assert_eq!(fs.total_closes(), 33);
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_real_path_self_cycle_fails() {
    let fs = MemFileSystem::new();
    fs.add_symlink(r"C:\loop", r"C:\loop").unwrap();

    let err = real_path(&fs, &parse(r"C:\loop"), true).unwrap_err();
    assert!(matches!(err, ResolveError::TooManyLinks(_)));
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_real_path_passes_through_not_found() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data").unwrap();

    let err = real_path(&fs, &parse(r"C:\missing\x"), true).unwrap_err();
    assert!(matches!(&err, ResolveError::NotFound(p) if p.contains("missing")));

    let err = real_path(&fs, &parse(r"C:\missing"), false).unwrap_err();
    assert!(matches!(&err, ResolveError::NotFound(p) if p.contains("missing")));
}

#[test]
fn test_real_path_missing_root_fails() {
    let fs = MemFileSystem::new();

    let err = real_path(&fs, &parse(r"D:\anything"), false).unwrap_err();
    assert!(matches!(err, ResolveError::NotFound(_)));
}

#[test]
fn test_real_path_unc() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"\\host\share\Docs").unwrap();

    let resolved = real_path(&fs, &parse(r"\\host\share\docs"), false).unwrap();
    assert_eq!(resolved, r"\\host\share\Docs");
}

#[test]
fn test_real_path_rejects_degenerate_normalized_output() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data").unwrap();

    // normalization reporting a root-less string is an internal
    // consistency failure
    let mut faulty = FaultyFs::new(&fs);
    faulty.full_path_override = Some("bogus".to_string());
    let err = real_path(&faulty, &parse(r"C:\Data"), false).unwrap_err();
    assert!(matches!(err, ResolveError::PathFormat(_)));

    // a UNC root whose share was collapsed away
    let mut faulty = FaultyFs::new(&fs);
    faulty.full_path_override = Some(r"\\host\".to_string());
    let err = real_path(&faulty, &parse(r"C:\Data"), false).unwrap_err();
    assert!(matches!(err, ResolveError::InvalidShareName(_)));
}

#[test]
fn test_real_path_long_components_use_prefixed_probes() {
    let fs = MemFileSystem::new();
    let a = "A".repeat(120);
    let b = "B".repeat(120);
    let c = "C".repeat(120);
    fs.add_dir(&format!(r"C:\{a}\{b}\{c}")).unwrap();

    let input = format!(r"C:\{}\{}\{}", a.to_lowercase(), b.to_lowercase(), c.to_lowercase());
    let resolved = real_path(&fs, &parse(&input), true).unwrap();
    assert_eq!(resolved, format!(r"C:\{a}\{b}\{c}"));
}

#[test]
fn test_final_path_returns_input_when_not_following() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_symlink(r"C:\data\link", r"C:\data").unwrap();

    let path = final_path(&fs, &parse(r"C:\data\link"), false).unwrap();
    assert_eq!(path, r"C:\data\link");
}

#[test]
fn test_final_path_returns_input_for_non_link() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data").unwrap();

    let path = final_path(&fs, &parse(r"C:\Data"), true).unwrap();
    assert_eq!(path, r"C:\Data");
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_final_path_returns_input_when_links_unsupported() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_symlink(r"C:\data\link", r"C:\data").unwrap();
    fs.set_supports_links(false);

    let path = final_path(&fs, &parse(r"C:\data\link"), true).unwrap();
    assert_eq!(path, r"C:\data\link");
}

#[test]
fn test_final_path_uses_authoritative_query() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\link", r"C:\Archive").unwrap();
    fs.set_final_path_supported(true);

    let path = final_path(&fs, &parse(r"C:\link"), true).unwrap();
    // the marker from the native-style answer is stripped
    assert_eq!(path, r"C:\Archive");
}

#[test]
fn test_final_path_manual_walk() {
    init_logging();
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\link", r"C:\Archive").unwrap();

    // authoritative query unsupported, so the walk resolves by hand
    let path = final_path(&fs, &parse(r"C:\link"), true).unwrap();
    assert_eq!(path, r"C:\Archive");
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_final_path_manual_walk_relative_target() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\data").unwrap();
    fs.add_dir(r"C:\archive").unwrap();
    fs.add_symlink(r"C:\data\link", r"..\archive").unwrap();

    let path = final_path(&fs, &parse(r"C:\data\link"), true).unwrap();
    // the walk stops at the first non-link; the form is native-call
    // ready, not canonical
    assert_eq!(path, r"C:\data\..\archive");
}

#[test]
fn test_final_path_relative_input_absolutized_in_walk() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\link", r"C:\Archive").unwrap();

    // a bare link name has no parent until the walk absolutizes it
    let path = final_path(&fs, &parse("link"), true).unwrap();
    assert_eq!(path, r"C:\Archive");
}

#[test]
fn test_final_path_chain_at_hop_limit() {
    let fs = MemFileSystem::new();
    build_chain(&fs, 32);

    let path = final_path(&fs, &parse(r"C:\link01"), true).unwrap();
    assert_eq!(path, r"C:\Real");
}

#[test]
fn test_final_path_chain_over_hop_limit() {
    let fs = MemFileSystem::new();
    build_chain(&fs, 33);

    let err = final_path(&fs, &parse(r"C:\link01"), true).unwrap_err();
    assert!(matches!(&err, ResolveError::TooManyLinks(p) if p == r"C:\link01"));
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_read_link() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Data").unwrap();
    fs.add_symlink(r"C:\link", r"..\archive").unwrap();

    assert_eq!(read_link(&fs, r"C:\link").unwrap(), r"..\archive");

    let err = read_link(&fs, r"C:\Data").unwrap_err();
    assert!(matches!(&err, ResolveError::NotALink(p) if p == r"C:\Data"));
    assert_eq!(fs.open_handle_count(), 0);
}

#[test]
fn test_corrupted_reparse_buffer_releases_handles() {
    let fs = MemFileSystem::new();
    fs.add_dir(r"C:\Archive").unwrap();
    fs.add_symlink(r"C:\link", r"C:\Archive").unwrap();

    let mut faulty = FaultyFs::new(&fs);
    faulty.corrupt_reparse = true;

    let err = final_path(&faulty, &parse(r"C:\link"), true).unwrap_err();
    assert!(matches!(err, ResolveError::CorruptedLink));
    assert_eq!(fs.open_handle_count(), 0);

    let err = real_path(&faulty, &parse(r"C:\link"), true).unwrap_err();
    assert!(matches!(err, ResolveError::CorruptedLink));
    assert_eq!(fs.open_handle_count(), 0);
}
