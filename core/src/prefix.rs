// Long-path and NT object namespace prefix handling
//
// Two marker prefixes appear on Windows path strings: "\\?\" on resolved
// or over-length paths handed to Win32 calls, and "\??\" on the substitute
// name stored inside a symbolic-link reparse point. Both carry a "UNC\"
// variant for network paths that must be rewritten to the usual
// double-backslash lead rather than dropped.

/// Paths longer than this get the long-path marker before being handed to
/// the filesystem (MAX_PATH minus the reserved 8.3 suffix room).
pub const LONG_PATH_THRESHOLD: usize = 248;

const VERBATIM_PREFIX: &str = r"\\?\";
const VERBATIM_UNC_PREFIX: &str = r"\\?\UNC\";
const NT_OBJECT_PREFIX: &str = r"\??\";
const NT_OBJECT_UNC_PREFIX: &str = r"\??\UNC\";

/// Strip the long-path or symbolic-link-target marker from a path.
///
/// Paths carrying no recognized marker pass through unchanged. Double
/// prefixing ("\\?\\\?\...") is a caller error and is not handled here.
pub fn strip_prefix(path: &str) -> String {
    // marker for resolved/long paths
    if let Some(rest) = path.strip_prefix(VERBATIM_PREFIX) {
        return match path.strip_prefix(VERBATIM_UNC_PREFIX) {
            Some(unc) => format!(r"\\{unc}"),
            None => rest.to_string(),
        };
    }

    // marker for the target of a symbolic link
    if let Some(rest) = path.strip_prefix(NT_OBJECT_PREFIX) {
        return match path.strip_prefix(NT_OBJECT_UNC_PREFIX) {
            Some(unc) => format!(r"\\{unc}"),
            None => rest.to_string(),
        };
    }

    path.to_string()
}

/// Add the long-path marker when `path` is too long for an unprefixed
/// lookup. Used only on strings issued to the filesystem, never on a
/// canonical result.
pub fn add_long_path_prefix_if_needed(path: &str) -> String {
    if path.len() > LONG_PATH_THRESHOLD {
        if let Some(rest) = path.strip_prefix(r"\\") {
            format!(r"\\?\UNC\{rest}")
        } else {
            format!(r"\\?\{path}")
        }
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_verbatim_prefix() {
        assert_eq!(strip_prefix(r"\\?\C:\Users\Test"), r"C:\Users\Test");
        assert_eq!(strip_prefix(r"\\?\UNC\server\share\x"), r"\\server\share\x");
    }

    #[test]
    fn test_strip_nt_object_prefix() {
        assert_eq!(strip_prefix(r"\??\C:\Users\Test"), r"C:\Users\Test");
        assert_eq!(strip_prefix(r"\??\UNC\server\share"), r"\\server\share");
    }

    #[test]
    fn test_strip_passthrough() {
        assert_eq!(strip_prefix(r"C:\Users\Test"), r"C:\Users\Test");
        assert_eq!(strip_prefix(r"\\server\share"), r"\\server\share");
        assert_eq!(strip_prefix(r"..\relative"), r"..\relative");
    }

    #[test]
    fn test_add_prefix_below_threshold() {
        assert_eq!(add_long_path_prefix_if_needed(r"C:\short"), r"C:\short");
    }

    #[test]
    fn test_add_prefix_round_trip() {
        let long = format!(r"C:\{}", "a".repeat(LONG_PATH_THRESHOLD));
        let prefixed = add_long_path_prefix_if_needed(&long);
        assert!(prefixed.starts_with(r"\\?\"));
        assert_eq!(strip_prefix(&prefixed), long);

        let unc = format!(r"\\server\share\{}", "b".repeat(LONG_PATH_THRESHOLD));
        let prefixed = add_long_path_prefix_if_needed(&unc);
        assert!(prefixed.starts_with(r"\\?\UNC\"));
        assert_eq!(strip_prefix(&prefixed), unc);
    }
}
