use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Not a symbolic link: {0}")]
    NotALink(String),

    #[error("Symbolic link corrupted")]
    CorruptedLink,

    #[error("Symbolic link target is invalid")]
    InvalidLinkTarget,

    #[error("Too many links: {0}")]
    TooManyLinks(String),

    #[error("UNC has invalid share: {0}")]
    InvalidShareName(String),

    #[error("Path type not recognized: {0}")]
    PathFormat(String),

    #[error("Not a reparse point")]
    NotAReparsePoint,

    #[error("Final path not supported at this filesystem level")]
    UnsupportedLevel,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl ResolveError {
    /// Whether a caller may treat the failure as "the file is already
    /// canonical" rather than aborting.
    pub fn is_not_a_link(&self) -> bool {
        matches!(self, ResolveError::NotALink(_) | ResolveError::NotAReparsePoint)
    }
}
