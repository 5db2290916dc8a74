/// Substring a repository reference must contain to be accepted by default.
pub const DEFAULT_HOST_MARKER: &str = "github.com";

/// The only branch that is fetched when the caller does not name one.
pub const DEFAULT_REF: &str = "main";

/// Version-control suffix stripped from repository references.
pub const GIT_SUFFIX: &str = ".git";

/// Path segments between the repository URL and the archive file name.
pub const ARCHIVE_PATH: &str = "archive/refs/heads";

/// Prefix of downloaded archives inside the temp directory.
pub const ARTIFACT_PREFIX: &str = ".repo-archive-";

/// Prefix of the scratch directories archives are unpacked into.
pub const SCRATCH_PREFIX: &str = ".repo-archive-extract-";
